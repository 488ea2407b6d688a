// Integration tests for the segment writer state machine
//
// These drive the writer directly with fabricated samples and timestamps,
// the way the router does from the stream queues, so state transitions,
// timestamp rebasing, the duration watchdog, and segment durations can be
// asserted deterministically without real devices or sleeps.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use tokio::sync::broadcast;

use retake::capture::config::{AudioConfig, VideoConfig};
use retake::capture::sample::{
    AudioBlock, AudioFormat, PixelFormat, StreamKind, VideoFormat, VideoFrame,
};
use retake::executor::QueueSet;
use retake::muxer::encoder::{
    passthrough_audio_factory, EncodedFrame, VideoCodecParams, VideoEncoder,
};
use retake::recorder::events::{CaptureEvent, EventHub};
use retake::recorder::state::RecordingState;
use retake::recorder::writer::{SegmentWriter, WriterOptions};
use retake::utils::error::{CaptureError, WriterStateError};

struct Harness {
    queues: Arc<QueueSet>,
    writer: Arc<SegmentWriter>,
    events: broadcast::Receiver<CaptureEvent>,
    _dir: tempfile::TempDir,
}

impl Harness {
    fn new(max_duration: Option<Duration>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let queues = QueueSet::new();
        let hub = EventHub::new(queues.clone());
        let events = hub.subscribe();
        let writer = SegmentWriter::new(
            queues.clone(),
            hub,
            WriterOptions {
                directory: dir.path().join("takes"),
                video_enabled: true,
                audio_enabled: true,
                capture_capable: true,
                max_duration,
            },
        );
        Self {
            queues,
            writer,
            events,
            _dir: dir,
        }
    }

    fn prepare_inputs(&self) {
        self.writer
            .prepare_video_input(
                VideoFormat::packed(64, 48, PixelFormat::Bgra8),
                VideoConfig::default(),
            )
            .unwrap();
        self.writer
            .prepare_audio_input(
                AudioFormat {
                    sample_rate: 44_100,
                    channels: 1,
                },
                AudioConfig::default(),
            )
            .unwrap();
    }

    /// What the router does on the video queue for each accepted frame.
    /// The barrier after `begin_segment` keeps this helper deterministic
    /// where the real router tolerates the open-in-flight window.
    fn push_video(&self, at: Duration) {
        if self.writer.state() == RecordingState::Recording && !self.writer.container_open() {
            self.writer.begin_segment();
            self.queues.write().run_on_sync(|| {});
        }
        let frame = VideoFrame {
            format: VideoFormat::packed(64, 48, PixelFormat::Bgra8),
            data: Bytes::from(vec![0u8; 64 * 48 * 4]),
        };
        self.writer.append_video(frame, at);
    }

    fn push_audio(&self, at: Duration) {
        let block = AudioBlock {
            format: AudioFormat {
                sample_rate: 44_100,
                channels: 1,
            },
            data: Bytes::from(vec![0u8; 2 * 2205]),
            frames: 2205, // 50ms at 44.1kHz
        };
        self.writer.append_audio(block, at);
    }

    /// Wait until every queued container operation and event has run.
    fn drain(&self) {
        self.queues.write().run_on_sync(|| {});
        self.queues.completion().run_on_sync(|| {});
    }

    fn events(&mut self) -> Vec<CaptureEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

#[test]
fn state_machine_guards_transitions() -> Result<()> {
    let h = Harness::new(None);

    assert_eq!(h.writer.state(), RecordingState::Idle);

    // Stop outside Recording is a no-op.
    h.writer.stop_recording();
    assert_eq!(h.writer.state(), RecordingState::Idle);

    // Start refuses until both encoder inputs exist.
    let err = h.writer.start_recording().unwrap_err();
    assert_eq!(
        err,
        CaptureError::WriterState(WriterStateError::InputNotPrepared(StreamKind::Video))
    );

    h.prepare_inputs();
    h.writer.start_recording()?;
    assert_eq!(h.writer.state(), RecordingState::Recording);

    let err = h.writer.start_recording().unwrap_err();
    assert_eq!(
        err,
        CaptureError::WriterState(WriterStateError::AlreadyRecording)
    );
    Ok(())
}

#[test]
fn refuses_to_start_in_a_non_capturing_environment() {
    let dir = tempfile::tempdir().unwrap();
    let queues = QueueSet::new();
    let hub = EventHub::new(queues.clone());
    let writer = SegmentWriter::new(
        queues,
        hub,
        WriterOptions {
            directory: dir.path().join("takes"),
            video_enabled: true,
            audio_enabled: true,
            capture_capable: false,
            max_duration: None,
        },
    );
    assert_eq!(
        writer.start_recording().unwrap_err(),
        CaptureError::WriterState(WriterStateError::NotCaptureCapable)
    );
}

#[test]
fn stop_without_samples_reports_no_open_segment_and_returns_to_idle() -> Result<()> {
    let mut h = Harness::new(None);
    h.prepare_inputs();
    h.writer.start_recording()?;
    h.writer.stop_recording();
    h.drain();

    assert_eq!(h.writer.state(), RecordingState::Idle);
    assert_eq!(h.writer.segment_count(), 0);
    assert!(h.events().iter().any(|e| matches!(
        e,
        CaptureEvent::Error {
            error: CaptureError::WriterState(WriterStateError::NoOpenSegment)
        }
    )));
    Ok(())
}

#[test]
fn timestamps_are_rebased_to_the_segment_start() -> Result<()> {
    let mut h = Harness::new(None);
    h.prepare_inputs();

    // Audio before any video sample in the segment is rejected outright.
    h.writer.start_recording()?;
    h.push_audio(ms(400));
    h.drain();
    assert_eq!(h.writer.total_duration(), Duration::ZERO);

    // First video sample at T0 = 500ms becomes the zero point.
    h.push_video(ms(500));
    h.push_video(ms(620));
    h.drain();
    assert_eq!(h.writer.total_duration(), ms(120));

    // Audio behind the offset is an ordering error; audio after it muxes.
    h.push_audio(ms(450));
    h.push_audio(ms(560));
    h.drain();
    let events = h.events();
    assert!(events.iter().any(|e| matches!(
        e,
        CaptureEvent::Error {
            error: CaptureError::Ordering(_)
        }
    )));

    h.writer.stop_recording();
    h.drain();
    assert_eq!(h.writer.state(), RecordingState::Idle);

    let segments = h.writer.segments_snapshot();
    assert_eq!(segments.len(), 1);
    let duration = segments[0].duration.unwrap();
    assert!(
        duration >= ms(100) && duration <= ms(300),
        "expected ~150ms, got {duration:?}"
    );
    Ok(())
}

#[test]
fn watchdog_stops_recording_at_the_maximum_duration() -> Result<()> {
    let mut h = Harness::new(Some(ms(200)));
    h.prepare_inputs();
    h.writer.start_recording()?;

    for i in 0..12 {
        h.push_video(ms(i * 33));
    }
    h.drain();

    assert_eq!(h.writer.state(), RecordingState::Idle);
    assert_eq!(h.writer.segment_count(), 1);
    assert!(h.writer.total_duration() >= ms(200));

    // Only the samples up to the ceiling were muxed.
    let written = h
        .events()
        .iter()
        .filter(|e| matches!(e, CaptureEvent::SampleWritten { .. }))
        .count();
    assert!(written <= 8, "muxed {written} samples past the ceiling");

    // And the ceiling now refuses another start.
    assert_eq!(
        h.writer.start_recording().unwrap_err(),
        CaptureError::WriterState(WriterStateError::MaximumDurationReached)
    );
    Ok(())
}

#[test]
fn two_takes_produce_two_segments_with_summed_duration() -> Result<()> {
    let mut h = Harness::new(None);
    h.prepare_inputs();

    // First take: 3 seconds of 10fps samples.
    h.writer.start_recording()?;
    for i in 0..=30 {
        h.push_video(ms(i * 100));
    }
    h.writer.stop_recording();
    h.drain();

    // Second take starts later on the device clock: 2 seconds.
    h.writer.start_recording()?;
    for i in 0..=20 {
        h.push_video(ms(5000 + i * 100));
    }
    h.writer.stop_recording();
    h.drain();

    let segments = h.writer.segments_snapshot();
    assert_eq!(segments.len(), 2);

    let first = segments[0].duration.unwrap();
    let second = segments[1].duration.unwrap();
    assert!(
        first >= ms(2900) && first <= ms(3300),
        "first take {first:?} not ~3s"
    );
    assert!(
        second >= ms(1900) && second <= ms(2300),
        "second take {second:?} not ~2s"
    );

    let total = h.writer.total_duration();
    assert_eq!(total, first + second);

    let finishes = h
        .events()
        .iter()
        .filter(|e| matches!(e, CaptureEvent::SegmentFinished { .. }))
        .count();
    assert_eq!(finishes, 2);
    Ok(())
}

#[test]
fn remove_is_rejected_while_a_segment_is_open() -> Result<()> {
    let h = Harness::new(None);
    h.prepare_inputs();

    h.writer.start_recording()?;
    for i in 0..5 {
        h.push_video(ms(i * 33));
    }
    h.drain();
    h.writer.stop_recording();
    h.drain();
    assert_eq!(h.writer.segment_count(), 1);

    h.writer.start_recording()?;
    h.push_video(ms(1000));
    h.drain();

    let err = h.writer.remove_segment(0, true).unwrap_err();
    assert_eq!(
        err,
        CaptureError::WriterState(WriterStateError::RemoveWhileWriting)
    );
    assert_eq!(h.writer.segment_count(), 1);

    h.writer.stop_recording();
    h.drain();
    assert_eq!(h.writer.segment_count(), 2);
    assert!(h.writer.remove_segment(0, true)?.is_some());
    assert_eq!(h.writer.segment_count(), 1);
    Ok(())
}

#[test]
fn reset_discards_the_open_container_and_unprepares_inputs() -> Result<()> {
    let h = Harness::new(None);
    h.prepare_inputs();

    h.writer.start_recording()?;
    for i in 0..5 {
        h.push_video(ms(i * 33));
    }
    h.drain();
    let directory = h.writer.segment_directory();
    assert!(directory.exists());

    h.writer.reset();

    assert_eq!(h.writer.state(), RecordingState::Idle);
    assert_eq!(h.writer.segment_count(), 0);
    assert!(!h.writer.video_input_prepared());
    assert!(!h.writer.audio_input_prepared());
    assert!(!directory.exists());
    Ok(())
}

struct NeverReadyEncoder;

impl VideoEncoder for NeverReadyEncoder {
    fn is_ready(&self) -> bool {
        false
    }

    fn codec_params(&self) -> VideoCodecParams {
        VideoCodecParams {
            seq_param_set: vec![0x67],
            pic_param_set: vec![0x68],
        }
    }

    fn encode(&mut self, frame: &VideoFrame) -> retake::CaptureResult<EncodedFrame> {
        Ok(EncodedFrame {
            data: frame.data.clone(),
            is_keyframe: true,
            duration_hint: None,
        })
    }
}

#[test]
fn encoder_backpressure_drops_the_sample_without_stopping() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let queues = QueueSet::new();
    let hub = EventHub::new(queues.clone());
    let mut events = hub.subscribe();
    let writer = SegmentWriter::with_encoders(
        queues.clone(),
        hub,
        WriterOptions {
            directory: dir.path().join("takes"),
            video_enabled: true,
            audio_enabled: false,
            capture_capable: true,
            max_duration: None,
        },
        Box::new(|_| Box::new(NeverReadyEncoder) as Box<dyn VideoEncoder>),
        passthrough_audio_factory(),
    );

    writer.prepare_video_input(
        VideoFormat::packed(64, 48, PixelFormat::Bgra8),
        VideoConfig::default(),
    )?;
    writer.start_recording()?;
    writer.begin_segment();
    writer.append_video(
        VideoFrame {
            format: VideoFormat::packed(64, 48, PixelFormat::Bgra8),
            data: Bytes::from(vec![0u8; 64 * 48 * 4]),
        },
        ms(0),
    );
    queues.write().run_on_sync(|| {});
    queues.completion().run_on_sync(|| {});

    // Still recording: backpressure is per-sample, never fatal.
    assert_eq!(writer.state(), RecordingState::Recording);
    assert_eq!(writer.total_duration(), Duration::ZERO);

    let mut saw_backpressure = false;
    while let Ok(event) = events.try_recv() {
        if matches!(
            event,
            CaptureEvent::Error {
                error: CaptureError::Backpressure(StreamKind::Video)
            }
        ) {
            saw_backpressure = true;
        }
    }
    assert!(saw_backpressure);
    Ok(())
}
