//! Segment writer
//!
//! The recording state machine and the driver of the segmented muxer.
//! Callers interact from the capture/video/audio queues; everything that
//! touches a container runs on the write queue, hopped to internally, so
//! container operations execute in the order the samples arrived.
//!
//! Locking discipline: `state` is the single exclusion point for the
//! recording state machine (mutated by start/stop callers and the duration
//! watchdog). The encoder inputs are prepared exactly once via a
//! synchronous hand-off to the capture queue and flagged through write-once
//! atomics, so readiness checks need no lock. The segment collection is
//! mutated on the write queue only; other queues take its lock briefly for
//! reads.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::capture::config::{AudioConfig, ResolvedAudioSettings, ResolvedVideoSettings, VideoConfig};
use crate::capture::sample::{AudioBlock, AudioFormat, StreamKind, VideoFormat, VideoFrame};
use crate::executor::QueueSet;
use crate::muxer::encoder::{
    passthrough_audio_factory, passthrough_video_factory, AudioEncoder, AudioEncoderFactory,
    VideoEncoder, VideoEncoderFactory,
};
use crate::muxer::mp4::{AudioTrackSpec, SegmentMuxer, VideoTrackSpec};
use crate::recorder::events::{CaptureEvent, EventHub};
use crate::recorder::segments::{Segment, SegmentCollection};
use crate::recorder::state::RecordingState;
use crate::utils::error::{CaptureError, CaptureResult, WriterStateError};

/// Construction parameters for a [`SegmentWriter`].
pub struct WriterOptions {
    /// Directory the segment files live in.
    pub directory: PathBuf,
    pub video_enabled: bool,
    pub audio_enabled: bool,
    /// False refuses every recording start (non-capturing environment).
    pub capture_capable: bool,
    /// Hard ceiling on total recorded time across all segments.
    pub max_duration: Option<Duration>,
}

struct VideoInput {
    settings: ResolvedVideoSettings,
    encoder: Box<dyn VideoEncoder>,
}

struct AudioInput {
    settings: ResolvedAudioSettings,
    encoder: Box<dyn AudioEncoder>,
}

/// Recording state machine and segmented muxer driver.
pub struct SegmentWriter {
    queues: Arc<QueueSet>,
    events: EventHub,

    video_enabled: bool,
    audio_enabled: bool,
    capture_capable: bool,

    state: Mutex<RecordingState>,
    max_duration: Mutex<Option<Duration>>,

    video_input: Mutex<Option<VideoInput>>,
    audio_input: Mutex<Option<AudioInput>>,
    video_prepared: AtomicBool,
    audio_prepared: AtomicBool,

    container: Mutex<Option<SegmentMuxer>>,
    segments: Mutex<SegmentCollection>,

    video_encoder_factory: VideoEncoderFactory,
    audio_encoder_factory: AudioEncoderFactory,
}

impl SegmentWriter {
    pub fn new(queues: Arc<QueueSet>, events: EventHub, options: WriterOptions) -> Arc<Self> {
        Self::with_encoders(
            queues,
            events,
            options,
            passthrough_video_factory(),
            passthrough_audio_factory(),
        )
    }

    /// Construct with explicit encoder services instead of the passthrough
    /// defaults.
    pub fn with_encoders(
        queues: Arc<QueueSet>,
        events: EventHub,
        options: WriterOptions,
        video_encoder_factory: VideoEncoderFactory,
        audio_encoder_factory: AudioEncoderFactory,
    ) -> Arc<Self> {
        Arc::new(Self {
            queues,
            events,
            video_enabled: options.video_enabled,
            audio_enabled: options.audio_enabled,
            capture_capable: options.capture_capable,
            state: Mutex::new(RecordingState::Idle),
            max_duration: Mutex::new(options.max_duration),
            video_input: Mutex::new(None),
            audio_input: Mutex::new(None),
            video_prepared: AtomicBool::new(false),
            audio_prepared: AtomicBool::new(false),
            container: Mutex::new(None),
            segments: Mutex::new(SegmentCollection::new(options.directory)),
            video_encoder_factory,
            audio_encoder_factory,
        })
    }

    // ---- state & bookkeeping accessors -------------------------------

    pub fn state(&self) -> RecordingState {
        *self.state.lock()
    }

    pub fn is_recording(&self) -> bool {
        self.state() == RecordingState::Recording
    }

    pub fn set_max_duration(&self, max: Option<Duration>) {
        *self.max_duration.lock() = max;
    }

    pub fn max_duration(&self) -> Option<Duration> {
        *self.max_duration.lock()
    }

    pub fn video_input_prepared(&self) -> bool {
        self.video_prepared.load(Ordering::Acquire)
    }

    pub fn audio_input_prepared(&self) -> bool {
        self.audio_prepared.load(Ordering::Acquire)
    }

    fn missing_input(&self) -> Option<StreamKind> {
        if self.video_enabled && !self.video_input_prepared() {
            return Some(StreamKind::Video);
        }
        if self.audio_enabled && !self.audio_input_prepared() {
            return Some(StreamKind::Audio);
        }
        None
    }

    pub fn container_open(&self) -> bool {
        self.container.lock().is_some()
    }

    pub fn total_duration(&self) -> Duration {
        self.segments.lock().total_duration()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.lock().count()
    }

    pub fn segments_snapshot(&self) -> Vec<Segment> {
        self.segments.lock().snapshot()
    }

    pub fn last_segment(&self) -> Option<Segment> {
        self.segments.lock().last().cloned()
    }

    pub fn segment_directory(&self) -> PathBuf {
        self.segments.lock().directory().to_path_buf()
    }

    /// True once the recorded total has reached the configured maximum.
    pub fn is_timed_out(&self) -> bool {
        match *self.max_duration.lock() {
            Some(max) => self.total_duration() >= max,
            None => false,
        }
    }

    // ---- encoder input preparation -----------------------------------

    /// Create the video encoder input from the first observed format
    /// descriptor, resolving export geometry and automatic bit rate. Hands
    /// off synchronously to the capture queue so concurrent video/audio
    /// arrival cannot race the one-time initialization.
    pub fn prepare_video_input(
        self: &Arc<Self>,
        format: VideoFormat,
        config: VideoConfig,
    ) -> CaptureResult<ResolvedVideoSettings> {
        let writer = self.clone();
        self.queues.capture().run_on_sync(move || {
            let mut input = writer.video_input.lock();
            if input.is_some() {
                return Err(WriterStateError::InputAlreadyPrepared(StreamKind::Video).into());
            }
            let settings = config.writer_settings(&format);
            let encoder = (writer.video_encoder_factory)(&settings);
            *input = Some(VideoInput { settings, encoder });
            writer.video_prepared.store(true, Ordering::Release);
            tracing::debug!(
                width = settings.width,
                height = settings.height,
                bit_rate = settings.bit_rate,
                "video encoder input prepared"
            );
            Ok(settings)
        })
    }

    /// Create the audio encoder input from the first observed format
    /// descriptor.
    pub fn prepare_audio_input(
        self: &Arc<Self>,
        format: AudioFormat,
        config: AudioConfig,
    ) -> CaptureResult<()> {
        let writer = self.clone();
        self.queues.capture().run_on_sync(move || {
            let mut input = writer.audio_input.lock();
            if input.is_some() {
                return Err(WriterStateError::InputAlreadyPrepared(StreamKind::Audio).into());
            }
            let settings = config.writer_settings(Some(&format));
            let encoder = (writer.audio_encoder_factory)(&settings);
            *input = Some(AudioInput { settings, encoder });
            writer.audio_prepared.store(true, Ordering::Release);
            tracing::debug!(
                channels = settings.channels,
                sample_rate = settings.sample_rate,
                bit_rate = settings.bit_rate,
                "audio encoder input prepared"
            );
            Ok(())
        })
    }

    // ---- recording control -------------------------------------------

    /// Transition Idle → Recording. Refuses in a non-capturing environment,
    /// after the maximum duration has elapsed, or while a required encoder
    /// input is missing.
    pub fn start_recording(&self) -> CaptureResult<()> {
        if !self.capture_capable {
            tracing::warn!("recording refused: environment cannot capture");
            return Err(WriterStateError::NotCaptureCapable.into());
        }
        if self.is_timed_out() {
            tracing::warn!("recording refused: maximum duration already reached");
            return Err(WriterStateError::MaximumDurationReached.into());
        }
        if let Some(kind) = self.missing_input() {
            tracing::warn!(?kind, "recording refused: encoder input not prepared");
            return Err(WriterStateError::InputNotPrepared(kind).into());
        }

        let mut state = self.state.lock();
        if *state != RecordingState::Idle {
            tracing::warn!(state = ?*state, "recording refused: already recording");
            return Err(WriterStateError::AlreadyRecording.into());
        }
        *state = RecordingState::Recording;
        tracing::info!("recording started");
        Ok(())
    }

    /// Transition Recording → Finished and finalize the open container on
    /// the write queue. No-op in any other state.
    pub fn stop_recording(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if *state != RecordingState::Recording {
                tracing::debug!(state = ?*state, "stop ignored, not recording");
                return;
            }
            *state = RecordingState::Finished;
        }
        tracing::info!("recording stopping, finalizing segment");
        let writer = self.clone();
        self.queues.write().run_on(move || writer.finalize_open_container());
    }

    /// Open a segment container for the current recording run. Called from
    /// the video/audio queues when a sample arrives and none is open yet.
    pub fn begin_segment(self: &Arc<Self>) {
        if let Some(kind) = self.missing_input() {
            self.events
                .emit_error(WriterStateError::InputNotPrepared(kind).into());
            return;
        }
        let writer = self.clone();
        self.queues.write().run_on(move || writer.open_container());
    }

    /// Append a (possibly cropped) video frame. Called on the video queue;
    /// the container work happens on the write queue.
    pub fn append_video(self: &Arc<Self>, frame: VideoFrame, pts: Duration) {
        let writer = self.clone();
        self.queues
            .write()
            .run_on(move || writer.append_video_on_write_queue(frame, pts));
    }

    /// Append an audio block. Called on the audio queue; the container work
    /// happens on the write queue.
    pub fn append_audio(self: &Arc<Self>, block: AudioBlock, pts: Duration) {
        let writer = self.clone();
        self.queues
            .write()
            .run_on(move || writer.append_audio_on_write_queue(block, pts));
    }

    /// Remove one finished segment; rejected while a segment is open.
    pub fn remove_segment(
        self: &Arc<Self>,
        index: usize,
        delete_file: bool,
    ) -> CaptureResult<Option<Segment>> {
        let writer = self.clone();
        self.queues
            .write()
            .run_on_sync(move || writer.segments.lock().remove(index, delete_file))
    }

    /// Clear all finished segments, optionally deleting the directory.
    pub fn remove_all_segments(self: &Arc<Self>, delete_files: bool) {
        let writer = self.clone();
        self.queues
            .write()
            .run_on_sync(move || writer.segments.lock().remove_all(delete_files));
    }

    /// Hard abort: cancel any open container without finalizing, clear all
    /// segments from disk, un-prepare both encoder inputs, return to Idle.
    pub fn reset(self: &Arc<Self>) {
        *self.state.lock() = RecordingState::Idle;
        let writer = self.clone();
        self.queues.write().run_on_sync(move || {
            if let Some(muxer) = writer.container.lock().take() {
                muxer.cancel();
            }
            {
                let mut segments = writer.segments.lock();
                segments.abandon_writing(false);
                segments.remove_all(true);
            }
            *writer.video_input.lock() = None;
            *writer.audio_input.lock() = None;
            writer.video_prepared.store(false, Ordering::Release);
            writer.audio_prepared.store(false, Ordering::Release);
        });
        tracing::info!("segment writer reset");
    }

    // ---- write-queue internals ---------------------------------------

    fn open_container(self: &Arc<Self>) {
        let mut container = self.container.lock();
        if container.is_some() {
            self.events
                .emit_error(WriterStateError::SegmentAlreadyOpen.into());
            return;
        }

        let segment = match self.segments.lock().start_new() {
            Ok(segment) => segment,
            Err(err) => {
                self.events.emit_error(err);
                return;
            }
        };

        let video_spec = self.video_input.lock().as_ref().map(|input| VideoTrackSpec {
            settings: input.settings,
            codec: input.encoder.codec_params(),
        });
        let audio_spec = self.audio_input.lock().as_ref().map(|input| AudioTrackSpec {
            settings: input.settings,
        });

        match SegmentMuxer::create(&segment.path, video_spec, audio_spec) {
            Ok(muxer) => {
                *container = Some(muxer);
                tracing::info!(path = %segment.path.display(), "segment opened");
                self.events.emit(CaptureEvent::SegmentOpened { segment });
            }
            Err(err) => {
                self.segments.lock().abandon_writing(true);
                self.events.emit_error(err);
            }
        }
    }

    fn append_video_on_write_queue(self: &Arc<Self>, frame: VideoFrame, pts: Duration) {
        // Samples can still be in flight after the watchdog or a caller
        // stopped the recording; they belong to no segment.
        if self.state() != RecordingState::Recording {
            tracing::debug!("video sample dropped, not recording");
            return;
        }

        let mut input_guard = self.video_input.lock();
        let Some(input) = input_guard.as_mut() else {
            self.events
                .emit_error(WriterStateError::InputNotPrepared(StreamKind::Video).into());
            return;
        };
        if !input.encoder.is_ready() {
            self.events
                .emit_error(CaptureError::Backpressure(StreamKind::Video));
            return;
        }

        // The first video sample of the segment defines its zero point.
        let offset = {
            let mut segments = self.segments.lock();
            match segments.writing_offset() {
                Some(offset) => offset,
                None => {
                    let offset = pts.saturating_sub(segments.writing_duration());
                    segments.set_writing_offset(offset);
                    offset
                }
            }
        };
        let Some(rebased) = pts.checked_sub(offset) else {
            self.events.emit_error(CaptureError::Ordering(format!(
                "video timestamp {pts:?} precedes segment offset {offset:?}"
            )));
            return;
        };

        let encoded = match input.encoder.encode(&frame) {
            Ok(encoded) => encoded,
            Err(err) => {
                self.events.emit_error(err);
                return;
            }
        };
        drop(input_guard);

        let mut container_guard = self.container.lock();
        let Some(muxer) = container_guard.as_mut() else {
            tracing::debug!("video sample dropped, no open container");
            return;
        };
        if let Err(err) = muxer.write_video(&encoded, rebased) {
            self.events.emit_error(err);
            return;
        }
        drop(container_guard);

        let (segment, segment_count, total_duration) = {
            let mut segments = self.segments.lock();
            segments.set_writing_duration(rebased);
            (
                segments.writing().cloned(),
                segments.count(),
                segments.total_duration(),
            )
        };
        if let Some(segment) = segment {
            self.events.emit(CaptureEvent::SampleWritten {
                segment,
                segment_count,
                total_duration,
            });
        }

        // Duration watchdog: hard ceiling on total recorded time across
        // all segments, checked after every accepted video sample.
        if self.is_timed_out() {
            tracing::info!("maximum recording duration reached");
            self.stop_recording();
        }
    }

    fn append_audio_on_write_queue(self: &Arc<Self>, block: AudioBlock, pts: Duration) {
        let mut input_guard = self.audio_input.lock();
        let Some(input) = input_guard.as_mut() else {
            self.events
                .emit_error(WriterStateError::InputNotPrepared(StreamKind::Audio).into());
            return;
        };

        let offset = {
            let mut segments = self.segments.lock();
            match segments.writing_offset() {
                Some(offset) => offset,
                // Without a video stream nothing else can establish the
                // segment's zero point.
                None if !self.video_enabled => {
                    let offset = pts.saturating_sub(segments.writing_duration());
                    segments.set_writing_offset(offset);
                    offset
                }
                None => {
                    tracing::debug!("audio sample dropped, segment offset not established");
                    return;
                }
            }
        };
        let Some(rebased) = pts.checked_sub(offset) else {
            self.events.emit_error(CaptureError::Ordering(format!(
                "audio timestamp {pts:?} precedes segment offset {offset:?}"
            )));
            return;
        };

        if !input.encoder.is_ready() {
            self.events
                .emit_error(CaptureError::Backpressure(StreamKind::Audio));
            return;
        }

        let encoded = match input.encoder.encode(&block) {
            Ok(encoded) => encoded,
            Err(err) => {
                self.events.emit_error(err);
                return;
            }
        };
        drop(input_guard);

        let mut container_guard = self.container.lock();
        let Some(muxer) = container_guard.as_mut() else {
            tracing::debug!("audio sample dropped, no open container");
            return;
        };
        if let Err(err) = muxer.write_audio(&encoded, rebased) {
            self.events.emit_error(err);
        }

        if !self.video_enabled {
            drop(container_guard);
            let mut segments = self.segments.lock();
            if rebased > segments.writing_duration() {
                segments.set_writing_duration(rebased);
            }
        }
    }

    fn finalize_open_container(self: &Arc<Self>) {
        let container = self.container.lock().take();
        match container {
            None => {
                *self.state.lock() = RecordingState::Idle;
                self.events
                    .emit_error(WriterStateError::NoOpenSegment.into());
            }
            Some(muxer) => {
                let written = self.segments.lock().writing_duration();
                match muxer.finalize(written) {
                    Ok(duration) => {
                        let finished = self.segments.lock().finish_writing(duration);
                        *self.state.lock() = RecordingState::Idle;
                        if let Some(segment) = finished {
                            tracing::info!(
                                path = %segment.path.display(),
                                ?duration,
                                "segment finished"
                            );
                            self.events.emit(CaptureEvent::SegmentFinished { segment });
                        }
                    }
                    Err(err) => {
                        self.segments.lock().abandon_writing(true);
                        *self.state.lock() = RecordingState::Idle;
                        self.events.emit_error(err);
                    }
                }
            }
        }
    }
}

impl Drop for SegmentWriter {
    fn drop(&mut self) {
        // Last chance cleanup; the coordinator normally resets first.
        if let Some(muxer) = self.container.get_mut().take() {
            muxer.cancel();
        }
    }
}

/// Default per-process segment directory, unique per pipeline instance.
pub fn default_segment_directory() -> PathBuf {
    std::env::temp_dir().join(format!("retake-{}", uuid::Uuid::new_v4().simple()))
}

impl std::fmt::Debug for SegmentWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentWriter")
            .field("state", &self.state())
            .field("video_prepared", &self.video_input_prepared())
            .field("audio_prepared", &self.audio_input_prepared())
            .field("segments", &self.segment_count())
            .finish()
    }
}
