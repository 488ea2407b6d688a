//! Capture coordinator
//!
//! Wires the device session, sample router, and segment writer together and
//! exposes the collaborator-facing surface: preview control, recording
//! control, device controls, export geometry, segment bookkeeping, and the
//! event subscription. Device work is funneled through the capture queue;
//! per-stream samples are dispatched onto the video/audio queues with a
//! bounded depth, so a stalled consumer drops late frames instead of
//! building a backlog.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, oneshot, watch};

use crate::capture::config::{CameraPosition, CaptureConfig, ExportRegion, QualityTier};
use crate::capture::sample::{MediaSample, SamplePayload, VideoFrame};
use crate::capture::session::DeviceSession;
use crate::capture::traits::{DeviceProvider, FlashMode, FocusPoint, SampleSink};
use crate::executor::QueueSet;
use crate::recorder::events::{CaptureEvent, EventHub};
use crate::recorder::router::{SampleRouter, SharedConfig};
use crate::recorder::segments::Segment;
use crate::recorder::state::RecordingState;
use crate::recorder::writer::{default_segment_directory, SegmentWriter, WriterOptions};
use crate::utils::error::{CaptureError, CaptureResult};

/// Unfinished jobs tolerated on a stream queue before late samples drop.
const VIDEO_QUEUE_LIMIT: usize = 32;
const AUDIO_QUEUE_LIMIT: usize = 128;

/// Orchestrates one capture pipeline.
pub struct CaptureCoordinator {
    queues: Arc<QueueSet>,
    events: EventHub,
    config: Arc<SharedConfig>,
    writer: Arc<SegmentWriter>,
    session: Arc<Mutex<DeviceSession>>,
    video_enabled: bool,
    audio_enabled: bool,
}

impl CaptureCoordinator {
    pub fn new(provider: Arc<dyn DeviceProvider>, config: CaptureConfig) -> Self {
        let queues = QueueSet::new();
        let events = EventHub::new(queues.clone());

        let directory = config
            .output_dir
            .clone()
            .unwrap_or_else(default_segment_directory);
        let writer = SegmentWriter::new(
            queues.clone(),
            events.clone(),
            WriterOptions {
                directory,
                video_enabled: config.video.enabled,
                audio_enabled: config.audio.enabled,
                capture_capable: provider.is_capture_capable(),
                max_duration: config.max_duration,
            },
        );

        let shared = Arc::new(SharedConfig {
            video: RwLock::new(config.video.clone()),
            audio: RwLock::new(config.audio.clone()),
        });
        let router = Arc::new(SampleRouter::new(writer.clone(), shared.clone()));

        let video_sink: SampleSink = {
            let queues = queues.clone();
            let router = router.clone();
            Arc::new(move |sample: MediaSample| {
                let MediaSample { pts, payload } = sample;
                if let SamplePayload::Video(frame) = payload {
                    let router = router.clone();
                    let accepted = queues
                        .video()
                        .try_run_on(VIDEO_QUEUE_LIMIT, move || router.handle_video(frame, pts));
                    if !accepted {
                        tracing::warn!("late video frame dropped");
                    }
                }
            })
        };
        let audio_sink: SampleSink = {
            let queues = queues.clone();
            let router = router.clone();
            Arc::new(move |sample: MediaSample| {
                let MediaSample { pts, payload } = sample;
                if let SamplePayload::Audio(block) = payload {
                    let router = router.clone();
                    let accepted = queues
                        .audio()
                        .try_run_on(AUDIO_QUEUE_LIMIT, move || router.handle_audio(block, pts));
                    if !accepted {
                        tracing::warn!("late audio block dropped");
                    }
                }
            })
        };

        let session = DeviceSession::new(provider, config.video.position, video_sink, audio_sink);

        Self {
            queues,
            events,
            config: shared,
            writer,
            session: Arc::new(Mutex::new(session)),
            video_enabled: config.video.enabled,
            audio_enabled: config.audio.enabled,
        }
    }

    /// Subscribe to pipeline events, delivered on the completion queue.
    pub fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.events.subscribe()
    }

    /// Latest preview frame, live from the moment the preview starts.
    pub fn preview(&self) -> watch::Receiver<Option<VideoFrame>> {
        self.session.lock().preview()
    }

    // ---- preview lifecycle -------------------------------------------

    /// Bind devices for the enabled streams and begin sample emission.
    pub fn start_preview(&self) -> CaptureResult<()> {
        let session = self.session.clone();
        let (video, audio) = (self.video_enabled, self.audio_enabled);
        self.queues.capture().run_on_sync(move || {
            let mut session = session.lock();
            let bound = session.reconfigure(video, audio);
            let started = session.start();
            bound.and(started)
        })
    }

    /// Halt sample emission; device bindings stay in place.
    pub fn stop_preview(&self) {
        let session = self.session.clone();
        self.queues.capture().run_on_sync(move || session.lock().stop());
    }

    // ---- recording control -------------------------------------------

    pub fn recording_state(&self) -> RecordingState {
        self.writer.state()
    }

    pub fn is_recording(&self) -> bool {
        self.writer.is_recording()
    }

    pub fn start_recording(&self) -> CaptureResult<()> {
        self.writer.start_recording()
    }

    pub fn stop_recording(&self) {
        self.writer.stop_recording();
    }

    pub fn set_max_duration(&self, max: Option<Duration>) {
        self.writer.set_max_duration(max);
    }

    /// Quality tier for both streams. Takes effect when the encoder inputs
    /// next resolve, i.e. after the next geometry reset.
    pub fn set_quality(&self, tier: QualityTier) {
        self.config.video.write().quality = tier;
        self.config.audio.write().quality = tier;
    }

    pub fn max_duration(&self) -> Option<Duration> {
        self.writer.max_duration()
    }

    // ---- device controls ---------------------------------------------

    /// Swap the front/back camera. Asynchronous: emission is stopped, the
    /// device rebound, and emission resumed on the capture queue; the
    /// returned future resolves once that completed.
    pub async fn swap_camera(&self) -> CaptureResult<CameraPosition> {
        let (tx, rx) = oneshot::channel();
        let session = self.session.clone();
        self.queues.capture().run_on(move || {
            let result = session.lock().swap_camera();
            let _ = tx.send(result);
        });
        rx.await
            .map_err(|_| CaptureError::Device("camera swap aborted, queue shut down".to_string()))?
    }

    pub fn camera_position(&self) -> CameraPosition {
        self.session.lock().position()
    }

    pub fn set_focus(&self, point: FocusPoint, continuous: bool) {
        let session = self.session.clone();
        self.queues
            .capture()
            .run_on_sync(move || session.lock().set_focus(point, continuous));
    }

    /// Zoom factor, clamped to the device-reported range.
    pub fn set_zoom(&self, factor: f32) {
        let session = self.session.clone();
        self.queues
            .capture()
            .run_on_sync(move || session.lock().set_zoom(factor));
    }

    pub fn zoom(&self) -> f32 {
        self.session.lock().zoom()
    }

    pub fn set_flash(&self, mode: FlashMode) {
        let session = self.session.clone();
        self.queues
            .capture()
            .run_on_sync(move || session.lock().set_flash(mode));
    }

    pub fn flash(&self) -> Option<FlashMode> {
        self.session.lock().flash()
    }

    // ---- export & segments -------------------------------------------

    /// Change the export geometry. Previous segments were encoded at the
    /// old geometry, so the writer is reset: state forced to Idle, all
    /// segments cleared from disk, encoder inputs un-prepared for lazy
    /// re-resolution against the next observed frame.
    pub fn export(&self, region: Option<ExportRegion>) {
        self.config.video.write().export = region;
        self.writer.reset();
    }

    pub fn segments(&self) -> Vec<Segment> {
        self.writer.segments_snapshot()
    }

    pub fn segment_count(&self) -> usize {
        self.writer.segment_count()
    }

    pub fn total_duration(&self) -> Duration {
        self.writer.total_duration()
    }

    pub fn segment_directory(&self) -> PathBuf {
        self.writer.segment_directory()
    }

    /// Remove one finished segment; rejected while recording is writing.
    pub fn remove_segment(
        &self,
        index: usize,
        delete_file: bool,
    ) -> CaptureResult<Option<Segment>> {
        self.writer.remove_segment(index, delete_file)
    }

    /// Tear the pipeline down: stop emission and discard any in-progress
    /// container along with all segments on disk.
    pub fn reset(&self) {
        self.stop_preview();
        self.writer.reset();
    }
}

impl Drop for CaptureCoordinator {
    fn drop(&mut self) {
        self.reset();
    }
}
