//! Sample router
//!
//! Sits between the device session and the segment writer. Each handler
//! runs on its stream's dedicated queue: it prepares the writer's encoder
//! input the first time a format descriptor is seen, applies the resolved
//! crop, and forwards samples only while a recording is active, opening a
//! segment container on demand (queue scheduling can reorder "recording
//! started" and "first sample observed").

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::capture::config::{AudioConfig, VideoConfig};
use crate::capture::sample::{AudioBlock, PixelRect, VideoFrame};
use crate::recorder::state::RecordingState;
use crate::recorder::writer::SegmentWriter;

/// Stream configuration shared between the coordinator and the router.
/// The coordinator rewrites the export region; the router reads at
/// input-preparation time.
pub struct SharedConfig {
    pub video: RwLock<VideoConfig>,
    pub audio: RwLock<AudioConfig>,
}

/// Gates and transforms raw samples before they reach the writer.
pub struct SampleRouter {
    writer: Arc<SegmentWriter>,
    config: Arc<SharedConfig>,
    /// Crop resolved when the video input was prepared. Only the video
    /// queue touches it.
    crop: Mutex<Option<PixelRect>>,
}

impl SampleRouter {
    pub fn new(writer: Arc<SegmentWriter>, config: Arc<SharedConfig>) -> Self {
        Self {
            writer,
            config,
            crop: Mutex::new(None),
        }
    }

    /// Video-queue handler for one raw frame.
    pub fn handle_video(&self, frame: VideoFrame, pts: Duration) {
        if !self.writer.video_input_prepared() {
            let config = self.config.video.read().clone();
            match self.writer.prepare_video_input(frame.format, config) {
                Ok(settings) => *self.crop.lock() = settings.crop,
                Err(err) => tracing::warn!(%err, "video input preparation failed"),
            }
        }

        if self.writer.state() != RecordingState::Recording {
            return;
        }
        if !self.writer.container_open() {
            self.writer.begin_segment();
        }

        let frame = match *self.crop.lock() {
            Some(rect) => match frame.crop(rect) {
                Some(cropped) => cropped,
                None => {
                    tracing::warn!(?rect, "video frame dropped, crop failed");
                    return;
                }
            },
            None => frame,
        };
        self.writer.append_video(frame, pts);
    }

    /// Audio-queue handler for one raw block.
    pub fn handle_audio(&self, block: AudioBlock, pts: Duration) {
        if !self.writer.audio_input_prepared() {
            let config = self.config.audio.read().clone();
            if let Err(err) = self.writer.prepare_audio_input(block.format, config) {
                tracing::warn!(%err, "audio input preparation failed");
            }
        }

        if self.writer.state() != RecordingState::Recording {
            return;
        }
        // The video path normally opens the container; in an audio-only
        // configuration this is the only path that can.
        if !self.writer.container_open() && !self.config.video.read().enabled {
            self.writer.begin_segment();
        }
        self.writer.append_audio(block, pts);
    }
}
