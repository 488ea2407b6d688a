//! Opaque encoder services
//!
//! Compression is not this crate's business: the writer hands raw samples to
//! an encoder service and muxes whatever comes back. The passthrough
//! implementations wrap the raw payload unchanged, which keeps the container
//! bookkeeping (timestamps, sync samples, durations) fully exercised without
//! a codec. `is_ready` models encoder backpressure: when an input reports
//! not-ready the sample is dropped, never retried.

use bytes::Bytes;

use crate::capture::config::{ResolvedAudioSettings, ResolvedVideoSettings};
use crate::capture::sample::{AudioBlock, VideoFrame};
use crate::utils::error::CaptureResult;
use std::time::Duration;

/// One encoded frame ready for the container.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub data: Bytes,
    pub is_keyframe: bool,
    /// Media duration of this frame when the encoder knows it (audio blocks
    /// do); the muxer falls back to timestamp deltas otherwise.
    pub duration_hint: Option<Duration>,
}

/// Codec parameters the container needs to describe a video track.
#[derive(Debug, Clone)]
pub struct VideoCodecParams {
    pub seq_param_set: Vec<u8>,
    pub pic_param_set: Vec<u8>,
}

pub trait VideoEncoder: Send {
    /// False models backpressure; the caller drops the sample.
    fn is_ready(&self) -> bool;

    fn codec_params(&self) -> VideoCodecParams;

    fn encode(&mut self, frame: &VideoFrame) -> CaptureResult<EncodedFrame>;
}

pub trait AudioEncoder: Send {
    fn is_ready(&self) -> bool;

    fn encode(&mut self, block: &AudioBlock) -> CaptureResult<EncodedFrame>;
}

// Parameter-set bytes for the container's codec description. The payload is
// passthrough, so these only have to be well-formed enough for box
// bookkeeping, not decodable.
const BASELINE_SPS: [u8; 10] = [0x67, 0x42, 0xc0, 0x1f, 0x96, 0x54, 0x05, 0x01, 0xec, 0x80];
const BASELINE_PPS: [u8; 4] = [0x68, 0xce, 0x3c, 0x80];

/// Passthrough video encoder: emits the raw frame bytes and marks a sync
/// sample once per keyframe interval.
pub struct PassthroughVideoEncoder {
    keyframe_interval: u32,
    frame_index: u32,
}

impl PassthroughVideoEncoder {
    pub fn new(settings: &ResolvedVideoSettings) -> Self {
        Self {
            keyframe_interval: settings.max_frame_rate.max(1),
            frame_index: 0,
        }
    }
}

impl VideoEncoder for PassthroughVideoEncoder {
    fn is_ready(&self) -> bool {
        true
    }

    fn codec_params(&self) -> VideoCodecParams {
        VideoCodecParams {
            seq_param_set: BASELINE_SPS.to_vec(),
            pic_param_set: BASELINE_PPS.to_vec(),
        }
    }

    fn encode(&mut self, frame: &VideoFrame) -> CaptureResult<EncodedFrame> {
        let is_keyframe = self.frame_index % self.keyframe_interval == 0;
        self.frame_index += 1;
        Ok(EncodedFrame {
            data: frame.data.clone(),
            is_keyframe,
            duration_hint: None,
        })
    }
}

/// Passthrough audio encoder: emits the raw PCM bytes with the block's own
/// duration as the container sample duration.
pub struct PassthroughAudioEncoder;

impl PassthroughAudioEncoder {
    pub fn new(_settings: &ResolvedAudioSettings) -> Self {
        Self
    }
}

impl AudioEncoder for PassthroughAudioEncoder {
    fn is_ready(&self) -> bool {
        true
    }

    fn encode(&mut self, block: &AudioBlock) -> CaptureResult<EncodedFrame> {
        Ok(EncodedFrame {
            data: block.data.clone(),
            is_keyframe: true,
            duration_hint: Some(block.duration()),
        })
    }
}

/// Builds the video encoder for a prepared input.
pub type VideoEncoderFactory =
    Box<dyn Fn(&ResolvedVideoSettings) -> Box<dyn VideoEncoder> + Send + Sync>;

/// Builds the audio encoder for a prepared input.
pub type AudioEncoderFactory =
    Box<dyn Fn(&ResolvedAudioSettings) -> Box<dyn AudioEncoder> + Send + Sync>;

pub fn passthrough_video_factory() -> VideoEncoderFactory {
    Box::new(|settings| Box::new(PassthroughVideoEncoder::new(settings)))
}

pub fn passthrough_audio_factory() -> AudioEncoderFactory {
    Box::new(|settings| Box::new(PassthroughAudioEncoder::new(settings)))
}
