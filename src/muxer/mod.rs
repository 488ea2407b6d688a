//! Segment muxing
//!
//! The container side of the writer: opaque encoder services plus the
//! per-segment MP4 container they feed.

pub mod encoder;
pub mod mp4;

pub use encoder::{
    passthrough_audio_factory, passthrough_video_factory, AudioEncoder, AudioEncoderFactory,
    EncodedFrame, VideoCodecParams, VideoEncoder, VideoEncoderFactory,
};
pub use mp4::{probe_duration, AudioTrackSpec, SegmentMuxer, VideoTrackSpec};
