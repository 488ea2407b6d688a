//! Capture devices, configuration, and samples
//!
//! This module provides the device abstraction (traits + backends), the
//! per-stream configuration model, and the sample types that flow through
//! the pipeline.

pub mod config;
pub mod sample;
pub mod session;
pub mod synthetic;
pub mod traits;

#[cfg(feature = "hardware")]
pub mod hardware;

pub use config::{
    AudioConfig, CameraPosition, CaptureConfig, ExportRegion, Orientation, QualityTier, RectF,
    VideoConfig,
};
pub use sample::{
    AudioBlock, AudioFormat, MediaSample, PixelFormat, PixelRect, SamplePayload, StreamKind,
    VideoFormat, VideoFrame,
};
pub use session::DeviceSession;
pub use synthetic::{SyntheticProvider, SyntheticSpec};
pub use traits::{
    AudioDeviceInfo, CameraDevice, CameraInfo, DeviceProvider, FlashMode, FocusPoint,
    MicrophoneDevice, SampleSink,
};

#[cfg(feature = "hardware")]
pub use hardware::HardwareProvider;
