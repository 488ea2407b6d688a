//! Device trait definitions
//!
//! Platform-agnostic traits for capture devices. Backends advertise what
//! they can do through explicit capability queries; callers never probe a
//! device by reflection. Controls default to silent no-ops so a backend
//! without, say, a torch stays well-behaved behind the same interface.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::capture::config::CameraPosition;
use crate::capture::sample::MediaSample;
use crate::utils::error::CaptureResult;

/// Where devices deliver their samples. Called from the device's own
/// capture thread, one call per accepted sample.
pub type SampleSink = Arc<dyn Fn(MediaSample) + Send + Sync>;

/// Information about a camera device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraInfo {
    pub id: String,
    pub name: String,
    pub position: CameraPosition,
}

/// Information about an audio input device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDeviceInfo {
    pub id: String,
    pub name: String,
    pub is_default: bool,
}

/// Torch/flash behavior while capturing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashMode {
    Off,
    On,
    Auto,
}

/// Point of interest in normalized frame coordinates (0..1 on both axes).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FocusPoint {
    pub x: f32,
    pub y: f32,
}

/// A bound video capture device.
pub trait CameraDevice: Send {
    fn info(&self) -> CameraInfo;

    fn position(&self) -> CameraPosition;

    /// Begin delivering frames to the sink from the device's capture thread.
    fn start_stream(&mut self, sink: SampleSink) -> CaptureResult<()>;

    /// Stop delivering frames. The device stays bound and can be restarted.
    fn stop_stream(&mut self);

    fn is_streaming(&self) -> bool;

    // Capability queries. Backends answer honestly; callers gate controls
    // on these instead of probing.
    fn supports_focus_point(&self) -> bool {
        false
    }

    fn supports_continuous_focus(&self) -> bool {
        false
    }

    fn supports_torch(&self) -> bool {
        false
    }

    /// Inclusive (min, max) zoom factors. (1.0, 1.0) means fixed.
    fn zoom_range(&self) -> (f32, f32) {
        (1.0, 1.0)
    }

    // Controls. Unsupported controls are silent no-ops.
    fn set_focus(&mut self, _point: FocusPoint, _continuous: bool) {}

    fn set_zoom(&mut self, _factor: f32) {}

    fn zoom(&self) -> f32 {
        1.0
    }

    fn set_torch(&mut self, _mode: FlashMode) {}

    fn torch(&self) -> FlashMode {
        FlashMode::Off
    }
}

/// A bound audio capture device.
pub trait MicrophoneDevice: Send {
    fn info(&self) -> AudioDeviceInfo;

    /// Begin delivering audio blocks to the sink.
    fn start_stream(&mut self, sink: SampleSink) -> CaptureResult<()>;

    fn stop_stream(&mut self);

    fn is_streaming(&self) -> bool;
}

/// Factory for a platform's capture devices.
pub trait DeviceProvider: Send + Sync {
    /// False in environments that cannot capture at all (no devices, CI).
    /// Recording refuses to start when this is false; preview still works.
    fn is_capture_capable(&self) -> bool;

    fn open_camera(&self, position: CameraPosition) -> CaptureResult<Box<dyn CameraDevice>>;

    fn open_microphone(&self) -> CaptureResult<Box<dyn MicrophoneDevice>>;
}
