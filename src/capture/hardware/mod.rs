//! Hardware capture backends
//!
//! Real devices behind the standard traits: nokhwa for cameras, cpal for
//! the microphone. Enabled by the `hardware` cargo feature; the rest of
//! the pipeline is backend-agnostic and tests run on the synthetic
//! provider instead.

pub mod camera;
pub mod microphone;

use std::time::Instant;

use crate::capture::config::CameraPosition;
use crate::capture::traits::{CameraDevice, DeviceProvider, MicrophoneDevice};
use crate::utils::error::CaptureResult;

/// Provider backed by the machine's real capture devices.
pub struct HardwareProvider {
    epoch: Instant,
}

impl HardwareProvider {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for HardwareProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceProvider for HardwareProvider {
    fn is_capture_capable(&self) -> bool {
        !camera::enumerate().is_empty()
    }

    fn open_camera(&self, position: CameraPosition) -> CaptureResult<Box<dyn CameraDevice>> {
        Ok(Box::new(camera::NokhwaCamera::open(position, self.epoch)?))
    }

    fn open_microphone(&self) -> CaptureResult<Box<dyn MicrophoneDevice>> {
        Ok(Box::new(microphone::CpalMicrophone::open(self.epoch)?))
    }
}
