//! Synthetic capture devices
//!
//! Deterministic test-pattern devices behind the standard traits. Frames
//! and audio blocks are paced in real time off a clock shared by all
//! devices of one provider, so video/audio timestamps line up the way a
//! real capture stack's do. Used by the integration tests and by headless
//! environments without the `hardware` feature.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::capture::config::CameraPosition;
use crate::capture::sample::{
    AudioBlock, AudioFormat, MediaSample, PixelFormat, VideoFormat, VideoFrame,
};
use crate::capture::traits::{
    AudioDeviceInfo, CameraDevice, CameraInfo, DeviceProvider, FlashMode, MicrophoneDevice,
    SampleSink,
};
use crate::utils::error::CaptureResult;

/// Shape of the synthetic streams.
#[derive(Debug, Clone)]
pub struct SyntheticSpec {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub sample_rate: u32,
    pub channels: u16,
    /// Audio block length in milliseconds.
    pub audio_block_ms: u64,
}

impl Default for SyntheticSpec {
    fn default() -> Self {
        Self {
            width: 64,
            height: 48,
            frame_rate: 30,
            sample_rate: 44_100,
            channels: 1,
            audio_block_ms: 50,
        }
    }
}

/// Provider of synthetic cameras and microphones.
pub struct SyntheticProvider {
    spec: SyntheticSpec,
    epoch: Instant,
    capture_capable: bool,
}

impl SyntheticProvider {
    pub fn new(spec: SyntheticSpec) -> Self {
        Self {
            spec,
            epoch: Instant::now(),
            capture_capable: true,
        }
    }

    /// A provider that refuses recording, for exercising the
    /// non-capturing-environment path.
    pub fn incapable(spec: SyntheticSpec) -> Self {
        Self {
            capture_capable: false,
            ..Self::new(spec)
        }
    }
}

impl Default for SyntheticProvider {
    fn default() -> Self {
        Self::new(SyntheticSpec::default())
    }
}

impl DeviceProvider for SyntheticProvider {
    fn is_capture_capable(&self) -> bool {
        self.capture_capable
    }

    fn open_camera(&self, position: CameraPosition) -> CaptureResult<Box<dyn CameraDevice>> {
        Ok(Box::new(SyntheticCamera::new(
            position,
            self.spec.clone(),
            self.epoch,
        )))
    }

    fn open_microphone(&self) -> CaptureResult<Box<dyn MicrophoneDevice>> {
        Ok(Box::new(SyntheticMicrophone::new(
            self.spec.clone(),
            self.epoch,
        )))
    }
}

struct SyntheticCamera {
    position: CameraPosition,
    spec: SyntheticSpec,
    epoch: Instant,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    zoom: f32,
    torch: FlashMode,
}

impl SyntheticCamera {
    fn new(position: CameraPosition, spec: SyntheticSpec, epoch: Instant) -> Self {
        Self {
            position,
            spec,
            epoch,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
            zoom: 1.0,
            torch: FlashMode::Off,
        }
    }

    fn fill_value(position: CameraPosition) -> u8 {
        match position {
            CameraPosition::Front => 0xc0,
            CameraPosition::Back => 0x40,
        }
    }
}

impl CameraDevice for SyntheticCamera {
    fn info(&self) -> CameraInfo {
        let (id, name) = match self.position {
            CameraPosition::Front => ("synthetic-front", "Synthetic camera (front)"),
            CameraPosition::Back => ("synthetic-back", "Synthetic camera (back)"),
        };
        CameraInfo {
            id: id.to_string(),
            name: name.to_string(),
            position: self.position,
        }
    }

    fn position(&self) -> CameraPosition {
        self.position
    }

    fn start_stream(&mut self, sink: SampleSink) -> CaptureResult<()> {
        if self.is_streaming() {
            return Ok(());
        }
        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let epoch = self.epoch;
        let format = VideoFormat::packed(self.spec.width, self.spec.height, PixelFormat::Bgra8);
        let interval = Duration::from_secs(1) / self.spec.frame_rate.max(1);
        let template = Bytes::from(vec![
            Self::fill_value(self.position);
            format.bytes_per_row * format.height as usize
        ]);

        let worker = std::thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                let frame = VideoFrame {
                    format,
                    data: template.clone(),
                };
                sink(MediaSample::video(epoch.elapsed(), frame));
                std::thread::sleep(interval);
            }
        });
        self.worker = Some(worker);
        Ok(())
    }

    fn stop_stream(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    fn is_streaming(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn supports_focus_point(&self) -> bool {
        true
    }

    fn supports_continuous_focus(&self) -> bool {
        self.position == CameraPosition::Back
    }

    fn supports_torch(&self) -> bool {
        self.position == CameraPosition::Back
    }

    fn zoom_range(&self) -> (f32, f32) {
        match self.position {
            CameraPosition::Back => (1.0, 4.0),
            CameraPosition::Front => (1.0, 1.0),
        }
    }

    fn set_zoom(&mut self, factor: f32) {
        let (min, max) = self.zoom_range();
        self.zoom = factor.clamp(min, max);
    }

    fn zoom(&self) -> f32 {
        self.zoom
    }

    fn set_torch(&mut self, mode: FlashMode) {
        if self.supports_torch() {
            self.torch = mode;
        }
    }

    fn torch(&self) -> FlashMode {
        self.torch
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        self.stop_stream();
    }
}

struct SyntheticMicrophone {
    spec: SyntheticSpec,
    epoch: Instant,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SyntheticMicrophone {
    fn new(spec: SyntheticSpec, epoch: Instant) -> Self {
        Self {
            spec,
            epoch,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }
}

impl MicrophoneDevice for SyntheticMicrophone {
    fn info(&self) -> AudioDeviceInfo {
        AudioDeviceInfo {
            id: "synthetic-mic".to_string(),
            name: "Synthetic microphone".to_string(),
            is_default: true,
        }
    }

    fn start_stream(&mut self, sink: SampleSink) -> CaptureResult<()> {
        if self.is_streaming() {
            return Ok(());
        }
        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let epoch = self.epoch;
        let format = AudioFormat {
            sample_rate: self.spec.sample_rate,
            channels: self.spec.channels,
        };
        let interval = Duration::from_millis(self.spec.audio_block_ms.max(1));
        let frames = (u64::from(self.spec.sample_rate) * self.spec.audio_block_ms / 1000) as u32;
        // Silence, 16-bit interleaved PCM.
        let template = Bytes::from(vec![0u8; frames as usize * usize::from(self.spec.channels) * 2]);

        let worker = std::thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                let block = AudioBlock {
                    format,
                    data: template.clone(),
                    frames,
                };
                sink(MediaSample::audio(epoch.elapsed(), block));
                std::thread::sleep(interval);
            }
        });
        self.worker = Some(worker);
        Ok(())
    }

    fn stop_stream(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    fn is_streaming(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for SyntheticMicrophone {
    fn drop(&mut self) {
        self.stop_stream();
    }
}
