//! Camera capture using nokhwa
//!
//! Frames are decoded to packed RGBA on the capture thread and timestamped
//! against the provider's shared clock. nokhwa exposes no zoom or torch
//! control, so the capability queries answer false and those controls
//! no-op at the session layer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use bytes::Bytes;
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;

use crate::capture::config::CameraPosition;
use crate::capture::sample::{MediaSample, PixelFormat, VideoFormat, VideoFrame};
use crate::capture::traits::{CameraDevice, CameraInfo, SampleSink};
use crate::utils::error::{CaptureError, CaptureResult};

/// List the cameras nokhwa can see.
pub fn enumerate() -> Vec<CameraInfo> {
    match nokhwa::query(ApiBackend::Auto) {
        Ok(cameras) => cameras
            .into_iter()
            .enumerate()
            .map(|(i, info)| {
                let id = match info.index() {
                    CameraIndex::Index(index) => index.to_string(),
                    CameraIndex::String(s) => s.to_string(),
                };
                CameraInfo {
                    id,
                    name: info.human_name().to_string(),
                    // Facing metadata is not exposed; by convention the
                    // first device is treated as the back camera.
                    position: if i == 0 {
                        CameraPosition::Back
                    } else {
                        CameraPosition::Front
                    },
                }
            })
            .collect(),
        Err(err) => {
            tracing::warn!(%err, "failed to enumerate cameras");
            Vec::new()
        }
    }
}

pub struct NokhwaCamera {
    info: CameraInfo,
    index: CameraIndex,
    epoch: Instant,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl NokhwaCamera {
    pub fn open(position: CameraPosition, epoch: Instant) -> CaptureResult<Self> {
        let cameras = enumerate();
        let info = cameras
            .iter()
            .find(|c| c.position == position)
            .or_else(|| cameras.first())
            .cloned()
            .ok_or_else(|| CaptureError::Device("no camera available".to_string()))?;

        let index = match info.id.parse::<u32>() {
            Ok(i) => CameraIndex::Index(i),
            Err(_) => CameraIndex::String(info.id.clone()),
        };

        Ok(Self {
            info,
            index,
            epoch,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        })
    }
}

impl CameraDevice for NokhwaCamera {
    fn info(&self) -> CameraInfo {
        self.info.clone()
    }

    fn position(&self) -> CameraPosition {
        self.info.position
    }

    fn start_stream(&mut self, sink: SampleSink) -> CaptureResult<()> {
        if self.is_streaming() {
            return Ok(());
        }
        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let index = self.index.clone();
        let epoch = self.epoch;

        let worker = std::thread::spawn(move || {
            let format =
                RequestedFormat::new::<RgbAFormat>(RequestedFormatType::AbsoluteHighestResolution);
            let mut camera = match Camera::new(index.clone(), format) {
                Ok(camera) => camera,
                Err(err) => {
                    tracing::error!(?index, %err, "failed to open camera");
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            };
            if let Err(err) = camera.open_stream() {
                tracing::error!(%err, "failed to open camera stream");
                running.store(false, Ordering::SeqCst);
                return;
            }

            let camera_format = camera.camera_format();
            tracing::info!(
                width = camera_format.resolution().width(),
                height = camera_format.resolution().height(),
                fps = camera_format.frame_rate(),
                "camera stream opened"
            );

            while running.load(Ordering::SeqCst) {
                // frame() blocks until the camera delivers; the device
                // paces the loop.
                match camera.frame() {
                    Ok(frame) => match frame.decode_image::<RgbAFormat>() {
                        Ok(decoded) => {
                            let (width, height) = decoded.dimensions();
                            let frame = VideoFrame {
                                format: VideoFormat::packed(width, height, PixelFormat::Rgba8),
                                data: Bytes::from(decoded.into_raw()),
                            };
                            sink(MediaSample::video(epoch.elapsed(), frame));
                        }
                        Err(err) => tracing::debug!(%err, "failed to decode camera frame"),
                    },
                    Err(err) => tracing::debug!(%err, "failed to capture camera frame"),
                }
            }

            if let Err(err) = camera.stop_stream() {
                tracing::warn!(%err, "error stopping camera stream");
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

impl Drop for NokhwaCamera {
    fn drop(&mut self) {
        self.stop_stream();
    }
}
