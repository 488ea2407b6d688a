//! Device session
//!
//! Owns the bound capture devices and the live preview output. Binding
//! follows the desired stream set with at-least-effort semantics: a failure
//! to bind one stream is reported to the caller but does not roll back what
//! was already applied, and capture continues in the previous valid
//! configuration. Device start/stop/swap briefly block the calling queue
//! while hardware rebinds; a camera swap always stops emission first so no
//! samples are in flight mid-swap.

use std::sync::Arc;

use tokio::sync::watch;

use crate::capture::config::CameraPosition;
use crate::capture::sample::{MediaSample, SamplePayload, VideoFrame};
use crate::capture::traits::{
    CameraDevice, DeviceProvider, FlashMode, FocusPoint, MicrophoneDevice, SampleSink,
};
use crate::utils::error::{CaptureError, CaptureResult};

pub struct DeviceSession {
    provider: Arc<dyn DeviceProvider>,
    camera: Option<Box<dyn CameraDevice>>,
    microphone: Option<Box<dyn MicrophoneDevice>>,
    position: CameraPosition,
    video_enabled: bool,
    audio_enabled: bool,
    running: bool,
    video_sink: SampleSink,
    audio_sink: SampleSink,
    preview_tx: Arc<watch::Sender<Option<VideoFrame>>>,
}

impl DeviceSession {
    /// The sinks receive samples on the device capture threads; the session
    /// additionally publishes every video frame to the preview channel.
    pub fn new(
        provider: Arc<dyn DeviceProvider>,
        position: CameraPosition,
        video_sink: SampleSink,
        audio_sink: SampleSink,
    ) -> Self {
        let (preview_tx, _) = watch::channel(None);
        let preview_tx = Arc::new(preview_tx);

        let preview = preview_tx.clone();
        let video_sink: SampleSink = Arc::new(move |sample: MediaSample| {
            if let SamplePayload::Video(frame) = &sample.payload {
                preview.send_replace(Some(frame.clone()));
            }
            video_sink(sample);
        });

        Self {
            provider,
            camera: None,
            microphone: None,
            position,
            video_enabled: false,
            audio_enabled: false,
            running: false,
            video_sink,
            audio_sink,
            preview_tx,
        }
    }

    /// Latest preview frame, updated regardless of recording state.
    pub fn preview(&self) -> watch::Receiver<Option<VideoFrame>> {
        self.preview_tx.subscribe()
    }

    pub fn position(&self) -> CameraPosition {
        self.position
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Bind or unbind devices to match the desired stream set.
    /// At-least-effort: the first failure is reported, already-applied
    /// bindings stay applied.
    pub fn reconfigure(&mut self, video_enabled: bool, audio_enabled: bool) -> CaptureResult<()> {
        self.video_enabled = video_enabled;
        self.audio_enabled = audio_enabled;
        let mut first_err: Option<CaptureError> = None;

        if video_enabled {
            if self.camera.is_none() {
                match self.provider.open_camera(self.position) {
                    Ok(camera) => {
                        tracing::info!(name = %camera.info().name, "camera bound");
                        self.camera = Some(camera);
                    }
                    Err(err) => {
                        tracing::warn!(%err, "failed to bind camera");
                        first_err.get_or_insert(err);
                    }
                }
            }
        } else if let Some(mut camera) = self.camera.take() {
            camera.stop_stream();
        }

        if audio_enabled {
            if self.microphone.is_none() {
                match self.provider.open_microphone() {
                    Ok(microphone) => {
                        tracing::info!(name = %microphone.info().name, "microphone bound");
                        self.microphone = Some(microphone);
                    }
                    Err(err) => {
                        tracing::warn!(%err, "failed to bind microphone");
                        first_err.get_or_insert(err);
                    }
                }
            }
        } else if let Some(mut microphone) = self.microphone.take() {
            microphone.stop_stream();
        }

        match first_err {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Begin sample emission on the bound devices. Idempotent; binds any
    /// enabled stream that is not bound yet.
    pub fn start(&mut self) -> CaptureResult<()> {
        if self.running {
            return Ok(());
        }
        let mut first_err = self
            .reconfigure(self.video_enabled, self.audio_enabled)
            .err();

        if let Some(camera) = self.camera.as_mut() {
            if !camera.is_streaming() {
                if let Err(err) = camera.start_stream(self.video_sink.clone()) {
                    tracing::warn!(%err, "failed to start camera stream");
                    first_err.get_or_insert(err);
                }
            }
        }
        if let Some(microphone) = self.microphone.as_mut() {
            if !microphone.is_streaming() {
                if let Err(err) = microphone.start_stream(self.audio_sink.clone()) {
                    tracing::warn!(%err, "failed to start microphone stream");
                    first_err.get_or_insert(err);
                }
            }
        }

        self.running = true;
        match first_err {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Halt sample emission without tearing down the bindings. Idempotent.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        if let Some(camera) = self.camera.as_mut() {
            camera.stop_stream();
        }
        if let Some(microphone) = self.microphone.as_mut() {
            microphone.stop_stream();
        }
        self.running = false;
    }

    /// Switch between the front and back camera: stop emission, rebind,
    /// resume. Never swaps while samples are in flight.
    pub fn swap_camera(&mut self) -> CaptureResult<CameraPosition> {
        let was_running = self.running;
        self.stop();

        let target = self.position.opposite();
        self.camera = None;
        match self.provider.open_camera(target) {
            Ok(camera) => {
                self.position = target;
                self.camera = Some(camera);
                tracing::info!(position = ?target, "camera swapped");
            }
            Err(err) => {
                tracing::warn!(%err, "camera swap failed, restoring previous device");
                match self.provider.open_camera(self.position) {
                    Ok(camera) => self.camera = Some(camera),
                    Err(restore_err) => {
                        tracing::warn!(%restore_err, "failed to restore previous camera");
                    }
                }
                if was_running {
                    let _ = self.start();
                }
                return Err(err);
            }
        }

        if was_running {
            self.start()?;
        }
        Ok(self.position)
    }

    // ---- device controls; silent no-ops where unsupported -------------

    pub fn set_focus(&mut self, point: FocusPoint, continuous: bool) {
        let Some(camera) = self.camera.as_mut() else {
            return;
        };
        let continuous = continuous && camera.supports_continuous_focus();
        if camera.supports_focus_point() {
            let point = FocusPoint {
                x: point.x.clamp(0.0, 1.0),
                y: point.y.clamp(0.0, 1.0),
            };
            camera.set_focus(point, continuous);
        }
    }

    /// Zoom factor, clamped to the device-reported range.
    pub fn set_zoom(&mut self, factor: f32) {
        let Some(camera) = self.camera.as_mut() else {
            return;
        };
        let (min, max) = camera.zoom_range();
        camera.set_zoom(factor.clamp(min, max));
    }

    pub fn zoom(&self) -> f32 {
        self.camera.as_ref().map_or(1.0, |camera| camera.zoom())
    }

    pub fn set_flash(&mut self, mode: FlashMode) {
        let Some(camera) = self.camera.as_mut() else {
            return;
        };
        if camera.supports_torch() {
            camera.set_torch(mode);
        } else {
            tracing::debug!("torch unsupported on the current camera");
        }
    }

    pub fn flash(&self) -> Option<FlashMode> {
        self.camera.as_ref().map(|camera| camera.torch())
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.stop();
    }
}
