//! retake: segmented audio/video capture-and-record pipeline.
//!
//! Pulls live video and audio samples from a capture device, times and
//! rebases them, and writes them into a sequence of independently playable
//! MP4 segments while recording can be started, stopped, and resumed
//! repeatedly within one preview session.
//!
//! The moving parts, leaf first: a fixed set of serial work queues
//! ([`executor`]), the device session and backends ([`capture`]), the
//! per-segment container and opaque encoder services ([`muxer`]), and the
//! recording state machine with its router, segment collection, and
//! coordinator ([`recorder`]).

pub mod capture;
pub mod executor;
pub mod muxer;
pub mod recorder;
pub mod utils;

pub use capture::{
    AudioConfig, CameraPosition, CaptureConfig, DeviceProvider, ExportRegion, FlashMode,
    FocusPoint, QualityTier, RectF, SyntheticProvider, SyntheticSpec, VideoConfig,
};
pub use recorder::{CaptureCoordinator, CaptureEvent, RecordingState, Segment};
pub use utils::{CaptureError, CaptureResult, WriterStateError};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging for binaries embedding the pipeline.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "retake=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
