//! Error types and handling
//!
//! One error enum for the whole pipeline, split by the categories the
//! recorder distinguishes: device, writer-state, backpressure, ordering,
//! container, and I/O. Errors are clone-able so they can be carried on the
//! event channel; I/O causes are flattened to messages because every I/O
//! failure here is log-and-continue, never a live handle the caller retries.

use thiserror::Error;

use crate::capture::sample::StreamKind;

/// Pipeline-wide error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// Device discovery, binding, or reconfiguration failed. Capture keeps
    /// running in the previous valid configuration.
    #[error("device error: {0}")]
    Device(String),

    /// Invalid recording-state transition or segment/input conflict.
    #[error("writer state error: {0}")]
    WriterState(#[from] WriterStateError),

    /// The encoder input cannot accept more data right now. The sample is
    /// dropped, never retried.
    #[error("encoder backpressure on {0:?} input")]
    Backpressure(StreamKind),

    /// A sample arrived outside the segment's rebased timeline.
    #[error("sample ordering error: {0}")]
    Ordering(String),

    /// Container (muxer) failure while opening, writing, or finalizing.
    #[error("container error: {0}")]
    Container(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        CaptureError::Io(err.to_string())
    }
}

/// Usage errors against the segment writer's state machine
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterStateError {
    #[error("already recording")]
    AlreadyRecording,

    #[error("capture device is not capture-capable")]
    NotCaptureCapable,

    #[error("maximum recording duration already reached")]
    MaximumDurationReached,

    #[error("{0:?} encoder input is not prepared")]
    InputNotPrepared(StreamKind),

    #[error("{0:?} encoder input already prepared")]
    InputAlreadyPrepared(StreamKind),

    #[error("a segment container is already open")]
    SegmentAlreadyOpen,

    #[error("no segment container is open")]
    NoOpenSegment,

    #[error("segments cannot be removed while one is being written")]
    RemoveWhileWriting,
}

/// Result type alias using CaptureError
pub type CaptureResult<T> = Result<T, CaptureError>;
