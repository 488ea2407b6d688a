//! Recording system module
//!
//! This module implements the segmented recording architecture:
//! - SegmentWriter: recording state machine driving per-segment containers
//! - SampleRouter: per-queue gating/cropping between devices and writer
//! - SegmentCollection: ordered finished segments plus the in-progress one
//! - CaptureCoordinator: the collaborator-facing surface and event hub

pub mod coordinator;
pub mod events;
pub mod router;
pub mod segments;
pub mod state;
pub mod writer;

pub use coordinator::CaptureCoordinator;
pub use events::{CaptureEvent, EventHub};
pub use router::{SampleRouter, SharedConfig};
pub use segments::{Segment, SegmentCollection};
pub use state::RecordingState;
pub use writer::{SegmentWriter, WriterOptions};
