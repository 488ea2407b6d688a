//! Recording state management

use serde::{Deserialize, Serialize};

/// State of the segment writer's recording machine.
///
/// Idle → Recording on a successful start; Recording → Finished the moment
/// a stop is requested; Finished → Idle once the open container has been
/// finalized and appended to the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// No recording in progress, no open container
    Idle,
    /// Samples are being accepted and muxed
    Recording,
    /// Stop requested; container finalizing asynchronously
    Finished,
}

impl Default for RecordingState {
    fn default() -> Self {
        Self::Idle
    }
}
