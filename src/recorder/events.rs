//! Recorder events
//!
//! The collaborator-facing notification surface: a closed set of typed
//! events on one broadcast channel. Emission is funneled through the
//! completion queue, so subscribers observe events in the order the
//! corresponding write-queue operations completed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::executor::QueueSet;
use crate::recorder::segments::Segment;
use crate::utils::error::CaptureError;

/// Events emitted while capturing
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    /// A new segment container began accepting samples.
    SegmentOpened { segment: Segment },

    /// A video sample was muxed; carries live totals for UI feedback.
    SampleWritten {
        segment: Segment,
        segment_count: usize,
        total_duration: Duration,
    },

    /// Finalize completed and the segment joined the collection.
    SegmentFinished { segment: Segment },

    /// A recoverable or usage error. Never fatal to the pipeline.
    Error { error: CaptureError },
}

/// Broadcasts [`CaptureEvent`]s through the completion queue.
#[derive(Clone)]
pub struct EventHub {
    queues: Arc<QueueSet>,
    tx: broadcast::Sender<CaptureEvent>,
}

impl EventHub {
    pub fn new(queues: Arc<QueueSet>) -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { queues, tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.tx.subscribe()
    }

    /// Hand the event to the completion queue for ordered delivery.
    pub fn emit(&self, event: CaptureEvent) {
        let tx = self.tx.clone();
        self.queues.completion().run_on(move || {
            // A send error only means nobody is subscribed right now.
            let _ = tx.send(event);
        });
    }

    pub fn emit_error(&self, error: CaptureError) {
        tracing::debug!(%error, "capture error surfaced to subscribers");
        self.emit(CaptureEvent::Error { error });
    }
}
