//! Named serial work queues
//!
//! The pipeline runs on a fixed set of queues: device callbacks land on
//! `capture`, per-stream sample handling on `video`/`audio`, container I/O
//! on `write`, and collaborator notifications on `completion`. Each queue is
//! one dedicated worker thread draining jobs in submission order, so work on
//! a queue is serialized while the queues run in parallel with each other.
//!
//! Producers must not be starved by their consumers: video frames come out
//! of a fixed-size pool on real devices, so the video queue accepts samples
//! through [`WorkQueue::try_run_on`], which drops (and logs) instead of
//! letting a backlog grow. Audio tolerates more latency and uses the same
//! bounded path with a deeper limit.

use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

/// Identifies one of the pipeline's serial queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueLabel {
    Capture,
    Video,
    Audio,
    Write,
    Completion,
}

impl QueueLabel {
    fn thread_name(self) -> &'static str {
        match self {
            QueueLabel::Capture => "retake-capture",
            QueueLabel::Video => "retake-video",
            QueueLabel::Audio => "retake-audio",
            QueueLabel::Write => "retake-write",
            QueueLabel::Completion => "retake-completion",
        }
    }
}

enum Job {
    Run(Box<dyn FnOnce() + Send + 'static>),
    Shutdown,
}

thread_local! {
    static CURRENT_QUEUE: Cell<Option<QueueLabel>> = const { Cell::new(None) };
}

/// A single serial queue backed by a dedicated worker thread.
pub struct WorkQueue {
    label: QueueLabel,
    tx: mpsc::Sender<Job>,
    pending: Arc<AtomicUsize>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WorkQueue {
    fn new(label: QueueLabel) -> Self {
        let (tx, rx) = mpsc::channel::<Job>();
        let pending = Arc::new(AtomicUsize::new(0));
        let worker_pending = pending.clone();

        let worker = std::thread::Builder::new()
            .name(label.thread_name().to_string())
            .spawn(move || {
                CURRENT_QUEUE.with(|current| current.set(Some(label)));
                while let Ok(job) = rx.recv() {
                    match job {
                        Job::Run(f) => {
                            f();
                            worker_pending.fetch_sub(1, Ordering::Release);
                        }
                        Job::Shutdown => break,
                    }
                }
            })
            .unwrap_or_else(|e| panic!("failed to spawn {} worker: {e}", label.thread_name()));

        Self {
            label,
            tx,
            pending,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Label of the queue the calling thread is currently executing on, if
    /// it is one of ours.
    pub fn current() -> Option<QueueLabel> {
        CURRENT_QUEUE.with(|current| current.get())
    }

    pub fn label(&self) -> QueueLabel {
        self.label
    }

    /// True when the calling thread is this queue's worker.
    pub fn is_current(&self) -> bool {
        Self::current() == Some(self.label)
    }

    /// Number of jobs submitted but not yet finished.
    pub fn depth(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Enqueue a job to run in submission order.
    pub fn run_on(&self, f: impl FnOnce() + Send + 'static) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(Job::Run(Box::new(f))).is_err() {
            self.pending.fetch_sub(1, Ordering::Release);
            tracing::warn!(queue = self.label.thread_name(), "job dropped, queue is shut down");
        }
    }

    /// Enqueue a job unless the queue already holds `limit` unfinished jobs.
    /// Returns false when the job was dropped.
    pub fn try_run_on(&self, limit: usize, f: impl FnOnce() + Send + 'static) -> bool {
        if self.depth() >= limit {
            return false;
        }
        self.run_on(f);
        true
    }

    /// Run a job on this queue and wait for its result. When the caller is
    /// already on this queue the job executes inline, so a queue can safely
    /// hand work to itself without deadlocking. A queue that has already
    /// shut down also runs the job inline rather than stranding the caller.
    pub fn run_on_sync<R: Send + 'static>(&self, f: impl FnOnce() -> R + Send + 'static) -> R {
        if self.is_current() {
            return f();
        }
        let (done_tx, done_rx) = mpsc::channel();
        let job: Box<dyn FnOnce() + Send + 'static> = Box::new(move || {
            let _ = done_tx.send(f());
        });

        self.pending.fetch_add(1, Ordering::AcqRel);
        match self.tx.send(Job::Run(job)) {
            Ok(()) => {}
            Err(mpsc::SendError(job)) => {
                self.pending.fetch_sub(1, Ordering::Release);
                if let Job::Run(job) = job {
                    job();
                }
            }
        }
        // The worker outlives every handle to this queue; a closed channel
        // here means it panicked mid-job.
        done_rx
            .recv()
            .expect("work queue terminated during a synchronous hand-off")
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        let _ = self.tx.send(Job::Shutdown);
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

/// The pipeline's fixed queue roster.
pub struct QueueSet {
    capture: WorkQueue,
    video: WorkQueue,
    audio: WorkQueue,
    write: WorkQueue,
    completion: WorkQueue,
}

impl QueueSet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            capture: WorkQueue::new(QueueLabel::Capture),
            video: WorkQueue::new(QueueLabel::Video),
            audio: WorkQueue::new(QueueLabel::Audio),
            write: WorkQueue::new(QueueLabel::Write),
            completion: WorkQueue::new(QueueLabel::Completion),
        })
    }

    pub fn capture(&self) -> &WorkQueue {
        &self.capture
    }

    pub fn video(&self) -> &WorkQueue {
        &self.video
    }

    pub fn audio(&self) -> &WorkQueue {
        &self.audio
    }

    pub fn write(&self) -> &WorkQueue {
        &self.write
    }

    pub fn completion(&self) -> &WorkQueue {
        &self.completion
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn jobs_run_in_submission_order() {
        let queues = QueueSet::new();
        let (tx, rx) = mpsc::channel();
        for i in 0..32 {
            let tx = tx.clone();
            queues.write().run_on(move || {
                let _ = tx.send(i);
            });
        }
        let seen: Vec<i32> = (0..32).map(|_| rx.recv().unwrap()).collect();
        assert_eq!(seen, (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn run_on_sync_returns_the_jobs_value() {
        let queues = QueueSet::new();
        let value = queues.capture().run_on_sync(|| 41 + 1);
        assert_eq!(value, 42);
        assert!(!queues.capture().is_current());
    }

    #[test]
    fn run_on_sync_tags_the_worker_thread() {
        let queues = QueueSet::new();
        let label = queues.video().run_on_sync(WorkQueue::current);
        assert_eq!(label, Some(QueueLabel::Video));
    }

    #[test]
    fn self_hand_off_from_a_running_job_does_not_deadlock() {
        let queues = QueueSet::new();
        let (tx, rx) = mpsc::channel();
        let inner = queues.clone();
        queues.audio().run_on(move || {
            // Synchronous hand-off to the queue we are already on must run
            // inline instead of waiting on ourselves.
            let v = inner.audio().run_on_sync(|| 5);
            let _ = tx.send(v);
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 5);
    }

    #[test]
    fn try_run_on_drops_when_the_queue_is_saturated() {
        let queues = QueueSet::new();
        let (hold_tx, hold_rx) = mpsc::channel::<()>();
        // Park the worker so submitted jobs stay pending.
        queues.video().run_on(move || {
            let _ = hold_rx.recv();
        });
        while queues.video().depth() < 1 {
            std::thread::yield_now();
        }
        assert!(queues.video().try_run_on(2, || {}));
        assert!(!queues.video().try_run_on(2, || {}));
        let _ = hold_tx.send(());
    }
}
