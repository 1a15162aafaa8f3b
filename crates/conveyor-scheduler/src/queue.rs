//! Bounded FIFO job queue feeding the build worker.

use crate::{SchedulerError, SchedulerResult};
use conveyor_core::JobRequest;
use tokio::sync::{Semaphore, mpsc};
use tokio::sync::mpsc::error::TrySendError;

/// Default number of requests that can wait for the worker.
pub const DEFAULT_CAPACITY: usize = 100;

/// Producer side of the queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<JobRequest>,
}

/// Consumer side of the queue, owned by the single build worker.
#[derive(Debug)]
pub struct JobReceiver {
    rx: mpsc::Receiver<JobRequest>,
}

impl JobQueue {
    /// Create a queue holding at most `capacity` waiting requests.
    ///
    /// The capacity is clamped to what the channel supports.
    pub fn bounded(capacity: usize) -> (JobQueue, JobReceiver) {
        let (tx, rx) = mpsc::channel(capacity.clamp(1, Semaphore::MAX_PERMITS));
        (JobQueue { tx }, JobReceiver { rx })
    }

    /// Add a request, waiting for room when the queue is full.
    pub async fn enqueue(&self, request: JobRequest) -> SchedulerResult<()> {
        self.tx
            .send(request)
            .await
            .map_err(|_| SchedulerError::QueueClosed)
    }

    /// Add a request without waiting.
    pub fn try_enqueue(&self, request: JobRequest) -> SchedulerResult<()> {
        self.tx.try_send(request).map_err(|e| match e {
            TrySendError::Full(_) => SchedulerError::QueueFull,
            TrySendError::Closed(_) => SchedulerError::QueueClosed,
        })
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Requests waiting for the worker.
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

impl JobReceiver {
    /// Next request in arrival order, `None` once every producer is gone.
    pub async fn next(&mut self) -> Option<JobRequest> {
        self.rx.recv().await
    }
}
