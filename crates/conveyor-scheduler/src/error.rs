//! Scheduler errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("job queue is full")]
    QueueFull,

    #[error("job queue is closed")]
    QueueClosed,

    #[error("build log store: {0}")]
    Store(#[from] conveyor_core::Error),
}

pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
