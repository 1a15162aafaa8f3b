//! Build-log persistence abstraction.

use async_trait::async_trait;

use crate::{Job, Result};

/// Durable storage behind the in-memory build log.
#[async_trait]
pub trait BuildLogStore: Send + Sync {
    /// Load every stored job in append order.
    async fn load(&self) -> Result<Vec<Job>>;

    /// Persist one completed job.
    async fn append(&self, job: &Job) -> Result<()>;
}
