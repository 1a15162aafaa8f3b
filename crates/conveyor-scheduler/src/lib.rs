//! Job scheduling for Conveyor CI/CD.
//!
//! Owns the bounded job queue, the single sequential build worker, the
//! shared build log and the pull-request reconciliation loops that watch it.

pub mod build_log;
pub mod error;
pub mod queue;
pub mod reconcile;
pub mod store;
pub mod worker;

pub use build_log::BuildLog;
pub use error::{SchedulerError, SchedulerResult};
pub use queue::{JobQueue, JobReceiver};
pub use reconcile::{PrLoop, ReconcileOutcome, Reconciler};
pub use store::{JsonLinesStore, MemoryStore};
pub use worker::Worker;
