//! Application state.

use conveyor_config::Config;
use conveyor_scheduler::{BuildLog, JobQueue, Reconciler};
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub queue: JobQueue,
    pub build_log: BuildLog,
    pub reconciler: Arc<Reconciler>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        queue: JobQueue,
        build_log: BuildLog,
        reconciler: Arc<Reconciler>,
    ) -> Self {
        Self {
            config,
            queue,
            build_log,
            reconciler,
        }
    }
}
