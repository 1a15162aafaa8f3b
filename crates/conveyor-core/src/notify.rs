//! Notification trait.

use async_trait::async_trait;
use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::Job;
use crate::repository::RepoConfig;

/// Point in a job's life that triggers a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    #[display("build_start")]
    BuildStart,
    #[display("build_done")]
    BuildDone,
    #[display("deploy_start")]
    DeployStart,
    #[display("deploy_done")]
    DeployDone,
}

/// Fire-and-forget notification sink.
///
/// Implementations report their own delivery failures; callers never
/// observe them.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, repo: &RepoConfig, job: &Job, kind: NotificationKind);
}
