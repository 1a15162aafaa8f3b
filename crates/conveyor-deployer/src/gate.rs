//! The deploy gate.

use conveyor_config::Config;
use conveyor_core::Job;
use conveyor_core::Task;
use conveyor_core::executor::{CommandSpec, Executor};
use conveyor_core::notify::{NotificationKind, Notifier};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Why a job was not deployed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    BuildFailed,
    UnknownRepository,
    NoTarget,
}

/// Result of passing a job through the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployOutcome {
    Skipped(SkipReason),
    Deployed,
    Failed { error: String },
}

/// Runs deploy scripts for successful builds.
pub struct DeployGate {
    executor: Arc<dyn Executor>,
    notifier: Arc<dyn Notifier>,
    timeout: Option<Duration>,
}

impl DeployGate {
    pub fn new(executor: Arc<dyn Executor>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            executor,
            notifier,
            timeout: None,
        }
    }

    /// Bound each deploy script by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Deploy `job` if its build succeeded and its branch has a target.
    ///
    /// On a deploy attempt the outcome is recorded in `job.deployed`, and
    /// `DeployStart`/`DeployDone` are sent around the script. Skipped jobs
    /// are left untouched and produce no notifications.
    pub async fn deploy(&self, job: &mut Job, config: &Config) -> DeployOutcome {
        if !job.success() {
            info!(repo = %job.url, branch = %job.branch, "Not deploying, build did not succeed");
            return DeployOutcome::Skipped(SkipReason::BuildFailed);
        }

        let repo = match config.config_for_repo(&job.url) {
            Ok(repo) => repo,
            Err(e) => {
                warn!(repo = %job.url, error = %e, "Not deploying, repository is not configured");
                return DeployOutcome::Skipped(SkipReason::UnknownRepository);
            }
        };

        let target = match repo.deploy_target(&job.branch) {
            Ok(target) => target,
            Err(_) => {
                info!(repo = %job.url, branch = %job.branch, "No deploy target for branch");
                return DeployOutcome::Skipped(SkipReason::NoTarget);
            }
        };

        self.notifier
            .notify(repo, job, NotificationKind::DeployStart)
            .await;

        info!(
            repo = %repo.url,
            branch = %job.branch,
            commit = %job.short_commit(),
            script = %target.execute,
            "Deploying"
        );

        let spec = CommandSpec::new(&target.execute)
            .arg(&repo.url)
            .arg(&job.branch)
            .timeout(self.timeout);
        let task = Task::from_run(&target.execute, self.executor.run(spec).await);

        let outcome = match &task.error {
            None => {
                info!(repo = %repo.url, branch = %job.branch, "Deploy finished");
                DeployOutcome::Deployed
            }
            Some(e) => {
                error!(repo = %repo.url, branch = %job.branch, error = %e, "Deploy failed");
                DeployOutcome::Failed { error: e.clone() }
            }
        };
        job.deployed = Some(task);

        self.notifier
            .notify(repo, job, NotificationKind::DeployDone)
            .await;

        outcome
    }
}
