//! Pull-request reconciliation.
//!
//! Every open pull-request event gets its own background loop. The loop
//! watches the build log for a job built from the pull request's head commit
//! and, once one shows up, comments on and/or closes the pull request as the
//! repository is configured to.
//!
//! # Timing
//!
//! - The build log is scanned every `poll_interval` (10 seconds by default),
//!   and immediately whenever a job is appended.
//! - At most once per `live_check_interval` (5 minutes by default) the loop
//!   asks the upstream API whether the pull request is still open and still
//!   points at the tracked commit. If not, the loop ends silently.
//! - A failed live check counts as "still current".
//! - A loop never outlives `max_lifetime`.
//!
//! Loops are registered by repository and pull-request number. A newer event
//! for the same pull request cancels the older loop.

use crate::build_log::BuildLog;
use conveyor_config::{Config, ReconcileSettings};
use conveyor_core::pull_request::{PullRequest, PullRequestApi};
use conveyor_core::{Job, JobId};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

/// How a reconciliation loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// A job for the head commit was found and acted on.
    Resolved { job: JobId },
    /// The pull request was closed or received new commits.
    Abandoned,
    /// The loop was cancelled by a newer event or by shutdown.
    Cancelled,
    /// The loop reached its maximum lifetime.
    Expired,
    /// The matching job's repository is not configured.
    Failed { reason: String },
}

/// One pull request being watched.
pub struct PrLoop {
    pr: PullRequest,
    config: Arc<Config>,
    build_log: BuildLog,
    api: Arc<dyn PullRequestApi>,
    settings: ReconcileSettings,
}

impl PrLoop {
    pub fn new(
        pr: PullRequest,
        config: Arc<Config>,
        build_log: BuildLog,
        api: Arc<dyn PullRequestApi>,
    ) -> Self {
        let settings = config.reconcile;
        Self {
            pr,
            config,
            build_log,
            api,
            settings,
        }
    }

    /// Poll until the pull request is resolved, abandoned, cancelled or expired.
    ///
    /// Sending `true` on the `cancel` channel, or dropping its sender, stops
    /// the loop at its next wait.
    pub async fn run(self, mut cancel: watch::Receiver<bool>) -> ReconcileOutcome {
        let started = Instant::now();
        let expires_at = deadline(started, self.settings.max_lifetime);
        let mut next_live_check = deadline(started, self.settings.live_check_interval);
        let mut appended = self.build_log.subscribe();

        debug!(pr = self.pr.number, commit = %self.pr.head_commit, "Watching pull request");

        loop {
            if let Some(job) = self.build_log.find_by_commit(&self.pr.head_commit) {
                return self.resolve(&job).await;
            }

            let now = Instant::now();
            if now >= next_live_check {
                if !self.still_current().await {
                    info!(pr = self.pr.number, repo = %self.pr.repo_url, "Pull request superseded or closed");
                    return ReconcileOutcome::Abandoned;
                }
                next_live_check = deadline(now, self.settings.live_check_interval);
            }

            if now >= expires_at {
                warn!(pr = self.pr.number, repo = %self.pr.repo_url, "Gave up waiting for a build");
                return ReconcileOutcome::Expired;
            }

            tokio::select! {
                _ = sleep(self.settings.poll_interval) => {}
                _ = appended.changed() => {}
                _ = cancel.changed() => {
                    debug!(pr = self.pr.number, "Reconciliation cancelled");
                    return ReconcileOutcome::Cancelled;
                }
            }
        }
    }

    async fn resolve(&self, job: &Job) -> ReconcileOutcome {
        let repo = match self.config.config_for_repo(&job.url) {
            Ok(repo) => repo,
            Err(e) => {
                error!(pr = self.pr.number, repo = %job.url, error = %e, "Cannot resolve pull request");
                return ReconcileOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        info!(
            pr = self.pr.number,
            repo = %repo.url,
            job_id = %job.id,
            success = job.success(),
            "Build found for pull request"
        );

        if repo.comment_pr {
            let body = comment_body(job);
            if let Err(e) = self.api.comment(&self.pr, &repo.access_key, &body).await {
                warn!(pr = self.pr.number, error = %e, "Failed to comment on pull request");
            }
        }

        if repo.close_pr {
            if let Err(e) = self.api.close(&self.pr, &repo.access_key).await {
                warn!(pr = self.pr.number, error = %e, "Failed to close pull request");
            }
        }

        ReconcileOutcome::Resolved { job: job.id }
    }

    /// Whether the pull request is still open at the tracked commit.
    /// Any failure to find out counts as yes.
    async fn still_current(&self) -> bool {
        let repo = match self.config.config_for_repo(&self.pr.repo_url) {
            Ok(repo) => repo,
            Err(e) => {
                warn!(pr = self.pr.number, error = %e, "Skipping live check, assuming pull request is current");
                return true;
            }
        };

        match self.api.status(&self.pr, &repo.access_key).await {
            Ok(status) => status.is_current_for(&self.pr.head_commit),
            Err(e) => {
                warn!(pr = self.pr.number, error = %e, "Live check failed, assuming pull request is current");
                true
            }
        }
    }
}

/// `from + after`, saturating at roughly thirty years out.
fn deadline(from: Instant, after: Duration) -> Instant {
    from.checked_add(after)
        .unwrap_or_else(|| from + Duration::from_secs(86400 * 365 * 30))
}

/// Markdown summary of a build, posted on pull requests.
pub fn comment_body(job: &Job) -> String {
    let verdict = if job.success() { "passed" } else { "failed" };
    let mut body = format!(
        "**Build {}** for `{}` on `{}`.\n\n",
        verdict,
        job.short_commit(),
        job.branch
    );

    for task in &job.tasks {
        match &task.error {
            None => {
                let _ = writeln!(body, "- passed: `{}`", task.command);
            }
            Some(e) => {
                let _ = writeln!(body, "- failed: `{}` ({})", task.command, e);
            }
        }
    }

    if let Some(deployed) = &job.deployed {
        body.push('\n');
        match &deployed.error {
            None => {
                let _ = writeln!(body, "Deployed with `{}`.", deployed.command);
            }
            Some(e) => {
                let _ = writeln!(body, "Deploy with `{}` failed ({}).", deployed.command, e);
            }
        }
    }

    body
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LoopKey {
    repo_url: String,
    number: u64,
}

struct LoopEntry {
    id: u64,
    cancel: watch::Sender<bool>,
    task: JoinHandle<ReconcileOutcome>,
}

type Registry = Arc<Mutex<HashMap<LoopKey, LoopEntry>>>;

/// Spawns and tracks one reconciliation loop per pull request.
pub struct Reconciler {
    config: Arc<Config>,
    build_log: BuildLog,
    api: Arc<dyn PullRequestApi>,
    loops: Registry,
    next_id: AtomicU64,
}

impl Reconciler {
    pub fn new(config: Arc<Config>, build_log: BuildLog, api: Arc<dyn PullRequestApi>) -> Self {
        Self {
            config,
            build_log,
            api,
            loops: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Start watching a pull request. Returns immediately.
    ///
    /// Replaces, and cancels, any loop already watching the same pull request.
    pub fn start(&self, pr: PullRequest) {
        let key = LoopKey {
            repo_url: pr.repo_url.clone(),
            number: pr.number,
        };
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (cancel, cancel_rx) = watch::channel(false);

        info!(pr = pr.number, repo = %pr.repo_url, commit = %pr.head_commit, "Tracking pull request");

        let pr_loop = PrLoop::new(pr, self.config.clone(), self.build_log.clone(), self.api.clone());
        let loops = self.loops.clone();
        let loop_key = key.clone();

        // Hold the lock while spawning so the task cannot deregister before
        // it has been registered.
        let mut registry = lock(&self.loops);
        let task = tokio::spawn(async move {
            let outcome = pr_loop.run(cancel_rx).await;
            let mut registry = lock(&loops);
            if registry.get(&loop_key).is_some_and(|entry| entry.id == id) {
                registry.remove(&loop_key);
            }
            outcome
        });

        if let Some(previous) = registry.insert(key, LoopEntry { id, cancel, task }) {
            debug!(loop_id = previous.id, "Superseding earlier reconciliation loop");
            previous.cancel.send_replace(true);
        }
    }

    /// Number of loops still running.
    pub fn active(&self) -> usize {
        lock(&self.loops).len()
    }

    /// Cancel every loop and wait for them to stop. Returns how many were running.
    pub async fn shutdown(&self) -> usize {
        let entries: Vec<LoopEntry> = lock(&self.loops).drain().map(|(_, entry)| entry).collect();
        let count = entries.len();

        for entry in &entries {
            entry.cancel.send_replace(true);
        }
        futures::future::join_all(entries.into_iter().map(|entry| entry.task)).await;

        info!(loops = count, "Reconciliation loops stopped");
        count
    }
}

fn lock(loops: &Registry) -> std::sync::MutexGuard<'_, HashMap<LoopKey, LoopEntry>> {
    loops.lock().unwrap_or_else(PoisonError::into_inner)
}
