//! The sequential build worker.

use crate::build_log::BuildLog;
use crate::queue::JobReceiver;
use conveyor_config::Config;
use conveyor_core::executor::{CommandSpec, Executor};
use conveyor_core::notify::{NotificationKind, Notifier};
use conveyor_core::{Job, JobRequest, Task};
use conveyor_deployer::DeployGate;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Builds one job at a time, in queue order.
pub struct Worker {
    config: Arc<Config>,
    executor: Arc<dyn Executor>,
    notifier: Arc<dyn Notifier>,
    deploy_gate: DeployGate,
    build_log: BuildLog,
}

impl Worker {
    pub fn new(
        config: Arc<Config>,
        executor: Arc<dyn Executor>,
        notifier: Arc<dyn Notifier>,
        build_log: BuildLog,
    ) -> Self {
        let deploy_gate = DeployGate::new(executor.clone(), notifier.clone())
            .with_timeout(config.timeouts.deploy);
        Self {
            config,
            executor,
            notifier,
            deploy_gate,
            build_log,
        }
    }

    /// Run the worker loop until shutdown or until every producer is gone.
    ///
    /// A job in progress always runs to completion before the loop exits.
    pub async fn run(self, mut jobs: JobReceiver, mut shutdown: watch::Receiver<bool>) {
        info!("Starting build worker");

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            let request = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                request = jobs.next() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            self.process(request).await;
        }

        info!("Build worker stopped");
    }

    /// Build, deploy and record one request.
    ///
    /// Returns `None` when the repository is not configured; nothing is
    /// recorded in that case.
    pub async fn process(&self, request: JobRequest) -> Option<Arc<Job>> {
        let repo = match self.config.config_for_repo(&request.url) {
            Ok(repo) => repo,
            Err(e) => {
                warn!(repo = %request.url, error = %e, "Dropping job for unconfigured repository");
                return None;
            }
        };

        let mut job = Job::start(request);
        info!(
            job_id = %job.id,
            repo = %repo.url,
            branch = %job.branch,
            commit = %job.short_commit(),
            "Building"
        );

        self.notifier
            .notify(repo, &job, NotificationKind::BuildStart)
            .await;

        for command in &repo.commands {
            let spec = CommandSpec::new(command)
                .arg(&repo.url)
                .arg(&job.branch)
                .env("CONVEYOR_COMMIT", &job.commit)
                .timeout(Some(self.config.timeouts.build));
            let task = Task::from_run(command, self.executor.run(spec).await);

            if let Some(e) = &task.error {
                warn!(job_id = %job.id, command = %command, error = %e, "Build step failed");
            }
            job.tasks.push(task);
        }

        info!(job_id = %job.id, success = job.success(), "Build finished");
        self.notifier
            .notify(repo, &job, NotificationKind::BuildDone)
            .await;

        let outcome = self.deploy_gate.deploy(&mut job, &self.config).await;
        info!(job_id = %job.id, ?outcome, "Deploy gate finished");

        job.finish();
        Some(self.build_log.append(job).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::JobQueue;
    use async_trait::async_trait;
    use conveyor_config::parse_config;
    use conveyor_core::executor::CommandOutput;
    use conveyor_core::repository::RepoConfig;
    use conveyor_core::Result;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Answers by program name, optionally after a delay.
    #[derive(Default)]
    struct ScriptedExecutor {
        exit_codes: HashMap<String, i32>,
        delays: HashMap<String, Duration>,
        calls: Mutex<Vec<CommandSpec>>,
    }

    impl ScriptedExecutor {
        fn programs(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|c| c.program.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Executor for ScriptedExecutor {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn run(&self, spec: CommandSpec) -> Result<CommandOutput> {
            if let Some(delay) = spec.args.get(1).and_then(|branch| self.delays.get(branch)) {
                tokio::time::sleep(*delay).await;
            }
            let exit_code = self.exit_codes.get(&spec.program).copied().unwrap_or(0);
            let output = format!("ran {}\n", spec.program);
            self.calls.lock().unwrap().push(spec);
            Ok(CommandOutput {
                output,
                exit_code: Some(exit_code),
            })
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, NotificationKind)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, _repo: &RepoConfig, job: &Job, kind: NotificationKind) {
            self.sent.lock().unwrap().push((job.commit.clone(), kind));
        }
    }

    fn config() -> Arc<Config> {
        Arc::new(
            parse_config(
                r#"
                timeouts {
                    build 60
                    deploy 90
                }
                repo "https://example.com/r" {
                    command "./test.sh"
                    command "./lint.sh"
                    deploy "main" "./deploy.sh"
                }
                "#,
            )
            .unwrap(),
        )
    }

    fn worker(executor: Arc<ScriptedExecutor>, notifier: Arc<RecordingNotifier>) -> (Worker, BuildLog) {
        let log = BuildLog::in_memory();
        (Worker::new(config(), executor, notifier, log.clone()), log)
    }

    fn request(branch: &str, commit: &str) -> JobRequest {
        JobRequest::new("https://example.com/r", branch, commit)
    }

    #[tokio::test]
    async fn test_successful_job_is_built_deployed_and_logged() {
        let executor = Arc::new(ScriptedExecutor::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let (worker, log) = worker(executor.clone(), notifier.clone());

        let job = worker.process(request("main", "c1")).await.unwrap();

        assert!(job.success());
        assert_eq!(job.tasks.len(), 2);
        assert_eq!(job.tasks[0].command, "./test.sh");
        assert_eq!(job.tasks[0].output, "ran ./test.sh\n");
        assert!(job.deployed.as_ref().unwrap().error.is_none());
        assert!(job.finished_at.is_some());

        assert_eq!(executor.programs(), vec!["./test.sh", "./lint.sh", "./deploy.sh"]);
        let calls = executor.calls.lock().unwrap();
        assert_eq!(calls[0].args, vec!["https://example.com/r", "main"]);
        assert_eq!(calls[0].env.get("CONVEYOR_COMMIT").map(String::as_str), Some("c1"));
        assert_eq!(calls[0].timeout, Some(Duration::from_secs(60)));
        assert_eq!(calls[2].timeout, Some(Duration::from_secs(90)));

        let kinds: Vec<_> = notifier.sent.lock().unwrap().iter().map(|(_, k)| *k).collect();
        assert_eq!(
            kinds,
            vec![
                NotificationKind::BuildStart,
                NotificationKind::BuildDone,
                NotificationKind::DeployStart,
                NotificationKind::DeployDone,
            ]
        );

        // Only finished jobs, deploy included, reach the log.
        let logged = log.snapshot();
        assert_eq!(logged.len(), 1);
        assert!(logged[0].deployed.is_some());
    }

    #[tokio::test]
    async fn test_failed_step_does_not_abort_job() {
        let executor = Arc::new(ScriptedExecutor {
            exit_codes: HashMap::from([("./test.sh".to_string(), 1)]),
            ..Default::default()
        });
        let notifier = Arc::new(RecordingNotifier::default());
        let (worker, log) = worker(executor.clone(), notifier.clone());

        let job = worker.process(request("main", "c1")).await.unwrap();

        assert!(!job.success());
        assert_eq!(job.tasks[0].error.as_deref(), Some("exit status 1"));
        assert!(job.tasks[1].error.is_none());
        assert!(job.deployed.is_none());
        assert_eq!(executor.programs(), vec!["./test.sh", "./lint.sh"]);
        assert_eq!(notifier.sent.lock().unwrap().len(), 2);
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn test_unconfigured_repository_is_dropped() {
        let executor = Arc::new(ScriptedExecutor::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let (worker, log) = worker(executor.clone(), notifier.clone());

        let job = worker
            .process(JobRequest::new("https://example.com/unknown", "main", "c1"))
            .await;

        assert!(job.is_none());
        assert!(executor.programs().is_empty());
        assert!(notifier.sent.lock().unwrap().is_empty());
        assert!(log.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_jobs_run_in_queue_order() {
        // Earlier jobs take longer; the log must still follow queue order.
        let executor = Arc::new(ScriptedExecutor {
            delays: HashMap::from([
                ("a".to_string(), Duration::from_secs(30)),
                ("b".to_string(), Duration::from_secs(10)),
                ("c".to_string(), Duration::from_secs(1)),
            ]),
            ..Default::default()
        });
        let notifier = Arc::new(RecordingNotifier::default());
        let (worker, log) = worker(executor, notifier);

        let (queue, receiver) = JobQueue::bounded(10);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        for branch in ["a", "b", "c"] {
            queue.enqueue(request(branch, branch)).await.unwrap();
        }
        drop(queue);

        worker.run(receiver, shutdown_rx).await;

        let order: Vec<_> = log.snapshot().iter().map(|j| j.commit.clone()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_shutdown_stops_worker() {
        let executor = Arc::new(ScriptedExecutor::default());
        let (worker, log) = worker(executor, Arc::new(RecordingNotifier::default()));

        let (queue, receiver) = JobQueue::bounded(10);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(worker.run(receiver, shutdown_rx));

        queue.enqueue(request("main", "c1")).await.unwrap();
        while log.is_empty() {
            tokio::task::yield_now().await;
        }

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(log.len(), 1);
    }
}
