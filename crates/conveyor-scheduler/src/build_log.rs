//! The shared, append-only build log.
//!
//! One writer (the build worker) appends finished jobs; any number of readers
//! take snapshots. Jobs are stored as `Arc<Job>` and never mutated after
//! insertion, so a snapshot can never expose a half-built job.

use crate::SchedulerResult;
use crate::store::MemoryStore;
use conveyor_core::Job;
use conveyor_core::store::BuildLogStore;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Clone)]
pub struct BuildLog {
    inner: Arc<Inner>,
}

struct Inner {
    jobs: RwLock<Vec<Arc<Job>>>,
    store: Arc<dyn BuildLogStore>,
    /// Number of jobs in the log, bumped on every append.
    appended: watch::Sender<usize>,
}

impl BuildLog {
    /// A log backed by an in-memory store.
    pub fn in_memory() -> Self {
        Self::with_jobs(Arc::new(MemoryStore::new()), Vec::new())
    }

    /// Open a log, loading the jobs already held by `store`.
    pub async fn open(store: Arc<dyn BuildLogStore>) -> SchedulerResult<Self> {
        let jobs = store.load().await?;
        info!(jobs = jobs.len(), "Loaded build log");
        Ok(Self::with_jobs(store, jobs))
    }

    fn with_jobs(store: Arc<dyn BuildLogStore>, jobs: Vec<Job>) -> Self {
        let jobs: Vec<Arc<Job>> = jobs.into_iter().map(Arc::new).collect();
        let (appended, _) = watch::channel(jobs.len());
        Self {
            inner: Arc::new(Inner {
                jobs: RwLock::new(jobs),
                store,
                appended,
            }),
        }
    }

    /// Append a finished job.
    ///
    /// A store failure is logged and the job is still kept in memory.
    pub async fn append(&self, job: Job) -> Arc<Job> {
        if let Err(e) = self.inner.store.append(&job).await {
            error!(job_id = %job.id, error = %e, "Failed to persist job");
        }

        let job = Arc::new(job);
        let len = {
            let mut jobs = self
                .inner
                .jobs
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            jobs.push(job.clone());
            jobs.len()
        };
        self.inner.appended.send_replace(len);
        job
    }

    /// Point-in-time copy of every job, in completion order.
    pub fn snapshot(&self) -> Vec<Arc<Job>> {
        self.inner
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The most recent job built from `commit`.
    pub fn find_by_commit(&self, commit: &str) -> Option<Arc<Job>> {
        self.inner
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|j| j.commit == commit)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receiver that is notified after every append.
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.inner.appended.subscribe()
    }
}
