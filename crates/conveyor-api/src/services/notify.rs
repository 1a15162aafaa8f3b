//! Notification dispatch.
//!
//! The dispatcher turns each job event into a [`Notification`] and hands it
//! to every configured sink. Sink failures are logged and otherwise ignored.
//!
//! [`BackgroundNotifier`] is the [`Notifier`] handed to the build worker. It
//! queues notifications for a background task, so a slow sink never holds up
//! a build.

use async_trait::async_trait;
use conveyor_config::NotifyConfig;
use conveyor_core::Job;
use conveyor_core::notify::{NotificationKind, Notifier};
use conveyor_core::repository::RepoConfig;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);
/// Notifications waiting for delivery before new ones are dropped.
const BACKLOG: usize = 1024;

/// What a sink receives for one job event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub job_id: String,
    pub repository: String,
    pub url: String,
    pub branch: String,
    pub commit: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pusher: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deploy_error: Option<String>,
}

impl Notification {
    pub fn new(repo: &RepoConfig, job: &Job, kind: NotificationKind) -> Self {
        Self {
            kind,
            job_id: job.id.to_string(),
            repository: repo.name.clone(),
            url: repo.url.clone(),
            branch: job.branch.clone(),
            commit: job.commit.clone(),
            success: job.success(),
            pusher: job.pusher.as_ref().map(|p| p.name.clone()),
            deploy_error: job.deployed.as_ref().and_then(|t| t.error.clone()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Rejected with status {0}")]
    Rejected(u16),
}

/// One destination for notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes each notification as a structured log event.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, n: &Notification) -> Result<(), NotifyError> {
        info!(
            kind = %n.kind,
            job_id = %n.job_id,
            repo = %n.repository,
            branch = %n.branch,
            commit = %n.commit,
            success = n.success,
            deploy_error = ?n.deploy_error,
            "Notification"
        );
        Ok(())
    }
}

/// POSTs each notification as JSON to a URL.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    fn name(&self) -> &str {
        &self.url
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .timeout(WEBHOOK_TIMEOUT)
            .send()
            .await
            .map_err(|e| NotifyError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifyError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Fans notifications out to every sink.
#[derive(Clone, Default)]
pub struct NotificationDispatcher {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A log sink plus one webhook sink per configured URL.
    pub fn from_config(config: &NotifyConfig) -> Self {
        let mut dispatcher = Self::new().with_sink(Arc::new(LogSink));
        for url in &config.webhooks {
            dispatcher = dispatcher.with_sink(Arc::new(WebhookSink::new(url)));
        }
        dispatcher
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Deliver to every sink and wait for all of them.
    pub async fn dispatch(&self, notification: &Notification) {
        let results =
            futures::future::join_all(self.sinks.iter().map(|sink| sink.send(notification))).await;

        for (sink, result) in self.sinks.iter().zip(results) {
            if let Err(e) = result {
                warn!(
                    sink = %sink.name(),
                    kind = %notification.kind,
                    job_id = %notification.job_id,
                    error = %e,
                    "Failed to deliver notification"
                );
            }
        }
    }

    /// Move delivery onto a background task.
    ///
    /// Notifications are delivered one at a time in the order they were
    /// sent. The task ends once every [`BackgroundNotifier`] is dropped and
    /// the backlog is drained.
    pub fn spawn(self) -> (BackgroundNotifier, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Notification>(BACKLOG);
        let task = tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                self.dispatch(&notification).await;
            }
        });
        (BackgroundNotifier { tx }, task)
    }
}

/// Queues notifications for a dispatcher running in the background.
#[derive(Debug, Clone)]
pub struct BackgroundNotifier {
    tx: mpsc::Sender<Notification>,
}

#[async_trait]
impl Notifier for BackgroundNotifier {
    async fn notify(&self, repo: &RepoConfig, job: &Job, kind: NotificationKind) {
        match self.tx.try_send(Notification::new(repo, job, kind)) {
            Ok(()) => {}
            Err(TrySendError::Full(n)) => {
                warn!(kind = %n.kind, job_id = %n.job_id, "Notification backlog full, dropping");
            }
            Err(TrySendError::Closed(n)) => {
                warn!(kind = %n.kind, job_id = %n.job_id, "Notification dispatcher stopped, dropping");
            }
        }
    }
}
