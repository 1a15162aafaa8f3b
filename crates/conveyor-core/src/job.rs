//! Build jobs and the tasks they are made of.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::executor::CommandOutput;
use crate::{JobId, Result};

/// Who triggered a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pusher {
    pub name: String,
    pub email: Option<String>,
}

/// A request to build one commit of a repository, as carried by the job queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Canonical repository URL.
    pub url: String,
    /// Branch the commit was pushed to.
    pub branch: String,
    /// Commit under test.
    pub commit: String,
    pub pusher: Option<Pusher>,
}

impl JobRequest {
    pub fn new(url: impl Into<String>, branch: impl Into<String>, commit: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            branch: branch.into(),
            commit: commit.into(),
            pusher: None,
        }
    }

    pub fn with_pusher(mut self, pusher: Pusher) -> Self {
        self.pusher = Some(pusher);
        self
    }
}

/// One executed step: a build command or a deploy command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// The executable that was invoked.
    pub command: String,
    /// Combined stdout and stderr.
    pub output: String,
    /// `None` on success, otherwise the error text (e.g. `exit status 1`).
    pub error: Option<String>,
}

impl Task {
    pub fn succeeded(command: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            output: output.into(),
            error: None,
        }
    }

    pub fn failed(
        command: impl Into<String>,
        output: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            output: output.into(),
            error: Some(error.into()),
        }
    }

    /// Build a task from the result of running `command` through an executor.
    ///
    /// A non-zero exit keeps the captured output and records the exit status;
    /// an executor error (spawn failure, timeout) records the error text.
    pub fn from_run(command: impl Into<String>, result: Result<CommandOutput>) -> Self {
        let command = command.into();
        match result {
            Ok(out) => match out.exit_code {
                Some(0) => Self::succeeded(command, out.output),
                Some(code) => Self::failed(command, out.output, format!("exit status {}", code)),
                None => Self::failed(command, out.output, "terminated by signal"),
            },
            Err(e) => Self::failed(command, String::new(), e.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// One build attempt for a repository, branch and commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub url: String,
    pub branch: String,
    pub commit: String,
    pub pusher: Option<Pusher>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Build steps in execution order.
    pub tasks: Vec<Task>,
    /// Outcome of the deploy step, if one ran.
    pub deployed: Option<Task>,
}

impl Job {
    /// Start a job for a dequeued request.
    pub fn start(request: JobRequest) -> Self {
        Self {
            id: JobId::new(),
            url: request.url,
            branch: request.branch,
            commit: request.commit,
            pusher: request.pusher,
            started_at: Utc::now(),
            finished_at: None,
            tasks: Vec::new(),
            deployed: None,
        }
    }

    /// True iff every build task succeeded.
    pub fn success(&self) -> bool {
        self.tasks.iter().all(Task::is_success)
    }

    /// Abbreviated commit hash for display.
    pub fn short_commit(&self) -> &str {
        self.commit.get(..7).unwrap_or(&self.commit)
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}
