//! Pull-request types and the upstream API used to reconcile them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// A pull request being tracked against the build log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    /// API URL of the pull request.
    pub url: String,
    /// API URL for posting comments.
    pub comments_url: String,
    /// Head commit at the time of the event.
    pub head_commit: String,
    /// Repository the pull request belongs to.
    pub repo_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullRequestState {
    Open,
    Closed,
}

/// Live state of a pull request as reported upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestStatus {
    pub state: PullRequestState,
    pub head_commit: String,
}

impl PullRequestStatus {
    /// True while the pull request is open and still points at `commit`.
    pub fn is_current_for(&self, commit: &str) -> bool {
        self.state == PullRequestState::Open && self.head_commit == commit
    }
}

/// Upstream pull-request operations, authenticated with a repository access key.
#[async_trait]
pub trait PullRequestApi: Send + Sync {
    /// Fetch the current state and head commit.
    async fn status(&self, pr: &PullRequest, access_key: &str) -> Result<PullRequestStatus>;

    /// Post a comment on the pull request.
    async fn comment(&self, pr: &PullRequest, access_key: &str, body: &str) -> Result<()>;

    /// Close the pull request.
    async fn close(&self, pr: &PullRequest, access_key: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_current_for() {
        let status = PullRequestStatus {
            state: PullRequestState::Open,
            head_commit: "c1".to_string(),
        };
        assert!(status.is_current_for("c1"));
        assert!(!status.is_current_for("c2"));

        let closed = PullRequestStatus {
            state: PullRequestState::Closed,
            head_commit: "c1".to_string(),
        };
        assert!(!closed.is_current_for("c1"));
    }

    #[test]
    fn test_state_wire_format() {
        let state: PullRequestState = serde_json::from_str("\"closed\"").unwrap();
        assert_eq!(state, PullRequestState::Closed);
    }
}
