//! GitHub API client for pull-request operations.

use async_trait::async_trait;
use conveyor_core::pull_request::{PullRequest, PullRequestApi, PullRequestState, PullRequestStatus};
use serde::Deserialize;
use std::time::Duration;

const USER_AGENT: &str = "Conveyor-CI";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// GitHub API client.
///
/// Requests are authenticated per call with a repository's `user:token`
/// access key using HTTP basic auth.
#[derive(Debug, Clone, Default)]
pub struct GitHubClient {
    client: reqwest::Client,
}

impl GitHubClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn request(
        &self,
        method: reqwest::Method,
        url: &str,
        access_key: &str,
    ) -> reqwest::RequestBuilder {
        let (user, token) = match access_key.split_once(':') {
            Some((user, token)) => (user, Some(token)),
            None => (access_key, None),
        };

        self.client
            .request(method, url)
            .basic_auth(user, token)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
            .timeout(REQUEST_TIMEOUT)
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<reqwest::Response, GitHubError> {
        let response = builder
            .send()
            .await
            .map_err(|e| GitHubError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(GitHubError::Api(format!(
                "Failed to {} ({}): {}",
                what, status, text
            )));
        }

        Ok(response)
    }

    /// Fetch the pull request's state and head commit.
    pub async fn pull_request_status(
        &self,
        pr: &PullRequest,
        access_key: &str,
    ) -> Result<PullRequestStatus, GitHubError> {
        let response = self
            .send(
                self.request(reqwest::Method::GET, &pr.url, access_key),
                "get pull request",
            )
            .await?;

        let body: PullRequestResponse = response
            .json()
            .await
            .map_err(|e| GitHubError::Parse(e.to_string()))?;

        Ok(PullRequestStatus {
            state: body.state,
            head_commit: body.head.sha,
        })
    }

    /// Post a comment on the pull request.
    pub async fn create_comment(
        &self,
        pr: &PullRequest,
        access_key: &str,
        body: &str,
    ) -> Result<(), GitHubError> {
        let payload = serde_json::json!({ "body": body });
        self.send(
            self.request(reqwest::Method::POST, &pr.comments_url, access_key)
                .json(&payload),
            "comment on pull request",
        )
        .await?;
        Ok(())
    }

    /// Close the pull request.
    pub async fn close_pull_request(
        &self,
        pr: &PullRequest,
        access_key: &str,
    ) -> Result<(), GitHubError> {
        let payload = serde_json::json!({ "state": "closed" });
        self.send(
            self.request(reqwest::Method::PATCH, &pr.url, access_key)
                .json(&payload),
            "close pull request",
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PullRequestApi for GitHubClient {
    async fn status(
        &self,
        pr: &PullRequest,
        access_key: &str,
    ) -> conveyor_core::Result<PullRequestStatus> {
        Ok(self.pull_request_status(pr, access_key).await?)
    }

    async fn comment(&self, pr: &PullRequest, access_key: &str, body: &str) -> conveyor_core::Result<()> {
        Ok(self.create_comment(pr, access_key, body).await?)
    }

    async fn close(&self, pr: &PullRequest, access_key: &str) -> conveyor_core::Result<()> {
        Ok(self.close_pull_request(pr, access_key).await?)
    }
}

/// The fields of a GitHub pull request this client reads.
#[derive(Debug, Deserialize)]
struct PullRequestResponse {
    state: PullRequestState,
    head: HeadResponse,
}

#[derive(Debug, Deserialize)]
struct HeadResponse {
    sha: String,
}

/// GitHub API errors.
#[derive(Debug, thiserror::Error)]
pub enum GitHubError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<GitHubError> for conveyor_core::Error {
    fn from(err: GitHubError) -> Self {
        conveyor_core::Error::Upstream(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    #[derive(Clone, Default)]
    struct Recorded {
        requests: Arc<Mutex<Vec<(String, Option<String>, Value)>>>,
    }

    fn authorization(headers: &HeaderMap) -> Option<String> {
        headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    async fn get_pull(State(rec): State<Recorded>, headers: HeaderMap) -> Json<Value> {
        rec.requests
            .lock()
            .unwrap()
            .push(("GET".to_string(), authorization(&headers), Value::Null));
        Json(json!({ "number": 7, "state": "closed", "head": { "sha": "c2" } }))
    }

    async fn patch_pull(
        State(rec): State<Recorded>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        rec.requests
            .lock()
            .unwrap()
            .push(("PATCH".to_string(), authorization(&headers), body));
        Json(json!({ "state": "closed" }))
    }

    async fn post_comment(
        State(rec): State<Recorded>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> StatusCode {
        rec.requests
            .lock()
            .unwrap()
            .push(("POST".to_string(), authorization(&headers), body));
        StatusCode::CREATED
    }

    async fn forbidden() -> (StatusCode, &'static str) {
        (StatusCode::FORBIDDEN, "rate limited")
    }

    /// Serve a fake GitHub API on a local port.
    async fn fake_github() -> (String, Recorded) {
        let recorded = Recorded::default();
        let app = Router::new()
            .route("/repos/acme/widget/pulls/7", get(get_pull).patch(patch_pull))
            .route("/repos/acme/widget/issues/7/comments", post(post_comment))
            .route("/repos/acme/widget/pulls/8", get(forbidden))
            .with_state(recorded.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), recorded)
    }

    fn pr(base: &str, number: u64) -> PullRequest {
        PullRequest {
            number,
            url: format!("{}/repos/acme/widget/pulls/{}", base, number),
            comments_url: format!("{}/repos/acme/widget/issues/{}/comments", base, number),
            head_commit: "c1".to_string(),
            repo_url: "https://github.com/acme/widget".to_string(),
        }
    }

    // "bot:token" in base64
    const BASIC: &str = "Basic Ym90OnRva2Vu";

    #[tokio::test]
    async fn test_status_reads_state_and_head() {
        let (base, recorded) = fake_github().await;
        let client = GitHubClient::new();

        let status = client.status(&pr(&base, 7), "bot:token").await.unwrap();

        assert_eq!(status.state, PullRequestState::Closed);
        assert_eq!(status.head_commit, "c2");
        let requests = recorded.requests.lock().unwrap();
        assert_eq!(requests[0].1.as_deref(), Some(BASIC));
    }

    #[tokio::test]
    async fn test_comment_and_close() {
        let (base, recorded) = fake_github().await;
        let client = GitHubClient::new();
        let pr = pr(&base, 7);

        client.comment(&pr, "bot:token", "Build passed").await.unwrap();
        client.close(&pr, "bot:token").await.unwrap();

        let requests = recorded.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].0, "POST");
        assert_eq!(requests[0].2, json!({ "body": "Build passed" }));
        assert_eq!(requests[1].0, "PATCH");
        assert_eq!(requests[1].1.as_deref(), Some(BASIC));
        assert_eq!(requests[1].2, json!({ "state": "closed" }));
    }

    #[tokio::test]
    async fn test_error_status_is_upstream_error() {
        let (base, _recorded) = fake_github().await;
        let client = GitHubClient::new();

        let err = client.status(&pr(&base, 8), "bot:token").await.unwrap_err();

        assert!(matches!(err, conveyor_core::Error::Upstream(_)));
        assert!(err.to_string().contains("403"));
    }
}
