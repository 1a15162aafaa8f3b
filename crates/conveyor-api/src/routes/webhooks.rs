//! Webhook endpoints for GitHub.

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use tracing::{info, warn};

use crate::AppState;
use crate::error::ApiError;
use conveyor_core::pull_request::PullRequest;
use conveyor_core::{JobRequest, Pusher};

pub fn router() -> Router<AppState> {
    Router::new().route("/github", post(github_webhook))
}

#[derive(Debug, Deserialize)]
struct RepositoryPayload {
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct PusherPayload {
    name: String,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PushPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    after: String,
    #[serde(default)]
    deleted: bool,
    repository: RepositoryPayload,
    pusher: Option<PusherPayload>,
}

#[derive(Debug, Deserialize)]
struct PullRequestEventPayload {
    action: String,
    number: u64,
    pull_request: PullRequestPayload,
    repository: RepositoryPayload,
}

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    url: String,
    comments_url: String,
    head: HeadPayload,
}

#[derive(Debug, Deserialize)]
struct HeadPayload {
    sha: String,
}

/// Handle GitHub webhook events.
async fn github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let event_type = headers
        .get("X-GitHub-Event")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("missing X-GitHub-Event header".to_string()))?;

    if let Some(secret) = &state.config.server.secret {
        let signature = headers
            .get("X-Hub-Signature-256")
            .and_then(|v| v.to_str().ok());
        if !verify_github_signature(secret, &body, signature) {
            warn!(event = %event_type, "Invalid webhook signature");
            return Err(ApiError::Unauthorized("invalid signature".to_string()));
        }
    }

    info!(event = %event_type, "Received GitHub webhook");

    match event_type {
        "push" => handle_push(&state, decode(&body)?).await,
        "pull_request" => handle_pull_request(&state, decode(&body)?),
        "ping" => {
            info!("Ping event received - webhook is configured correctly");
            Ok(StatusCode::OK)
        }
        _ => {
            info!(event = %event_type, "Unhandled event type");
            Ok(StatusCode::OK)
        }
    }
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid payload: {}", e)))
}

/// Queue a build for a pushed branch.
async fn handle_push(state: &AppState, payload: PushPayload) -> Result<StatusCode, ApiError> {
    let Some(branch) = payload.git_ref.strip_prefix("refs/heads/") else {
        info!(git_ref = %payload.git_ref, "Ignoring push to non-branch ref");
        return Ok(StatusCode::OK);
    };

    if payload.deleted || payload.after.bytes().all(|b| b == b'0') {
        info!(branch = %branch, "Ignoring branch deletion");
        return Ok(StatusCode::OK);
    }

    let repo = state.config.config_for_repo(&payload.repository.html_url)?;

    let mut request = JobRequest::new(repo.url.clone(), branch, payload.after);
    if let Some(pusher) = payload.pusher {
        request = request.with_pusher(Pusher {
            name: pusher.name,
            email: pusher.email,
        });
    }

    info!(
        repo = %repo.url,
        branch = %request.branch,
        commit = %request.commit,
        "Queueing build"
    );
    state.queue.enqueue(request).await?;

    Ok(StatusCode::ACCEPTED)
}

/// Start reconciling an opened or updated pull request.
fn handle_pull_request(
    state: &AppState,
    payload: PullRequestEventPayload,
) -> Result<StatusCode, ApiError> {
    if payload.action == "closed" {
        info!(pr = payload.number, "Ignoring closed pull request");
        return Ok(StatusCode::OK);
    }

    let repo = state.config.config_for_repo(&payload.repository.html_url)?;

    state.reconciler.start(PullRequest {
        number: payload.number,
        url: payload.pull_request.url,
        comments_url: payload.pull_request.comments_url,
        head_commit: payload.pull_request.head.sha,
        repo_url: repo.url.clone(),
    });

    Ok(StatusCode::ACCEPTED)
}

/// Verify GitHub webhook signature.
fn verify_github_signature(secret: &str, body: &[u8], signature: Option<&str>) -> bool {
    let Some(signature) = signature else {
        return false;
    };

    // Signature format: "sha256=<hex>"
    let Some(sig_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let Ok(sig_bytes) = hex::decode(sig_hex) else {
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);

    mac.verify_slice(&sig_bytes).is_ok()
}
