//! Outbound integrations.

pub mod github;
pub mod notify;

pub use github::{GitHubClient, GitHubError};
pub use notify::{
    BackgroundNotifier, LogSink, NotificationDispatcher, NotificationSink, WebhookSink,
};
