//! Top-level configuration parsing.

use crate::node::{get_all_string_args, positive_integer, required_string, seconds};
use crate::repo::parse_repo;
use crate::{ConfigError, ConfigResult};
use conveyor_core::repository::RepoConfig;
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_LISTEN: &str = "0.0.0.0:8082";
const DEFAULT_QUEUE_CAPACITY: usize = 100;
const DEFAULT_STEP_TIMEOUT_SECS: u64 = 30 * 60;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
const DEFAULT_LIVE_CHECK_INTERVAL_SECS: u64 = 300;
const DEFAULT_MAX_LIFETIME_SECS: u64 = 24 * 60 * 60;

/// Upper bound for any configured duration.
pub const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);
/// Upper bound for `queue-capacity`.
pub const MAX_QUEUE_CAPACITY: usize = 1_000_000;

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind.
    pub listen: String,
    /// Public URL the server is reachable at.
    pub url: Option<String>,
    /// Shared secret for webhook signatures.
    pub secret: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            url: None,
            secret: None,
        }
    }
}

/// Upper bounds for build and deploy steps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Timeouts {
    pub build: Duration,
    pub deploy: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            build: Duration::from_secs(DEFAULT_STEP_TIMEOUT_SECS),
            deploy: Duration::from_secs(DEFAULT_STEP_TIMEOUT_SECS),
        }
    }
}

/// Timing policy for pull-request reconciliation loops.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReconcileSettings {
    /// Sleep between build-log scans.
    pub poll_interval: Duration,
    /// Minimum time between live checks against the upstream API.
    pub live_check_interval: Duration,
    /// A loop gives up after this long.
    pub max_lifetime: Duration,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            live_check_interval: Duration::from_secs(DEFAULT_LIVE_CHECK_INTERVAL_SECS),
            max_lifetime: Duration::from_secs(DEFAULT_MAX_LIFETIME_SECS),
        }
    }
}

/// Notification sinks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// URLs that receive a JSON POST per notification.
    pub webhooks: Vec<String>,
}

/// Complete server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    /// JSON-lines file holding the build log. In-memory only when unset.
    pub build_log: Option<PathBuf>,
    pub queue_capacity: usize,
    pub timeouts: Timeouts,
    pub reconcile: ReconcileSettings,
    pub notify: NotifyConfig,
    pub repos: Vec<RepoConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            build_log: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            timeouts: Timeouts::default(),
            reconcile: ReconcileSettings::default(),
            notify: NotifyConfig::default(),
            repos: Vec::new(),
        }
    }
}

impl Config {
    /// Find the configuration for a repository URL.
    pub fn config_for_repo(&self, url: &str) -> ConfigResult<&RepoConfig> {
        self.repos
            .iter()
            .find(|r| r.matches_url(url))
            .ok_or_else(|| ConfigError::UnknownRepository(url.to_string()))
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.repos.is_empty() {
            return Err(ConfigError::MissingField("repo".to_string()));
        }

        if self.queue_capacity == 0 || self.queue_capacity > MAX_QUEUE_CAPACITY {
            return Err(ConfigError::InvalidValue {
                field: "queue-capacity".to_string(),
                message: format!("must be between 1 and {}", MAX_QUEUE_CAPACITY),
            });
        }

        let durations = [
            ("timeouts build", self.timeouts.build),
            ("timeouts deploy", self.timeouts.deploy),
            ("reconcile poll-interval", self.reconcile.poll_interval),
            ("reconcile live-check-interval", self.reconcile.live_check_interval),
            ("reconcile max-lifetime", self.reconcile.max_lifetime),
        ];
        for (field, value) in durations {
            if value > MAX_DURATION {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: format!("must be at most {} seconds", MAX_DURATION.as_secs()),
                });
            }
        }

        self.server
            .listen
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue {
                field: "server listen".to_string(),
                message: e.to_string(),
            })?;

        if let Some(url) = &self.server.url {
            url::Url::parse(url).map_err(|e| ConfigError::InvalidValue {
                field: "server url".to_string(),
                message: e.to_string(),
            })?;
        }

        let mut seen = HashSet::new();
        for repo in &self.repos {
            if !seen.insert(repo.normalized_url()) {
                return Err(ConfigError::Duplicate(format!("repo {}", repo.url)));
            }

            let mut branches = HashSet::new();
            for target in &repo.deploy_targets {
                if !branches.insert(target.branch.as_str()) {
                    return Err(ConfigError::Duplicate(format!(
                        "deploy target for branch '{}' of {}",
                        target.branch, repo.url
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Parse and validate configuration from KDL text.
pub fn parse_config(kdl: &str) -> ConfigResult<Config> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "server" => config.server = parse_server(node)?,
            "build-log" => config.build_log = Some(PathBuf::from(required_string(node)?)),
            "queue-capacity" => {
                config.queue_capacity = usize::try_from(positive_integer(node)?).unwrap_or(usize::MAX)
            }
            "timeouts" => parse_timeouts(node, &mut config.timeouts)?,
            "reconcile" => parse_reconcile(node, &mut config.reconcile)?,
            "notify" => config.notify = parse_notify(node),
            "repo" => config.repos.push(parse_repo(node)?),
            _ => {} // Ignore unknown nodes
        }
    }

    config.validate()?;
    Ok(config)
}

/// Read, parse and validate a configuration file.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

fn parse_server(node: &KdlNode) -> ConfigResult<ServerConfig> {
    let mut server = ServerConfig::default();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "listen" => server.listen = required_string(child)?,
                "url" => server.url = Some(required_string(child)?),
                "secret" => server.secret = Some(required_string(child)?),
                _ => {}
            }
        }
    }
    Ok(server)
}

fn parse_timeouts(node: &KdlNode, timeouts: &mut Timeouts) -> ConfigResult<()> {
    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "build" => timeouts.build = seconds(child)?,
                "deploy" => timeouts.deploy = seconds(child)?,
                _ => {}
            }
        }
    }
    Ok(())
}

fn parse_reconcile(node: &KdlNode, settings: &mut ReconcileSettings) -> ConfigResult<()> {
    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "poll-interval" => settings.poll_interval = seconds(child)?,
                "live-check-interval" => settings.live_check_interval = seconds(child)?,
                "max-lifetime" => settings.max_lifetime = seconds(child)?,
                _ => {}
            }
        }
    }
    Ok(())
}

fn parse_notify(node: &KdlNode) -> NotifyConfig {
    let mut notify = NotifyConfig::default();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            if child.name().value() == "webhook" {
                notify.webhooks.extend(get_all_string_args(child));
            }
        }
    }
    notify
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
        server {
            listen "127.0.0.1:9000"
            url "https://ci.example.com"
            secret "hook-secret"
        }
        build-log "/tmp/conveyor/build-log.jsonl"
        queue-capacity 5
        timeouts {
            build 60
            deploy 120
        }
        reconcile {
            poll-interval 2
            live-check-interval 30
            max-lifetime 600
        }
        notify {
            webhook "https://hooks.example.com/a" "https://hooks.example.com/b"
        }
        repo "https://github.com/acme/widget" {
            comment-pr #true
            command "./ci/test.sh"
            deploy "main" "./ci/deploy.sh"
        }
        repo "https://github.com/acme/gadget" {
            command "make"
        }
    "#;

    #[test]
    fn test_parse_full_config() {
        let config = parse_config(FULL).unwrap();

        assert_eq!(config.server.listen, "127.0.0.1:9000");
        assert_eq!(config.server.url.as_deref(), Some("https://ci.example.com"));
        assert_eq!(config.server.secret.as_deref(), Some("hook-secret"));
        assert_eq!(
            config.build_log.as_deref(),
            Some(Path::new("/tmp/conveyor/build-log.jsonl"))
        );
        assert_eq!(config.queue_capacity, 5);
        assert_eq!(config.timeouts.build, Duration::from_secs(60));
        assert_eq!(config.timeouts.deploy, Duration::from_secs(120));
        assert_eq!(config.reconcile.poll_interval, Duration::from_secs(2));
        assert_eq!(config.reconcile.live_check_interval, Duration::from_secs(30));
        assert_eq!(config.reconcile.max_lifetime, Duration::from_secs(600));
        assert_eq!(config.notify.webhooks.len(), 2);
        assert_eq!(config.repos.len(), 2);
    }

    #[test]
    fn test_defaults() {
        let config = parse_config(r#"repo "https://github.com/acme/widget""#).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:8082");
        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.reconcile.poll_interval, Duration::from_secs(10));
        assert_eq!(config.reconcile.live_check_interval, Duration::from_secs(300));
        assert!(config.build_log.is_none());
        assert!(config.notify.webhooks.is_empty());
    }

    #[test]
    fn test_config_for_repo() {
        let config = parse_config(FULL).unwrap();
        let repo = config
            .config_for_repo("https://github.com/acme/widget.git")
            .unwrap();
        assert!(repo.comment_pr);

        let result = config.config_for_repo("https://github.com/acme/unknown");
        assert!(matches!(result, Err(ConfigError::UnknownRepository(_))));
    }

    #[test]
    fn test_requires_a_repo() {
        let result = parse_config("queue-capacity 10");
        assert!(matches!(result, Err(ConfigError::MissingField(_))));
    }

    #[test]
    fn test_rejects_duplicate_repos() {
        let result = parse_config(
            r#"
            repo "https://github.com/acme/widget"
            repo "https://github.com/acme/widget/"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Duplicate(_))));
    }

    #[test]
    fn test_rejects_duplicate_deploy_branches() {
        let result = parse_config(
            r#"
            repo "https://github.com/acme/widget" {
                deploy "main" "./a.sh"
                deploy "main" "./b.sh"
            }
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Duplicate(_))));
    }

    #[test]
    fn test_rejects_zero_interval() {
        let result = parse_config(
            r#"
            reconcile {
                poll-interval 0
            }
            repo "https://github.com/acme/widget"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_rejects_huge_durations() {
        let result = parse_config(
            r#"
            reconcile {
                max-lifetime 18446744073709551615
            }
            repo "https://github.com/acme/widget"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));

        let result = parse_config(
            r#"
            reconcile {
                live-check-interval 31536001
            }
            repo "https://github.com/acme/widget"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));

        let config = parse_config(
            r#"
            reconcile {
                max-lifetime 31536000
            }
            repo "https://github.com/acme/widget"
            "#,
        )
        .unwrap();
        assert_eq!(config.reconcile.max_lifetime, MAX_DURATION);
    }

    #[test]
    fn test_rejects_huge_queue_capacity() {
        let result = parse_config(
            r#"
            queue-capacity 1000001
            repo "https://github.com/acme/widget"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
        assert!(parse_config("queue-capacity 1000000\nrepo \"https://github.com/acme/widget\"").is_ok());
    }

    #[test]
    fn test_rejects_bad_listen_address() {
        let result = parse_config(
            r#"
            server {
                listen "not-an-address"
            }
            repo "https://github.com/acme/widget"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_parse_error() {
        let result = parse_config("repo {");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
