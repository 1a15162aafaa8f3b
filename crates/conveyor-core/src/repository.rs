//! Per-repository configuration.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Script run when a branch passes its build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployTarget {
    pub branch: String,
    /// Executable invoked with the repository URL and branch.
    pub execute: String,
}

/// Settings for one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    pub url: String,
    /// Display name, defaults to the last URL segment.
    pub name: String,
    /// Build commands, run in order with the repository URL and branch.
    pub commands: Vec<String>,
    pub deploy_targets: Vec<DeployTarget>,
    /// Comment build results on pull requests.
    pub comment_pr: bool,
    /// Close pull requests once their build is known.
    pub close_pr: bool,
    /// `user:token` credentials for the repository API.
    pub access_key: String,
}

impl RepoConfig {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let name = default_name(&url);
        Self {
            url,
            name,
            commands: Vec::new(),
            deploy_targets: Vec::new(),
            comment_pr: false,
            close_pr: false,
            access_key: String::new(),
        }
    }

    /// Find the deploy target registered for `branch`.
    pub fn deploy_target(&self, branch: &str) -> Result<&DeployTarget> {
        self.deploy_targets
            .iter()
            .find(|t| t.branch == branch)
            .ok_or_else(|| {
                Error::NotFound(format!("deploy target for branch '{}' of {}", branch, self.url))
            })
    }

    /// Whether `url` names this repository.
    ///
    /// Trailing slashes and a `.git` suffix are ignored.
    pub fn matches_url(&self, url: &str) -> bool {
        self.normalized_url() == normalize_url(url)
    }

    /// The URL without a trailing slash or `.git` suffix.
    pub fn normalized_url(&self) -> &str {
        normalize_url(&self.url)
    }
}

fn normalize_url(url: &str) -> &str {
    let url = url.trim_end_matches('/');
    url.strip_suffix(".git").unwrap_or(url)
}

fn default_name(url: &str) -> String {
    normalize_url(url)
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> RepoConfig {
        let mut repo = RepoConfig::new("https://github.com/acme/widget");
        repo.deploy_targets.push(DeployTarget {
            branch: "main".to_string(),
            execute: "./deploy.sh".to_string(),
        });
        repo
    }

    #[test]
    fn test_deploy_target_lookup() {
        let repo = repo();
        assert_eq!(repo.deploy_target("main").unwrap().execute, "./deploy.sh");
        assert!(matches!(repo.deploy_target("dev"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_matches_url_variants() {
        let repo = repo();
        assert!(repo.matches_url("https://github.com/acme/widget"));
        assert!(repo.matches_url("https://github.com/acme/widget/"));
        assert!(repo.matches_url("https://github.com/acme/widget.git"));
        assert!(!repo.matches_url("https://github.com/acme/gadget"));
    }

    #[test]
    fn test_default_name() {
        assert_eq!(repo().name, "widget");
        assert_eq!(RepoConfig::new("https://example.com/r.git").name, "r");
    }
}
