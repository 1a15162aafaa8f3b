//! Repository definition parsing.

use crate::node::{flag, get_all_string_args, required_string};
use crate::{ConfigError, ConfigResult};
use conveyor_core::repository::{DeployTarget, RepoConfig};
use kdl::KdlNode;

/// Parse a `repo "<url>" { ... }` node.
pub fn parse_repo(node: &KdlNode) -> ConfigResult<RepoConfig> {
    let url = required_string(node).map_err(|_| ConfigError::MissingField("repo url".to_string()))?;
    let mut repo = RepoConfig::new(url);

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "name" => repo.name = required_string(child)?,
                "access-key" => repo.access_key = required_string(child)?,
                "comment-pr" => repo.comment_pr = flag(child)?,
                "close-pr" => repo.close_pr = flag(child)?,
                "command" => repo.commands.push(required_string(child)?),
                "deploy" => repo.deploy_targets.push(parse_deploy(child, &repo.url)?),
                _ => {}
            }
        }
    }

    Ok(repo)
}

fn parse_deploy(node: &KdlNode, url: &str) -> ConfigResult<DeployTarget> {
    let mut args = get_all_string_args(node).into_iter();
    match (args.next(), args.next()) {
        (Some(branch), Some(execute)) => Ok(DeployTarget { branch, execute }),
        _ => Err(ConfigError::MissingField(format!(
            "deploy branch and script for {}",
            url
        ))),
    }
}
