//! Helpers for extracting values from KDL nodes.

use crate::{ConfigError, ConfigResult};
use kdl::KdlNode;
use std::time::Duration;

pub(crate) fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

pub(crate) fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

fn get_first_integer_arg(node: &KdlNode) -> Option<i128> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
}

pub(crate) fn required_string(node: &KdlNode) -> ConfigResult<String> {
    get_first_string_arg(node).ok_or_else(|| ConfigError::MissingField(field_name(node)))
}

/// A flag node: `comment-pr #true`, `comment-pr #false`, or bare `comment-pr`.
pub(crate) fn flag(node: &KdlNode) -> ConfigResult<bool> {
    match node.entries().iter().find(|e| e.name().is_none()) {
        None => Ok(true),
        Some(entry) => entry.value().as_bool().ok_or_else(|| ConfigError::InvalidValue {
            field: field_name(node),
            message: "expected #true or #false".to_string(),
        }),
    }
}

pub(crate) fn positive_integer(node: &KdlNode) -> ConfigResult<u64> {
    let value = get_first_integer_arg(node)
        .ok_or_else(|| ConfigError::MissingField(field_name(node)))?;
    if value <= 0 || value > u64::MAX as i128 {
        return Err(ConfigError::InvalidValue {
            field: field_name(node),
            message: format!("expected a positive integer, got {}", value),
        });
    }
    Ok(value as u64)
}

/// A duration written as a whole number of seconds.
pub(crate) fn seconds(node: &KdlNode) -> ConfigResult<Duration> {
    positive_integer(node).map(Duration::from_secs)
}

fn field_name(node: &KdlNode) -> String {
    node.name().value().to_string()
}
