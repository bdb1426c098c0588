//! Configuration keys and dotted-key syntax.
//!
//! All git-flow settings live in the repository git config under the
//! `gitflow.*` namespace. Keys use the dotted form `section.option` or
//! `section.subsection.option`; the backend stores them through its own
//! config machinery, this module only validates the syntax and knows the
//! canonical key set and its defaults.

use crate::error::{GitFlowError, Result};

pub const MASTER: &str = "gitflow.branch.master";
pub const DEVELOP: &str = "gitflow.branch.develop";
pub const ORIGIN: &str = "gitflow.origin";
pub const PREFIX_VERSIONTAG: &str = "gitflow.prefix.versiontag";

/// Split a dotted key into `(section, subsection, option)`.
///
/// Two segments address `section.option`, three address
/// `section.subsection.option`; anything else is malformed.
pub fn split_key(key: &str) -> Result<(&str, Option<&str>, &str)> {
    let parts: Vec<&str> = key.splitn(3, '.').collect();
    let malformed = parts.iter().any(|p| p.is_empty());
    match (parts.as_slice(), malformed) {
        ([section, option], false) => Ok((section, None, option)),
        ([section, subsection, option], false) => Ok((section, Some(subsection), option)),
        _ => Err(GitFlowError::config(format!(
            "Invalid setting name: {}",
            key
        ))),
    }
}

/// Validate dotted-key syntax without caring about the parts.
pub fn validate_key(key: &str) -> Result<()> {
    split_key(key).map(|_| ())
}

/// Config key holding the name prefix for a branch type.
pub fn prefix_key(identifier: &str) -> String {
    format!("gitflow.prefix.{}", identifier)
}

/// The `(key, default)` pairs written by `git-flow init`.
pub fn init_defaults() -> Vec<(String, &'static str)> {
    vec![
        (MASTER.to_string(), "master"),
        (DEVELOP.to_string(), "develop"),
        (prefix_key("feature"), "feature/"),
        (prefix_key("release"), "release/"),
        (prefix_key("hotfix"), "hotfix/"),
        (prefix_key("support"), "support/"),
        (PREFIX_VERSIONTAG.to_string(), ""),
        (ORIGIN.to_string(), "origin"),
    ]
}

/// Keys that must be present for the repository to count as initialized.
pub fn required_keys() -> Vec<String> {
    vec![
        MASTER.to_string(),
        DEVELOP.to_string(),
        prefix_key("feature"),
        prefix_key("release"),
        prefix_key("hotfix"),
        prefix_key("support"),
    ]
}
