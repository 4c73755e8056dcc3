//! Per-remote configuration.
//!
//! Each `flatpak-remote-<name>` configuration section describes one source of
//! refs: where to pull from, where the deployed image should point, which
//! apps and runtimes the build wants from it, and the policy lists applied
//! during resolution.

use std::collections::{BTreeMap, BTreeSet};

use crate::Error;

/// Recognized option names of a remote configuration section. Anything else
/// is ignored with a note; deployment-only options the engine does not model
/// may legitimately appear in shared configuration.
const KNOWN_OPTIONS: &[&str] = &[
    "url",
    "deploy_url",
    "repo_file",
    "apps",
    "runtimes",
    "exclude",
    "allow_extra_data",
    "nosplit",
    "title",
    "default_branch",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteConfig {
    pub name: String,
    pub url: Option<String>,
    pub deploy_url: Option<String>,
    pub repo_file: Option<String>,
    /// Wanted application names, in configuration order.
    pub apps: Vec<String>,
    /// Wanted runtime names, in configuration order.
    pub runtimes: Vec<String>,
    /// Ref names that must never be installed from this remote.
    pub exclude: BTreeSet<String>,
    /// Ref names permitted despite carrying extra data.
    pub allow_extra_data: BTreeSet<String>,
    /// App names left out of split builds.
    pub nosplit: BTreeSet<String>,
    pub title: Option<String>,
    pub default_branch: Option<String>,
    /// GPG key material, decoded; only ever set from a repo file.
    pub gpg_key: Option<Vec<u8>>,
}

impl RemoteConfig {
    /// Build a remote configuration from the options of its config section.
    /// The `enable` option is handled by the caller and must already be
    /// stripped.
    pub fn from_section(name: &str, options: &BTreeMap<String, String>) -> Self {
        let mut config = RemoteConfig {
            name: name.to_string(),
            ..Default::default()
        };

        for (key, value) in options {
            match key.as_str() {
                "url" => config.url = non_empty(value),
                "deploy_url" => config.deploy_url = non_empty(value),
                "repo_file" => config.repo_file = non_empty(value),
                "apps" => config.apps = split_list(value),
                "runtimes" => config.runtimes = split_list(value),
                "exclude" => config.exclude = split_set(value),
                "allow_extra_data" => config.allow_extra_data = split_set(value),
                "nosplit" => config.nosplit = split_set(value),
                "title" => config.title = non_empty(value),
                "default_branch" => config.default_branch = non_empty(value),
                other if !KNOWN_OPTIONS.contains(&other) => {
                    eprintln!(
                        "    Note: ignoring unrecognized option '{}' for remote '{}'",
                        other, name
                    );
                }
                _ => {}
            }
        }

        config
    }

    /// The remote must have a pull URL once the repo-file overlay (if any)
    /// has been applied.
    pub fn validate(&self) -> Result<(), Error> {
        if self.url.is_none() {
            return Err(Error::Config {
                message: format!("no URL defined for remote '{}'", self.name),
            });
        }
        Ok(())
    }

    /// The URL the deployed image should use; falls back to the pull URL.
    pub fn effective_deploy_url(&self) -> Option<&str> {
        self.deploy_url.as_deref().or(self.url.as_deref())
    }

    pub fn check_excluded(&self, name: &str) -> bool {
        self.exclude.contains(name)
    }

    pub fn check_allow_extra_data(&self, name: &str) -> bool {
        self.allow_extra_data.contains(name)
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn split_list(value: &str) -> Vec<String> {
    value.split_whitespace().map(|s| s.to_string()).collect()
}

fn split_set(value: &str) -> BTreeSet<String> {
    value.split_whitespace().map(|s| s.to_string()).collect()
}
