//! Global configuration file handling
//!
//! Loads the forgesync YAML configuration: JIRA instances, upstream API
//! settings, admins, and the repository map. Validation happens at load
//! time and is fatal; the process never starts consuming events with a
//! broken configuration.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::policy::RepoPolicy;
use crate::Result;

/// One downstream JIRA instance
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JiraInstance {
    /// Base server URL, e.g. https://jira.example.com
    pub url: String,

    /// Environment variable holding the API token
    pub token_env: Option<String>,

    /// Custom field id carrying story points (server-specific)
    pub storypoints_field: Option<String>,
}

/// Downstream tracker settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JiraSettings {
    #[serde(default)]
    pub instances: BTreeMap<String, JiraInstance>,

    /// Instance used by repositories that don't name one
    pub default_instance: Option<String>,
}

/// GitHub API settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GithubSettings {
    /// REST API base URL
    #[serde(default = "default_github_api")]
    pub api_url: String,

    /// GraphQL endpoint (project-board field lookups)
    #[serde(default = "default_github_graphql")]
    pub graphql_url: String,

    /// Environment variable holding the API token
    pub token_env: Option<String>,
}

fn default_github_api() -> String {
    "https://api.github.com".to_string()
}

fn default_github_graphql() -> String {
    "https://api.github.com/graphql".to_string()
}

impl Default for GithubSettings {
    fn default() -> Self {
        Self {
            api_url: default_github_api(),
            graphql_url: default_github_graphql(),
            token_env: None,
        }
    }
}

/// Pagure API settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PagureSettings {
    #[serde(default = "default_pagure_url")]
    pub url: String,

    /// Environment variable holding the API token
    pub token_env: Option<String>,
}

fn default_pagure_url() -> String {
    "https://pagure.io".to_string()
}

impl Default for PagureSettings {
    fn default() -> Self {
        Self {
            url: default_pagure_url(),
            token_env: None,
        }
    }
}

/// The repository map: `(platform, owner/repo) -> policy`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceMap {
    #[serde(default)]
    pub github: BTreeMap<String, RepoPolicy>,
    #[serde(default)]
    pub pagure: BTreeMap<String, RepoPolicy>,
}

/// Complete forgesync configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    pub jira: JiraSettings,

    #[serde(default)]
    pub github: GithubSettings,

    #[serde(default)]
    pub pagure: PagureSettings,

    /// Admin email addresses cc'd on duplicate alerts
    #[serde(default)]
    pub admins: Vec<String>,

    /// Mailing list for failure notices
    pub mailing_list: Option<String>,

    /// Log computed writes instead of calling the tracker
    #[serde(default)]
    pub dry_run: bool,

    #[serde(default)]
    pub map: SourceMap,
}

impl SyncConfig {
    /// Load configuration from the default path
    /// (~/.config/forgesync/config.yaml)
    pub fn load_default() -> Result<Self> {
        Self::load(Self::default_path())
    }

    /// Load configuration from a specific path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(crate::SyncError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "Loading forgesync configuration");

        let content = fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;

        tracing::debug!(
            github_repos = config.map.github.len(),
            pagure_repos = config.map.pagure.len(),
            instances = config.jira.instances.len(),
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Get the default config path (~/.config/forgesync/config.yaml)
    pub fn default_path() -> PathBuf {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".config");
        path.push("forgesync");
        path.push("config.yaml");
        path
    }

    /// The JIRA instance a repository policy should use
    pub fn instance_for<'a>(&'a self, requested: Option<&'a str>) -> Option<&'a str> {
        requested.or(self.jira.default_instance.as_deref())
    }
}
