use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use url::Url;

use crate::model::{Feed, FeedType, Pipeline};
use crate::poller::DEFAULT_POLL_INTERVAL;
use crate::sync::PipelineSource;

/// Configuration file structure for buildwatch.
///
/// Declares the monitored pipelines, dynamic pipeline sources, poll
/// cadence, and credentials. Files are discovered in the current
/// directory or the user config directory.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Scheduler settings
    #[serde(default)]
    pub settings: Settings,

    /// Pipelines to monitor
    #[serde(default)]
    pub pipelines: Vec<PipelineConfig>,

    /// Dynamic pipeline sources (CCTray endpoints expanded into managed
    /// pipelines)
    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    /// Credentials; environment variables override these
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Settings {
    /// Seconds between poll cycles
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PipelineConfig {
    /// Display name. For GitHub-style feeds the convention is
    /// "repo:workflow-file" (the part after the colon is the lookup key)
    pub name: String,

    /// Feed protocol
    #[serde(rename = "type")]
    pub feed_type: FeedType,

    /// Feed endpoint URL
    pub url: String,

    /// CCTray only: project name as known to the server, when it
    /// differs from the display name
    pub project: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SourceConfig {
    /// Stable identifier recorded on the pipelines this source manages
    pub id: String,

    /// CCTray endpoint whose project list is mirrored
    pub url: String,

    /// A disabled source neither adds nor removes pipelines
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Remove managed pipelines whose project vanished from the server
    #[serde(default)]
    pub remove_deleted_pipelines: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct AuthConfig {
    /// GitHub bearer token
    pub github_token: Option<String>,

    /// GitLab bearer token
    pub gitlab_token: Option<String>,

    /// CCTray basic-auth passwords, keyed by the user embedded in the
    /// feed URL
    #[serde(default)]
    pub passwords: HashMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
        }
    }
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. ./buildwatch.toml
    /// 3. ./buildwatch.json
    /// 4. ./buildwatch.yaml
    /// 5. ./buildwatch.yml
    /// 6. <user config dir>/buildwatch/buildwatch.toml
    ///
    /// Returns default configuration if no file is found.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }

        let candidates = [
            "buildwatch.toml",
            "buildwatch.json",
            "buildwatch.yaml",
            "buildwatch.yml",
        ];

        for candidate in &candidates {
            let path = Path::new(candidate);
            if path.exists() {
                return Self::load_from_path(path);
            }
        }

        if let Some(path) = Self::user_config_path() {
            if path.exists() {
                return Self::load_from_path(&path);
            }
        }

        // No config file found, return defaults
        Ok(Self::default())
    }

    fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("buildwatch").join("buildwatch.toml"))
    }

    /// Load configuration from a specific file path.
    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display())),
            _ => {
                // Try TOML first, then JSON, then YAML
                toml::from_str(&contents)
                    .or_else(|_| serde_json::from_str(&contents))
                    .or_else(|_| serde_yaml::from_str(&contents))
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))
            }
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::to_string_pretty(self)?,
            Some("yaml") | Some("yml") => serde_yaml::to_string(self)?,
            _ => toml::to_string_pretty(self)?,
        };

        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validated pipelines ready for the registry.
    pub fn pipelines(&self) -> Result<Vec<Pipeline>> {
        self.pipelines
            .iter()
            .map(|entry| {
                Url::parse(&entry.url).with_context(|| {
                    format!("Invalid feed URL for \"{}\": {}", entry.name, entry.url)
                })?;

                let feed = match entry.feed_type {
                    FeedType::CCTray => {
                        let project = entry.project.as_deref().unwrap_or(&entry.name);
                        Feed::cctray(&entry.url, project)
                    }
                    other => Feed::new(other, &entry.url),
                };
                Ok(Pipeline::new(&entry.name, feed))
            })
            .collect()
    }

    /// Dynamic pipeline sources ready for the sync loop.
    pub fn sources(&self) -> Vec<PipelineSource> {
        self.sources
            .iter()
            .map(|entry| PipelineSource {
                id: entry.id.clone(),
                url: entry.url.clone(),
                enabled: entry.enabled,
                remove_deleted_pipelines: entry.remove_deleted_pipelines,
            })
            .collect()
    }
}
