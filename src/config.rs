//! Configuration management
//!
//! Initialization settings for the adaptation pipeline, stored as TOML in the
//! platform config directory.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::rules::RuleSpec;
use crate::storage::{KvStorage, StorageBackend};

/// How the renderer lays out children. Not used by the pipeline itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutMode {
    #[default]
    Stacked,
    Grid,
    Free,
}

/// Which storage substrate to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageKind,
    /// Directory for the file backend (defaults to the data directory)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    /// Build the configured backend
    pub fn open(&self) -> Result<Arc<dyn StorageBackend>> {
        match self.backend {
            StorageKind::Memory => Ok(Arc::new(KvStorage::in_memory())),
            StorageKind::File => {
                let dir = match &self.path {
                    Some(path) => path.clone(),
                    None => data_dir()?.join("store"),
                };
                let storage = KvStorage::open(&dir)
                    .with_context(|| format!("Failed to open storage at {}", dir.display()))?;
                Ok(Arc::new(storage))
            }
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveConfig {
    /// Interactions between count-triggered evaluations
    #[serde(default = "default_threshold")]
    pub threshold: u32,
    #[serde(default)]
    pub layout_mode: LayoutMode,
    /// Start auto-adjustments on initialization
    #[serde(default = "default_true")]
    pub enable_auto_adjust: bool,
    /// Log every interaction and layout change at debug level
    #[serde(default)]
    pub enable_debug_logging: bool,
    /// Seconds between timer-triggered evaluations
    #[serde(default = "default_interval_secs")]
    pub auto_adjust_interval_secs: u64,
    /// Rule pipeline, applied in order
    #[serde(default = "default_rules")]
    pub rules: Vec<RuleSpec>,
    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_threshold() -> u32 {
    crate::engine::DEFAULT_MIN_INTERACTIONS
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    crate::engine::DEFAULT_AUTO_ADJUST_INTERVAL.as_secs()
}

fn default_rules() -> Vec<RuleSpec> {
    vec![RuleSpec::MostUsedFirst]
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            layout_mode: LayoutMode::default(),
            enable_auto_adjust: true,
            enable_debug_logging: false,
            auto_adjust_interval_secs: default_interval_secs(),
            rules: default_rules(),
            storage: StorageConfig::default(),
        }
    }
}

impl AdaptiveConfig {
    /// Load configuration from the default location, writing defaults if absent
    pub fn load() -> Result<Self> {
        let config_path = config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = AdaptiveConfig::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&contents).context("Failed to parse config file")
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Count threshold, never below 1
    pub fn min_interactions(&self) -> u32 {
        self.threshold.max(1)
    }

    pub fn auto_adjust_interval(&self) -> Duration {
        Duration::from_secs(self.auto_adjust_interval_secs.max(1))
    }
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "adaptive-layout", "adaptive-layout")
        .context("Failed to get project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

/// Get the data directory path
pub fn data_dir() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "adaptive-layout", "adaptive-layout")
        .context("Failed to get project directories")?;
    Ok(base.data_dir().to_path_buf())
}
