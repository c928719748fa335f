use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub semlayer: SemlayerConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub hierarchy: HierarchyConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
}

/// Semlayer-specific configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SemlayerConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for SemlayerConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            migrations_dir: default_migrations_dir(),
            log_level: default_log_level(),
        }
    }
}

/// Relation inference tuning
#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    /// Proposals below this confidence are dropped from results.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// Ancestor depth used when selecting rules for an entity type.
    #[serde(default = "default_inference_depth")]
    pub max_depth: usize,
    /// Base confidence for infer actions that don't declare one.
    #[serde(default = "default_action_confidence")]
    pub default_action_confidence: f64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            max_depth: default_inference_depth(),
            default_action_confidence: default_action_confidence(),
        }
    }
}

/// Type hierarchy traversal configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HierarchyConfig {
    #[serde(default = "default_hierarchy_depth")]
    pub max_depth: usize,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            max_depth: default_hierarchy_depth(),
        }
    }
}

/// Attribute pattern matching configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MatchingConfig {
    #[serde(default = "default_regex_cache_capacity")]
    pub regex_cache_capacity: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            regex_cache_capacity: default_regex_cache_capacity(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("semlayer.db")
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_min_confidence() -> f64 {
    0.7
}

fn default_inference_depth() -> usize {
    5
}

fn default_action_confidence() -> f64 {
    0.8
}

fn default_hierarchy_depth() -> usize {
    10
}

fn default_regex_cache_capacity() -> usize {
    256
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in SEMLAYER_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config_path = std::env::var("SEMLAYER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        Self::from_path(&config_path)
    }

    /// Load and validate configuration from an explicit path
    pub fn from_path(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Config = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.inference.min_confidence) {
            anyhow::bail!("inference.min_confidence must be between 0.0 and 1.0");
        }

        if !(0.0..=1.0).contains(&self.inference.default_action_confidence) {
            anyhow::bail!("inference.default_action_confidence must be between 0.0 and 1.0");
        }

        if self.inference.max_depth == 0 {
            anyhow::bail!("inference.max_depth must be greater than 0");
        }

        if self.hierarchy.max_depth == 0 {
            anyhow::bail!("hierarchy.max_depth must be greater than 0");
        }

        if self.matching.regex_cache_capacity == 0 {
            anyhow::bail!("matching.regex_cache_capacity must be greater than 0");
        }

        Ok(())
    }

    /// Get database path
    pub fn db_path(&self) -> &Path {
        &self.semlayer.db_path
    }

    /// Get migrations directory
    pub fn migrations_dir(&self) -> &Path {
        &self.semlayer.migrations_dir
    }
}
