//! Configuration file support for hive.
//!
//! Settings live in `.hive/hive.toml`. Every key is optional; environment
//! variables override file values.
//!
//! # Configuration File Format
//!
//! ```toml
//! [locks]
//! timeout_ms = 5000
//! retry_interval_ms = 50
//! stale_ttl_ms = 30000
//!
//! [git]
//! command = "git"
//! branch_prefix = "hive"
//!
//! [merge]
//! strategy = "squash"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::storage::LockOptions;

/// File name of the configuration inside the hive directory.
pub const CONFIG_FILE: &str = "hive.toml";

/// How a finished task branch is integrated into the current branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Non-fast-forward merge commit
    #[default]
    Merge,
    /// Squash all task commits into a single commit
    Squash,
    /// Replay task commits one by one (cherry-pick, oldest first)
    Rebase,
}

impl std::fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeStrategy::Merge => write!(f, "merge"),
            MergeStrategy::Squash => write!(f, "squash"),
            MergeStrategy::Rebase => write!(f, "rebase"),
        }
    }
}

impl std::str::FromStr for MergeStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "merge" => Ok(MergeStrategy::Merge),
            "squash" => Ok(MergeStrategy::Squash),
            "rebase" => Ok(MergeStrategy::Rebase),
            _ => anyhow::bail!(
                "Invalid merge strategy '{}'. Valid values: merge, squash, rebase",
                s
            ),
        }
    }
}

/// Lock file tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocksSection {
    #[serde(default = "default_lock_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    #[serde(default = "default_stale_ttl_ms")]
    pub stale_ttl_ms: u64,
}

fn default_lock_timeout_ms() -> u64 {
    5_000
}

fn default_retry_interval_ms() -> u64 {
    50
}

fn default_stale_ttl_ms() -> u64 {
    30_000
}

impl Default for LocksSection {
    fn default() -> Self {
        Self {
            timeout_ms: default_lock_timeout_ms(),
            retry_interval_ms: default_retry_interval_ms(),
            stale_ttl_ms: default_stale_ttl_ms(),
        }
    }
}

/// Git executable settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitSection {
    /// Git executable (default: "git")
    #[serde(default)]
    pub command: Option<String>,
    /// Prefix for task branches (default: "hive")
    #[serde(default)]
    pub branch_prefix: Option<String>,
}

/// Merge settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeSection {
    #[serde(default)]
    pub strategy: MergeStrategy,
}

/// Contents of `.hive/hive.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HiveToml {
    #[serde(default)]
    pub locks: LocksSection,
    #[serde(default)]
    pub git: GitSection,
    #[serde(default)]
    pub merge: MergeSection,
}

impl HiveToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse hive.toml")
    }

    /// Load `hive.toml` from the hive directory, or defaults if absent.
    pub fn load_or_default(hive_dir: &Path) -> Result<Self> {
        let config_path = hive_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize hive.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Lock options, with `HIVE_LOCK_TIMEOUT_MS` overriding the file timeout.
    pub fn lock_options(&self) -> LockOptions {
        let timeout_ms = std::env::var("HIVE_LOCK_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(self.locks.timeout_ms);
        LockOptions {
            timeout: Duration::from_millis(timeout_ms),
            retry_interval: Duration::from_millis(self.locks.retry_interval_ms.max(1)),
            stale_lock_ttl: Duration::from_millis(self.locks.stale_ttl_ms),
        }
    }

    /// Git executable; `HIVE_GIT_CMD` overrides the file value.
    pub fn git_cmd(&self) -> String {
        std::env::var("HIVE_GIT_CMD")
            .ok()
            .or_else(|| self.git.command.clone())
            .unwrap_or_else(|| "git".to_string())
    }

    pub fn branch_prefix(&self) -> String {
        self.git
            .branch_prefix
            .clone()
            .unwrap_or_else(|| "hive".to_string())
    }

    pub fn merge_strategy(&self) -> MergeStrategy {
        self.merge.strategy
    }
}
