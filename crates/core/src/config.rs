//! TOML-based configuration for recipesync.
//!
//! The remote root may be given directly or through an environment variable
//! named by `remote.root_env`, resolved at runtime via
//! [`AppConfig::resolve_env_vars`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Working-copy and scanning settings.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Directory-backed remote settings.
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Logging settings.
    #[serde(default)]
    pub log: LogConfig,
}

// ---------------------------------------------------------------------------
// Sync
// ---------------------------------------------------------------------------

/// Working-copy layout and scan behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Name of the hidden metadata directory inside each recipe working copy.
    #[serde(default = "default_metadata_dir")]
    pub metadata_dir: String,

    /// Glob patterns, matched against the relative path, excluded from scans.
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,

    /// Keep base snapshots of synced files so both-sides edits can be merged.
    #[serde(default = "default_true")]
    pub keep_base_snapshots: bool,
}

fn default_metadata_dir() -> String {
    ".dk".into()
}

fn default_ignore_patterns() -> Vec<String> {
    [
        ".git/**",
        ".svn/**",
        "**/.DS_Store",
        "**/Thumbs.db",
        "**/__pycache__/**",
        "target/**",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect()
}

fn default_true() -> bool {
    true
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            metadata_dir: default_metadata_dir(),
            ignore_patterns: default_ignore_patterns(),
            keep_base_snapshots: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Remote
// ---------------------------------------------------------------------------

/// Settings for the directory-backed remote used by the CLI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Root directory holding one sub-directory per recipe.
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Environment variable that overrides `root` when set.
    #[serde(default)]
    pub root_env: Option<String>,
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "warn".into()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve `remote.root_env`. An unset variable keeps the configured root.
    pub fn resolve_env_vars(&mut self) {
        if let Some(ref env_name) = self.remote.root_env {
            match std::env::var(env_name) {
                Ok(val) if !val.is_empty() => {
                    debug!(env_name, "resolved remote root from environment");
                    self.remote.root = Some(PathBuf::from(val));
                }
                _ => warn!(env_name, "remote.root_env is not set"),
            }
        }
    }

    /// Validate that all fields are sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let meta = &self.sync.metadata_dir;
        if meta.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "sync.metadata_dir".into(),
                detail: "metadata directory name must not be empty".into(),
            });
        }
        if meta.contains('/') || meta.contains('\\') || meta == "." || meta == ".." {
            return Err(ConfigError::InvalidValue {
                field: "sync.metadata_dir".into(),
                detail: format!("'{meta}' must be a single directory name"),
            });
        }
        if let Some(idx) = self.sync.ignore_patterns.iter().position(|p| p.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: format!("sync.ignore_patterns[{idx}]"),
                detail: "ignore pattern must not be empty".into(),
            });
        }
        if !LOG_LEVELS.contains(&self.log.level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "log.level".into(),
                detail: format!("'{}' is not one of {}", self.log.level, LOG_LEVELS.join(", ")),
            });
        }
        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars();
        config.validate()?;
        Ok(config)
    }

    /// Render a commented default configuration file.
    pub fn default_toml() -> String {
        let patterns = default_ignore_patterns()
            .iter()
            .map(|p| format!("    \"{p}\","))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            r#"# recipesync configuration

[sync]
# Hidden directory inside each recipe working copy holding FILE_SHA / ORIG_HEAD.
metadata_dir = "{meta}"
# Paths (relative to the recipe root) never scanned or synced.
ignore_patterns = [
{patterns}
]
keep_base_snapshots = true

[remote]
# Directory holding one sub-directory per recipe.
# root = "/srv/recipes"
# root_env = "RECIPESYNC_REMOTE"

[log]
level = "{level}"
"#,
            meta = default_metadata_dir(),
            level = default_log_level(),
        )
    }
}
