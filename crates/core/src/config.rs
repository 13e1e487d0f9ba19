//! Configuration loading and management
//!
//! # Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//! 1. Built-in defaults
//! 2. Config file: `--config <path>`, else `./kubeloop.toml` when present
//! 3. Environment variables: `KUBELOOP_*`
//! 4. CLI flags (applied by the binary)
//!
//! # Example Config
//!
//! ```toml
//! [loop]
//! interval_ms = 200
//! max_cycles = 50
//!
//! [cluster]
//! nodes = ["node-a", "node-b"]
//! ```

use std::path::{Path, PathBuf};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// File consulted when no explicit config path is given.
pub const DEFAULT_CONFIG_FILE: &str = "kubeloop.toml";

// ═══════════════════════════════════════════════════════════════════════════
// CONFIGURATION STRUCTURES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "loop")]
    pub loop_: LoopSection,
    pub reconciler: ReconcilerSection,
    pub cluster: ClusterSection,
    pub journal: JournalSection,
}

/// Timing of the reconciliation loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoopSection {
    pub interval_ms: u64,
    pub max_errors: usize,
    pub stop_on_error: bool,
    pub max_cycles: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReconcilerSection {
    /// 0 means unlimited.
    pub max_actions_per_cycle: usize,
    pub revision_history_limit: usize,
}

/// The simulated nodes pods can be scheduled onto.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClusterSection {
    pub nodes: Vec<String>,
    pub max_pods_per_node: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JournalSection {
    /// Empty keeps events in memory only.
    pub path: String,
}

impl Default for LoopSection {
    fn default() -> Self {
        Self {
            interval_ms: 200,
            max_errors: 10,
            stop_on_error: false,
            max_cycles: 100,
        }
    }
}

impl Default for ReconcilerSection {
    fn default() -> Self {
        Self {
            max_actions_per_cycle: 0,
            revision_history_limit: 2,
        }
    }
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            nodes: vec![
                "node-a".to_string(),
                "node-b".to_string(),
                "node-c".to_string(),
            ],
            max_pods_per_node: 110,
        }
    }
}

impl JournalSection {
    /// The journal path, if one is configured.
    pub fn path(&self) -> Option<PathBuf> {
        let trimmed = self.path.trim();
        (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// LOADING
// ═══════════════════════════════════════════════════════════════════════════

impl Config {
    /// Load configuration from all sources with hierarchy.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - An explicitly named config file cannot be read
    /// - A config file is malformed TOML
    /// - An environment override cannot be parsed
    /// - The merged values fail validation
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        Self::load_with_env(explicit, Path::new(DEFAULT_CONFIG_FILE), |key| {
            std::env::var(key).ok()
        })
    }

    /// Load configuration with an injectable environment lookup.
    ///
    /// # Errors
    ///
    /// Same as [`Config::load`].
    pub fn load_with_env<F>(explicit: Option<&Path>, fallback: &Path, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match explicit {
            Some(path) => load_toml_file(path)?,
            None if fallback.exists() => load_toml_file(fallback)?,
            None => Self::default(),
        };

        config.apply_env_vars(env)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string (defaults fill the gaps).
    ///
    /// # Errors
    ///
    /// Returns error if the TOML is malformed or fails validation.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::toml_parse_failed("<inline>", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// # Errors
    ///
    /// Returns error if environment variable values are invalid
    fn apply_env_vars<F>(&mut self, env: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = env("KUBELOOP_INTERVAL_MS") {
            self.loop_.interval_ms = parse_env("KUBELOOP_INTERVAL_MS", &value)?;
        }

        if let Some(value) = env("KUBELOOP_MAX_ERRORS") {
            self.loop_.max_errors = parse_env("KUBELOOP_MAX_ERRORS", &value)?;
        }

        if let Some(value) = env("KUBELOOP_MAX_CYCLES") {
            self.loop_.max_cycles = parse_env("KUBELOOP_MAX_CYCLES", &value)?;
        }

        if let Some(value) = env("KUBELOOP_NODES") {
            self.cluster.nodes = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(value) = env("KUBELOOP_JOURNAL") {
            self.journal.path = value;
        }

        Ok(())
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any values are out of range or invalid
    pub fn validate(&self) -> Result<()> {
        if self.loop_.interval_ms == 0 || self.loop_.interval_ms > 60_000 {
            return Err(Error::validation_failed(
                "loop.interval_ms",
                format!("must be 1-60000, got {}", self.loop_.interval_ms),
            ));
        }

        if self.loop_.max_errors == 0 {
            return Err(Error::validation_failed(
                "loop.max_errors",
                "must be at least 1",
            ));
        }

        if self.loop_.max_cycles == 0 {
            return Err(Error::validation_failed(
                "loop.max_cycles",
                "must be at least 1",
            ));
        }

        if self.cluster.nodes.is_empty() {
            return Err(Error::validation_failed(
                "cluster.nodes",
                "at least one node is required",
            ));
        }

        if self.cluster.nodes.iter().any(|n| n.trim().is_empty()) {
            return Err(Error::validation_failed(
                "cluster.nodes",
                "node names must not be empty",
            ));
        }

        if let Some(dup) = self.cluster.nodes.iter().duplicates().next() {
            return Err(Error::validation_failed(
                "cluster.nodes",
                format!("duplicate node '{dup}'"),
            ));
        }

        if self.cluster.max_pods_per_node == 0 {
            return Err(Error::validation_failed(
                "cluster.max_pods_per_node",
                "must be at least 1",
            ));
        }

        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HELPER FUNCTIONS
// ═══════════════════════════════════════════════════════════════════════════

/// Load a TOML file into a Config
///
/// # Errors
///
/// Returns error if:
/// - File cannot be read
/// - TOML is malformed
fn load_toml_file(path: &Path) -> Result<Config> {
    let content =
        std::fs::read_to_string(path).map_err(|e| Error::file_read_failed(path, e.to_string()))?;

    toml::from_str(&content).map_err(|e| Error::toml_parse_failed(path, e.to_string()))
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| Error::invalid_config(key, format!("'{value}': {e}")))
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════
