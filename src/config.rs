//! Configuration file handling.
//!
//! One JSON file carries everything mission-tunable: device geometry, GC
//! thresholds, link timeouts, and the selection weight table. Every field
//! has a default so a minimal file (or none, for tools that accept it) still
//! yields a runnable configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::device::Geometry;
use crate::link::LinkOptions;
use crate::selection::SelectionPolicy;
use crate::store::StoreOptions;

fn default_device_path() -> String {
    "./satstore.img".to_string()
}
fn default_block_size() -> u32 {
    65_536
}
fn default_block_count() -> u32 {
    64
}
fn default_reserved_blocks() -> u32 {
    1
}
fn default_gc_live_ratio_threshold() -> f64 {
    0.5
}
fn default_max_reclaim_attempts() -> u32 {
    4
}
fn default_eviction_batch() -> usize {
    4
}
fn default_max_eviction_rounds() -> u32 {
    4
}
fn default_ack_timeout_ms() -> u64 {
    5_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_heartbeat_interval_ms() -> u64 {
    10_000
}

/// Storage section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the flash image file.
    #[serde(default = "default_device_path")]
    pub device_path: String,

    /// Erase-block size in bytes.
    #[serde(default = "default_block_size")]
    pub block_size: u32,

    /// Number of erase-blocks (including the superblock).
    #[serde(default = "default_block_count")]
    pub block_count: u32,

    /// Free blocks reserved as GC relocation margin.
    #[serde(default = "default_reserved_blocks")]
    pub reserved_blocks: u32,

    /// Proactive GC threshold on the best candidate's live ratio.
    #[serde(default = "default_gc_live_ratio_threshold")]
    pub gc_live_ratio_threshold: f64,

    /// GC passes attempted while satisfying one append.
    #[serde(default = "default_max_reclaim_attempts")]
    pub max_reclaim_attempts: u32,

    /// Eviction candidates requested per pressure round.
    #[serde(default = "default_eviction_batch")]
    pub eviction_batch: usize,

    /// Pressure rounds attempted before an append gives up.
    #[serde(default = "default_max_eviction_rounds")]
    pub max_eviction_rounds: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("empty storage config deserializes")
    }
}

/// Mission-link section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("empty link config deserializes")
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub link: LinkConfig,

    #[serde(default)]
    pub selection: SelectionPolicy,
}

impl Config {
    /// Load a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Config =
            serde_json::from_str(&contents).map_err(|e| ConfigError::Parse {
                path: path.display().to_string(),
                source: e,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.block_count < 3 {
            return Err(ConfigError::Invalid(
                "storage.block_count must be at least 3".to_string(),
            ));
        }
        if self.storage.reserved_blocks + 2 > self.storage.block_count {
            return Err(ConfigError::Invalid(
                "storage.reserved_blocks leaves no usable data blocks".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.storage.gc_live_ratio_threshold) {
            return Err(ConfigError::Invalid(
                "storage.gc_live_ratio_threshold must be within [0, 1]".to_string(),
            ));
        }
        if self.link.ack_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "link.ack_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn geometry(&self) -> Geometry {
        Geometry::new(self.storage.block_size, self.storage.block_count)
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            reserved_blocks: self.storage.reserved_blocks,
            gc_live_ratio_threshold: self.storage.gc_live_ratio_threshold,
            max_reclaim_attempts: self.storage.max_reclaim_attempts,
        }
    }

    pub fn link_options(&self) -> LinkOptions {
        LinkOptions {
            ack_timeout_ms: self.link.ack_timeout_ms,
            max_retries: self.link.max_retries,
            heartbeat_interval_ms: self.link.heartbeat_interval_ms,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("cannot parse config {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.storage.block_size, 65_536);
        assert_eq!(config.link.max_retries, 3);
        assert_eq!(config.selection.default_weight, 1.0);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = serde_json::from_str(
            r#"{
                "storage": {"block_count": 16},
                "selection": {"class_weights": {"wildfire": 1.0}}
            }"#,
        )
        .unwrap();
        assert_eq!(config.storage.block_count, 16);
        assert_eq!(config.storage.block_size, 65_536);
        assert_eq!(config.selection.weight("wildfire"), 1.0);
    }

    #[test]
    fn test_validation_rejects_tiny_device() {
        let mut config = Config::default();
        config.storage.block_count = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("satstore.json");
        std::fs::write(
            &path,
            r#"{"link": {"ack_timeout_ms": 250, "max_retries": 1}}"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.link.ack_timeout_ms, 250);
        assert_eq!(config.link.max_retries, 1);
    }

    #[test]
    fn test_roundtrip_serialization() {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.storage.block_count, config.storage.block_count);
    }
}
