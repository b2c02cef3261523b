// SPDX-License-Identifier: GPL-3.0-only

//! Execution tuning loaded from TOML
//!
//! Every field has a default, so an empty or partial file is valid.

use std::path::Path;
use std::time::Duration;

use partitions_types::{Alignment, MEBIBYTE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid configuration in {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on waiting for the kernel after a table commit.
    pub settle_timeout_secs: u64,

    /// Block size of the copy engine, in bytes.
    pub copy_block_size: u64,

    /// Run a read-only pass before an in-place move.
    pub simulate_before_move: bool,

    /// Alignment of partitions planned on the command line without an
    /// explicit policy. Batch operations always name their own.
    pub default_alignment: Alignment,

    /// Check the filesystem before resizing or moving it.
    pub check_before_resize: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            settle_timeout_secs: 30,
            copy_block_size: MEBIBYTE,
            simulate_before_move: true,
            default_alignment: Alignment::Mebibyte,
            check_before_resize: true,
        }
    }
}

impl EngineConfig {
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Self::parse(raw, "<inline>")
    }

    fn parse(raw: &str, path: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let shown = path.display().to_string();
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::parse(&raw, &shown),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No configuration at {}, using defaults", shown);
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: shown,
                source,
            }),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.copy_block_size == 0 || self.copy_block_size % 512 != 0 {
            return Err(ConfigError::Invalid(format!(
                "copy_block_size must be a non-zero multiple of 512, got {}",
                self.copy_block_size
            )));
        }
        Ok(())
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_secs(self.settle_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(EngineConfig::from_toml("").unwrap(), EngineConfig::default());
        assert_eq!(EngineConfig::default().settle_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let config = EngineConfig::from_toml(
            "settle_timeout_secs = 5\ndefault_alignment = \"cylinder\"\n",
        )
        .unwrap();
        assert_eq!(config.settle_timeout_secs, 5);
        assert_eq!(config.default_alignment, Alignment::Cylinder);
        assert_eq!(config.copy_block_size, MEBIBYTE);
    }

    #[test]
    fn odd_block_size_is_rejected() {
        assert!(matches!(
            EngineConfig::from_toml("copy_block_size = 1000"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(&dir.path().join("engine.toml")).unwrap();
        assert!(config.simulate_before_move);
    }
}
