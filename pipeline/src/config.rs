// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Pipeline configuration.
//!
//! ```yaml
//! name: edge
//! tables:
//!   - algorithm: trie
//!   - algorithm: loop
//! logging:
//!   default: info
//!   targets:
//!     flowpipe_matching::trie: debug
//! ```

use matching::AlgorithmKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracectl::LogConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid pipeline configuration: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("A pipeline needs at least one table")]
    NoTables,

    #[error("Too many tables: {0} (at most 255)")]
    TooManyTables(usize),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    pub algorithm: AlgorithmKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub name: String,
    /// One entry per table, table ids are the positions in this list.
    pub tables: Vec<TableConfig>,
    pub logging: LogConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: "flowpipe".to_string(),
            tables: vec![TableConfig::default()],
            logging: LogConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Table ids are 8 bits wide, and the last value is reserved.
    pub const MAX_TABLES: usize = 255;

    /// A pipeline of `num_tables` tables using the same algorithm.
    #[must_use]
    pub fn uniform(name: &str, num_tables: usize, algorithm: AlgorithmKind) -> Self {
        Self {
            name: name.to_string(),
            tables: vec![TableConfig { algorithm }; num_tables],
            logging: LogConfig::default(),
        }
    }

    /// Parse and validate a YAML configuration.
    ///
    /// # Errors
    ///
    /// Fails if `yaml` does not parse or if the configuration is invalid.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Fails if the number of tables is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.tables.len() {
            0 => Err(ConfigError::NoTables),
            n if n > Self::MAX_TABLES => Err(ConfigError::TooManyTables(n)),
            _ => Ok(()),
        }
    }
}
