// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Logging configuration, as found in the configuration file of the host.

use ordermap::OrderMap;
use serde::{Deserialize, Serialize};
use strum::{EnumIter, EnumString};
use tracing_subscriber::filter::LevelFilter;

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    EnumIter,
    EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Levels per tracing target, plus the look of the log lines.
///
/// Targets are module paths (`flowpipe_matching::trie`) or crate names
/// (`flowpipe_pipeline`); a level set for a crate covers all its modules.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub default: LogLevel,
    pub targets: OrderMap<String, LogLevel>,
    pub thread_names: bool,
    pub line_numbers: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default: LogLevel::Info,
            targets: OrderMap::new(),
            thread_names: true,
            line_numbers: true,
        }
    }
}

impl LogConfig {
    #[must_use]
    pub fn with_default(mut self, level: LogLevel) -> Self {
        self.default = level;
        self
    }

    #[must_use]
    pub fn with_target(mut self, target: &str, level: LogLevel) -> Self {
        self.targets.insert(target.to_string(), level);
        self
    }
}
