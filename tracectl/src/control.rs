// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Tracing runtime control.

use crate::config::{LogConfig, LogLevel};
use crate::errors::TraceCtlError;
use ordermap::OrderMap;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{Subscriber, debug, info};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{EnvFilter, Registry, prelude::*, reload};

/// The name under which `setup_from_string` accepts the default level.
const DEFAULT_KEY: &str = "default";

fn check_target(target: &str) -> Result<(), TraceCtlError> {
    if target.is_empty()
        || target == DEFAULT_KEY
        || target.contains([',', '=', '[', ']', '{', '}'])
        || target.contains(char::is_whitespace)
    {
        return Err(TraceCtlError::InvalidDirective {
            directive: target.to_string(),
            reason: "not a valid target name".to_string(),
        });
    }
    Ok(())
}

/// Build the filter enforcing `config`.
pub(crate) fn env_filter(config: &LogConfig) -> Result<EnvFilter, TraceCtlError> {
    let mut filter = EnvFilter::new(config.default.to_string());
    for (target, level) in &config.targets {
        check_target(target)?;
        let directive = format!("{target}={level}");
        let parsed = Directive::from_str(&directive).map_err(|e| {
            TraceCtlError::InvalidDirective {
                directive: directive.clone(),
                reason: e.to_string(),
            }
        })?;
        filter = filter.add_directive(parsed);
    }
    Ok(filter)
}

/// Parse a string made of comma-separated target=level, where level is one of
/// off, error, warn, info, debug, trace. `default=level` sets the default level.
pub(crate) fn parse_tracing_config(
    input: &str,
) -> Result<OrderMap<String, LogLevel>, TraceCtlError> {
    let mut result = OrderMap::new();
    for item in input.split(',') {
        let item = item.trim();
        let Some((target, level)) = item.split_once('=') else {
            return Err(TraceCtlError::InvalidSyntax(item.to_string()));
        };
        let level = LogLevel::from_str(level.trim())
            .map_err(|_| TraceCtlError::InvalidLevel(level.trim().to_string()))?;
        let target = target.trim();
        if target != DEFAULT_KEY {
            check_target(target)?;
        }
        result.insert(target.to_string(), level);
    }
    Ok(result)
}

/// Handle on the filter of an installed subscriber.
///
/// Every change is validated on a copy of the configuration, which is only
/// committed once the new filter is in place.
#[derive(Debug)]
pub struct TracingControl {
    config: Mutex<LogConfig>,
    reload_filter: reload::Handle<EnvFilter, Registry>,
}

impl TracingControl {
    /// Build a subscriber honoring `config` and the handle controlling it, without
    /// installing the subscriber. Useful to scope it with
    /// [`tracing::subscriber::with_default`].
    ///
    /// # Errors
    ///
    /// Fails if some target of `config` is not a valid directive.
    pub fn new(
        config: &LogConfig,
    ) -> Result<(Self, impl Subscriber + Send + Sync + 'static), TraceCtlError> {
        let (filter, reload_filter) = reload::Layer::new(env_filter(config)?);

        // formatting layer
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_line_number(config.line_numbers)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(config.thread_names)
            .with_level(true);

        let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
        let control = Self {
            config: Mutex::new(config.clone()),
            reload_filter,
        };
        Ok((control, subscriber))
    }

    /// Install the subscriber for the whole process. Can only succeed once.
    ///
    /// # Errors
    ///
    /// Fails if `config` is invalid or if a global subscriber was already set.
    pub fn init(config: &LogConfig) -> Result<Self, TraceCtlError> {
        let (control, subscriber) = Self::new(config)?;
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|_| TraceCtlError::AlreadyInitialized)?;
        info!("Initialized tracing: {}", control.as_config_string());
        Ok(control)
    }

    fn lock(&self) -> MutexGuard<'_, LogConfig> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, change: impl FnOnce(&mut LogConfig)) -> Result<(), TraceCtlError> {
        let mut current = self.lock();
        let mut candidate = current.clone();
        change(&mut candidate);
        if candidate == *current {
            return Ok(());
        }
        let filter = env_filter(&candidate)?;
        self.reload_filter
            .reload(filter)
            .map_err(|e| TraceCtlError::Reload(e.to_string()))?;
        *current = candidate;
        debug!("Tracing configuration is now {}", current.as_config_string());
        Ok(())
    }

    /// # Errors
    ///
    /// Fails if the subscriber is gone.
    pub fn set_default_level(&self, level: LogLevel) -> Result<(), TraceCtlError> {
        self.update(|config| config.default = level)?;
        info!("Set default log level to {level}");
        Ok(())
    }

    /// # Errors
    ///
    /// Fails if `target` is not a valid target name or if the subscriber is gone.
    pub fn set_target_level(&self, target: &str, level: LogLevel) -> Result<(), TraceCtlError> {
        check_target(target)?;
        self.update(|config| {
            config.targets.insert(target.to_string(), level);
        })?;
        info!("Changed log level for target '{target}' to {level}");
        Ok(())
    }

    /// Let `target` fall back to the default level. Returns false if it had no
    /// level of its own.
    ///
    /// # Errors
    ///
    /// Fails if the subscriber is gone.
    pub fn clear_target_level(&self, target: &str) -> Result<bool, TraceCtlError> {
        let mut found = false;
        self.update(|config| found = config.targets.remove(target).is_some())?;
        Ok(found)
    }

    /// Apply a string like `default=warn,flowpipe_matching::trie=debug` at once.
    ///
    /// # Errors
    ///
    /// Fails, changing nothing, if the string is malformed.
    pub fn setup_from_string(&self, input: &str) -> Result<(), TraceCtlError> {
        let levels = parse_tracing_config(input)?;
        self.update(|config| {
            for (target, level) in levels {
                if target == DEFAULT_KEY {
                    config.default = level;
                } else {
                    config.targets.insert(target, level);
                }
            }
        })
    }

    #[must_use]
    pub fn default_level(&self) -> LogLevel {
        self.lock().default
    }

    #[must_use]
    pub fn target_level(&self, target: &str) -> Option<LogLevel> {
        self.lock().targets.get(target).copied()
    }

    /// A snapshot of the configuration in force.
    #[must_use]
    pub fn config(&self) -> LogConfig {
        self.lock().clone()
    }

    #[must_use]
    pub fn as_config_string(&self) -> String {
        self.lock().as_config_string()
    }
}

impl LogConfig {
    /// The configuration as a string `setup_from_string` accepts.
    #[must_use]
    pub fn as_config_string(&self) -> String {
        let mut out = format!("{DEFAULT_KEY}={}", self.default);
        for (target, level) in &self.targets {
            out += format!(",{target}={level}").as_str();
        }
        out
    }
}
