// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Display implementations

use crate::config::LogConfig;
use crate::control::TracingControl;
use std::fmt::Display;

macro_rules! TARGET_FMT {
    () => {
        "{:>48} │ {:>8}"
    };
}

impl Display for LogConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f)?;
        writeln!(
            f,
            "                 ──────── Tracing configuration per target ────────"
        )?;
        writeln!(f, "{}", format_args!(TARGET_FMT!(), "TARGET", "LEVEL"))?;
        for (target, level) in &self.targets {
            writeln!(f, "{}", format_args!(TARGET_FMT!(), target, level.to_string()))?;
        }
        // format the default as a target
        write!(
            f,
            "{}",
            format_args!(TARGET_FMT!(), "(default)", self.default.to_string())
        )
    }
}

impl Display for TracingControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.config(), f)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{LogConfig, LogLevel};

    #[test]
    fn test_table() {
        let config = LogConfig::default().with_target("flowpipe_matching::trie", LogLevel::Debug);
        let out = config.to_string();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[1].contains("Tracing configuration per target"));
        assert!(lines[3].ends_with("flowpipe_matching::trie │    debug"));
        assert!(lines[4].ends_with("(default) │     info"));
    }
}
