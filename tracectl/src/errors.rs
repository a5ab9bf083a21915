// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TraceCtlError {
    #[error("Invalid log level '{0}'")]
    InvalidLevel(String),

    #[error("Invalid syntax '{0}': it should be target=level")]
    InvalidSyntax(String),

    #[error("Invalid tracing directive '{directive}': {reason}")]
    InvalidDirective { directive: String, reason: String },

    #[error("A global tracing subscriber is already installed")]
    AlreadyInitialized,

    #[error("Failed to reload tracing filter: {0}")]
    Reload(String),
}
