// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Flow-mod results.

use crate::algorithm::AlgorithmKind;
use flow::FlowError;
use thiserror::Error;

/// Reasons a flow-mod was rejected. The table is left unchanged in every case.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowModError {
    #[error("Flow entry overlaps with an installed entry of the same priority")]
    Overlap,

    #[error("The {algorithm} matching algorithm does not support {operation}")]
    Unsupported {
        algorithm: AlgorithmKind,
        operation: &'static str,
    },

    #[error("Internal error: {0}")]
    Internal(&'static str),

    #[error(transparent)]
    Invalid(#[from] FlowError),
}

/// What a successful add did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowModOutcome {
    /// A new entry was installed.
    Added,
    /// An entry with the same matches and priority was updated in place.
    Replaced,
}
