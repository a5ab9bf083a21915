// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Matching algorithms: the indexes flow tables use to find the entry a packet hits.
//!
//! Every algorithm implements [`MatchingAlgorithm`]. Mutations are split in two
//! steps so that the state can live in both copies of a left-right pair: the
//! `add`, `modify` and `remove` methods only inspect the state and return what
//! should change, and [`MatchingAlgorithm::apply`] performs that change. Given the
//! same state and the same [`TableChange`], `apply` always yields the same state.

#![deny(
    unsafe_code,
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]
#![allow(clippy::module_name_repetitions)]

pub mod algorithm;
pub mod errors;
pub mod linear;
pub mod trie;

pub use algorithm::{
    AggregateStats, Algorithm, AlgorithmKind, FlowStatsQuery, FlowStatsReply, MatchingAlgorithm,
    Strictness, TableChange,
};
pub use errors::{FlowModError, FlowModOutcome};
pub use linear::LoopAlgorithm;
pub use trie::{Trie, TrieWalk, WalkMode};
