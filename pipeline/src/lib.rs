// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(
    unsafe_code,
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]
#![allow(clippy::module_name_repetitions)]

//! # Flow tables and pipelines
//!
//! A [`FlowTable`] keeps the state of a matching algorithm in a left-right pair:
//! packet-processing threads look entries up through a [`FlowTableReader`]
//! without ever taking a lock, while flow-mods are serialized on a per-table
//! writer and published to both copies.
//!
//! Entries leaving a table (removed or overwritten) are only torn down once no
//! reader can reach them anymore: every structural change is published twice,
//! and the second publish waits for all readers of the stale copy to move on.
//!
//! A [`Pipeline`] is an ordered set of tables sharing a [`GroupTable`], built
//! from a [`PipelineConfig`].

pub mod config;
pub mod errors;
pub mod group;
pub mod pipeline;
pub mod table;

pub use config::{ConfigError, PipelineConfig, TableConfig};
pub use errors::PipelineError;
pub use group::GroupTable;
pub use pipeline::{Pipeline, PipelineReader};
pub use table::{FlowTable, FlowTableReader};
