// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Flow entries and the match predicates the matching algorithms are built upon.
//!
//! A [`FlowEntry`] is a rule: a [`MatchSet`] (a conjunction of at most one
//! [`Match`] per [`FieldId`]), a priority, a cookie and an [`InstructionSet`].
//! Entries are shared as `Arc<FlowEntry>` once they are installed in a table;
//! from then on only their instructions and counters may change.

#![deny(
    unsafe_code,
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]
#![allow(clippy::module_name_repetitions)]

pub mod entry;
pub mod errors;
pub mod field;
pub mod group;
pub mod instruction;
pub mod matches;
pub mod packet;
pub mod removal;
pub mod stats;

pub use entry::{FlowEntry, TableId};
pub use errors::FlowError;
pub use field::FieldId;
pub use group::GroupResolver;
pub use instruction::{Action, GroupId, Instruction, InstructionSet, InstructionType, PortNo};
pub use matches::{Match, MatchSet};
pub use packet::{PacketFields, PacketView};
pub use removal::{NoopNotifier, RemovalNotifier, RemovalReason, TracingNotifier};
pub use stats::{FlowCounters, FlowStats};
