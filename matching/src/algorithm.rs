// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The interface every matching algorithm implements, and the types flowing through it.

use crate::errors::FlowModError;
use crate::linear::LoopAlgorithm;
use crate::trie::Trie;
use flow::{FlowCounters, FlowEntry, GroupId, PacketView, PortNo};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use strum::{EnumIter, EnumString};

/// The matching algorithms available to flow tables.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    EnumIter,
    EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AlgorithmKind {
    #[default]
    Trie,
    Loop,
}

impl AlgorithmKind {
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            AlgorithmKind::Trie => "Trie algorithm performs the lookup using a patricia trie",
            AlgorithmKind::Loop => "Loop algorithm scans a priority-sorted list of entries",
        }
    }
}

/// How the template of a modify, delete or stats request selects entries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Strictness {
    /// Entries with the same priority and exactly the same matches.
    Strict,
    /// Entries whose matches are at least as specific as the template's.
    #[default]
    NonStrict,
}

impl Strictness {
    /// Tell if `entry` is selected by `template`. The cookie of the template
    /// filters under its mask, the port and group filter the entry's actions.
    #[must_use]
    pub fn selects(
        self,
        entry: &FlowEntry,
        template: &FlowEntry,
        out_port: PortNo,
        out_group: GroupId,
    ) -> bool {
        match self {
            Strictness::Strict => entry.check_equal(template, true, out_port, out_group),
            Strictness::NonStrict => {
                entry.check_contained(template, false, true, out_port, out_group)
            }
        }
    }
}

/// A structural change to the state of a matching algorithm.
#[derive(Clone, Debug)]
pub enum TableChange {
    /// Install a new entry.
    Insert(Arc<FlowEntry>),
    /// Put `new` where `old` is. Both have the same priority and matches.
    Replace {
        old: Arc<FlowEntry>,
        new: Arc<FlowEntry>,
    },
    /// Uninstall these entries.
    Remove(Vec<Arc<FlowEntry>>),
    /// Uninstall every entry.
    Clear,
}

impl TableChange {
    /// The entries this change takes out of the table.
    #[must_use]
    pub fn evicted(&self) -> &[Arc<FlowEntry>] {
        match self {
            TableChange::Insert(_) | TableChange::Clear => &[],
            TableChange::Replace { old, .. } => std::slice::from_ref(old),
            TableChange::Remove(entries) => entries,
        }
    }
}

/// The selection of a flow or aggregate stats request.
#[derive(Debug)]
pub struct FlowStatsQuery {
    pub template: FlowEntry,
    pub strictness: Strictness,
    pub out_port: PortNo,
    pub out_group: GroupId,
}

impl FlowStatsQuery {
    /// Select the entries `template` selects non-strictly.
    #[must_use]
    pub fn new(template: FlowEntry) -> Self {
        Self {
            template,
            strictness: Strictness::NonStrict,
            out_port: PortNo::ANY,
            out_group: GroupId::ANY,
        }
    }

    /// Select every entry.
    #[must_use]
    pub fn all() -> Self {
        Self::new(FlowEntry::new(false))
    }

    #[must_use]
    pub fn strict(mut self) -> Self {
        self.strictness = Strictness::Strict;
        self
    }

    #[must_use]
    pub fn out_port(mut self, port: PortNo) -> Self {
        self.out_port = port;
        self
    }

    #[must_use]
    pub fn out_group(mut self, group: GroupId) -> Self {
        self.out_group = group;
        self
    }

    #[must_use]
    pub fn selects(&self, entry: &FlowEntry) -> bool {
        self.strictness
            .selects(entry, &self.template, self.out_port, self.out_group)
    }
}

/// The statistics of one entry.
#[derive(Debug, Clone)]
pub struct FlowStatsReply {
    pub entry: Arc<FlowEntry>,
    pub counters: FlowCounters,
    pub age: Duration,
}

impl FlowStatsReply {
    #[must_use]
    pub fn new(entry: &Arc<FlowEntry>) -> Self {
        Self {
            entry: entry.clone(),
            counters: entry.counters(),
            age: entry.age(),
        }
    }
}

impl Display for FlowStatsReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} packets={} bytes={} age={}s",
            self.entry,
            self.counters.packets,
            self.counters.bytes,
            self.age.as_secs()
        )
    }
}

/// Counters summed over the entries a query selects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateStats {
    pub flows: usize,
    pub packets: u64,
    pub bytes: u64,
}

impl Display for AggregateStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "flows={} packets={} bytes={}",
            self.flows, self.packets, self.bytes
        )
    }
}

/// An index of flow entries.
///
/// The `add`, `modify` and `remove` methods plan flow-mods: they never change
/// the state. Planned changes are carried out by [`MatchingAlgorithm::apply`],
/// possibly on several copies of the state.
pub trait MatchingAlgorithm: Clone + Display + Send + Sync + 'static {
    fn kind(&self) -> AlgorithmKind;

    fn description(&self) -> &'static str {
        self.kind().description()
    }

    /// Number of entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every entry, in no particular order.
    fn entries(&self) -> impl Iterator<Item = &Arc<FlowEntry>>;

    /// Plan the installation of `entry`. If an entry with the same matches and
    /// priority exists, it is to be replaced by `entry`.
    ///
    /// # Errors
    ///
    /// Returns [`FlowModError::Overlap`] if `check_overlap` is set and `entry`
    /// overlaps with an installed entry of the same priority.
    fn add(&self, entry: &Arc<FlowEntry>, check_overlap: bool)
    -> Result<TableChange, FlowModError>;

    /// Tell if `modify` and `remove` can succeed on this algorithm.
    fn supports_removal(&self) -> bool {
        true
    }

    /// Find the entries whose instructions a modify request with `template` updates.
    ///
    /// # Errors
    ///
    /// Fails if the algorithm cannot modify entries.
    fn modify(
        &self,
        template: &FlowEntry,
        strictness: Strictness,
    ) -> Result<Vec<Arc<FlowEntry>>, FlowModError>;

    /// Plan the removal of the entries `template` selects, or of `specific` only
    /// if given.
    ///
    /// # Errors
    ///
    /// Fails if the algorithm cannot remove entries.
    fn remove(
        &self,
        template: &FlowEntry,
        specific: Option<&Arc<FlowEntry>>,
        strictness: Strictness,
        out_port: PortNo,
        out_group: GroupId,
    ) -> Result<TableChange, FlowModError>;

    /// Carry out a change planned on an identical state.
    fn apply(&mut self, change: &TableChange);

    /// The entry of highest priority whose matches the packet satisfies.
    fn find_best_match<P: PacketView + ?Sized>(&self, packet: &P) -> Option<&Arc<FlowEntry>>;

    /// Statistics of the entries a query selects.
    ///
    /// # Errors
    ///
    /// Fails if the algorithm cannot report statistics.
    fn flow_stats(&self, query: &FlowStatsQuery) -> Result<Vec<FlowStatsReply>, FlowModError> {
        Ok(self
            .entries()
            .filter(|entry| query.selects(entry))
            .map(FlowStatsReply::new)
            .collect())
    }

    /// Statistics summed over the entries a query selects.
    ///
    /// # Errors
    ///
    /// Fails if the algorithm cannot report statistics.
    fn aggregate_stats(&self, query: &FlowStatsQuery) -> Result<AggregateStats, FlowModError> {
        Ok(self
            .entries()
            .filter(|entry| query.selects(entry))
            .fold(AggregateStats::default(), |mut stats, entry| {
                let counters = entry.counters();
                stats.flows += 1;
                stats.packets += counters.packets;
                stats.bytes += counters.bytes;
                stats
            }))
    }

    /// Entries with an action sending packets to `group`.
    fn find_entries_using_group(&self, group: GroupId) -> Vec<Arc<FlowEntry>> {
        self.entries()
            .filter(|entry| entry.with_instructions_read(|set| set.has_group(group)))
            .cloned()
            .collect()
    }
}

/// A matching algorithm chosen at run time.
#[derive(Clone, Debug)]
pub enum Algorithm {
    Trie(Trie),
    Loop(LoopAlgorithm),
}

impl Algorithm {
    /// An empty instance of the algorithm of the given kind.
    #[must_use]
    pub fn new(kind: AlgorithmKind) -> Self {
        match kind {
            AlgorithmKind::Trie => Algorithm::Trie(Trie::new()),
            AlgorithmKind::Loop => Algorithm::Loop(LoopAlgorithm::new()),
        }
    }
}

impl Default for Algorithm {
    fn default() -> Self {
        Self::new(AlgorithmKind::default())
    }
}

impl Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Algorithm::Trie(trie) => Display::fmt(trie, f),
            Algorithm::Loop(list) => Display::fmt(list, f),
        }
    }
}

impl MatchingAlgorithm for Algorithm {
    fn kind(&self) -> AlgorithmKind {
        match self {
            Algorithm::Trie(trie) => trie.kind(),
            Algorithm::Loop(list) => list.kind(),
        }
    }

    fn len(&self) -> usize {
        match self {
            Algorithm::Trie(trie) => trie.len(),
            Algorithm::Loop(list) => list.len(),
        }
    }

    fn entries(&self) -> impl Iterator<Item = &Arc<FlowEntry>> {
        let entries: Box<dyn Iterator<Item = &Arc<FlowEntry>> + '_> = match self {
            Algorithm::Trie(trie) => Box::new(trie.entries()),
            Algorithm::Loop(list) => Box::new(list.entries()),
        };
        entries
    }

    fn supports_removal(&self) -> bool {
        match self {
            Algorithm::Trie(trie) => trie.supports_removal(),
            Algorithm::Loop(list) => list.supports_removal(),
        }
    }

    fn add(
        &self,
        entry: &Arc<FlowEntry>,
        check_overlap: bool,
    ) -> Result<TableChange, FlowModError> {
        match self {
            Algorithm::Trie(trie) => trie.add(entry, check_overlap),
            Algorithm::Loop(list) => list.add(entry, check_overlap),
        }
    }

    fn modify(
        &self,
        template: &FlowEntry,
        strictness: Strictness,
    ) -> Result<Vec<Arc<FlowEntry>>, FlowModError> {
        match self {
            Algorithm::Trie(trie) => trie.modify(template, strictness),
            Algorithm::Loop(list) => list.modify(template, strictness),
        }
    }

    fn remove(
        &self,
        template: &FlowEntry,
        specific: Option<&Arc<FlowEntry>>,
        strictness: Strictness,
        out_port: PortNo,
        out_group: GroupId,
    ) -> Result<TableChange, FlowModError> {
        match self {
            Algorithm::Trie(trie) => {
                trie.remove(template, specific, strictness, out_port, out_group)
            }
            Algorithm::Loop(list) => {
                list.remove(template, specific, strictness, out_port, out_group)
            }
        }
    }

    fn apply(&mut self, change: &TableChange) {
        match self {
            Algorithm::Trie(trie) => trie.apply(change),
            Algorithm::Loop(list) => list.apply(change),
        }
    }

    fn find_best_match<P: PacketView + ?Sized>(&self, packet: &P) -> Option<&Arc<FlowEntry>> {
        match self {
            Algorithm::Trie(trie) => trie.find_best_match(packet),
            Algorithm::Loop(list) => list.find_best_match(packet),
        }
    }

    fn flow_stats(&self, query: &FlowStatsQuery) -> Result<Vec<FlowStatsReply>, FlowModError> {
        match self {
            Algorithm::Trie(trie) => trie.flow_stats(query),
            Algorithm::Loop(list) => list.flow_stats(query),
        }
    }

    fn aggregate_stats(&self, query: &FlowStatsQuery) -> Result<AggregateStats, FlowModError> {
        match self {
            Algorithm::Trie(trie) => trie.aggregate_stats(query),
            Algorithm::Loop(list) => list.aggregate_stats(query),
        }
    }

    fn find_entries_using_group(&self, group: GroupId) -> Vec<Arc<FlowEntry>> {
        match self {
            Algorithm::Trie(trie) => trie.find_entries_using_group(group),
            Algorithm::Loop(list) => list.find_entries_using_group(group),
        }
    }
}
