// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! A flow table: a matching algorithm shared between one writer and many readers.

use concurrency::Recover;
use concurrency::sync::Mutex;
use concurrency::sync::atomic::{AtomicUsize, Ordering};
use flow::{
    FlowEntry, GroupId, GroupResolver, PacketView, PortNo, RemovalNotifier, RemovalReason,
    TableId,
};
use left_right::{Absorb, ReadHandle, ReadHandleFactory, WriteHandle};
use matching::{
    AggregateStats, Algorithm, AlgorithmKind, FlowModError, FlowModOutcome, FlowStatsQuery,
    FlowStatsReply, MatchingAlgorithm, Strictness, TableChange,
};
use std::fmt::{Debug, Display};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// One of the two copies of the state of a table.
#[derive(Clone, Debug)]
struct TableState<A>(A);

impl<A: MatchingAlgorithm> Absorb<TableChange> for TableState<A> {
    fn absorb_first(&mut self, change: &mut TableChange, _: &Self) {
        self.0.apply(change);
    }
    fn drop_first(self: Box<Self>) {}
    fn sync_with(&mut self, first: &Self) {
        *self = first.clone();
    }
}

type TableWriter<A> = WriteHandle<TableState<A>, TableChange>;

const STATE_GONE: FlowModError = FlowModError::Internal("flow table state is gone");

pub struct FlowTable<A: MatchingAlgorithm = Algorithm> {
    id: TableId,
    kind: AlgorithmKind,
    writer: Mutex<TableWriter<A>>,
    factory: ReadHandleFactory<TableState<A>>,
    num_of_entries: AtomicUsize,
    groups: Arc<dyn GroupResolver>,
    notifier: Arc<dyn RemovalNotifier>,
}

impl<A: MatchingAlgorithm> FlowTable<A> {
    /// Create table `id` on top of `algorithm`. Entries added to the table may
    /// only reference groups `groups` knows about; entries leaving it are
    /// reported to `notifier`.
    #[must_use]
    pub fn new(
        id: TableId,
        algorithm: A,
        groups: Arc<dyn GroupResolver>,
        notifier: Arc<dyn RemovalNotifier>,
    ) -> Self {
        let kind = algorithm.kind();
        let num_of_entries = AtomicUsize::new(algorithm.len());
        let (writer, reader) =
            left_right::new_from_empty::<TableState<A>, TableChange>(TableState(algorithm));
        debug!("Created flow table {id} using the {kind} algorithm");
        Self {
            id,
            kind,
            writer: Mutex::new(writer),
            factory: reader.factory(),
            num_of_entries,
            groups,
            notifier,
        }
    }

    #[must_use]
    pub fn id(&self) -> TableId {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> AlgorithmKind {
        self.kind
    }

    /// Number of entries, as of the last completed flow-mod.
    #[must_use]
    pub fn len(&self) -> usize {
        self.num_of_entries.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A handle for a packet-processing thread. Each thread needs its own.
    #[must_use]
    pub fn reader(&self) -> FlowTableReader<A> {
        FlowTableReader {
            id: self.id,
            handle: self.factory.handle(),
        }
    }

    /// Run a planner on the writer's copy of the state.
    fn plan<R>(
        writer: &TableWriter<A>,
        planner: impl FnOnce(&A) -> Result<R, FlowModError>,
    ) -> Result<R, FlowModError> {
        let state = writer.enter().ok_or(STATE_GONE)?;
        planner(&state.0)
    }

    /// Publish `change` to both copies and return the entries it evicted. Once
    /// this returns, no reader can reach the evicted entries.
    fn commit(writer: &mut TableWriter<A>, change: TableChange) -> Vec<Arc<FlowEntry>> {
        let evicted = change.evicted().to_vec();
        writer.append(change);
        writer.publish();
        // readers still in the stale copy are waited for here
        writer.publish();
        evicted
    }

    /// Run `query` on a fresh read handle.
    fn inspect<R>(
        &self,
        query: impl FnOnce(&A) -> Result<R, FlowModError>,
    ) -> Result<R, FlowModError> {
        let handle = self.factory.handle();
        let state = handle.enter().ok_or(STATE_GONE)?;
        query(&state.0)
    }

    fn destroy(&self, entries: Vec<Arc<FlowEntry>>, reason: RemovalReason) {
        for entry in entries {
            entry.destroy(reason, self.notifier.as_ref());
        }
    }

    /// Install `entry`. An entry with the same priority and matches is
    /// overwritten: `entry` takes its place, and its counters unless
    /// `reset_counts`.
    ///
    /// # Errors
    ///
    /// Fails, leaving the table unchanged, if `entry` references unknown groups,
    /// or if `check_overlap` is set and `entry` overlaps with an entry of the same
    /// priority.
    ///
    /// Groups are only looked up here: callers removing groups concurrently
    /// must hold flow-mods off, as [`crate::Pipeline`] does.
    pub fn add_flow_entry(
        &self,
        entry: FlowEntry,
        check_overlap: bool,
        reset_counts: bool,
    ) -> Result<FlowModOutcome, FlowModError> {
        if let Err(e) = entry.validate(self.groups.as_ref()) {
            warn!("Rejected flow entry for table {}: {e}", self.id);
            return Err(e.into());
        }
        let entry = Arc::new(entry);
        let mut writer = self.writer.lock().recover();
        let change = Self::plan(&writer, |algorithm| algorithm.add(&entry, check_overlap))
            .inspect_err(|e| warn!("Failed to add {entry} to table {}: {e}", self.id))?;
        entry.attach(self.id);

        let outcome = match change {
            TableChange::Replace { .. } => FlowModOutcome::Replaced,
            _ => FlowModOutcome::Added,
        };
        let replaced = Self::commit(&mut writer, change);
        match outcome {
            FlowModOutcome::Added => {
                self.num_of_entries.fetch_add(1, Ordering::Relaxed);
            }
            FlowModOutcome::Replaced => {
                if !reset_counts {
                    for old in &replaced {
                        entry.fold_counters(old.counters());
                    }
                }
                self.destroy(replaced, RemovalReason::NoReason);
            }
        }
        debug!("{outcome:?} flow entry in table {}: {entry}", self.id);
        Ok(outcome)
    }

    /// Give the entries `entry` selects the instructions of `entry`, zeroing
    /// their counters if `reset_counts`. Returns how many entries were updated;
    /// no entry is added if none matches.
    ///
    /// # Errors
    ///
    /// Fails if `entry` references unknown groups or if the algorithm does not
    /// support modifications.
    pub fn modify_flow_entry(
        &self,
        entry: &FlowEntry,
        strictness: Strictness,
        reset_counts: bool,
    ) -> Result<usize, FlowModError> {
        entry.validate(self.groups.as_ref())?;
        let writer = self.writer.lock().recover();
        let targets = Self::plan(&writer, |algorithm| algorithm.modify(entry, strictness))
            .inspect_err(|e| warn!("Failed to modify flow entries of table {}: {e}", self.id))?;
        let instructions = entry.instructions();
        for target in &targets {
            target.replace_instructions(instructions.clone(), reset_counts);
        }
        debug!(
            "Modified {} flow entries of table {} ({strictness})",
            targets.len(),
            self.id
        );
        Ok(targets.len())
    }

    /// Remove the entries `template` selects, or only `specific` if given and
    /// still installed. Returns how many entries were removed.
    ///
    /// # Errors
    ///
    /// Fails if the algorithm does not support removals.
    pub fn remove_flow_entry(
        &self,
        template: &FlowEntry,
        specific: Option<&Arc<FlowEntry>>,
        strictness: Strictness,
        out_port: PortNo,
        out_group: GroupId,
        reason: RemovalReason,
    ) -> Result<usize, FlowModError> {
        let mut writer = self.writer.lock().recover();
        let change = Self::plan(&writer, |algorithm| {
            algorithm.remove(template, specific, strictness, out_port, out_group)
        })
        .inspect_err(|e| warn!("Failed to remove flow entries of table {}: {e}", self.id))?;
        if change.evicted().is_empty() {
            debug!("No flow entry of table {} to remove", self.id);
            return Ok(0);
        }
        let removed = Self::commit(&mut writer, change);
        let count = removed.len();
        self.num_of_entries.fetch_sub(count, Ordering::Relaxed);
        self.destroy(removed, reason);
        debug!("Removed {count} flow entries of table {} ({reason})", self.id);
        Ok(count)
    }

    /// Remove every entry. Returns how many entries were removed.
    pub fn clear(&self, reason: RemovalReason) -> usize {
        let mut writer = self.writer.lock().recover();
        let entries: Vec<_> = match writer.enter() {
            Some(state) => state.0.entries().cloned().collect(),
            None => return 0,
        };
        if entries.is_empty() {
            return 0;
        }
        Self::commit(&mut writer, TableChange::Clear);
        let count = entries.len();
        self.num_of_entries.store(0, Ordering::Relaxed);
        self.destroy(entries, reason);
        debug!("Cleared table {}: {count} flow entries removed", self.id);
        count
    }

    /// # Errors
    ///
    /// Fails if the algorithm cannot report statistics.
    pub fn get_flow_stats(
        &self,
        query: &FlowStatsQuery,
    ) -> Result<Vec<FlowStatsReply>, FlowModError> {
        self.inspect(|algorithm| algorithm.flow_stats(query))
    }

    /// # Errors
    ///
    /// Fails if the algorithm cannot report statistics.
    pub fn get_flow_aggregate_stats(
        &self,
        query: &FlowStatsQuery,
    ) -> Result<AggregateStats, FlowModError> {
        self.inspect(|algorithm| algorithm.aggregate_stats(query))
    }

    #[must_use]
    pub fn find_entries_using_group(&self, group: GroupId) -> Vec<Arc<FlowEntry>> {
        self.inspect(|algorithm| Ok(algorithm.find_entries_using_group(group)))
            .unwrap_or_default()
    }

    /// Tell if the algorithm of the table can modify and remove entries.
    #[must_use]
    pub fn supports_removal(&self) -> bool {
        self.inspect(|algorithm| Ok(algorithm.supports_removal()))
            .unwrap_or(false)
    }
}

impl<A: MatchingAlgorithm> Display for FlowTable<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, " ──────── Flow table {} ({}) ────────", self.id, self.kind)?;
        match self.factory.handle().enter() {
            Some(state) => write!(f, "{}", state.0),
            None => writeln!(f, "(unavailable)"),
        }
    }
}

impl<A: MatchingAlgorithm> Debug for FlowTable<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowTable")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

/// Lock-free access to a [`FlowTable`] for one thread.
#[derive(Clone, Debug)]
pub struct FlowTableReader<A: MatchingAlgorithm = Algorithm> {
    id: TableId,
    handle: ReadHandle<TableState<A>>,
}

impl<A: MatchingAlgorithm> FlowTableReader<A> {
    #[must_use]
    pub fn id(&self) -> TableId {
        self.id
    }

    /// The entry of highest priority whose matches the packet satisfies.
    #[must_use]
    pub fn find_best_match<P: PacketView + ?Sized>(&self, packet: &P) -> Option<Arc<FlowEntry>> {
        let state = self.handle.enter()?;
        let found = state.0.find_best_match(packet).cloned();
        if found.is_none() {
            trace!("Table {}: miss", self.id);
        }
        found
    }

    /// Like [`FlowTableReader::find_best_match`], also accounting the packet
    /// and its `bytes` to the entry found.
    #[must_use]
    pub fn classify<P: PacketView + ?Sized>(&self, packet: &P, bytes: u64) -> Option<Arc<FlowEntry>> {
        let state = self.handle.enter()?;
        let Some(entry) = state.0.find_best_match(packet) else {
            trace!("Table {}: miss", self.id);
            return None;
        };
        // counted while the copy is held, so that the hit cannot be lost to a
        // concurrent overwrite or removal
        entry.hit(bytes);
        Some(entry.clone())
    }
}
