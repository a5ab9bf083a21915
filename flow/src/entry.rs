// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Flow entries: rules made of matches, a priority, a cookie and instructions.

use crate::errors::FlowError;
use crate::group::GroupResolver;
use crate::instruction::{GroupId, InstructionSet, PortNo};
use crate::matches::{Match, MatchSet};
use crate::packet::PacketView;
use crate::removal::{RemovalNotifier, RemovalReason};
use crate::stats::{FlowCounters, FlowStats};
use concurrency::Recover;
use concurrency::sync::RwLock;
use std::fmt::{Debug, Display};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tracing::debug;

/// Index of a flow table within a pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub u8);

impl TableId {
    /// Wildcard used by flow-mod and stats requests: every table.
    pub const ALL: TableId = TableId(0xff);
}

impl Display for TableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            TableId::ALL => write!(f, "all"),
            TableId(id) => write!(f, "{id}"),
        }
    }
}

/// A forwarding rule.
///
/// The match set, priority and cookie are fixed once the entry is installed:
/// changing them means adding a new entry and removing the old one. The
/// instructions and the counters are the only state mutated in place, under
/// the entry's own lock, which also lets [`FlowEntry::destroy`] wait for any
/// thread still using them.
pub struct FlowEntry {
    priority: u32,
    cookie: u64,
    cookie_mask: u64,
    matches: MatchSet,
    notify_removal: bool,
    instructions: RwLock<InstructionSet>,
    stats: FlowStats,
    table: OnceLock<TableId>,
    created: Instant,
}

impl FlowEntry {
    /// Create an entry with no matches, no instructions and zeroed counters.
    #[must_use]
    pub fn new(notify_removal: bool) -> Self {
        Self {
            priority: 0,
            cookie: 0,
            cookie_mask: 0,
            matches: MatchSet::new(),
            notify_removal,
            instructions: RwLock::new(InstructionSet::new()),
            stats: FlowStats::new(),
            table: OnceLock::new(),
            created: Instant::now(),
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_cookie(mut self, cookie: u64, cookie_mask: u64) -> Self {
        self.cookie = cookie;
        self.cookie_mask = cookie_mask;
        self
    }

    #[must_use]
    pub fn with_instructions(self, instructions: InstructionSet) -> Self {
        Self {
            instructions: RwLock::new(instructions),
            ..self
        }
    }

    /// Builder flavor of [`FlowEntry::add_match`].
    ///
    /// # Errors
    ///
    /// Fails if the entry already matches on the same field.
    pub fn with_match(mut self, m: Match) -> Result<Self, FlowError> {
        self.add_match(m)?;
        Ok(self)
    }

    /// Add a match to the entry.
    ///
    /// # Errors
    ///
    /// Fails if the entry already matches on the same field.
    pub fn add_match(&mut self, m: Match) -> Result<(), FlowError> {
        self.matches.insert(m)
    }

    #[must_use]
    pub fn priority(&self) -> u32 {
        self.priority
    }

    #[must_use]
    pub fn cookie(&self) -> u64 {
        self.cookie
    }

    #[must_use]
    pub fn cookie_mask(&self) -> u64 {
        self.cookie_mask
    }

    #[must_use]
    pub fn matches(&self) -> &MatchSet {
        &self.matches
    }

    #[must_use]
    pub fn notify_removal(&self) -> bool {
        self.notify_removal
    }

    /// The table the entry was installed in, if any.
    #[must_use]
    pub fn table(&self) -> Option<TableId> {
        self.table.get().copied()
    }

    /// Record the table the entry belongs to. An entry belongs to a single
    /// table for its whole life: returns false if it was already attached.
    pub fn attach(&self, table: TableId) -> bool {
        self.table.set(table).is_ok()
    }

    #[must_use]
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    /// A copy of the current instructions.
    #[must_use]
    pub fn instructions(&self) -> InstructionSet {
        self.instructions.read().recover().clone()
    }

    /// Run `f` on the instructions, holding the entry's read lock.
    pub fn with_instructions_read<R>(&self, f: impl FnOnce(&InstructionSet) -> R) -> R {
        f(&self.instructions.read().recover())
    }

    /// Tell if a packet satisfies every match of the entry.
    #[must_use]
    pub fn matches_packet<P: PacketView + ?Sized>(&self, packet: &P) -> bool {
        self.matches.matches_packet(packet)
    }

    /// Account for a packet of `bytes` bytes that hit this entry.
    pub fn hit(&self, bytes: u64) {
        self.stats.hit(bytes);
    }

    #[must_use]
    pub fn counters(&self) -> FlowCounters {
        let _guard = self.instructions.read().recover();
        self.stats.counters()
    }

    /// Carry over the counters of an entry this one replaced.
    pub fn fold_counters(&self, counters: FlowCounters) {
        let _guard = self.instructions.write().recover();
        self.stats.fold(counters);
    }

    /// Replace the instructions of the entry with those of `replacement`, and
    /// zero the counters if `reset_counts`. The matches, priority and cookie of
    /// `replacement` are ignored; it is consumed.
    pub fn update(&self, replacement: FlowEntry, reset_counts: bool) {
        let FlowEntry { instructions, .. } = replacement;
        self.replace_instructions(instructions.into_inner().recover(), reset_counts);
    }

    /// Set the instructions of the entry, and zero the counters if `reset_counts`.
    pub fn replace_instructions(&self, instructions: InstructionSet, reset_counts: bool) {
        let mut current = self.instructions.write().recover();
        *current = instructions;
        if reset_counts {
            self.stats.reset();
        }
        debug!("Updated flow entry {self:p}: actions={}", *current);
    }

    /// Tear the entry down. Waits for threads using its instructions or counters
    /// and, if the entry asked for it and `reason` is not
    /// [`RemovalReason::NoReason`], tells `notifier`.
    pub fn destroy(self: Arc<Self>, reason: RemovalReason, notifier: &dyn RemovalNotifier) {
        drop(self.instructions.write().recover());
        if self.notify_removal && reason != RemovalReason::NoReason {
            notifier.flow_removed(reason, &self);
        }
        debug!("Destroyed flow entry ({reason}): {self}");
    }

    /// Tell if the masked cookies of the entry and a filter agree.
    #[must_use]
    pub fn cookie_matches(&self, cookie: u64, cookie_mask: u64) -> bool {
        self.cookie & cookie_mask == cookie & cookie_mask
    }

    /// Tell if the entry references the port and the group of a filter.
    /// [`PortNo::ANY`] and [`GroupId::ANY`] filter nothing.
    #[must_use]
    pub fn references(&self, out_port: PortNo, out_group: GroupId) -> bool {
        self.with_instructions_read(|set| {
            (out_port == PortNo::ANY || set.has_output(out_port))
                && (out_group == GroupId::ANY || set.has_group(out_group))
        })
    }

    fn references_port(&self, out_port: PortNo) -> bool {
        out_port == PortNo::ANY || self.with_instructions_read(|set| set.has_output(out_port))
    }

    fn references_group(&self, out_group: GroupId) -> bool {
        out_group == GroupId::ANY || self.with_instructions_read(|set| set.has_group(out_group))
    }

    /// Tell if `candidate` may match some packet this entry also matches,
    /// without the priority or cookie telling them apart.
    ///
    /// With `check_priority`, entries of different priorities never overlap.
    /// With `check_cookie`, entries whose cookies differ under the mask of the
    /// candidate never overlap. A constrained `out_port` or `out_group` must be
    /// referenced by at least one of the two entries.
    #[must_use]
    pub fn check_overlap(
        &self,
        candidate: &FlowEntry,
        check_priority: bool,
        check_cookie: bool,
        out_port: PortNo,
        out_group: GroupId,
    ) -> bool {
        if check_priority && self.priority != candidate.priority {
            return false;
        }
        if check_cookie && !self.cookie_matches(candidate.cookie, candidate.cookie_mask) {
            return false;
        }
        self.matches.intersects(&candidate.matches)
            && (self.references_port(out_port) || candidate.references_port(out_port))
            && (self.references_group(out_group) || candidate.references_group(out_group))
    }

    /// Tell if this entry is selected by `filter`, the template of a non-strict
    /// modify, delete or stats request: every field `filter` constrains must be
    /// constrained at least as specifically by this entry. The port and group
    /// filters apply to this entry's instructions.
    #[must_use]
    pub fn check_contained(
        &self,
        filter: &FlowEntry,
        check_priority: bool,
        check_cookie: bool,
        out_port: PortNo,
        out_group: GroupId,
    ) -> bool {
        if check_priority && self.priority != filter.priority {
            return false;
        }
        if check_cookie && !self.cookie_matches(filter.cookie, filter.cookie_mask) {
            return false;
        }
        self.matches.is_submatch_of(&filter.matches) && self.references(out_port, out_group)
    }

    /// Tell if this entry is the one `candidate` designates in a strict request:
    /// same priority and bit-identical match set.
    #[must_use]
    pub fn check_equal(
        &self,
        candidate: &FlowEntry,
        check_cookie: bool,
        out_port: PortNo,
        out_group: GroupId,
    ) -> bool {
        if self.priority != candidate.priority || self.matches != candidate.matches {
            return false;
        }
        if check_cookie && !self.cookie_matches(candidate.cookie, candidate.cookie_mask) {
            return false;
        }
        self.references(out_port, out_group)
    }

    /// Check every group the instructions send packets to exists.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::UnknownGroup`] for the first group that does not resolve.
    pub fn validate(&self, groups: &dyn GroupResolver) -> Result<(), FlowError> {
        self.with_instructions_read(|set| {
            set.groups()
                .find(|group| !groups.has_group(*group))
                .map_or(Ok(()), |group| Err(FlowError::UnknownGroup(group)))
        })
    }

    /// Check a goto instruction, if any, points forward within a pipeline of
    /// `num_tables` tables.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::InvalidGoto`] if the target is not a later table.
    pub fn validate_goto(&self, from: TableId, num_tables: usize) -> Result<(), FlowError> {
        match self.with_instructions_read(InstructionSet::goto_table) {
            Some(to) if to <= from || usize::from(to.0) >= num_tables => {
                Err(FlowError::InvalidGoto { from, to })
            }
            _ => Ok(()),
        }
    }
}

impl Debug for FlowEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowEntry")
            .field("priority", &self.priority)
            .field("cookie", &self.cookie)
            .field("cookie_mask", &self.cookie_mask)
            .field("matches", &self.matches)
            .field("table", &self.table())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Display for FlowEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "priority={} ", self.priority)?;
        if self.cookie != 0 {
            write!(f, "cookie={:#x} ", self.cookie)?;
        }
        write!(
            f,
            "match={} actions={}",
            self.matches,
            *self.instructions.read().recover()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldId;
    use crate::instruction::{Action, Instruction};
    use crate::packet::PacketFields;
    use crate::removal::NoopNotifier;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    fn ip(addr: &str, len: u8) -> Match {
        Match::ipv4_src(addr.parse().unwrap(), len).unwrap()
    }

    fn entry(priority: u32, matches: &[Match]) -> FlowEntry {
        matches
            .iter()
            .try_fold(FlowEntry::new(false).with_priority(priority), |e, m| {
                e.with_match(*m)
            })
            .unwrap()
    }

    fn output(port: u32) -> InstructionSet {
        InstructionSet::new().with(Instruction::ApplyActions(vec![Action::Output(PortNo(port))]))
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(RemovalReason, u32)>>);

    impl RemovalNotifier for Recorder {
        fn flow_removed(&self, reason: RemovalReason, entry: &FlowEntry) {
            self.0.lock().unwrap().push((reason, entry.priority()));
        }
    }

    #[test]
    fn test_duplicate_field_is_rejected() {
        let mut e = entry(1, &[ip("10.0.0.0", 8)]);
        assert_eq!(
            e.add_match(ip("11.0.0.0", 8)),
            Err(FlowError::DuplicateField(FieldId::Ipv4Src))
        );
        assert_eq!(e.matches().len(), 1);
    }

    #[test]
    fn test_overlap_priority_and_cookie() {
        let a = entry(100, &[ip("10.0.0.0", 8)]);
        let b = entry(100, &[ip("10.1.0.0", 16)]);
        let c = entry(100, &[ip("11.0.0.0", 8)]);
        assert!(a.check_overlap(&b, true, false, PortNo::ANY, GroupId::ANY));
        assert!(b.check_overlap(&a, true, false, PortNo::ANY, GroupId::ANY));
        assert!(!a.check_overlap(&c, true, false, PortNo::ANY, GroupId::ANY));

        let lower = entry(99, &[ip("10.1.0.0", 16)]);
        assert!(!a.check_overlap(&lower, true, false, PortNo::ANY, GroupId::ANY));
        assert!(a.check_overlap(&lower, false, false, PortNo::ANY, GroupId::ANY));

        let a = a.with_cookie(0x10, 0);
        let b = b.with_cookie(0x20, 0xff);
        assert!(!a.check_overlap(&b, true, true, PortNo::ANY, GroupId::ANY));
        let b = b.with_cookie(0x10, 0xff);
        assert!(a.check_overlap(&b, true, true, PortNo::ANY, GroupId::ANY));
    }

    #[test]
    fn test_overlap_with_no_matches() {
        let any = entry(5, &[]);
        let some = entry(5, &[Match::exact(FieldId::TcpDst, 22).unwrap()]);
        assert!(any.check_overlap(&some, true, false, PortNo::ANY, GroupId::ANY));
        assert!(some.check_overlap(&any, true, false, PortNo::ANY, GroupId::ANY));
    }

    #[test]
    fn test_overlap_out_port_on_either_side() {
        let a = entry(1, &[]).with_instructions(output(3));
        let b = entry(1, &[]);
        assert!(a.check_overlap(&b, true, false, PortNo(3), GroupId::ANY));
        assert!(b.check_overlap(&a, true, false, PortNo(3), GroupId::ANY));
        assert!(!a.check_overlap(&b, true, false, PortNo(4), GroupId::ANY));
    }

    #[test]
    fn test_contained_is_asymmetric() {
        let host = entry(1, &[ip("10.0.0.1", 32), Match::exact(FieldId::TcpDst, 80).unwrap()]);
        let net = entry(7, &[ip("10.0.0.0", 8)]);
        assert!(host.check_contained(&net, false, false, PortNo::ANY, GroupId::ANY));
        assert!(!net.check_contained(&host, false, false, PortNo::ANY, GroupId::ANY));
        assert!(!host.check_contained(&net, true, false, PortNo::ANY, GroupId::ANY));
        let all = entry(0, &[]);
        assert!(host.check_contained(&all, false, false, PortNo::ANY, GroupId::ANY));

        let host = host.with_instructions(output(2));
        assert!(host.check_contained(&all, false, false, PortNo(2), GroupId::ANY));
        assert!(!host.check_contained(&all, false, false, PortNo(9), GroupId::ANY));
        assert!(!host.check_contained(&all, false, false, PortNo::ANY, GroupId(1)));
    }

    #[test]
    fn test_equal() {
        let a = entry(10, &[ip("10.0.0.0", 8)]);
        let b = entry(10, &[ip("10.0.0.0", 8)]).with_cookie(0xff, 0xff);
        assert!(a.check_equal(&b, false, PortNo::ANY, GroupId::ANY));
        assert!(!a.check_equal(&b, true, PortNo::ANY, GroupId::ANY));
        assert!(!a.check_equal(&entry(11, &[ip("10.0.0.0", 8)]), false, PortNo::ANY, GroupId::ANY));
        assert!(!a.check_equal(&entry(10, &[ip("10.0.0.0", 9)]), false, PortNo::ANY, GroupId::ANY));
        assert!(!a.check_equal(&entry(10, &[]), false, PortNo::ANY, GroupId::ANY));
    }

    #[test]
    fn test_update_replaces_instructions_only() {
        let e = entry(10, &[ip("10.0.0.0", 8)]).with_instructions(output(1));
        e.hit(100);
        e.update(entry(20, &[]).with_instructions(output(2)), false);
        assert_eq!(e.priority(), 10);
        assert_eq!(e.matches().len(), 1);
        assert_eq!(e.instructions(), output(2));
        assert_eq!(e.counters(), FlowCounters { packets: 1, bytes: 100 });
        e.update(entry(20, &[]), true);
        assert!(e.instructions().is_empty());
        assert_eq!(e.counters(), FlowCounters::default());
    }

    #[test]
    fn test_destroy_notifies_flagged_entries() {
        let recorder = Recorder::default();
        Arc::new(FlowEntry::new(true).with_priority(1)).destroy(RemovalReason::Delete, &recorder);
        Arc::new(FlowEntry::new(true).with_priority(2)).destroy(RemovalReason::NoReason, &recorder);
        Arc::new(FlowEntry::new(false).with_priority(3)).destroy(RemovalReason::Delete, &recorder);
        Arc::new(FlowEntry::new(false).with_priority(4)).destroy(RemovalReason::NoReason, &NoopNotifier);
        assert_eq!(*recorder.0.lock().unwrap(), vec![(RemovalReason::Delete, 1)]);
    }

    #[test]
    fn test_validate_groups_and_goto() {
        let groups: BTreeSet<GroupId> = [GroupId(1)].into_iter().collect();
        let e = entry(1, &[]).with_instructions(
            InstructionSet::new()
                .with(Instruction::WriteActions(vec![Action::Group(GroupId(1))]))
                .with(Instruction::GotoTable(TableId(2))),
        );
        assert_eq!(e.validate(&groups), Ok(()));
        assert_eq!(e.validate_goto(TableId(0), 3), Ok(()));
        assert_eq!(
            e.validate_goto(TableId(2), 3),
            Err(FlowError::InvalidGoto { from: TableId(2), to: TableId(2) })
        );
        assert!(e.validate_goto(TableId(0), 2).is_err());

        let dangling = entry(1, &[])
            .with_instructions(InstructionSet::new().with(Instruction::ApplyActions(vec![Action::Group(GroupId(5))])));
        assert_eq!(dangling.validate(&groups), Err(FlowError::UnknownGroup(GroupId(5))));
    }

    #[test]
    fn test_attach_once() {
        let e = entry(1, &[]);
        assert_eq!(e.table(), None);
        assert!(e.attach(TableId(3)));
        assert!(!e.attach(TableId(4)));
        assert_eq!(e.table(), Some(TableId(3)));
    }

    #[test]
    fn test_display_and_packet() {
        let e = entry(100, &[ip("192.168.0.0", 16), Match::exact(FieldId::TcpDst, 80).unwrap()])
            .with_instructions(output(1));
        assert_eq!(
            e.to_string(),
            "priority=100 match=ipv4_src=192.168.0.0/16,tcp_dst=0x50 actions=apply(output:1)"
        );
        let pkt = PacketFields::new()
            .with(FieldId::Ipv4Src, 0xc0a8_0101)
            .with(FieldId::TcpDst, 80);
        assert!(e.matches_packet(&pkt));
        assert!(!e.matches_packet(&pkt.clone().with(FieldId::TcpDst, 81)));
    }

    #[cfg(feature = "shuttle")]
    #[test]
    fn test_shuttle_update_while_counting() {
        shuttle::check_random(
            || {
                let e = Arc::new(entry(1, &[]).with_instructions(output(1)));
                let handles: Vec<_> = (0..2)
                    .map(|_| {
                        let e = e.clone();
                        concurrency::thread::spawn(move || {
                            for _ in 0..3 {
                                e.hit(10);
                                let set = e.instructions();
                                assert!(set == output(1) || set == output(2));
                            }
                        })
                    })
                    .collect();
                e.update(entry(1, &[]).with_instructions(output(2)), false);
                for handle in handles {
                    handle.join().unwrap();
                }
                assert_eq!(e.counters(), FlowCounters { packets: 6, bytes: 60 });
                assert_eq!(e.instructions(), output(2));
            },
            100,
        );
    }
}
