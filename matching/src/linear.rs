// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The loop matching algorithm: a single list of entries sorted by priority.

use crate::algorithm::{AlgorithmKind, MatchingAlgorithm, Strictness, TableChange};
use crate::errors::FlowModError;
use flow::{FlowEntry, GroupId, PacketView, PortNo};
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, error};

/// Entries sorted by descending priority, entries of equal priority in
/// installation order. Every operation is a scan of the list.
#[derive(Clone, Debug, Default)]
pub struct LoopAlgorithm {
    entries: Vec<Arc<FlowEntry>>,
}

impl LoopAlgorithm {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, entry: &Arc<FlowEntry>) -> Option<usize> {
        self.entries.iter().position(|e| Arc::ptr_eq(e, entry))
    }
}

impl MatchingAlgorithm for LoopAlgorithm {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::Loop
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn entries(&self) -> impl Iterator<Item = &Arc<FlowEntry>> {
        self.entries.iter()
    }

    fn add(
        &self,
        entry: &Arc<FlowEntry>,
        check_overlap: bool,
    ) -> Result<TableChange, FlowModError> {
        if check_overlap
            && let Some(other) = self
                .entries
                .iter()
                .find(|e| e.check_overlap(entry, true, true, PortNo::ANY, GroupId::ANY))
        {
            debug!("Flow entry {entry} overlaps with {other}");
            return Err(FlowModError::Overlap);
        }
        match self
            .entries
            .iter()
            .find(|e| e.check_equal(entry, false, PortNo::ANY, GroupId::ANY))
        {
            Some(old) => Ok(TableChange::Replace {
                old: old.clone(),
                new: entry.clone(),
            }),
            None => Ok(TableChange::Insert(entry.clone())),
        }
    }

    fn modify(
        &self,
        template: &FlowEntry,
        strictness: Strictness,
    ) -> Result<Vec<Arc<FlowEntry>>, FlowModError> {
        Ok(self
            .entries
            .iter()
            .filter(|e| strictness.selects(e, template, PortNo::ANY, GroupId::ANY))
            .cloned()
            .collect())
    }

    fn remove(
        &self,
        template: &FlowEntry,
        specific: Option<&Arc<FlowEntry>>,
        strictness: Strictness,
        out_port: PortNo,
        out_group: GroupId,
    ) -> Result<TableChange, FlowModError> {
        let victims = match specific {
            Some(entry) => self
                .position(entry)
                .map(|pos| vec![self.entries[pos].clone()])
                .unwrap_or_default(),
            None => self
                .entries
                .iter()
                .filter(|e| strictness.selects(e, template, out_port, out_group))
                .cloned()
                .collect(),
        };
        Ok(TableChange::Remove(victims))
    }

    fn apply(&mut self, change: &TableChange) {
        match change {
            TableChange::Insert(entry) => {
                let priority = entry.priority();
                let pos = self.entries.partition_point(|e| e.priority() >= priority);
                self.entries.insert(pos, entry.clone());
            }
            TableChange::Replace { old, new } => match self.position(old) {
                Some(pos) => self.entries[pos] = new.clone(),
                None => error!("Replaced flow entry {old} is not in the list"),
            },
            TableChange::Remove(victims) => self
                .entries
                .retain(|e| !victims.iter().any(|v| Arc::ptr_eq(e, v))),
            TableChange::Clear => self.entries.clear(),
        }
    }

    fn find_best_match<P: PacketView + ?Sized>(&self, packet: &P) -> Option<&Arc<FlowEntry>> {
        self.entries.iter().find(|e| e.matches_packet(packet))
    }
}

impl Display for LoopAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Loop ({} entries):", self.entries.len())?;
        for entry in &self.entries {
            writeln!(f, "  {entry}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow::{Action, FieldId, Instruction, InstructionSet, Match, PacketFields};

    fn entry(priority: u32, matches: &[Match]) -> Arc<FlowEntry> {
        let entry = matches
            .iter()
            .try_fold(FlowEntry::new(false).with_priority(priority), |e, m| {
                e.with_match(*m)
            })
            .unwrap();
        Arc::new(entry)
    }

    fn install(list: &mut LoopAlgorithm, entry: &Arc<FlowEntry>) -> Result<(), FlowModError> {
        let change = list.add(entry, true)?;
        list.apply(&change);
        Ok(())
    }

    fn priorities(list: &LoopAlgorithm) -> Vec<u32> {
        list.entries().map(|e| e.priority()).collect()
    }

    #[test]
    fn test_priority_order_and_overlap() {
        let mut list = LoopAlgorithm::new();
        install(&mut list, &entry(100, &[])).unwrap();
        assert_eq!(install(&mut list, &entry(100, &[])), Err(FlowModError::Overlap));
        install(&mut list, &entry(99, &[])).unwrap();
        install(&mut list, &entry(110, &[])).unwrap();
        install(&mut list, &entry(107, &[])).unwrap();
        assert_eq!(priorities(&list), vec![110, 107, 100, 99]);
    }

    #[test]
    fn test_lookup_scans_in_priority_order() {
        let mut list = LoopAlgorithm::new();
        let net = entry(10, &[Match::ipv4_dst("10.0.0.0".parse().unwrap(), 8).unwrap()]);
        let host = entry(20, &[Match::ipv4_dst("10.0.0.1".parse().unwrap(), 32).unwrap()]);
        install(&mut list, &net).unwrap();
        install(&mut list, &host).unwrap();
        let pkt = PacketFields::new().with(FieldId::Ipv4Dst, 0x0a00_0001);
        assert!(Arc::ptr_eq(list.find_best_match(&pkt).unwrap(), &host));
        let pkt = PacketFields::new().with(FieldId::Ipv4Dst, 0x0a00_0002);
        assert!(Arc::ptr_eq(list.find_best_match(&pkt).unwrap(), &net));
        let pkt = PacketFields::new().with(FieldId::Ipv4Dst, 0x0b00_0001);
        assert!(list.find_best_match(&pkt).is_none());
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut list = LoopAlgorithm::new();
        let tcp = Match::exact(FieldId::TcpDst, 22).unwrap();
        let first = entry(5, &[tcp]);
        install(&mut list, &first).unwrap();
        install(&mut list, &entry(5, &[Match::exact(FieldId::TcpDst, 23).unwrap()])).unwrap();
        let second = entry(5, &[tcp]);
        let change = list.add(&second, false).unwrap();
        assert!(matches!(&change, TableChange::Replace { old, .. } if Arc::ptr_eq(old, &first)));
        list.apply(&change);
        assert_eq!(list.len(), 2);
        assert!(Arc::ptr_eq(list.entries().next().unwrap(), &second));
    }

    #[test]
    fn test_modify_and_remove_selection() {
        let mut list = LoopAlgorithm::new();
        let a = entry(1, &[Match::exact(FieldId::TcpDst, 80).unwrap()]);
        let b = entry(2, &[Match::exact(FieldId::TcpDst, 80).unwrap(), Match::exact(FieldId::IpProto, 6).unwrap()]);
        let c = entry(3, &[Match::exact(FieldId::UdpDst, 53).unwrap()]);
        for e in [&a, &b, &c] {
            install(&mut list, e).unwrap();
        }
        let web = FlowEntry::new(false)
            .with_priority(1)
            .with_match(Match::exact(FieldId::TcpDst, 80).unwrap())
            .unwrap();
        assert_eq!(list.modify(&web, Strictness::NonStrict).unwrap().len(), 2);
        assert_eq!(list.modify(&web, Strictness::Strict).unwrap().len(), 1);

        a.replace_instructions(
            InstructionSet::new().with(Instruction::WriteActions(vec![Action::Output(PortNo(7))])),
            false,
        );
        let change = list
            .remove(&web, None, Strictness::NonStrict, PortNo(7), GroupId::ANY)
            .unwrap();
        assert_eq!(change.evicted().len(), 1);
        list.apply(&change);
        assert_eq!(priorities(&list), vec![3, 2]);

        let change = list
            .remove(&FlowEntry::new(false), Some(&c), Strictness::NonStrict, PortNo::ANY, GroupId::ANY)
            .unwrap();
        list.apply(&change);
        assert_eq!(priorities(&list), vec![2]);

        let change = list
            .remove(&FlowEntry::new(false), Some(&c), Strictness::NonStrict, PortNo::ANY, GroupId::ANY)
            .unwrap();
        assert!(change.evicted().is_empty());
        list.apply(&TableChange::Clear);
        assert!(list.is_empty());
    }
}
