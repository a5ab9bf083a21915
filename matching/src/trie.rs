// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The trie matching algorithm.
//!
//! Entries are indexed by the successive prefixes of their matches. Each node
//! of the trie holds a [`Match`] (its prefix) and possibly the entries whose
//! matches end there. The `inner` chain of a node holds nodes whose prefixes
//! are only worth testing once the node's prefix matched: more specific
//! prefixes of the same field, or prefixes of the fields that come next. The
//! `next` chain links alternatives. Every node caches the highest priority
//! found at the node or below it, which lets lookups skip whole subtrees that
//! cannot beat the best entry found so far.
//!
//! Nodes live in an arena and are referred to by index. This variant of the
//! trie only grows: entries can be added and overwritten, not removed.

use crate::algorithm::{AlgorithmKind, MatchingAlgorithm, Strictness, TableChange};
use crate::errors::FlowModError;
use flow::{FlowEntry, GroupId, Match, MatchSet, PacketView, PortNo};
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, error};

/// Index of a node in the arena of a [`Trie`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Debug)]
struct Leaf {
    prefix: Match,
    /// Descending priority, installation order among equal priorities.
    entries: Vec<Arc<FlowEntry>>,
    inner: Option<NodeId>,
    next: Option<NodeId>,
    /// The node owning the chain this node is part of.
    parent: Option<NodeId>,
    /// Highest priority of the entries at this node or anywhere below it.
    inner_max_priority: Option<u32>,
}

impl Leaf {
    fn new(prefix: Match, parent: Option<NodeId>) -> Self {
        Self {
            prefix,
            entries: Vec::new(),
            inner: None,
            next: None,
            parent,
            inner_max_priority: None,
        }
    }
}

/// Where a node hangs from.
#[derive(Clone, Copy, Debug)]
enum Link {
    Root,
    Inner(NodeId),
    Next(NodeId),
}

/// Where an entry is stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
    /// The list of entries without matches.
    Root,
    Node(NodeId),
}

/// Insert `entry` in a list sorted by descending priority, after the entries
/// of the same priority.
fn insert_sorted(entries: &mut Vec<Arc<FlowEntry>>, entry: Arc<FlowEntry>) {
    let priority = entry.priority();
    let pos = entries.partition_point(|e| e.priority() >= priority);
    entries.insert(pos, entry);
}

fn sorted(entries: &[Arc<FlowEntry>]) -> bool {
    entries
        .windows(2)
        .all(|pair| pair[0].priority() >= pair[1].priority())
}

/// A patricia-style trie of match prefixes.
#[derive(Clone, Debug, Default)]
pub struct Trie {
    nodes: Vec<Leaf>,
    root: Option<NodeId>,
    /// Entries with no match at all, sorted like the entries of a node.
    root_entries: Vec<Arc<FlowEntry>>,
    len: usize,
}

impl Trie {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes.
    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    fn leaf(&self, id: NodeId) -> &Leaf {
        &self.nodes[id.index()]
    }

    fn leaf_mut(&mut self, id: NodeId) -> &mut Leaf {
        &mut self.nodes[id.index()]
    }

    fn push(&mut self, leaf: Leaf) -> NodeId {
        // the arena never outgrows u32: adds are refused before it would
        #[allow(clippy::cast_possible_truncation)]
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(leaf);
        id
    }

    fn follow(&self, link: Link) -> Option<NodeId> {
        match link {
            Link::Root => self.root,
            Link::Inner(id) => self.leaf(id).inner,
            Link::Next(id) => self.leaf(id).next,
        }
    }

    fn set_link(&mut self, link: Link, target: NodeId) {
        match link {
            Link::Root => self.root = Some(target),
            Link::Inner(id) => self.leaf_mut(id).inner = Some(target),
            Link::Next(id) => self.leaf_mut(id).next = Some(target),
        }
    }

    /// The node following `id` in a depth-first walk, descending into the
    /// inner chain of `id` only if `descend`.
    fn successor(&self, id: NodeId, descend: bool) -> Option<NodeId> {
        if descend && let Some(inner) = self.leaf(id).inner {
            return Some(inner);
        }
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let leaf = self.leaf(current);
            if leaf.next.is_some() {
                return leaf.next;
            }
            cursor = leaf.parent;
        }
        None
    }

    /// Raise the cached priority of `id` and of the nodes above it to `priority`,
    /// up to the first one that already reports as much.
    fn propagate(&mut self, id: NodeId, priority: u32) {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let leaf = self.leaf_mut(current);
            if leaf.inner_max_priority.is_some_and(|max| max >= priority) {
                break;
            }
            leaf.inner_max_priority = Some(priority);
            cursor = leaf.parent;
        }
    }

    /// Put a new node with prefix `prefix` where `node` is, and make `node` the
    /// only member of its inner chain.
    fn adopt(&mut self, link: Link, node: NodeId, prefix: Match) -> NodeId {
        let old = self.leaf(node);
        let mut leaf = Leaf::new(prefix, old.parent);
        leaf.next = old.next;
        leaf.inner = Some(node);
        leaf.inner_max_priority = old.inner_max_priority;
        let id = self.push(leaf);
        let old = self.leaf_mut(node);
        old.next = None;
        old.parent = Some(id);
        self.set_link(link, id);
        id
    }

    /// Build one node per match, each in the inner chain of the previous one,
    /// and store `entry` at the last. Returns the first node.
    fn create_new_branch(
        &mut self,
        matches: &[Match],
        entry: &Arc<FlowEntry>,
        parent: Option<NodeId>,
    ) -> Option<NodeId> {
        let mut head = None;
        let mut tail: Option<NodeId> = None;
        for m in matches {
            let id = self.push(Leaf::new(*m, tail.or(parent)));
            match tail {
                Some(prev) => self.leaf_mut(prev).inner = Some(id),
                None => head = Some(id),
            }
            tail = Some(id);
        }
        if let Some(tail) = tail {
            self.leaf_mut(tail).entries.push(entry.clone());
            self.propagate(tail, entry.priority());
        }
        head
    }

    /// Index a new entry.
    fn insert(&mut self, entry: &Arc<FlowEntry>) {
        let matches = entry.matches().as_slice();
        if matches.is_empty() {
            insert_sorted(&mut self.root_entries, entry.clone());
            self.len += 1;
            return;
        }
        let mut idx = 0;
        let mut parent = None;
        let mut link = Link::Root;
        loop {
            let candidate = matches[idx];
            let Some(node) = self.follow(link) else {
                // end of the chain: hang the rest of the matches there
                if let Some(branch) = self.create_new_branch(&matches[idx..], entry, parent) {
                    self.set_link(link, branch);
                }
                break;
            };
            let prefix = self.leaf(node).prefix;
            // alike() only keeps a leading run of bits: compare first so that
            // nodes with non-contiguous masks are reused too
            let common = if prefix == candidate {
                prefix
            } else {
                match prefix.alike(&candidate) {
                    Some(common) if !common.is_wildcard() => common,
                    _ => {
                        link = Link::Next(node);
                        continue;
                    }
                }
            };
            if common == prefix && common == candidate {
                idx += 1;
                if idx == matches.len() {
                    insert_sorted(&mut self.leaf_mut(node).entries, entry.clone());
                    self.propagate(node, entry.priority());
                    break;
                }
                parent = Some(node);
                link = Link::Inner(node);
            } else if common == prefix {
                // the node is wider: look for the candidate below it
                parent = Some(node);
                link = Link::Inner(node);
            } else if common == candidate {
                // the candidate is wider: it takes the place of the node
                let id = self.adopt(link, node, candidate);
                idx += 1;
                if idx == matches.len() {
                    self.leaf_mut(id).entries.push(entry.clone());
                    self.propagate(id, entry.priority());
                    break;
                }
                parent = Some(id);
                link = Link::Inner(id);
            } else {
                // split: the common prefix takes the place of the node, with
                // the node and a new branch for the candidate below it
                let id = self.adopt(link, node, common);
                if let Some(branch) = self.create_new_branch(&matches[idx..], entry, Some(id)) {
                    self.leaf_mut(node).next = Some(branch);
                }
                break;
            }
        }
        self.len += 1;
    }

    /// Walk the entries that may relate to `matches`, see [`WalkMode`].
    #[must_use]
    pub fn walk<'a>(&'a self, matches: &'a MatchSet, mode: WalkMode) -> TrieWalk<'a> {
        TrieWalk {
            trie: self,
            matches,
            mode,
            slot: Some(Slot::Root),
            pos: 0,
        }
    }

    /// Find where an installed entry is stored.
    fn locate(&self, entry: &Arc<FlowEntry>) -> Option<(Slot, usize)> {
        let mut walk = self.walk(entry.matches(), WalkMode::Exact);
        while let Some((slot, pos, found)) = walk.advance() {
            if Arc::ptr_eq(found, entry) {
                return Some((slot, pos));
            }
        }
        None
    }

    fn replace(&mut self, old: &Arc<FlowEntry>, new: &Arc<FlowEntry>) {
        let stored = match self.locate(old) {
            Some((Slot::Root, pos)) => &mut self.root_entries[pos],
            Some((Slot::Node(id), pos)) => &mut self.leaf_mut(id).entries[pos],
            None => {
                error!("Replaced flow entry {old} is not in the trie");
                return;
            }
        };
        *stored = new.clone();
    }

    fn unsupported(&self, operation: &'static str) -> FlowModError {
        debug!("The trie does not support {operation}");
        FlowModError::Unsupported {
            algorithm: self.kind(),
            operation,
        }
    }

    fn best_in_chain<'a, P: PacketView + ?Sized>(
        &'a self,
        mut cursor: Option<NodeId>,
        packet: &P,
        best: &mut Option<&'a Arc<FlowEntry>>,
    ) {
        while let Some(id) = cursor {
            let leaf = self.leaf(id);
            let bound = best.map(|entry| entry.priority());
            let promising = match (leaf.inner_max_priority, bound) {
                (Some(max), Some(bound)) => max > bound,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if promising && leaf.prefix.matches_packet(packet) {
                if let Some(head) = leaf.entries.first()
                    && bound.is_none_or(|bound| head.priority() > bound)
                {
                    *best = Some(head);
                }
                self.best_in_chain(leaf.inner, packet, best);
            }
            cursor = leaf.next;
        }
    }

    /// Verify the structure of the trie: chain ownership, cached priorities,
    /// entry ordering and that the entries stored at a node have exactly the
    /// matches of the path leading to it.
    ///
    /// # Errors
    ///
    /// Returns a description of the first inconsistency found.
    pub fn check_invariants(&self) -> Result<(), String> {
        if !sorted(&self.root_entries) || self.root_entries.iter().any(|e| !e.matches().is_empty()) {
            return Err("malformed list of entries without matches".to_string());
        }
        let mut count = self.root_entries.len();
        let mut reached = 0;
        let mut path: Vec<Match> = Vec::new();
        self.check_chain(self.root, None, &mut path, &mut count, &mut reached)?;
        if reached != self.nodes.len() {
            return Err(format!("{} nodes unreachable", self.nodes.len() - reached));
        }
        if count != self.len {
            return Err(format!("{count} entries stored, {} accounted", self.len));
        }
        Ok(())
    }

    /// Check a chain and return the highest cached priority of its members.
    fn check_chain(
        &self,
        head: Option<NodeId>,
        owner: Option<NodeId>,
        path: &mut Vec<Match>,
        count: &mut usize,
        reached: &mut usize,
    ) -> Result<Option<u32>, String> {
        let mut max = None;
        let mut cursor = head;
        while let Some(id) = cursor {
            let leaf = self.leaf(id);
            *reached += 1;
            if *reached > self.nodes.len() {
                return Err("cycle between nodes".to_string());
            }
            if leaf.parent != owner {
                return Err(format!("node {} has parent {:?}, not {owner:?}", leaf.prefix, leaf.parent));
            }
            path.push(leaf.prefix);
            let below = self.check_chain(leaf.inner, Some(id), path, count, reached)?;
            let here = leaf.entries.first().map(|e| e.priority());
            if !sorted(&leaf.entries) {
                return Err(format!("entries of node {} are not sorted", leaf.prefix));
            }
            for entry in &leaf.entries {
                let fields_on_path = entry
                    .matches()
                    .iter()
                    .all(|m| path.contains(m));
                let implied = path
                    .iter()
                    .all(|p| entry.matches().get(p.field()).is_some_and(|m| m.is_submatch(p)));
                if !fields_on_path || !implied {
                    return Err(format!("entry {entry} does not belong under node {}", leaf.prefix));
                }
            }
            *count += leaf.entries.len();
            path.pop();
            let expected = here.max(below);
            if leaf.inner_max_priority != expected {
                return Err(format!(
                    "node {} caches priority {:?}, expected {expected:?}",
                    leaf.prefix, leaf.inner_max_priority
                ));
            }
            max = max.max(expected);
            cursor = leaf.next;
        }
        Ok(max)
    }

    fn fmt_chain(
        &self,
        f: &mut std::fmt::Formatter<'_>,
        head: Option<NodeId>,
        depth: usize,
    ) -> std::fmt::Result {
        let mut cursor = head;
        while let Some(id) = cursor {
            let leaf = self.leaf(id);
            let indent = 2 * depth;
            write!(f, "{:indent$}{}", "", leaf.prefix)?;
            if let Some(max) = leaf.inner_max_priority {
                write!(f, " (max priority {max})")?;
            }
            writeln!(f)?;
            for entry in &leaf.entries {
                writeln!(f, "{:indent$}  -> {entry}", "")?;
            }
            self.fmt_chain(f, leaf.inner, depth + 1)?;
            cursor = leaf.next;
        }
        Ok(())
    }
}

impl MatchingAlgorithm for Trie {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::Trie
    }

    fn len(&self) -> usize {
        self.len
    }

    fn entries(&self) -> impl Iterator<Item = &Arc<FlowEntry>> {
        self.root_entries
            .iter()
            .chain(self.nodes.iter().flat_map(|leaf| leaf.entries.iter()))
    }

    fn add(
        &self,
        entry: &Arc<FlowEntry>,
        check_overlap: bool,
    ) -> Result<TableChange, FlowModError> {
        if check_overlap
            && let Some(other) = self
                .walk(entry.matches(), WalkMode::Overlap)
                .find(|e| e.check_overlap(entry, true, true, PortNo::ANY, GroupId::ANY))
        {
            debug!("Flow entry {entry} overlaps with {other}");
            return Err(FlowModError::Overlap);
        }
        if let Some(old) = self
            .walk(entry.matches(), WalkMode::Exact)
            .find(|e| e.check_equal(entry, false, PortNo::ANY, GroupId::ANY))
        {
            debug!("Flow entry {old} will be replaced by {entry}");
            return Ok(TableChange::Replace {
                old: old.clone(),
                new: entry.clone(),
            });
        }
        // a split adds two nodes for the field, then one per remaining field
        if self.nodes.len() + entry.matches().len() + 1 > u32::MAX as usize {
            return Err(FlowModError::Internal("trie node arena is full"));
        }
        Ok(TableChange::Insert(entry.clone()))
    }

    fn supports_removal(&self) -> bool {
        false
    }

    fn modify(
        &self,
        _template: &FlowEntry,
        _strictness: Strictness,
    ) -> Result<Vec<Arc<FlowEntry>>, FlowModError> {
        Err(self.unsupported("modify"))
    }

    fn remove(
        &self,
        _template: &FlowEntry,
        _specific: Option<&Arc<FlowEntry>>,
        _strictness: Strictness,
        _out_port: PortNo,
        _out_group: GroupId,
    ) -> Result<TableChange, FlowModError> {
        Err(self.unsupported("remove"))
    }

    fn apply(&mut self, change: &TableChange) {
        match change {
            TableChange::Insert(entry) => self.insert(entry),
            TableChange::Replace { old, new } => self.replace(old, new),
            TableChange::Remove(victims) => {
                if !victims.is_empty() {
                    error!("The trie cannot remove {} flow entries", victims.len());
                }
            }
            TableChange::Clear => *self = Trie::new(),
        }
    }

    fn find_best_match<P: PacketView + ?Sized>(&self, packet: &P) -> Option<&Arc<FlowEntry>> {
        let mut best = self.root_entries.first();
        self.best_in_chain(self.root, packet, &mut best);
        best
    }
}

impl Display for Trie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Trie ({} entries, {} nodes):", self.len, self.nodes.len())?;
        for entry in &self.root_entries {
            writeln!(f, "  -> {entry}")?;
        }
        self.fmt_chain(f, self.root, 1)
    }
}

/// Which nodes a [`TrieWalk`] visits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WalkMode {
    /// Nodes whose prefix some packet matching the walked matches could
    /// satisfy. Visits every entry that may overlap with them.
    Overlap,
    /// Nodes whose prefix is implied by the walked matches. Visits every
    /// entry with the same matches.
    Exact,
}

/// A resumable depth-first walk of a trie, yielding the entries stored at the
/// nodes the mode selects. A node's inner chain is only visited if the node is.
///
/// The walk yields candidates: callers still compare each entry with what
/// they are looking for.
pub struct TrieWalk<'a> {
    trie: &'a Trie,
    matches: &'a MatchSet,
    mode: WalkMode,
    slot: Option<Slot>,
    pos: usize,
}

impl<'a> TrieWalk<'a> {
    fn selects(&self, prefix: &Match) -> bool {
        let own = self.matches.get(prefix.field());
        match self.mode {
            WalkMode::Overlap => own.is_none_or(|m| m.intersects(prefix)),
            WalkMode::Exact => own.is_some_and(|m| m.is_submatch(prefix)),
        }
    }

    /// Move to the next entry, returning where it is stored.
    fn advance(&mut self) -> Option<(Slot, usize, &'a Arc<FlowEntry>)> {
        loop {
            let slot = self.slot?;
            let (entries, selected, next) = match slot {
                Slot::Root => {
                    let selected =
                        self.mode == WalkMode::Overlap || self.matches.is_empty();
                    (&self.trie.root_entries, selected, self.trie.root)
                }
                Slot::Node(id) => {
                    let leaf = self.trie.leaf(id);
                    let selected = self.selects(&leaf.prefix);
                    (&leaf.entries, selected, self.trie.successor(id, selected))
                }
            };
            if selected && let Some(entry) = entries.get(self.pos) {
                let pos = self.pos;
                self.pos += 1;
                return Some((slot, pos, entry));
            }
            self.slot = next.map(Slot::Node);
            self.pos = 0;
        }
    }
}

impl<'a> Iterator for TrieWalk<'a> {
    type Item = &'a Arc<FlowEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.advance().map(|(_, _, entry)| entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linear::LoopAlgorithm;
    use flow::{FieldId, PacketFields};
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    fn ip(addr: &str, len: u8) -> Match {
        Match::ipv4_src(addr.parse().unwrap(), len).unwrap()
    }

    fn entry(priority: u32, matches: &[Match]) -> Arc<FlowEntry> {
        let entry = matches
            .iter()
            .try_fold(FlowEntry::new(false).with_priority(priority), |e, m| {
                e.with_match(*m)
            })
            .unwrap();
        Arc::new(entry)
    }

    fn install<A: MatchingAlgorithm>(
        algorithm: &mut A,
        entry: &Arc<FlowEntry>,
        check_overlap: bool,
    ) -> Result<(), FlowModError> {
        let change = algorithm.add(entry, check_overlap)?;
        algorithm.apply(&change);
        Ok(())
    }

    fn best(trie: &Trie, packet: &PacketFields) -> Option<u32> {
        trie.find_best_match(packet).map(|e| e.priority())
    }

    #[test]
    fn test_entries_without_matches_are_sorted() {
        let mut trie = Trie::new();
        install(&mut trie, &entry(100, &[]), true).unwrap();
        assert_eq!(trie.len(), 1);
        assert_eq!(install(&mut trie, &entry(100, &[]), true), Err(FlowModError::Overlap));
        assert_eq!(trie.len(), 1);
        install(&mut trie, &entry(99, &[]), false).unwrap();
        install(&mut trie, &entry(110, &[]), false).unwrap();
        install(&mut trie, &entry(107, &[]), false).unwrap();
        let priorities: Vec<u32> = trie.root_entries.iter().map(|e| e.priority()).collect();
        assert_eq!(priorities, vec![110, 107, 100, 99]);
        assert_eq!(trie.len(), 4);
        assert_eq!(best(&trie, &PacketFields::new()), Some(110));
        trie.check_invariants().unwrap();
    }

    #[test]
    fn test_split_on_common_prefix() {
        let mut trie = Trie::new();
        install(&mut trie, &entry(999, &[ip("192.168.0.1", 32)]), true).unwrap();
        install(&mut trie, &entry(1999, &[ip("192.168.0.2", 32)]), true).unwrap();
        trie.check_invariants().unwrap();

        let root = trie.leaf(trie.root.unwrap());
        assert_eq!(root.prefix, ip("192.168.0.0", 30));
        assert_eq!(root.inner_max_priority, Some(1999));
        assert!(root.entries.is_empty());
        assert!(root.next.is_none());
        let first = trie.leaf(root.inner.unwrap());
        let second = trie.leaf(first.next.unwrap());
        assert_eq!(first.prefix, ip("192.168.0.1", 32));
        assert_eq!(first.entries[0].priority(), 999);
        assert_eq!(second.prefix, ip("192.168.0.2", 32));
        assert_eq!(second.entries[0].priority(), 1999);
        assert!(second.next.is_none());

        let packet = |addr: u32| PacketFields::new().with(FieldId::Ipv4Src, u128::from(addr));
        assert_eq!(best(&trie, &packet(0xc0a8_0001)), Some(999));
        assert_eq!(best(&trie, &packet(0xc0a8_0002)), Some(1999));
        assert_eq!(best(&trie, &packet(0xc0a8_0003)), None);
        assert_eq!(best(&trie, &PacketFields::new()), None);
    }

    #[test]
    fn test_identical_sparse_matches_share_a_node() {
        let mut trie = Trie::new();
        let sparse = Match::new(FieldId::Ipv4Src, 0x0a00_0100, 0xff00_ff00).unwrap();
        let low = Match::new(FieldId::Ipv4Src, 0x0001_0001, 0x00ff_00ff).unwrap();
        for priority in 1..=4 {
            install(&mut trie, &entry(priority, &[sparse]), false).unwrap();
        }
        assert_eq!(trie.num_nodes(), 1);
        let root = trie.leaf(trie.root.unwrap());
        let priorities: Vec<u32> = root.entries.iter().map(|e| e.priority()).collect();
        assert_eq!(priorities, vec![4, 3, 2, 1]);

        // no leading bit in common with anything: reused as well
        install(&mut trie, &entry(7, &[low]), false).unwrap();
        install(&mut trie, &entry(8, &[low]), false).unwrap();
        assert_eq!(trie.num_nodes(), 2);
        trie.check_invariants().unwrap();
        assert_eq!(trie.len(), 6);

        let packet = |addr: u32| PacketFields::new().with(FieldId::Ipv4Src, u128::from(addr));
        assert_eq!(best(&trie, &packet(0x0a7f_01ff)), Some(4));
        assert_eq!(best(&trie, &packet(0x0b01_0001)), Some(8));
        assert_eq!(best(&trie, &packet(0x0b7f_0101)), None);
    }

    #[test]
    fn test_wider_and_narrower_prefixes() {
        let mut trie = Trie::new();
        install(&mut trie, &entry(10, &[ip("10.1.0.0", 16)]), true).unwrap();
        // wider than the root: takes its place
        install(&mut trie, &entry(5, &[ip("10.0.0.0", 8)]), true).unwrap();
        // narrower than both: lands below them
        install(&mut trie, &entry(20, &[ip("10.1.2.0", 24)]), true).unwrap();
        // unrelated: sibling of the root
        install(&mut trie, &entry(1, &[ip("172.16.0.0", 12)]), true).unwrap();
        trie.check_invariants().unwrap();
        assert_eq!(trie.len(), 4);
        assert_eq!(trie.num_nodes(), 4);

        let root = trie.leaf(trie.root.unwrap());
        assert_eq!(root.prefix, ip("10.0.0.0", 8));
        assert_eq!(root.inner_max_priority, Some(20));
        let packet = |addr: u32| PacketFields::new().with(FieldId::Ipv4Src, u128::from(addr));
        assert_eq!(best(&trie, &packet(0x0a01_0203)), Some(20));
        assert_eq!(best(&trie, &packet(0x0a01_0303)), Some(10));
        assert_eq!(best(&trie, &packet(0x0a02_0000)), Some(5));
        assert_eq!(best(&trie, &packet(0xac10_0001)), Some(1));
        assert_eq!(best(&trie, &packet(0x0b00_0000)), None);
    }

    #[test]
    fn test_multiple_fields() {
        let mut trie = Trie::new();
        let ssh = Match::exact(FieldId::TcpDst, 22).unwrap();
        let web = Match::exact(FieldId::TcpDst, 80).unwrap();
        install(&mut trie, &entry(10, &[ip("10.0.0.0", 8), ssh]), true).unwrap();
        install(&mut trie, &entry(10, &[ip("10.0.0.0", 8), web]), true).unwrap();
        install(&mut trie, &entry(30, &[web]), true).unwrap();
        install(&mut trie, &entry(20, &[ip("10.0.0.0", 8)]), true).unwrap();
        install(&mut trie, &entry(0, &[]), true).unwrap();
        trie.check_invariants().unwrap();
        assert_eq!(trie.len(), 5);

        let packet = |addr: u32, port: u128| {
            PacketFields::new()
                .with(FieldId::Ipv4Src, u128::from(addr))
                .with(FieldId::TcpDst, port)
        };
        assert_eq!(best(&trie, &packet(0x0a00_0001, 22)), Some(20));
        assert_eq!(best(&trie, &packet(0x0a00_0001, 80)), Some(30));
        assert_eq!(best(&trie, &packet(0x0b00_0001, 22)), Some(0));
        assert_eq!(best(&trie, &PacketFields::new().with(FieldId::Ipv4Src, 0x0a00_0001)), Some(20));
    }

    #[test]
    fn test_higher_priority_wins() {
        let mut trie = Trie::new();
        install(&mut trie, &entry(100, &[ip("10.0.0.0", 8)]), true).unwrap();
        install(&mut trie, &entry(50, &[ip("10.0.0.1", 32)]), true).unwrap();
        let packet = PacketFields::new().with(FieldId::Ipv4Src, 0x0a00_0001);
        assert_eq!(best(&trie, &packet), Some(100));
    }

    #[test]
    fn test_overlap_walk() {
        let mut trie = Trie::new();
        install(&mut trie, &entry(100, &[ip("10.0.0.0", 8)]), true).unwrap();
        install(&mut trie, &entry(100, &[ip("192.168.0.0", 16)]), true).unwrap();
        assert_eq!(
            install(&mut trie, &entry(100, &[ip("10.2.0.0", 16)]), true),
            Err(FlowModError::Overlap)
        );
        assert_eq!(
            install(&mut trie, &entry(100, &[Match::exact(FieldId::TcpDst, 80).unwrap()]), true),
            Err(FlowModError::Overlap)
        );
        install(&mut trie, &entry(100, &[ip("11.0.0.0", 8)]), true).unwrap();
        install(&mut trie, &entry(101, &[ip("10.2.0.0", 16)]), true).unwrap();
        assert_eq!(trie.len(), 4);

        let query = MatchSet::from_matches([ip("10.0.0.0", 7)]).unwrap();
        let found: Vec<u32> = trie
            .walk(&query, WalkMode::Overlap)
            .map(|e| e.priority())
            .collect();
        assert_eq!(found, vec![100, 101, 100]);
        trie.check_invariants().unwrap();
    }

    #[test]
    fn test_replace_in_place() {
        let mut trie = Trie::new();
        let tcp = Match::exact(FieldId::TcpDst, 443).unwrap();
        let old = entry(7, &[ip("10.0.0.0", 8), tcp]);
        install(&mut trie, &old, true).unwrap();
        install(&mut trie, &entry(8, &[ip("10.0.0.0", 16), tcp]), true).unwrap();
        let new = entry(7, &[ip("10.0.0.0", 8), tcp]);
        let change = trie.add(&new, false).unwrap();
        assert!(matches!(&change, TableChange::Replace { old: o, .. } if Arc::ptr_eq(o, &old)));
        trie.apply(&change);
        assert_eq!(trie.len(), 2);
        assert!(trie.entries().any(|e| Arc::ptr_eq(e, &new)));
        assert!(!trie.entries().any(|e| Arc::ptr_eq(e, &old)));
        trie.check_invariants().unwrap();
    }

    #[test]
    #[traced_test]
    fn test_remove_and_modify_are_unsupported() {
        let trie = Trie::new();
        let template = FlowEntry::new(false);
        let expected = FlowModError::Unsupported {
            algorithm: AlgorithmKind::Trie,
            operation: "remove",
        };
        assert_eq!(
            trie.remove(&template, None, Strictness::NonStrict, PortNo::ANY, GroupId::ANY)
                .unwrap_err(),
            expected
        );
        assert!(trie.modify(&template, Strictness::Strict).is_err());
    }

    #[test]
    fn test_stats_and_groups() {
        use flow::{Action, Instruction, InstructionSet};
        let mut trie = Trie::new();
        let grouped = Arc::new(
            FlowEntry::new(false)
                .with_priority(3)
                .with_match(ip("10.0.0.0", 8))
                .unwrap()
                .with_instructions(
                    InstructionSet::new()
                        .with(Instruction::ApplyActions(vec![Action::Group(GroupId(4))])),
                ),
        );
        install(&mut trie, &grouped, true).unwrap();
        install(&mut trie, &entry(2, &[ip("11.0.0.0", 8)]), true).unwrap();
        grouped.hit(100);
        grouped.hit(50);

        let users = trie.find_entries_using_group(GroupId(4));
        assert_eq!(users.len(), 1);
        assert!(Arc::ptr_eq(&users[0], &grouped));

        let all = crate::algorithm::FlowStatsQuery::all();
        let aggregate = trie.aggregate_stats(&all).unwrap();
        assert_eq!((aggregate.flows, aggregate.packets, aggregate.bytes), (2, 2, 150));
        let wide = FlowEntry::new(false).with_match(ip("10.0.0.0", 8)).unwrap();
        let replies = trie
            .flow_stats(&crate::algorithm::FlowStatsQuery::new(wide))
            .unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].counters.bytes, 150);
    }

    #[test]
    fn test_dump() {
        let mut trie = Trie::new();
        install(&mut trie, &entry(999, &[ip("192.168.0.1", 32)]), true).unwrap();
        install(&mut trie, &entry(1999, &[ip("192.168.0.2", 32)]), true).unwrap();
        let dump = trie.to_string();
        assert!(dump.starts_with("Trie (2 entries, 3 nodes):"));
        assert!(dump.contains("  ipv4_src=192.168.0.0/30 (max priority 1999)\n"));
        assert!(dump.contains("    ipv4_src=192.168.0.2/32 (max priority 1999)\n"));
        assert!(dump.contains("      -> priority=999 match=ipv4_src=192.168.0.1/32 actions=drop\n"));
        trie.apply(&TableChange::Clear);
        assert!(trie.is_empty());
        assert_eq!(trie.num_nodes(), 0);
    }

    /// A random entry over a small space of fields and values, so that
    /// entries share prefixes and overlap often.
    fn random_entry(seed: &(u8, u8, u8, u8, u8)) -> Arc<FlowEntry> {
        let (fields, dst, dst_len, port, priority) = *seed;
        let mut entry = FlowEntry::new(false).with_priority(u32::from(priority % 16));
        if fields & 1 != 0 {
            let addr = u128::from(0x0a00_0000u32 | (u32::from(dst) << 8));
            let m = Match::prefix(FieldId::Ipv4Dst, addr, 8 + u32::from(dst_len % 17)).unwrap();
            entry.add_match(m).unwrap();
        }
        if fields & 2 != 0 {
            entry.add_match(Match::exact(FieldId::TcpDst, u128::from(port % 4)).unwrap()).unwrap();
        }
        if fields & 4 != 0 {
            entry.add_match(Match::exact(FieldId::IpProto, 6).unwrap()).unwrap();
        }
        Arc::new(entry)
    }

    #[test]
    fn test_trie_agrees_with_loop() {
        bolero::check!()
            .with_type::<(Vec<(u8, u8, u8, u8, u8)>, Vec<(u8, u8, bool)>)>()
            .for_each(|(seeds, packets)| {
                let mut trie = Trie::new();
                let mut list = LoopAlgorithm::new();
                for seed in seeds.iter().take(64) {
                    let entry = random_entry(seed);
                    let check_overlap = seed.4 & 0x80 == 0;
                    let planned = trie.add(&entry, check_overlap);
                    let reference = list.add(&entry, check_overlap);
                    match (planned, reference) {
                        (Ok(change), Ok(expected)) => {
                            assert_eq!(
                                std::mem::discriminant(&change),
                                std::mem::discriminant(&expected)
                            );
                            trie.apply(&change);
                            list.apply(&expected);
                        }
                        (Err(e), Err(expected)) => assert_eq!(e, expected),
                        (planned, reference) => {
                            unreachable!("trie: {planned:?}, loop: {reference:?}")
                        }
                    }
                    trie.check_invariants().unwrap();
                    assert_eq!(trie.len(), list.len());
                }
                for (dst, port, tcp) in packets.iter().take(32) {
                    let mut packet = PacketFields::new()
                        .with(FieldId::Ipv4Dst, u128::from(0x0a00_0000u32 | (u32::from(*dst) << 8)))
                        .with(FieldId::TcpDst, u128::from(port % 4));
                    if *tcp {
                        packet.set(FieldId::IpProto, 6);
                    }
                    let found = trie.find_best_match(&packet).map(|e| e.priority());
                    let expected = list.find_best_match(&packet).map(|e| e.priority());
                    assert_eq!(found, expected, "packet {packet}");
                }
            });
    }
}
