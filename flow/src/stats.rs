// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Per-entry traffic counters.

use concurrency::sync::atomic::{AtomicU64, Ordering};
use std::fmt::Debug;
use thread_local::ThreadLocal;

/// A consolidated snapshot of the counters of an entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlowCounters {
    pub packets: u64,
    pub bytes: u64,
}

impl std::ops::AddAssign for FlowCounters {
    fn add_assign(&mut self, other: Self) {
        self.packets += other.packets;
        self.bytes += other.bytes;
    }
}

struct Shard {
    packets: AtomicU64,
    bytes: AtomicU64,
}

impl Default for Shard {
    fn default() -> Self {
        Self {
            packets: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }
    }
}

/// Counters sharded per packet-processing thread: a hit only ever touches the
/// shard of the calling thread. Reads add all shards to a base value, which
/// also receives the counters folded in from an entry this one replaced.
#[derive(Default)]
pub struct FlowStats {
    shards: ThreadLocal<Shard>,
    base: Shard,
}

impl FlowStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one packet of `bytes` bytes.
    pub fn hit(&self, bytes: u64) {
        let shard = self.shards.get_or_default();
        shard.packets.fetch_add(1, Ordering::Relaxed);
        shard.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    #[must_use]
    pub fn counters(&self) -> FlowCounters {
        let mut counters = FlowCounters {
            packets: self.base.packets.load(Ordering::Relaxed),
            bytes: self.base.bytes.load(Ordering::Relaxed),
        };
        for shard in &self.shards {
            counters += FlowCounters {
                packets: shard.packets.load(Ordering::Relaxed),
                bytes: shard.bytes.load(Ordering::Relaxed),
            };
        }
        counters
    }

    /// Add counters accumulated elsewhere to these ones.
    pub fn fold(&self, counters: FlowCounters) {
        self.base.packets.fetch_add(counters.packets, Ordering::Relaxed);
        self.base.bytes.fetch_add(counters.bytes, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        for shard in std::iter::once(&self.base).chain(&self.shards) {
            shard.packets.store(0, Ordering::Relaxed);
            shard.bytes.store(0, Ordering::Relaxed);
        }
    }
}

impl Debug for FlowStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.counters())
    }
}
