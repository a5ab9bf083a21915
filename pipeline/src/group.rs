// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The set of groups flow entries may send packets to.

use concurrency::Recover;
use concurrency::sync::RwLock;
use flow::{GroupId, GroupResolver};
use std::collections::BTreeSet;
use std::fmt::Debug;
use tracing::debug;

/// Group ids known to the pipeline. Group buckets and their execution live
/// outside of the classifier; only existence matters here.
pub struct GroupTable {
    groups: RwLock<BTreeSet<GroupId>>,
}

impl Default for GroupTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for GroupTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.groups.read().recover().iter()).finish()
    }
}

impl GroupTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            groups: RwLock::new(BTreeSet::new()),
        }
    }

    /// Returns false if the group already existed.
    pub fn add(&self, group: GroupId) -> bool {
        let added = self.groups.write().recover().insert(group);
        if added {
            debug!("Added group {group}");
        }
        added
    }

    /// Returns false if there was no such group.
    pub fn remove(&self, group: GroupId) -> bool {
        let removed = self.groups.write().recover().remove(&group);
        if removed {
            debug!("Removed group {group}");
        }
        removed
    }

    #[must_use]
    pub fn contains(&self, group: GroupId) -> bool {
        self.groups.read().recover().contains(&group)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.read().recover().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The ids of all groups, in increasing order.
    #[must_use]
    pub fn ids(&self) -> Vec<GroupId> {
        self.groups.read().recover().iter().copied().collect()
    }
}

impl GroupResolver for GroupTable {
    fn has_group(&self, group: GroupId) -> bool {
        self.contains(group)
    }
}
