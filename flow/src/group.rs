// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Seam towards the group table.

use crate::instruction::GroupId;
use std::collections::{BTreeSet, HashSet};

/// Answers whether a group exists. Flow entries whose actions reference
/// groups can only be installed if every such group resolves.
pub trait GroupResolver: Send + Sync {
    fn has_group(&self, group: GroupId) -> bool;
}

impl GroupResolver for BTreeSet<GroupId> {
    fn has_group(&self, group: GroupId) -> bool {
        self.contains(&group)
    }
}

impl<S: std::hash::BuildHasher + Send + Sync> GroupResolver for HashSet<GroupId, S> {
    fn has_group(&self, group: GroupId) -> bool {
        self.contains(&group)
    }
}
