// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Flow removal reasons and the sink notified when flagged entries go away.

use crate::entry::FlowEntry;
use std::fmt::Display;
use tracing::info;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RemovalReason {
    /// The entry went away as part of a table operation the controller did not
    /// ask to be told about, e.g. it was overwritten or it was a flow-mod template.
    NoReason,
    IdleTimeout,
    HardTimeout,
    Delete,
    GroupDelete,
}

impl Display for RemovalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            RemovalReason::NoReason => "none",
            RemovalReason::IdleTimeout => "idle-timeout",
            RemovalReason::HardTimeout => "hard-timeout",
            RemovalReason::Delete => "delete",
            RemovalReason::GroupDelete => "group-delete",
        };
        write!(f, "{reason}")
    }
}

/// Receives flow-removed events for entries created with `notify_removal`.
pub trait RemovalNotifier: Send + Sync {
    fn flow_removed(&self, reason: RemovalReason, entry: &FlowEntry);
}

/// Drops every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl RemovalNotifier for NoopNotifier {
    fn flow_removed(&self, _reason: RemovalReason, _entry: &FlowEntry) {}
}

/// Logs every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl RemovalNotifier for TracingNotifier {
    fn flow_removed(&self, reason: RemovalReason, entry: &FlowEntry) {
        let counters = entry.counters();
        info!(
            "Flow removed ({reason}) from table {}: {entry} packets={} bytes={}",
            entry
                .table()
                .map_or_else(|| "-".to_string(), |t| t.to_string()),
            counters.packets,
            counters.bytes
        );
    }
}
