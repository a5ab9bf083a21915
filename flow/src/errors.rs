// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The error results used by this library.

use crate::entry::TableId;
use crate::field::FieldId;
use crate::instruction::GroupId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    #[error("A match for field {0} is already present")]
    DuplicateField(FieldId),

    #[error("Value {value:#x} does not fit in the {bits} bits of field {field}")]
    ValueTooWide {
        field: FieldId,
        value: u128,
        bits: u32,
    },

    #[error("Mask {mask:#x} does not fit in the {bits} bits of field {field}")]
    MaskTooWide { field: FieldId, mask: u128, bits: u32 },

    #[error("Prefix length {len} is invalid for field {field}")]
    InvalidPrefixLength { field: FieldId, len: u32 },

    #[error("Group {0} does not exist")]
    UnknownGroup(GroupId),

    #[error("Table {from} may only send packets to a later table, not to table {to}")]
    InvalidGoto { from: TableId, to: TableId },
}
