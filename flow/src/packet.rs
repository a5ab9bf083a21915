// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Packet abstraction seen by the matching algorithms.

use crate::field::FieldId;
use std::fmt::Display;
use strum::EnumCount;

/// Read access to the header fields of a packet, as fixed-width integers.
///
/// Parsing is up to the implementor; the classifier only ever asks for the
/// value of a field and treats `None` as "the packet does not carry it".
pub trait PacketView {
    fn field(&self, field: FieldId) -> Option<u128>;
}

/// A plain, already-parsed set of header field values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketFields {
    values: [Option<u128>; FieldId::COUNT],
}

impl Default for PacketFields {
    fn default() -> Self {
        Self {
            values: [None; FieldId::COUNT],
        }
    }
}

impl PacketFields {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the value of a field. Bits beyond the width of the field are dropped.
    pub fn set(&mut self, field: FieldId, value: u128) {
        self.values[field.index()] = Some(value & field.full_mask());
    }

    /// Builder flavor of [`PacketFields::set`].
    #[must_use]
    pub fn with(mut self, field: FieldId, value: u128) -> Self {
        self.set(field, value);
        self
    }

    pub fn unset(&mut self, field: FieldId) {
        self.values[field.index()] = None;
    }
}

impl PacketView for PacketFields {
    fn field(&self, field: FieldId) -> Option<u128> {
        self.values[field.index()]
    }
}

impl Display for PacketFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use strum::IntoEnumIterator;
        let mut first = true;
        for field in FieldId::iter() {
            if let Some(value) = self.field(field) {
                if !first {
                    write!(f, " ")?;
                }
                write!(f, "{field}={value:#x}")?;
                first = false;
            }
        }
        Ok(())
    }
}
