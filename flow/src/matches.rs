// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Masked field matches and the predicates used to compare them.

use crate::errors::FlowError;
use crate::field::FieldId;
use crate::packet::PacketView;
use std::fmt::Display;
use std::net::{Ipv4Addr, Ipv6Addr};

/// A single field / value / mask triple.
///
/// The value is always stored masked: bits outside the mask are zero. A mask
/// of zero is a wildcard, which never appears inside a [`MatchSet`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Match {
    field: FieldId,
    value: u128,
    mask: u128,
}

/// Mask made of the `len` most significant bits of `field`.
fn prefix_mask(field: FieldId, len: u32) -> u128 {
    let full = field.full_mask();
    full & !full.checked_shr(len).unwrap_or(0)
}

impl Match {
    /// Build a masked match.
    ///
    /// # Errors
    ///
    /// Fails if the value or the mask have bits set beyond the width of the field.
    pub fn new(field: FieldId, value: u128, mask: u128) -> Result<Self, FlowError> {
        let full = field.full_mask();
        if value & !full != 0 {
            return Err(FlowError::ValueTooWide {
                field,
                value,
                bits: field.bits(),
            });
        }
        if mask & !full != 0 {
            return Err(FlowError::MaskTooWide {
                field,
                mask,
                bits: field.bits(),
            });
        }
        Ok(Self {
            field,
            value: value & mask,
            mask,
        })
    }

    /// Build a match constraining every bit of the field.
    ///
    /// # Errors
    ///
    /// Fails if the value does not fit in the field.
    pub fn exact(field: FieldId, value: u128) -> Result<Self, FlowError> {
        Self::new(field, value, field.full_mask())
    }

    /// Build a match on the `len` leading bits of the field.
    ///
    /// # Errors
    ///
    /// Fails if the value does not fit in the field or `len` exceeds its width.
    pub fn prefix(field: FieldId, value: u128, len: u32) -> Result<Self, FlowError> {
        if len > field.bits() {
            return Err(FlowError::InvalidPrefixLength { field, len });
        }
        Self::new(field, value, prefix_mask(field, len))
    }

    /// Match on an IPv4 source prefix.
    ///
    /// # Errors
    ///
    /// Fails if `len` is larger than 32.
    pub fn ipv4_src(addr: Ipv4Addr, len: u8) -> Result<Self, FlowError> {
        Self::prefix(FieldId::Ipv4Src, u128::from(u32::from(addr)), u32::from(len))
    }

    /// Match on an IPv4 destination prefix.
    ///
    /// # Errors
    ///
    /// Fails if `len` is larger than 32.
    pub fn ipv4_dst(addr: Ipv4Addr, len: u8) -> Result<Self, FlowError> {
        Self::prefix(FieldId::Ipv4Dst, u128::from(u32::from(addr)), u32::from(len))
    }

    /// Match on an IPv6 source prefix.
    ///
    /// # Errors
    ///
    /// Fails if `len` is larger than 128.
    pub fn ipv6_src(addr: Ipv6Addr, len: u8) -> Result<Self, FlowError> {
        Self::prefix(FieldId::Ipv6Src, u128::from(addr), u32::from(len))
    }

    /// Match on an IPv6 destination prefix.
    ///
    /// # Errors
    ///
    /// Fails if `len` is larger than 128.
    pub fn ipv6_dst(addr: Ipv6Addr, len: u8) -> Result<Self, FlowError> {
        Self::prefix(FieldId::Ipv6Dst, u128::from(addr), u32::from(len))
    }

    /// Match on an exact ethernet address, for either `EthDst` or `EthSrc`.
    ///
    /// # Errors
    ///
    /// Fails if the field is not 48 bits wide.
    pub fn mac(field: FieldId, mac: [u8; 6]) -> Result<Self, FlowError> {
        let value = mac
            .iter()
            .fold(0u128, |acc, byte| (acc << 8) | u128::from(*byte));
        if field.bits() != 48 {
            return Err(FlowError::ValueTooWide {
                field,
                value,
                bits: field.bits(),
            });
        }
        Self::exact(field, value)
    }

    #[must_use]
    pub fn field(&self) -> FieldId {
        self.field
    }

    #[must_use]
    pub fn value(&self) -> u128 {
        self.value
    }

    #[must_use]
    pub fn mask(&self) -> u128 {
        self.mask
    }

    /// Tell if the match constrains no bit at all.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.mask == 0
    }

    /// Tell if the match constrains every bit of the field.
    #[must_use]
    pub fn is_exact(&self) -> bool {
        self.mask == self.field.full_mask()
    }

    /// Length of the prefix if the mask is made of contiguous leading bits.
    #[must_use]
    pub fn prefix_len(&self) -> Option<u32> {
        let len = self.mask.count_ones();
        (prefix_mask(self.field, len) == self.mask).then_some(len)
    }

    /// Tell if `self` is at least as specific as `other`: every bit `other`
    /// fixes is also fixed by `self`, to the same value.
    #[must_use]
    pub fn is_submatch(&self, other: &Match) -> bool {
        self.field == other.field
            && (self.mask & other.mask) == other.mask
            && (self.value & other.mask) == other.value
    }

    /// Tell if some value of the field satisfies both matches.
    #[must_use]
    pub fn intersects(&self, other: &Match) -> bool {
        self.field == other.field && (self.value ^ other.value) & self.mask & other.mask == 0
    }

    /// The widest common prefix of two matches on the same field.
    ///
    /// The result fixes the leading run of bits that both matches fix to the same
    /// value, so both `self` and `other` are submatches of it. Returns `None` when
    /// the fields differ; a wildcard result means the two share nothing.
    #[must_use]
    pub fn alike(&self, other: &Match) -> Option<Match> {
        if self.field != other.field {
            return None;
        }
        let agree = self.mask & other.mask & !(self.value ^ other.value);
        let aligned = agree << (u128::BITS - self.field.bits());
        let mask = prefix_mask(self.field, aligned.leading_ones());
        Some(Match {
            field: self.field,
            value: self.value & mask,
            mask,
        })
    }

    /// Tell if a field value satisfies the match.
    #[must_use]
    pub fn matches_value(&self, value: u128) -> bool {
        value & self.mask == self.value
    }

    /// Tell if a packet satisfies the match. A packet that lacks the field never does.
    #[must_use]
    pub fn matches_packet<P: PacketView + ?Sized>(&self, packet: &P) -> bool {
        packet
            .field(self.field)
            .is_some_and(|value| self.matches_value(value))
    }
}

impl Display for Match {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.field.bits(), self.prefix_len()) {
            (32, Some(len)) if matches!(self.field, FieldId::Ipv4Src | FieldId::Ipv4Dst) => {
                #[allow(clippy::cast_possible_truncation)]
                let addr = Ipv4Addr::from(self.value as u32);
                write!(f, "{}={addr}/{len}", self.field)
            }
            (128, Some(len)) => write!(f, "{}={}/{len}", self.field, Ipv6Addr::from(self.value)),
            _ if self.is_exact() => write!(f, "{}={:#x}", self.field, self.value),
            _ => write!(f, "{}={:#x}/{:#x}", self.field, self.value, self.mask),
        }
    }
}

/// The conjunction of matches of a rule: at most one [`Match`] per field,
/// kept sorted in field order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct MatchSet(Vec<Match>);

impl MatchSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a match to the set. Wildcard matches constrain nothing and are not stored.
    ///
    /// # Errors
    ///
    /// Fails if the set already holds a match for the same field.
    pub fn insert(&mut self, m: Match) -> Result<(), FlowError> {
        match self.0.binary_search_by_key(&m.field, |x| x.field) {
            Ok(_) => Err(FlowError::DuplicateField(m.field)),
            Err(_) if m.is_wildcard() => Ok(()),
            Err(pos) => {
                self.0.insert(pos, m);
                Ok(())
            }
        }
    }

    /// Build a set out of a collection of matches.
    ///
    /// # Errors
    ///
    /// Fails if two matches target the same field.
    pub fn from_matches(matches: impl IntoIterator<Item = Match>) -> Result<Self, FlowError> {
        let mut set = Self::new();
        for m in matches {
            set.insert(m)?;
        }
        Ok(set)
    }

    #[must_use]
    pub fn get(&self, field: FieldId) -> Option<&Match> {
        self.0
            .binary_search_by_key(&field, |x| x.field)
            .ok()
            .map(|pos| &self.0[pos])
    }

    /// The matches, in field order.
    pub fn iter(&self) -> impl Iterator<Item = &Match> {
        self.0.iter()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Match] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Tell if every match of the set is satisfied by the packet.
    #[must_use]
    pub fn matches_packet<P: PacketView + ?Sized>(&self, packet: &P) -> bool {
        self.0.iter().all(|m| m.matches_packet(packet))
    }

    /// Tell if the match space of `self` is included in that of `other`: every field
    /// `other` constrains is constrained by `self` at least as specifically.
    #[must_use]
    pub fn is_submatch_of(&self, other: &MatchSet) -> bool {
        other
            .iter()
            .all(|o| self.get(o.field).is_some_and(|m| m.is_submatch(o)))
    }

    /// Tell if the match spaces of both sets intersect. Fields constrained by only
    /// one of the sets are wildcards on the other side and always intersect.
    #[must_use]
    pub fn intersects(&self, other: &MatchSet) -> bool {
        self.iter()
            .all(|m| other.get(m.field).is_none_or(|o| m.intersects(o)))
    }
}

impl TryFrom<Vec<Match>> for MatchSet {
    type Error = FlowError;

    fn try_from(matches: Vec<Match>) -> Result<Self, Self::Error> {
        Self::from_matches(matches)
    }
}

impl<'a> IntoIterator for &'a MatchSet {
    type Item = &'a Match;
    type IntoIter = std::slice::Iter<'a, Match>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Display for MatchSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return write!(f, "*");
        }
        for (i, m) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{m}")?;
        }
        Ok(())
    }
}
