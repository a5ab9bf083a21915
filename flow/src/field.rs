// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Match field identifiers.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumCount, EnumIter, EnumString, IntoStaticStr};

/// A packet header attribute a [`crate::Match`] may constrain.
///
/// The declaration order is significant: it is the order in which the fields
/// of an entry are visited when it is indexed (e.g. the trie descends through
/// an entry's matches in this order), and the order of a [`crate::MatchSet`].
#[repr(u8)]
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumCount,
    EnumIter,
    EnumString,
    IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FieldId {
    InPort,
    InPhyPort,
    Metadata,
    EthDst,
    EthSrc,
    EthType,
    VlanVid,
    VlanPcp,
    IpDscp,
    IpEcn,
    IpProto,
    Ipv4Src,
    Ipv4Dst,
    TcpSrc,
    TcpDst,
    UdpSrc,
    UdpDst,
    SctpSrc,
    SctpDst,
    Icmpv4Type,
    Icmpv4Code,
    ArpOp,
    ArpSpa,
    ArpTpa,
    ArpSha,
    ArpTha,
    Ipv6Src,
    Ipv6Dst,
    Ipv6Flabel,
    Icmpv6Type,
    Icmpv6Code,
    MplsLabel,
    MplsTc,
}

impl FieldId {
    /// Width of the field, in bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            FieldId::Ipv6Src | FieldId::Ipv6Dst => 128,
            FieldId::Metadata => 64,
            FieldId::EthDst | FieldId::EthSrc | FieldId::ArpSha | FieldId::ArpTha => 48,
            FieldId::InPort
            | FieldId::InPhyPort
            | FieldId::Ipv4Src
            | FieldId::Ipv4Dst
            | FieldId::ArpSpa
            | FieldId::ArpTpa => 32,
            FieldId::Ipv6Flabel | FieldId::MplsLabel => 20,
            FieldId::EthType
            | FieldId::TcpSrc
            | FieldId::TcpDst
            | FieldId::UdpSrc
            | FieldId::UdpDst
            | FieldId::SctpSrc
            | FieldId::SctpDst
            | FieldId::ArpOp => 16,
            FieldId::VlanVid => 13,
            FieldId::IpProto
            | FieldId::Icmpv4Type
            | FieldId::Icmpv4Code
            | FieldId::Icmpv6Type
            | FieldId::Icmpv6Code => 8,
            FieldId::IpDscp => 6,
            FieldId::VlanPcp | FieldId::MplsTc => 3,
            FieldId::IpEcn => 2,
        }
    }

    /// The mask with every bit of the field set.
    #[must_use]
    pub const fn full_mask(self) -> u128 {
        let bits = self.bits();
        if bits >= u128::BITS {
            u128::MAX
        } else {
            (1u128 << bits) - 1
        }
    }

    /// Position of the field in the fixed type order.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}
