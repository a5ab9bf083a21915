// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Instructions attached to flow entries.
//!
//! Only the data model lives here: executing the actions once an entry has
//! been selected is the job of the datapath, not of the classifier.

use crate::entry::TableId;
use crate::matches::Match;
use std::fmt::Display;
use strum::{EnumCount, EnumIter};

/// A switch port number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortNo(pub u32);

impl PortNo {
    pub const CONTROLLER: PortNo = PortNo(0xffff_fffd);
    pub const LOCAL: PortNo = PortNo(0xffff_fffe);
    /// Wildcard used by flow-mod and stats filters: any port.
    pub const ANY: PortNo = PortNo(0xffff_ffff);
}

impl Display for PortNo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            PortNo::CONTROLLER => write!(f, "controller"),
            PortNo::LOCAL => write!(f, "local"),
            PortNo::ANY => write!(f, "any"),
            PortNo(port) => write!(f, "{port}"),
        }
    }
}

/// A group table identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub u32);

impl GroupId {
    pub const ALL: GroupId = GroupId(0xffff_fffc);
    /// Wildcard used by flow-mod and stats filters: any group.
    pub const ANY: GroupId = GroupId(0xffff_ffff);
}

impl Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            GroupId::ALL => write!(f, "all"),
            GroupId::ANY => write!(f, "any"),
            GroupId(group) => write!(f, "{group}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Output(PortNo),
    Group(GroupId),
    SetField(Match),
    PushVlan(u16),
    PopVlan,
    SetQueue(u32),
    DecNwTtl,
    SetNwTtl(u8),
}

impl Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Output(port) => write!(f, "output:{port}"),
            Action::Group(group) => write!(f, "group:{group}"),
            Action::SetField(m) => write!(f, "set_field:{m}"),
            Action::PushVlan(ethertype) => write!(f, "push_vlan:{ethertype:#06x}"),
            Action::PopVlan => write!(f, "pop_vlan"),
            Action::SetQueue(queue) => write!(f, "set_queue:{queue}"),
            Action::DecNwTtl => write!(f, "dec_nw_ttl"),
            Action::SetNwTtl(ttl) => write!(f, "set_nw_ttl:{ttl}"),
        }
    }
}

/// Instruction kinds, in execution order. Also the index of an instruction
/// within an [`InstructionSet`].
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, EnumCount, EnumIter)]
pub enum InstructionType {
    ApplyActions,
    ClearActions,
    WriteActions,
    WriteMetadata,
    GotoTable,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    ApplyActions(Vec<Action>),
    ClearActions,
    WriteActions(Vec<Action>),
    WriteMetadata { metadata: u64, mask: u64 },
    GotoTable(TableId),
}

impl Instruction {
    #[must_use]
    pub fn kind(&self) -> InstructionType {
        match self {
            Instruction::ApplyActions(_) => InstructionType::ApplyActions,
            Instruction::ClearActions => InstructionType::ClearActions,
            Instruction::WriteActions(_) => InstructionType::WriteActions,
            Instruction::WriteMetadata { .. } => InstructionType::WriteMetadata,
            Instruction::GotoTable(_) => InstructionType::GotoTable,
        }
    }

    /// The actions carried by the instruction, if it carries any.
    #[must_use]
    pub fn actions(&self) -> &[Action] {
        match self {
            Instruction::ApplyActions(actions) | Instruction::WriteActions(actions) => actions,
            _ => &[],
        }
    }
}

fn write_actions(f: &mut std::fmt::Formatter<'_>, name: &str, actions: &[Action]) -> std::fmt::Result {
    write!(f, "{name}(")?;
    for (i, action) in actions.iter().enumerate() {
        if i > 0 {
            write!(f, ",")?;
        }
        write!(f, "{action}")?;
    }
    write!(f, ")")
}

impl Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Instruction::ApplyActions(actions) => write_actions(f, "apply", actions),
            Instruction::ClearActions => write!(f, "clear"),
            Instruction::WriteActions(actions) => write_actions(f, "write", actions),
            Instruction::WriteMetadata { metadata, mask } => {
                write!(f, "write_metadata({metadata:#x}/{mask:#x})")
            }
            Instruction::GotoTable(table) => write!(f, "goto({table})"),
        }
    }
}

/// At most one instruction of each kind, indexed by [`InstructionType`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InstructionSet([Option<Instruction>; InstructionType::COUNT]);

impl InstructionSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an instruction, returning the one of the same kind it replaces.
    pub fn set(&mut self, instruction: Instruction) -> Option<Instruction> {
        let slot = &mut self.0[instruction.kind() as usize];
        slot.replace(instruction)
    }

    /// Builder flavor of [`InstructionSet::set`].
    #[must_use]
    pub fn with(mut self, instruction: Instruction) -> Self {
        self.set(instruction);
        self
    }

    #[must_use]
    pub fn get(&self, kind: InstructionType) -> Option<&Instruction> {
        self.0[kind as usize].as_ref()
    }

    pub fn remove(&mut self, kind: InstructionType) -> Option<Instruction> {
        self.0[kind as usize].take()
    }

    /// The instructions present, in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &Instruction> {
        self.0.iter().flatten()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }

    /// Actions of the apply-actions and write-actions instructions.
    fn actions(&self) -> impl Iterator<Item = &Action> {
        self.iter().flat_map(Instruction::actions)
    }

    /// Tell if some apply or write action outputs to `port`.
    #[must_use]
    pub fn has_output(&self, port: PortNo) -> bool {
        self.actions()
            .any(|action| matches!(action, Action::Output(p) if *p == port))
    }

    /// Tell if some apply or write action sends packets to `group`.
    #[must_use]
    pub fn has_group(&self, group: GroupId) -> bool {
        self.actions()
            .any(|action| matches!(action, Action::Group(g) if *g == group))
    }

    /// The groups referenced by the actions of the set.
    pub fn groups(&self) -> impl Iterator<Item = GroupId> + '_ {
        self.actions().filter_map(|action| match action {
            Action::Group(group) => Some(*group),
            _ => None,
        })
    }

    /// The table this set sends packets to next, if any.
    #[must_use]
    pub fn goto_table(&self) -> Option<TableId> {
        match self.get(InstructionType::GotoTable) {
            Some(Instruction::GotoTable(table)) => Some(*table),
            _ => None,
        }
    }
}

impl Display for InstructionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "drop");
        }
        for (i, instruction) in self.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{instruction}")?;
        }
        Ok(())
    }
}
