// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::config::ConfigError;
use flow::{GroupId, TableId};
use matching::FlowModError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("No such table: {0}")]
    NoSuchTable(TableId),

    #[error("Group {0} already exists")]
    GroupExists(GroupId),

    #[error("No such group: {0}")]
    NoSuchGroup(GroupId),

    #[error("Group {group} is in use by table {table}, whose entries cannot be removed")]
    GroupInUse { group: GroupId, table: TableId },

    #[error(transparent)]
    FlowMod(#[from] FlowModError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
