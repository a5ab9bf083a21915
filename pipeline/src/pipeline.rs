// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! An ordered set of flow tables sharing a group table.

use crate::config::{ConfigError, PipelineConfig};
use crate::errors::PipelineError;
use crate::group::GroupTable;
use crate::table::{FlowTable, FlowTableReader};
use concurrency::Recover;
use concurrency::sync::RwLock;
use flow::{
    FlowEntry, GroupId, InstructionSet, PacketView, PortNo, RemovalNotifier, RemovalReason,
    TableId,
};
use matching::{
    AggregateStats, Algorithm, FlowModError, FlowModOutcome, FlowStatsQuery, FlowStatsReply,
    Strictness,
};
use std::fmt::{Debug, Display};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Pipeline {
    name: String,
    tables: Vec<FlowTable>,
    groups: Arc<GroupTable>,
    /// Held shared by flow-mods from their group checks to their commit, and
    /// exclusively by group removals.
    group_guard: RwLock<()>,
}

impl Pipeline {
    /// Build the tables `config` describes. Table `n` is the `n`-th of the list.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid.
    pub fn new(
        config: &PipelineConfig,
        groups: Arc<GroupTable>,
        notifier: Arc<dyn RemovalNotifier>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let tables = config
            .tables
            .iter()
            .enumerate()
            .map(|(n, table)| {
                let id = u8::try_from(n)
                    .map_err(|_| ConfigError::TooManyTables(config.tables.len()))?;
                Ok(FlowTable::new(
                    TableId(id),
                    Algorithm::new(table.algorithm),
                    groups.clone(),
                    notifier.clone(),
                ))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        info!(
            "Created pipeline '{}' with {} flow tables",
            config.name,
            tables.len()
        );
        Ok(Self {
            name: config.name.clone(),
            tables,
            groups,
            group_guard: RwLock::new(()),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn num_tables(&self) -> usize {
        self.tables.len()
    }

    /// # Errors
    ///
    /// Fails if there is no table `id`.
    pub fn table(&self, id: TableId) -> Result<&FlowTable, PipelineError> {
        self.tables
            .get(usize::from(id.0))
            .ok_or(PipelineError::NoSuchTable(id))
    }

    pub fn tables(&self) -> impl Iterator<Item = &FlowTable> {
        self.tables.iter()
    }

    /// The tables `id` designates: all of them for [`TableId::ALL`].
    fn selected(&self, id: TableId) -> Result<&[FlowTable], PipelineError> {
        if id == TableId::ALL {
            return Ok(&self.tables);
        }
        let n = usize::from(id.0);
        self.tables
            .get(n..=n)
            .ok_or(PipelineError::NoSuchTable(id))
    }

    /// The groups of the pipeline. Use [`Pipeline::remove_group`] rather than
    /// [`GroupTable::remove`] to delete groups while flow-mods are running.
    #[must_use]
    pub fn groups(&self) -> &GroupTable {
        &self.groups
    }

    /// Refuse up front an `operation` some of `targets` cannot perform, so
    /// that no table is changed when the request fails.
    fn check_removal(targets: &[FlowTable], operation: &'static str) -> Result<(), PipelineError> {
        match targets.iter().find(|target| !target.supports_removal()) {
            Some(target) => {
                warn!(
                    "Refusing to {operation} flow entries: table {} does not support it",
                    target.id()
                );
                Err(FlowModError::Unsupported {
                    algorithm: target.kind(),
                    operation,
                }
                .into())
            }
            None => Ok(()),
        }
    }

    /// Check `entry` could be installed in table `table`: its groups must exist
    /// and its goto instruction, if any, must point to a later table.
    ///
    /// # Errors
    ///
    /// Fails if there is no such table or if the entry is invalid.
    pub fn validate_flow_entry(
        &self,
        table: TableId,
        entry: &FlowEntry,
    ) -> Result<(), PipelineError> {
        self.table(table)?;
        entry
            .validate_goto(table, self.tables.len())
            .and_then(|()| entry.validate(self.groups.as_ref()))
            .map_err(|e| PipelineError::FlowMod(e.into()))
    }

    /// Add `entry` to table `table`. See [`FlowTable::add_flow_entry`].
    ///
    /// # Errors
    ///
    /// Fails if there is no such table, if the entry has a goto instruction that
    /// does not point to a later table, or if the table rejects the entry.
    pub fn add_flow_entry(
        &self,
        table: TableId,
        entry: FlowEntry,
        check_overlap: bool,
        reset_counts: bool,
    ) -> Result<FlowModOutcome, PipelineError> {
        let _guard = self.group_guard.read().recover();
        self.validate_flow_entry(table, &entry)?;
        Ok(self.table(table)?.add_flow_entry(entry, check_overlap, reset_counts)?)
    }

    /// Modify the entries `entry` selects in table `table`, or in every table
    /// for [`TableId::ALL`]. Returns how many entries were updated.
    ///
    /// # Errors
    ///
    /// Fails, leaving every table unchanged, if there is no such table, if the
    /// goto instruction of `entry` is invalid for some selected table, or if a
    /// selected table cannot modify entries.
    pub fn modify_flow_entry(
        &self,
        table: TableId,
        entry: &FlowEntry,
        strictness: Strictness,
        reset_counts: bool,
    ) -> Result<usize, PipelineError> {
        let targets = self.selected(table)?;
        for target in targets {
            entry
                .validate_goto(target.id(), self.tables.len())
                .map_err(FlowModError::from)?;
        }
        Self::check_removal(targets, "modify")?;
        let _guard = self.group_guard.read().recover();
        let mut modified = 0;
        for target in targets {
            modified += target.modify_flow_entry(entry, strictness, reset_counts)?;
        }
        Ok(modified)
    }

    /// Remove the entries `template` selects from table `table`, or from every
    /// table for [`TableId::ALL`]. Returns how many entries were removed.
    ///
    /// # Errors
    ///
    /// Fails, leaving every table unchanged, if there is no such table or if a
    /// selected table cannot remove entries.
    pub fn remove_flow_entry(
        &self,
        table: TableId,
        template: &FlowEntry,
        strictness: Strictness,
        out_port: PortNo,
        out_group: GroupId,
    ) -> Result<usize, PipelineError> {
        let targets = self.selected(table)?;
        Self::check_removal(targets, "remove")?;
        let mut removed = 0;
        for target in targets {
            removed += target.remove_flow_entry(
                template,
                None,
                strictness,
                out_port,
                out_group,
                RemovalReason::Delete,
            )?;
        }
        Ok(removed)
    }

    /// # Errors
    ///
    /// Fails if there is no such table or if a table cannot report statistics.
    pub fn get_flow_stats(
        &self,
        table: TableId,
        query: &FlowStatsQuery,
    ) -> Result<Vec<FlowStatsReply>, PipelineError> {
        let mut replies = Vec::new();
        for target in self.selected(table)? {
            replies.extend(target.get_flow_stats(query)?);
        }
        Ok(replies)
    }

    /// # Errors
    ///
    /// Fails if there is no such table or if a table cannot report statistics.
    pub fn get_flow_aggregate_stats(
        &self,
        table: TableId,
        query: &FlowStatsQuery,
    ) -> Result<AggregateStats, PipelineError> {
        let mut total = AggregateStats::default();
        for target in self.selected(table)? {
            let stats = target.get_flow_aggregate_stats(query)?;
            total.flows += stats.flows;
            total.packets += stats.packets;
            total.bytes += stats.bytes;
        }
        Ok(total)
    }

    /// # Errors
    ///
    /// Fails if the group exists already.
    pub fn add_group(&self, group: GroupId) -> Result<(), PipelineError> {
        if self.groups.add(group) {
            Ok(())
        } else {
            Err(PipelineError::GroupExists(group))
        }
    }

    /// Delete `group` and every entry sending packets to it, reporting those
    /// entries with [`RemovalReason::GroupDelete`]. Returns how many entries
    /// were removed.
    ///
    /// # Errors
    ///
    /// Fails if there is no such group, or, keeping the group, if entries using
    /// it live in a table that cannot remove entries.
    pub fn remove_group(&self, group: GroupId) -> Result<usize, PipelineError> {
        let _guard = self.group_guard.write().recover();
        if !self.groups.contains(group) {
            return Err(PipelineError::NoSuchGroup(group));
        }
        if let Some(table) = self.tables.iter().find(|table| {
            !table.supports_removal() && !table.find_entries_using_group(group).is_empty()
        }) {
            warn!(
                "Refusing to delete group {group}: table {} cannot remove the entries using it",
                table.id()
            );
            return Err(PipelineError::GroupInUse {
                group,
                table: table.id(),
            });
        }
        self.groups.remove(group);

        let template = FlowEntry::new(false);
        let mut removed = 0;
        for table in self.tables.iter().filter(|table| table.supports_removal()) {
            removed += table.remove_flow_entry(
                &template,
                None,
                Strictness::NonStrict,
                PortNo::ANY,
                group,
                RemovalReason::GroupDelete,
            )?;
        }
        debug!("Deleted group {group} and {removed} flow entries using it");
        Ok(removed)
    }

    /// Handles on every table for one packet-processing thread.
    #[must_use]
    pub fn reader(&self) -> PipelineReader {
        PipelineReader {
            tables: self.tables.iter().map(FlowTable::reader).collect(),
        }
    }
}

impl Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("tables", &self.tables)
            .field("groups", &self.groups)
            .finish_non_exhaustive()
    }
}

impl Display for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Pipeline '{}': {} tables, {} groups",
            self.name,
            self.tables.len(),
            self.groups.len()
        )?;
        for table in &self.tables {
            write!(f, "{table}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct PipelineReader {
    tables: Vec<FlowTableReader>,
}

impl PipelineReader {
    /// The best entry of table `table` for the packet, if any.
    #[must_use]
    pub fn find_best_match<P: PacketView + ?Sized>(
        &self,
        table: TableId,
        packet: &P,
    ) -> Option<Arc<FlowEntry>> {
        self.tables.get(usize::from(table.0))?.find_best_match(packet)
    }

    /// Run the packet through the pipeline from table 0, following goto
    /// instructions, and account it to every entry hit. Returns those entries
    /// in the order they were hit; it stops at the first miss.
    #[must_use]
    pub fn classify<P: PacketView + ?Sized>(&self, packet: &P, bytes: u64) -> Vec<Arc<FlowEntry>> {
        let mut hits = Vec::new();
        let mut current = TableId(0);
        while let Some(table) = self.tables.get(usize::from(current.0)) {
            let Some(entry) = table.classify(packet, bytes) else {
                break;
            };
            let next = entry.with_instructions_read(InstructionSet::goto_table);
            hits.push(entry);
            match next {
                Some(next) if next > current => current = next,
                _ => break,
            }
        }
        hits
    }
}
