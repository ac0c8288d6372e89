//! Sealed list generation and fill statistics.

use super::{audit, check_groups, require_configure, RandomisationService, CONFIG_ENTITY};
use crate::error::{RandomisationError, RandomisationResult, StateError};
use crate::model::{
    GenerationSummary, GroupAllocation, ListStats, NewSealedEntry, StratumGeneration, StratumStats,
};
use crate::store::{RandomisationStore, RowLock, StoreTransaction};
use chrono::Utc;
use trial_core::builder::build_list;
use trial_core::rng::SeededGenerator;
use trial_core::types::{Caller, ConfigId};

/// Human-readable code of the `ordinal`-th slot of a generated list.
pub fn randomisation_code(config: ConfigId, ordinal: u32) -> String {
    format!("RND-{}-{:04}", config, ordinal)
}

impl<S: RandomisationStore> RandomisationService<S> {
    /// (Re)generate the sealed list of an unlocked design.
    ///
    /// Unused entries from an earlier generation are discarded first. The list
    /// is derived from the stored seed, so regenerating an unchanged design
    /// reproduces it exactly.
    pub async fn generate_list(
        &self,
        caller: &Caller,
        id: ConfigId,
    ) -> RandomisationResult<GenerationSummary> {
        require_configure(caller, "generate randomisation lists")?;

        let mut tx = self.store.begin().await?;
        let result = self.generate_in(&mut tx, caller, id).await;
        Self::complete(tx, result).await
    }

    async fn generate_in(
        &self,
        tx: &mut S::Tx,
        caller: &Caller,
        id: ConfigId,
    ) -> RandomisationResult<GenerationSummary> {
        let config = tx
            .config(id, RowLock::ForUpdate)
            .await?
            .ok_or(RandomisationError::NotFound(id))?;
        if config.is_locked {
            tracing::warn!(config_id = %id, "Regeneration of locked configuration refused");
            return Err(StateError::ConfigLocked { config: id }.into());
        }
        config.design.validate(self.settings.max_total_slots)?;
        check_groups(tx, config.trial_id, config.group_class_id, &config.design.ratios).await?;

        let discarded = tx.delete_unused_entries(id).await?;

        let mut rng = SeededGenerator::new(config.seed.clone());
        let list = build_list(&config.design, &mut rng)?;
        let entries: Vec<NewSealedEntry> = list
            .positioned()
            .map(|p| NewSealedEntry {
                config_id: id,
                sequence_number: p.sequence_number,
                group_id: p.slot.group_id,
                stratum_key: p.stratum.clone(),
                block_number: p.slot.block_number,
                randomisation_code: randomisation_code(id, p.ordinal),
            })
            .collect();
        tx.insert_entries(&entries).await?;

        let strata: Vec<StratumGeneration> = list
            .strata
            .iter()
            .map(|s| StratumGeneration {
                stratum_key: s.key.clone(),
                entries: s.slots.len(),
            })
            .collect();

        let now = Utc::now();
        let mut record = audit(
            caller.user_id,
            CONFIG_ENTITY,
            id.get(),
            format!(
                "Randomisation list generated: {} entries over {} strata",
                entries.len(),
                strata.len()
            ),
            now,
        );
        record.new_value = Some(entries.len().to_string());
        tx.append_audit(&record).await?;

        tracing::info!(
            config_id = %id,
            entries = entries.len(),
            strata = strata.len(),
            discarded,
            draws = rng.calls(),
            "Randomisation list generated"
        );

        Ok(GenerationSummary {
            config_id: id,
            total_entries: entries.len(),
            discarded,
            strata,
        })
    }

    /// Fill state of a design's sealed list.
    ///
    /// Per-group consumption is only included when `caller` may see
    /// allocations under the design's blinding level.
    pub async fn list_stats(&self, caller: &Caller, id: ConfigId) -> RandomisationResult<ListStats> {
        let mut tx = self.store.begin().await?;
        let result = Self::stats_in(&mut tx, caller, id).await;
        Self::complete(tx, result).await
    }

    async fn stats_in(
        tx: &mut S::Tx,
        caller: &Caller,
        id: ConfigId,
    ) -> RandomisationResult<ListStats> {
        let config = tx
            .config(id, RowLock::None)
            .await?
            .ok_or(RandomisationError::NotFound(id))?;
        let show_groups = caller.can_view_allocation(config.blinding);

        let mut strata: Vec<StratumStats> = Vec::new();
        for cell in tx.entry_counts(id).await? {
            let needs_row = strata
                .last()
                .map_or(true, |last| last.stratum_key != cell.stratum_key);
            if needs_row {
                strata.push(StratumStats {
                    stratum_key: cell.stratum_key.clone(),
                    total: 0,
                    used: 0,
                    remaining: 0,
                    allocated: show_groups.then(Vec::new),
                });
            }
            if let Some(row) = strata.last_mut() {
                row.total += cell.total;
                row.used += cell.used;
                row.remaining = row.total - row.used;
                if let Some(allocated) = row.allocated.as_mut() {
                    allocated.push(GroupAllocation {
                        group_id: cell.group_id,
                        used: cell.used,
                    });
                }
            }
        }

        let total = strata.iter().map(|s| s.total).sum::<u64>();
        let used = strata.iter().map(|s| s.used).sum::<u64>();
        Ok(ListStats {
            config_id: id,
            is_active: config.is_active,
            is_locked: config.is_locked,
            total,
            used,
            remaining: total - used,
            strata,
        })
    }
}
