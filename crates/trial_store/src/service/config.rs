//! Configuration store operations.

use super::{audit, check_groups, require_configure, RandomisationService, CONFIG_ENTITY};
use crate::error::{RandomisationError, RandomisationResult, StateError};
use crate::patch::ConfigPatch;
use crate::store::{RandomisationStore, RowLock, StoreTransaction};
use chrono::Utc;
use trial_core::preview::{preview_design, PreviewReport};
use trial_core::rng::Seed;
use trial_core::types::{Caller, ConfigId, NewConfig, RandomisationConfig, TrialId, ValidationError};

impl<S: RandomisationStore> RandomisationService<S> {
    /// Persist a draft design.
    ///
    /// The seed is generated here unless the draft carries one.
    pub async fn save_config(
        &self,
        caller: &Caller,
        new: NewConfig,
    ) -> RandomisationResult<RandomisationConfig> {
        require_configure(caller, "create randomisation configurations")?;
        new.validate(self.settings.max_total_slots)?;

        let mut tx = self.store.begin().await?;
        let result = self.save_in(&mut tx, caller, new).await;
        Self::complete(tx, result).await
    }

    async fn save_in(
        &self,
        tx: &mut S::Tx,
        caller: &Caller,
        mut new: NewConfig,
    ) -> RandomisationResult<RandomisationConfig> {
        check_groups(tx, new.trial_id, new.group_class_id, &new.design.ratios).await?;

        let seed = new.seed.take().unwrap_or_else(Seed::generate);
        let now = Utc::now();
        let config = tx.insert_config(new, seed, caller.user_id, now).await?;

        let mut record = audit(
            caller.user_id,
            CONFIG_ENTITY,
            config.id.get(),
            format!("Randomisation configuration '{}' created", config.name),
            now,
        );
        record.new_value = Some(config.design.design_type.to_string());
        tx.append_audit(&record).await?;

        tracing::info!(
            config_id = %config.id,
            trial_id = %config.trial_id,
            design_type = %config.design.design_type,
            total_slots = config.design.total_slots,
            "Randomisation configuration saved"
        );
        Ok(config)
    }

    /// Apply a field-mask patch to an unlocked design.
    ///
    /// Changing anything that shapes the list discards the entries generated
    /// so far, so the design must be regenerated before activation.
    pub async fn update_config(
        &self,
        caller: &Caller,
        id: ConfigId,
        patch: ConfigPatch,
    ) -> RandomisationResult<RandomisationConfig> {
        require_configure(caller, "modify randomisation configurations")?;
        patch.ensure_not_empty()?;

        let mut tx = self.store.begin().await?;
        let result = self.update_in(&mut tx, caller, id, &patch).await;
        Self::complete(tx, result).await
    }

    async fn update_in(
        &self,
        tx: &mut S::Tx,
        caller: &Caller,
        id: ConfigId,
        patch: &ConfigPatch,
    ) -> RandomisationResult<RandomisationConfig> {
        let current = tx
            .config(id, RowLock::ForUpdate)
            .await?
            .ok_or(RandomisationError::NotFound(id))?;
        if current.is_locked {
            tracing::warn!(config_id = %id, "Update of locked configuration refused");
            return Err(StateError::ConfigLocked { config: id }.into());
        }

        let mut candidate = current.clone();
        patch.apply_to(&mut candidate);
        if candidate.name.trim().is_empty() {
            return Err(ValidationError::BlankName.into());
        }
        candidate.design.validate(self.settings.max_total_slots)?;
        if patch.ratios.is_some() || patch.group_class_id.is_some() {
            check_groups(
                tx,
                candidate.trial_id,
                candidate.group_class_id,
                &candidate.design.ratios,
            )
            .await?;
        }

        let now = Utc::now();
        let updated = tx.update_config(id, patch, now).await?;
        let discarded = if patch.shapes_list() {
            tx.delete_unused_entries(id).await?
        } else {
            0
        };

        let fields: Vec<&str> = patch.fields().into_iter().map(|f| f.column()).collect();
        let mut record = audit(
            caller.user_id,
            CONFIG_ENTITY,
            id.get(),
            format!("Randomisation configuration updated: {}", fields.join(", ")),
            now,
        );
        record.old_value = serde_json::to_string(&current).ok();
        record.new_value = serde_json::to_string(&updated).ok();
        tx.append_audit(&record).await?;

        tracing::info!(config_id = %id, fields = ?fields, discarded, "Randomisation configuration updated");
        Ok(updated)
    }

    /// Design by id
    pub async fn get_config(&self, id: ConfigId) -> RandomisationResult<RandomisationConfig> {
        let mut tx = self.store.begin().await?;
        let result = tx
            .config(id, RowLock::None)
            .await
            .map_err(RandomisationError::from)
            .and_then(|config| config.ok_or(RandomisationError::NotFound(id)));
        Self::complete(tx, result).await
    }

    /// Every design of a trial, newest first
    pub async fn configs_for_trial(
        &self,
        trial: TrialId,
    ) -> RandomisationResult<Vec<RandomisationConfig>> {
        let mut tx = self.store.begin().await?;
        let result = tx
            .configs_for_trial(trial)
            .await
            .map_err(RandomisationError::from);
        Self::complete(tx, result).await
    }

    /// The trial's active design, if any
    pub async fn active_config(
        &self,
        trial: TrialId,
    ) -> RandomisationResult<Option<RandomisationConfig>> {
        let mut tx = self.store.begin().await?;
        let result = tx
            .active_config(trial)
            .await
            .map_err(RandomisationError::from);
        Self::complete(tx, result).await
    }

    /// Activate and lock a design with a generated list.
    ///
    /// Any other active design of the same trial is deactivated in the same
    /// transaction.
    pub async fn activate_config(
        &self,
        caller: &Caller,
        id: ConfigId,
    ) -> RandomisationResult<RandomisationConfig> {
        require_configure(caller, "activate randomisation configurations")?;

        let mut tx = self.store.begin().await?;
        let result = self.activate_in(&mut tx, caller, id).await;
        Self::complete(tx, result).await
    }

    async fn activate_in(
        &self,
        tx: &mut S::Tx,
        caller: &Caller,
        id: ConfigId,
    ) -> RandomisationResult<RandomisationConfig> {
        let current = tx
            .config(id, RowLock::ForUpdate)
            .await?
            .ok_or(RandomisationError::NotFound(id))?;
        if current.is_locked || current.is_active {
            tracing::warn!(config_id = %id, "Repeated activation refused");
            return Err(StateError::AlreadyActivated { config: id }.into());
        }
        if tx.count_entries(id).await? == 0 {
            tracing::warn!(config_id = %id, "Activation without generated list refused");
            return Err(StateError::ListNotGenerated { config: id }.into());
        }

        let now = Utc::now();
        let (activated, deactivated) = tx.activate_config(id, current.trial_id, now).await?;

        for previous in &deactivated {
            let record = audit(
                caller.user_id,
                CONFIG_ENTITY,
                previous.get(),
                format!("Randomisation configuration deactivated, superseded by {}", id),
                now,
            );
            tx.append_audit(&record).await?;
        }
        let record = audit(
            caller.user_id,
            CONFIG_ENTITY,
            id.get(),
            format!("Randomisation configuration '{}' activated and locked", activated.name),
            now,
        );
        tx.append_audit(&record).await?;

        tracing::info!(
            config_id = %id,
            trial_id = %activated.trial_id,
            deactivated = deactivated.len(),
            "Randomisation configuration activated"
        );
        Ok(activated)
    }

    /// Preview a candidate design without persisting anything
    pub fn test_config(&self, candidate: &NewConfig) -> RandomisationResult<PreviewReport> {
        let report = preview_design(candidate, self.settings.preview_max_slots)?;
        tracing::debug!(
            generated = report.generated_slots,
            truncated = report.truncated,
            "Design preview generated"
        );
        Ok(report)
    }
}
