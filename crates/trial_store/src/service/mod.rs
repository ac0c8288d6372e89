//! # Randomisation Service
//!
//! The engine's operation surface. Every operation that touches a store runs
//! in exactly one transaction: it commits when the operation succeeds and
//! rolls back before the error is returned otherwise, so no caller ever sees
//! a half-applied change.
//!
//! | Operation            | Role                 | Transaction |
//! |----------------------|----------------------|-------------|
//! | `save_config`        | configure            | yes         |
//! | `update_config`      | configure            | yes         |
//! | `get_config`         | any                  | read        |
//! | `configs_for_trial`  | any                  | read        |
//! | `active_config`      | any                  | read        |
//! | `generate_list`      | configure            | yes         |
//! | `activate_config`    | configure            | yes         |
//! | `randomise_subject`  | anyone but monitor   | yes         |
//! | `list_stats`         | any                  | read        |
//! | `test_config`        | any                  | none        |

mod config;
mod list;
mod randomise;

pub use list::randomisation_code;

use crate::error::{RandomisationError, RandomisationResult};
use crate::model::AuditRecord;
use crate::store::{RandomisationStore, StoreTransaction};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use trial_core::preview::DEFAULT_PREVIEW_SLOTS;
use trial_core::types::{
    AllocationRatios, Caller, GroupClassId, TrialId, UserId, ValidationError,
};

/// Default upper bound on `total_slots`.
pub const DEFAULT_MAX_TOTAL_SLOTS: u32 = 10_000;

/// Audit entity type of configuration events.
pub const CONFIG_ENTITY: &str = "randomization_config";

/// Audit entity type of slot consumption events.
pub const SEALED_LIST_ENTITY: &str = "randomization_sealed_list";

/// Engine limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Largest list a design may request
    pub max_total_slots: u32,
    /// Largest list a preview generates
    pub preview_max_slots: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_total_slots: DEFAULT_MAX_TOTAL_SLOTS,
            preview_max_slots: DEFAULT_PREVIEW_SLOTS,
        }
    }
}

/// Randomisation engine over a store backend.
pub struct RandomisationService<S> {
    store: Arc<S>,
    settings: EngineSettings,
}

impl<S> Clone for RandomisationService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            settings: self.settings,
        }
    }
}

impl<S: RandomisationStore> RandomisationService<S> {
    /// Create a service with default limits
    pub fn new(store: S) -> Self {
        Self::with_settings(store, EngineSettings::default())
    }

    /// Create a service with explicit limits
    pub fn with_settings(store: S, settings: EngineSettings) -> Self {
        Self {
            store: Arc::new(store),
            settings,
        }
    }

    /// Backing store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Active limits
    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    /// Commit on success, roll back on failure.
    async fn complete<T>(tx: S::Tx, result: RandomisationResult<T>) -> RandomisationResult<T> {
        match result {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "Rollback failed");
                }
                Err(err)
            }
        }
    }
}

fn require_configure(caller: &Caller, action: &str) -> RandomisationResult<()> {
    if caller.can_configure() {
        return Ok(());
    }
    tracing::warn!(user_id = %caller.user_id, role = %caller.role, action, "Configuration change refused");
    Err(RandomisationError::forbidden(format!(
        "role '{}' may not {}",
        caller.role, action
    )))
}

/// Every ratio must name a group of the configured classification.
async fn check_groups<T: StoreTransaction>(
    tx: &mut T,
    trial: TrialId,
    class: GroupClassId,
    ratios: &AllocationRatios,
) -> RandomisationResult<()> {
    let groups = tx.trial_groups(trial, class).await?;
    if let Some(group) = ratios
        .groups()
        .find(|group| !groups.iter().any(|g| g.id == *group))
    {
        return Err(ValidationError::UnknownGroup { group }.into());
    }
    Ok(())
}

fn audit(
    actor: UserId,
    entity_type: &str,
    entity_id: i64,
    description: impl Into<String>,
    at: DateTime<Utc>,
) -> AuditRecord {
    AuditRecord {
        actor,
        entity_type: entity_type.to_string(),
        entity_id,
        old_value: None,
        new_value: None,
        description: description.into(),
        recorded_at: at,
    }
}
