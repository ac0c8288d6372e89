//! Randomisation configurations.
//!
//! A [`NewConfig`] is what a caller submits; a [`RandomisationConfig`] is the
//! stored row with its seed and lifecycle flags. The seed is never serialised
//! outward: anyone holding it can regenerate the sealed list.

use super::design::{AllocationDesign, BlindingLevel};
use super::error::ValidationError;
use super::ids::{ConfigId, GroupClassId, TrialId, UserId};
use crate::rng::Seed;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Draft configuration as submitted for creation or preview.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConfig {
    /// Owning trial
    pub trial_id: TrialId,
    /// Human-readable name
    pub name: String,
    /// Optional free-text description
    #[serde(default)]
    pub description: Option<String>,
    /// Blinding level
    #[serde(default)]
    pub blinding: BlindingLevel,
    /// Group classification the assignments are recorded under
    pub group_class_id: GroupClassId,
    /// List-shaping parameters
    #[serde(flatten)]
    pub design: AllocationDesign,
    /// Fixed seed for reproducible test set-ups; generated when absent
    #[serde(default)]
    pub seed: Option<Seed>,
}

impl NewConfig {
    /// Structural validation shared by creation and preview
    pub fn validate(&self, max_total_slots: u32) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::BlankName);
        }
        self.design.validate(max_total_slots)
    }
}

/// A persisted randomisation design.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RandomisationConfig {
    /// Configuration id
    pub id: ConfigId,
    /// Owning trial
    pub trial_id: TrialId,
    /// Human-readable name
    pub name: String,
    /// Optional free-text description
    pub description: Option<String>,
    /// Blinding level
    pub blinding: BlindingLevel,
    /// Group classification the assignments are recorded under
    pub group_class_id: GroupClassId,
    /// List-shaping parameters
    #[serde(flatten)]
    pub design: AllocationDesign,
    /// Seed the sealed list is derived from, fixed at creation
    #[serde(skip_serializing)]
    pub seed: Seed,
    /// Whether subjects are currently randomised against this design
    pub is_active: bool,
    /// Whether the design is frozen
    pub is_locked: bool,
    /// Creator
    pub created_by: UserId,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: Option<DateTime<Utc>>,
    /// Activation time
    pub activated_at: Option<DateTime<Utc>>,
}

impl RandomisationConfig {
    /// Materialise a stored row from a draft
    pub fn from_new(
        id: ConfigId,
        new: NewConfig,
        seed: Seed,
        created_by: UserId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            trial_id: new.trial_id,
            name: new.name,
            description: new.description,
            blinding: new.blinding,
            group_class_id: new.group_class_id,
            design: new.design,
            seed,
            is_active: false,
            is_locked: false,
            created_by,
            created_at,
            updated_at: None,
            activated_at: None,
        }
    }

    /// Draft, list-generated or activated
    pub fn is_draft(&self) -> bool {
        !self.is_active && !self.is_locked
    }
}
