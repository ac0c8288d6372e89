//! Persisted records and operation payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use trial_core::builder::StratumKey;
use trial_core::types::{ConfigId, GroupClassId, GroupId, GroupLabel, SubjectId, TrialId, UserId};

/// Treatment group as defined in the trial metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreatmentGroup {
    /// Group id
    pub id: GroupId,
    /// Classification the group belongs to
    pub group_class_id: GroupClassId,
    /// Display name
    pub name: String,
}

/// One sealed envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedListEntry {
    /// Row id
    pub id: i64,
    /// Owning configuration
    pub config_id: ConfigId,
    /// 1-based position within the stratum
    pub sequence_number: u32,
    /// Target group
    pub group_id: GroupId,
    /// Stratum queue
    pub stratum_key: StratumKey,
    /// Block number, 0 for simple designs
    pub block_number: u32,
    /// Human-readable code, `RND-<config>-<ordinal>`
    pub randomisation_code: String,
    /// Whether the envelope has been opened
    pub is_used: bool,
    /// Consuming subject
    pub used_by_subject: Option<SubjectId>,
    /// Consumption time
    pub used_at: Option<DateTime<Utc>>,
    /// Consuming user
    pub used_by_user: Option<UserId>,
}

/// Entry to bulk-insert during list generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSealedEntry {
    /// Owning configuration
    pub config_id: ConfigId,
    /// 1-based position within the stratum
    pub sequence_number: u32,
    /// Target group
    pub group_id: GroupId,
    /// Stratum queue
    pub stratum_key: StratumKey,
    /// Block number
    pub block_number: u32,
    /// Human-readable code
    pub randomisation_code: String,
}

/// Who consumes an entry, and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    /// Subject being randomised
    pub subject_id: SubjectId,
    /// User performing the randomisation
    pub user_id: UserId,
    /// Consumption time
    pub at: DateTime<Utc>,
}

/// Subject-to-group record owned by the trial datastore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    /// Subject
    pub subject_id: SubjectId,
    /// Classification the assignment is recorded under
    pub group_class_id: GroupClassId,
    /// Assigned group
    pub group_id: GroupId,
    /// User who triggered the assignment
    pub assigned_by: UserId,
    /// Assignment time
    pub assigned_at: DateTime<Utc>,
    /// Free-text note, carries the randomisation code
    pub notes: String,
}

/// Row handed to the trial audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    /// Acting user
    pub actor: UserId,
    /// Audited table
    pub entity_type: String,
    /// Audited row id
    pub entity_id: i64,
    /// Value before the change
    pub old_value: Option<String>,
    /// Value after the change
    pub new_value: Option<String>,
    /// Free-text description
    pub description: String,
    /// Event time
    pub recorded_at: DateTime<Utc>,
}

/// Entry counts of one `(stratum, group)` cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryCount {
    /// Stratum
    pub stratum_key: StratumKey,
    /// Group
    pub group_id: GroupId,
    /// Entries generated
    pub total: u64,
    /// Entries consumed
    pub used: u64,
}

/// Entries generated for one stratum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StratumGeneration {
    /// Stratum
    pub stratum_key: StratumKey,
    /// Entries inserted
    pub entries: usize,
}

/// Result of `generate_list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSummary {
    /// Configuration
    pub config_id: ConfigId,
    /// Entries inserted
    pub total_entries: usize,
    /// Unused entries removed from a previous generation
    pub discarded: u64,
    /// Per-stratum breakdown, in generation order
    pub strata: Vec<StratumGeneration>,
}

/// Consumed slots of one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupAllocation {
    /// Group
    pub group_id: GroupId,
    /// Slots consumed by subjects
    pub used: u64,
}

/// Fill state of one stratum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StratumStats {
    /// Stratum
    pub stratum_key: StratumKey,
    /// Entries generated
    pub total: u64,
    /// Entries consumed
    pub used: u64,
    /// Entries still sealed
    pub remaining: u64,
    /// Consumed slots per group; omitted for callers who may not see allocations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allocated: Option<Vec<GroupAllocation>>,
}

/// Result of `list_stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListStats {
    /// Configuration
    pub config_id: ConfigId,
    /// Whether the design is active
    pub is_active: bool,
    /// Whether the design is locked
    pub is_locked: bool,
    /// Entries generated
    pub total: u64,
    /// Entries consumed
    pub used: u64,
    /// Entries still sealed
    pub remaining: u64,
    /// Per-stratum breakdown, ordered by stratum key
    pub strata: Vec<StratumStats>,
}

/// Randomisation request for one subject.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RandomiseRequest {
    /// Trial
    pub trial_id: TrialId,
    /// Subject
    pub subject_id: SubjectId,
    /// Covariates for stratified designs, factor name to value
    #[serde(default)]
    pub stratum_values: BTreeMap<String, String>,
}

/// Outcome of a successful randomisation.
///
/// `group_id` and `randomisation_code` are returned for emergency unblinding
/// workflows and must not be written to logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RandomisationOutcome {
    /// Code of the consumed envelope
    pub randomisation_code: String,
    /// True assigned group
    pub group_id: GroupId,
    /// Group name, placeholder under blinding
    pub group_name: GroupLabel,
    /// Whether the name is withheld
    pub blinded: bool,
    /// Sequence number within the stratum
    pub sequence_number: u32,
    /// Stratum the slot came from
    pub stratum_key: StratumKey,
    /// Configuration consumed
    pub config_id: ConfigId,
    /// Consumption time
    pub randomised_at: DateTime<Utc>,
}
