//! Store and transaction traits.
//!
//! Every engine operation runs inside exactly one [`StoreTransaction`]: it
//! either commits all of its writes (entry consumption, assignment, audit) or
//! none of them. Backends implement the primitive reads and writes; the
//! sequencing lives in [`crate::service`].

use crate::error::StoreResult;
use crate::model::{
    Assignment, AuditRecord, Claim, EntryCount, NewSealedEntry, SealedListEntry, TreatmentGroup,
};
use crate::patch::ConfigPatch;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use trial_core::builder::StratumKey;
use trial_core::rng::Seed;
use trial_core::types::{
    ConfigId, GroupClassId, GroupId, NewConfig, RandomisationConfig, SubjectId, TrialId, UserId,
};

/// Row locking mode for configuration reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowLock {
    /// Plain read
    None,
    /// Hold the row until the transaction ends
    ForUpdate,
}

/// Transaction factory.
#[async_trait]
pub trait RandomisationStore: Send + Sync + 'static {
    /// Transaction handle type
    type Tx: StoreTransaction + 'static;

    /// Open a transaction
    async fn begin(&self) -> StoreResult<Self::Tx>;

    /// Backend name for logs and readiness probes
    fn backend_name(&self) -> &'static str;
}

/// Reads and writes available inside one transaction.
///
/// Dropping a transaction without [`commit`](Self::commit) discards its writes.
#[async_trait]
pub trait StoreTransaction: Send {
    // --- Trial metadata (read-only) ---

    /// Groups of `class` defined for `trial`
    async fn trial_groups(
        &mut self,
        trial: TrialId,
        class: GroupClassId,
    ) -> StoreResult<Vec<TreatmentGroup>>;

    /// Display name of a group, `None` if it no longer exists
    async fn group_name(&mut self, group: GroupId) -> StoreResult<Option<String>>;

    /// Whether `subject` is enrolled in `trial`
    async fn subject_enrolled(&mut self, trial: TrialId, subject: SubjectId) -> StoreResult<bool>;

    // --- Configuration store ---

    /// Persist a draft configuration
    async fn insert_config(
        &mut self,
        new: NewConfig,
        seed: Seed,
        created_by: UserId,
        created_at: DateTime<Utc>,
    ) -> StoreResult<RandomisationConfig>;

    /// Configuration by id
    async fn config(&mut self, id: ConfigId, lock: RowLock)
        -> StoreResult<Option<RandomisationConfig>>;

    /// Every configuration of a trial, newest first
    async fn configs_for_trial(&mut self, trial: TrialId) -> StoreResult<Vec<RandomisationConfig>>;

    /// The trial's active configuration
    async fn active_config(&mut self, trial: TrialId) -> StoreResult<Option<RandomisationConfig>>;

    /// Write the masked columns of `patch`
    async fn update_config(
        &mut self,
        id: ConfigId,
        patch: &ConfigPatch,
        at: DateTime<Utc>,
    ) -> StoreResult<RandomisationConfig>;

    /// Deactivate the trial's other configurations, then activate and lock `id`.
    ///
    /// Returns the activated row and the ids that were deactivated.
    async fn activate_config(
        &mut self,
        id: ConfigId,
        trial: TrialId,
        at: DateTime<Utc>,
    ) -> StoreResult<(RandomisationConfig, Vec<ConfigId>)>;

    // --- Sealed list store ---

    /// Remove unused entries of `config`, returning how many were removed
    async fn delete_unused_entries(&mut self, config: ConfigId) -> StoreResult<u64>;

    /// Bulk-insert generated entries
    async fn insert_entries(&mut self, entries: &[NewSealedEntry]) -> StoreResult<u64>;

    /// Number of entries generated for `config`
    async fn count_entries(&mut self, config: ConfigId) -> StoreResult<u64>;

    /// Claim the lowest-sequence unused entry of `(config, stratum)`.
    ///
    /// Entries held by other in-flight transactions are skipped, not waited
    /// on. `None` means the stratum has nothing left to hand out.
    async fn pop_next(
        &mut self,
        config: ConfigId,
        stratum: &StratumKey,
        claim: &Claim,
    ) -> StoreResult<Option<SealedListEntry>>;

    /// Entry already consumed by `subject` under `config`
    async fn entry_for_subject(
        &mut self,
        config: ConfigId,
        subject: SubjectId,
    ) -> StoreResult<Option<SealedListEntry>>;

    /// Generated and consumed counts per `(stratum, group)`
    async fn entry_counts(&mut self, config: ConfigId) -> StoreResult<Vec<EntryCount>>;

    // --- Trial datastore writes ---

    /// Create or replace the subject's assignment for its classification
    async fn upsert_assignment(&mut self, assignment: &Assignment) -> StoreResult<()>;

    /// Append to the trial audit trail
    async fn append_audit(&mut self, record: &AuditRecord) -> StoreResult<()>;

    // --- Completion ---

    /// Make every write of this transaction durable
    async fn commit(self) -> StoreResult<()>;

    /// Discard every write of this transaction
    async fn rollback(self) -> StoreResult<()>;
}
