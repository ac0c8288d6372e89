//! In-memory reference store.
//!
//! A transaction takes the store-wide lock. Reads go straight to the committed
//! state; the first write stages a copy, which `commit` swaps in. Audit
//! records are buffered and appended on commit. Dropping the transaction
//! discards every write.
//! Transactions are fully serialised, so a sealed entry has at most one
//! consumer. Used by tests, local development and the server's memory backend.

use crate::error::{StoreError, StoreResult};
use crate::model::{
    Assignment, AuditRecord, Claim, EntryCount, NewSealedEntry, SealedListEntry, TreatmentGroup,
};
use crate::patch::ConfigPatch;
use crate::store::{RandomisationStore, RowLock, StoreTransaction};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use trial_core::builder::StratumKey;
use trial_core::rng::Seed;
use trial_core::types::{
    ConfigId, GroupClassId, GroupId, NewConfig, RandomisationConfig, SubjectId, TrialId, UserId,
};

#[derive(Debug, Clone, Default)]
struct TrialRecord {
    subjects: BTreeSet<SubjectId>,
    groups: Vec<TreatmentGroup>,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    trials: BTreeMap<TrialId, TrialRecord>,
    configs: BTreeMap<ConfigId, RandomisationConfig>,
    entries: Vec<SealedListEntry>,
    assignments: BTreeMap<(SubjectId, GroupClassId), Assignment>,
    next_config_id: i64,
    next_entry_id: i64,
}

#[derive(Debug, Default)]
struct Shared {
    state: MemoryState,
    audit: Vec<AuditRecord>,
}

/// Process-local store behind a single async mutex.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Mutex<Shared>>,
    fail_assignment: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a trial with its treatment groups and enrolled subjects.
    pub async fn register_trial(
        &self,
        trial: TrialId,
        class: GroupClassId,
        groups: &[(GroupId, &str)],
        subjects: impl IntoIterator<Item = SubjectId>,
    ) {
        let mut shared = self.shared.lock().await;
        let record = shared.state.trials.entry(trial).or_default();
        record
            .groups
            .extend(groups.iter().map(|(id, name)| TreatmentGroup {
                id: *id,
                group_class_id: class,
                name: (*name).to_string(),
            }));
        record.subjects.extend(subjects);
    }

    /// Make the next assignment write fail, to exercise rollback paths.
    pub fn fail_next_assignment(&self) {
        self.fail_assignment.store(true, Ordering::SeqCst);
    }

    /// Committed sealed entries of `config`, in stratum then sequence order
    pub async fn entries(&self, config: ConfigId) -> Vec<SealedListEntry> {
        let shared = self.shared.lock().await;
        let mut entries: Vec<_> = shared
            .state
            .entries
            .iter()
            .filter(|e| e.config_id == config)
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            (a.stratum_key.as_str(), a.sequence_number).cmp(&(b.stratum_key.as_str(), b.sequence_number))
        });
        entries
    }

    /// Committed assignments
    pub async fn assignments(&self) -> Vec<Assignment> {
        self.shared
            .lock()
            .await
            .state
            .assignments
            .values()
            .cloned()
            .collect()
    }

    /// Committed audit trail, oldest first
    pub async fn audit_log(&self) -> Vec<AuditRecord> {
        self.shared.lock().await.audit.clone()
    }
}

#[async_trait]
impl RandomisationStore for MemoryStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> StoreResult<Self::Tx> {
        let guard = self.shared.clone().lock_owned().await;
        Ok(MemoryTransaction {
            guard,
            staged: None,
            audit: Vec::new(),
            fail_assignment: self.fail_assignment.clone(),
        })
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Copy-on-write transaction over the memory state.
pub struct MemoryTransaction {
    guard: OwnedMutexGuard<Shared>,
    staged: Option<MemoryState>,
    audit: Vec<AuditRecord>,
    fail_assignment: Arc<AtomicBool>,
}

impl MemoryTransaction {
    fn state(&self) -> &MemoryState {
        self.staged.as_ref().unwrap_or(&self.guard.state)
    }

    fn state_mut(&mut self) -> &mut MemoryState {
        let committed = &self.guard.state;
        self.staged.get_or_insert_with(|| committed.clone())
    }

    /// Whether a write has staged a copy of the state
    #[cfg(test)]
    fn is_staged(&self) -> bool {
        self.staged.is_some()
    }

    fn config_mut(&mut self, id: ConfigId) -> StoreResult<&mut RandomisationConfig> {
        self.state_mut()
            .configs
            .get_mut(&id)
            .ok_or_else(|| StoreError::Missing(format!("randomisation config {}", id)))
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn trial_groups(
        &mut self,
        trial: TrialId,
        class: GroupClassId,
    ) -> StoreResult<Vec<TreatmentGroup>> {
        Ok(self
            .state()
            .trials
            .get(&trial)
            .map(|t| {
                t.groups
                    .iter()
                    .filter(|g| g.group_class_id == class)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn group_name(&mut self, group: GroupId) -> StoreResult<Option<String>> {
        Ok(self
            .state()
            .trials
            .values()
            .flat_map(|t| t.groups.iter())
            .find(|g| g.id == group)
            .map(|g| g.name.clone()))
    }

    async fn subject_enrolled(&mut self, trial: TrialId, subject: SubjectId) -> StoreResult<bool> {
        Ok(self
            .state()
            .trials
            .get(&trial)
            .is_some_and(|t| t.subjects.contains(&subject)))
    }

    async fn insert_config(
        &mut self,
        new: NewConfig,
        seed: Seed,
        created_by: UserId,
        created_at: DateTime<Utc>,
    ) -> StoreResult<RandomisationConfig> {
        let state = self.state_mut();
        state.next_config_id += 1;
        let id = ConfigId(state.next_config_id);
        let config = RandomisationConfig::from_new(id, new, seed, created_by, created_at);
        state.configs.insert(id, config.clone());
        Ok(config)
    }

    async fn config(
        &mut self,
        id: ConfigId,
        _lock: RowLock,
    ) -> StoreResult<Option<RandomisationConfig>> {
        Ok(self.state().configs.get(&id).cloned())
    }

    async fn configs_for_trial(&mut self, trial: TrialId) -> StoreResult<Vec<RandomisationConfig>> {
        Ok(self
            .state()
            .configs
            .values()
            .rev()
            .filter(|c| c.trial_id == trial)
            .cloned()
            .collect())
    }

    async fn active_config(&mut self, trial: TrialId) -> StoreResult<Option<RandomisationConfig>> {
        Ok(self
            .state()
            .configs
            .values()
            .find(|c| c.trial_id == trial && c.is_active)
            .cloned())
    }

    async fn update_config(
        &mut self,
        id: ConfigId,
        patch: &ConfigPatch,
        at: DateTime<Utc>,
    ) -> StoreResult<RandomisationConfig> {
        let config = self.config_mut(id)?;
        patch.apply_to(config);
        config.updated_at = Some(at);
        Ok(config.clone())
    }

    async fn activate_config(
        &mut self,
        id: ConfigId,
        trial: TrialId,
        at: DateTime<Utc>,
    ) -> StoreResult<(RandomisationConfig, Vec<ConfigId>)> {
        let mut deactivated = Vec::new();
        for config in self.state_mut().configs.values_mut() {
            if config.trial_id == trial && config.is_active && config.id != id {
                config.is_active = false;
                config.updated_at = Some(at);
                deactivated.push(config.id);
            }
        }
        let config = self.config_mut(id)?;
        config.is_active = true;
        config.is_locked = true;
        config.activated_at = Some(at);
        config.updated_at = Some(at);
        Ok((config.clone(), deactivated))
    }

    async fn delete_unused_entries(&mut self, config: ConfigId) -> StoreResult<u64> {
        let state = self.state_mut();
        let before = state.entries.len();
        state.entries.retain(|e| e.config_id != config || e.is_used);
        Ok((before - state.entries.len()) as u64)
    }

    async fn insert_entries(&mut self, entries: &[NewSealedEntry]) -> StoreResult<u64> {
        let state = self.state_mut();
        for entry in entries {
            state.next_entry_id += 1;
            state.entries.push(SealedListEntry {
                id: state.next_entry_id,
                config_id: entry.config_id,
                sequence_number: entry.sequence_number,
                group_id: entry.group_id,
                stratum_key: entry.stratum_key.clone(),
                block_number: entry.block_number,
                randomisation_code: entry.randomisation_code.clone(),
                is_used: false,
                used_by_subject: None,
                used_at: None,
                used_by_user: None,
            });
        }
        Ok(entries.len() as u64)
    }

    async fn count_entries(&mut self, config: ConfigId) -> StoreResult<u64> {
        Ok(self
            .state()
            .entries
            .iter()
            .filter(|e| e.config_id == config)
            .count() as u64)
    }

    async fn pop_next(
        &mut self,
        config: ConfigId,
        stratum: &StratumKey,
        claim: &Claim,
    ) -> StoreResult<Option<SealedListEntry>> {
        let next = self
            .state_mut()
            .entries
            .iter_mut()
            .filter(|e| e.config_id == config && &e.stratum_key == stratum && !e.is_used)
            .min_by_key(|e| e.sequence_number);

        Ok(next.map(|entry| {
            entry.is_used = true;
            entry.used_by_subject = Some(claim.subject_id);
            entry.used_by_user = Some(claim.user_id);
            entry.used_at = Some(claim.at);
            entry.clone()
        }))
    }

    async fn entry_for_subject(
        &mut self,
        config: ConfigId,
        subject: SubjectId,
    ) -> StoreResult<Option<SealedListEntry>> {
        Ok(self
            .state()
            .entries
            .iter()
            .find(|e| e.config_id == config && e.is_used && e.used_by_subject == Some(subject))
            .cloned())
    }

    async fn entry_counts(&mut self, config: ConfigId) -> StoreResult<Vec<EntryCount>> {
        let mut cells: BTreeMap<(StratumKey, GroupId), (u64, u64)> = BTreeMap::new();
        for entry in self.state().entries.iter().filter(|e| e.config_id == config) {
            let cell = cells
                .entry((entry.stratum_key.clone(), entry.group_id))
                .or_default();
            cell.0 += 1;
            if entry.is_used {
                cell.1 += 1;
            }
        }
        Ok(cells
            .into_iter()
            .map(|((stratum_key, group_id), (total, used))| EntryCount {
                stratum_key,
                group_id,
                total,
                used,
            })
            .collect())
    }

    async fn upsert_assignment(&mut self, assignment: &Assignment) -> StoreResult<()> {
        if self.fail_assignment.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "assignment write rejected".to_string(),
            ));
        }
        self.state_mut().assignments.insert(
            (assignment.subject_id, assignment.group_class_id),
            assignment.clone(),
        );
        Ok(())
    }

    async fn append_audit(&mut self, record: &AuditRecord) -> StoreResult<()> {
        self.audit.push(record.clone());
        Ok(())
    }

    async fn commit(mut self) -> StoreResult<()> {
        if let Some(staged) = self.staged.take() {
            self.guard.state = staged;
        }
        let mut audit = std::mem::take(&mut self.audit);
        self.guard.audit.append(&mut audit);
        Ok(())
    }

    async fn rollback(self) -> StoreResult<()> {
        Ok(())
    }
}
