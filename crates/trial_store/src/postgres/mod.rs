//! PostgreSQL store.
//!
//! One [`PgTransaction`] wraps one database transaction. Sealed entries are
//! claimed with `FOR UPDATE SKIP LOCKED`, so concurrent randomisations against
//! the same stratum each take a distinct row without blocking on each other.
//! Partial unique indexes back the one-active-design and one-slot-per-subject
//! rules; their violations surface as typed [`StoreError`] variants.

mod rows;

use crate::error::{StoreError, StoreResult};
use crate::model::{
    Assignment, AuditRecord, Claim, EntryCount, NewSealedEntry, SealedListEntry, TreatmentGroup,
};
use crate::patch::{ConfigField, ConfigPatch};
use crate::store::{RandomisationStore, RowLock, StoreTransaction};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rows::{config_from_row, entry_from_row, signed, CONFIG_COLUMNS, ENTRY_COLUMNS};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder, Row, Transaction};
use trial_core::builder::StratumKey;
use trial_core::rng::Seed;
use trial_core::types::{
    ConfigId, GroupClassId, GroupId, NewConfig, RandomisationConfig, SubjectId, TrialId, UserId,
};

const ACTIVE_INDEX: &str = "uq_randomization_config_active";
const SUBJECT_INDEX: &str = "uq_sealed_list_subject";

/// Rows per bulk `INSERT`, well under the bind parameter limit.
const INSERT_CHUNK: usize = 1000;

/// Pool-backed Postgres store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect a pool of at most `max_connections`
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        tracing::info!(max_connections, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("Schema migrations applied");
        Ok(())
    }

    /// Underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RandomisationStore for PgStore {
    type Tx = PgTransaction;

    async fn begin(&self) -> StoreResult<Self::Tx> {
        let tx = self.pool.begin().await?;
        Ok(PgTransaction { tx })
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

/// One open database transaction.
pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

fn violates(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            db.is_unique_violation() && db.constraint() == Some(constraint)
        }
        _ => false,
    }
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn trial_groups(
        &mut self,
        trial: TrialId,
        class: GroupClassId,
    ) -> StoreResult<Vec<TreatmentGroup>> {
        let rows = sqlx::query(
            "SELECT study_group_id, study_group_class_id, name FROM study_group \
             WHERE study_id = $1 AND study_group_class_id = $2 ORDER BY study_group_id",
        )
        .bind(trial.get())
        .bind(class.get())
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter()
            .map(|row| -> StoreResult<TreatmentGroup> {
                Ok(TreatmentGroup {
                    id: GroupId(row.try_get("study_group_id")?),
                    group_class_id: GroupClassId(row.try_get("study_group_class_id")?),
                    name: row.try_get("name")?,
                })
            })
            .collect()
    }

    async fn group_name(&mut self, group: GroupId) -> StoreResult<Option<String>> {
        let name = sqlx::query_scalar::<_, String>(
            "SELECT name FROM study_group WHERE study_group_id = $1",
        )
        .bind(group.get())
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(name)
    }

    async fn subject_enrolled(&mut self, trial: TrialId, subject: SubjectId) -> StoreResult<bool> {
        let enrolled = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM study_subject WHERE study_subject_id = $1 AND study_id = $2)",
        )
        .bind(subject.get())
        .bind(trial.get())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(enrolled)
    }

    async fn insert_config(
        &mut self,
        new: NewConfig,
        seed: Seed,
        created_by: UserId,
        created_at: DateTime<Utc>,
    ) -> StoreResult<RandomisationConfig> {
        let design = &new.design;
        let sql = format!(
            "INSERT INTO randomization_config (trial_id, name, description, blinding, \
             group_class_id, design_type, block_size, variable_block_size, block_sizes, ratios, \
             stratification_factors, seed, total_slots, created_by, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
             RETURNING {}",
            CONFIG_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(new.trial_id.get())
            .bind(&new.name)
            .bind(&new.description)
            .bind(new.blinding.as_str())
            .bind(new.group_class_id.get())
            .bind(design.design_type.as_str())
            .bind(signed(design.block_size, "block_size")?)
            .bind(design.variable_block_size)
            .bind(Json(&design.block_sizes))
            .bind(Json(&design.ratios))
            .bind(Json(&design.stratification_factors))
            .bind(seed.as_str())
            .bind(signed(design.total_slots, "total_slots")?)
            .bind(created_by.get())
            .bind(created_at)
            .fetch_one(&mut *self.tx)
            .await?;
        config_from_row(&row)
    }

    async fn config(
        &mut self,
        id: ConfigId,
        lock: RowLock,
    ) -> StoreResult<Option<RandomisationConfig>> {
        let suffix = match lock {
            RowLock::None => "",
            RowLock::ForUpdate => " FOR UPDATE",
        };
        let sql = format!(
            "SELECT {} FROM randomization_config WHERE id = $1{}",
            CONFIG_COLUMNS, suffix
        );
        let row = sqlx::query(&sql)
            .bind(id.get())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(config_from_row).transpose()
    }

    async fn configs_for_trial(&mut self, trial: TrialId) -> StoreResult<Vec<RandomisationConfig>> {
        let sql = format!(
            "SELECT {} FROM randomization_config WHERE trial_id = $1 ORDER BY id DESC",
            CONFIG_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(trial.get())
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(config_from_row).collect()
    }

    async fn active_config(&mut self, trial: TrialId) -> StoreResult<Option<RandomisationConfig>> {
        let sql = format!(
            "SELECT {} FROM randomization_config WHERE trial_id = $1 AND is_active",
            CONFIG_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(trial.get())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(config_from_row).transpose()
    }

    async fn update_config(
        &mut self,
        id: ConfigId,
        patch: &ConfigPatch,
        at: DateTime<Utc>,
    ) -> StoreResult<RandomisationConfig> {
        let mut query: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("UPDATE randomization_config SET ");
        {
            let mut set = query.separated(", ");
            for field in patch.fields() {
                set.push(field.column());
                set.push_unseparated(" = ");
                match field {
                    ConfigField::Name => {
                        set.push_bind_unseparated(patch.name.clone());
                    }
                    ConfigField::Description => {
                        let description = patch
                            .description
                            .clone()
                            .filter(|d| !d.trim().is_empty());
                        set.push_bind_unseparated(description);
                    }
                    ConfigField::Blinding => {
                        set.push_bind_unseparated(patch.blinding.map(|b| b.as_str()));
                    }
                    ConfigField::GroupClass => {
                        set.push_bind_unseparated(patch.group_class_id.map(|c| c.get()));
                    }
                    ConfigField::DesignType => {
                        set.push_bind_unseparated(patch.design_type.map(|d| d.as_str()));
                    }
                    ConfigField::BlockSize => {
                        let size = patch
                            .block_size
                            .map(|s| signed(s, "block_size"))
                            .transpose()?;
                        set.push_bind_unseparated(size);
                    }
                    ConfigField::VariableBlockSize => {
                        set.push_bind_unseparated(patch.variable_block_size);
                    }
                    ConfigField::BlockSizes => {
                        set.push_bind_unseparated(patch.block_sizes.clone().map(Json));
                    }
                    ConfigField::Ratios => {
                        set.push_bind_unseparated(patch.ratios.clone().map(Json));
                    }
                    ConfigField::StratificationFactors => {
                        set.push_bind_unseparated(patch.stratification_factors.clone().map(Json));
                    }
                    ConfigField::TotalSlots => {
                        let slots = patch
                            .total_slots
                            .map(|s| signed(s, "total_slots"))
                            .transpose()?;
                        set.push_bind_unseparated(slots);
                    }
                }
            }
            set.push("updated_at = ");
            set.push_bind_unseparated(at);
        }
        query.push(" WHERE id = ");
        query.push_bind(id.get());
        query.push(" RETURNING ");
        query.push(CONFIG_COLUMNS);

        let row = query
            .build()
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| StoreError::Missing(format!("randomisation config {}", id)))?;
        tracing::debug!(config_id = %id, fields = patch.fields().len(), "Configuration row updated");
        config_from_row(&row)
    }

    async fn activate_config(
        &mut self,
        id: ConfigId,
        trial: TrialId,
        at: DateTime<Utc>,
    ) -> StoreResult<(RandomisationConfig, Vec<ConfigId>)> {
        let deactivated = sqlx::query_scalar::<_, i64>(
            "UPDATE randomization_config SET is_active = FALSE, updated_at = $1 \
             WHERE trial_id = $2 AND is_active AND id <> $3 RETURNING id",
        )
        .bind(at)
        .bind(trial.get())
        .bind(id.get())
        .fetch_all(&mut *self.tx)
        .await?;

        let sql = format!(
            "UPDATE randomization_config SET is_active = TRUE, is_locked = TRUE, \
             activated_at = $1, updated_at = $1 WHERE id = $2 RETURNING {}",
            CONFIG_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(at)
            .bind(id.get())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|err| {
                if violates(&err, ACTIVE_INDEX) {
                    StoreError::ActiveConflict { trial }
                } else {
                    StoreError::from(err)
                }
            })?
            .ok_or_else(|| StoreError::Missing(format!("randomisation config {}", id)))?;

        Ok((
            config_from_row(&row)?,
            deactivated.into_iter().map(ConfigId).collect(),
        ))
    }

    async fn delete_unused_entries(&mut self, config: ConfigId) -> StoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM randomization_sealed_list WHERE config_id = $1 AND NOT is_used",
        )
        .bind(config.get())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn insert_entries(&mut self, entries: &[NewSealedEntry]) -> StoreResult<u64> {
        let mut inserted = 0;
        for chunk in entries.chunks(INSERT_CHUNK) {
            let mut rows = Vec::with_capacity(chunk.len());
            for entry in chunk {
                rows.push((
                    entry,
                    signed(entry.sequence_number, "sequence_number")?,
                    signed(entry.block_number, "block_number")?,
                ));
            }
            let mut query: QueryBuilder<'_, Postgres> = QueryBuilder::new(
                "INSERT INTO randomization_sealed_list \
                 (config_id, sequence_number, group_id, stratum_key, block_number, randomization_code) ",
            );
            query.push_values(rows, |mut b, (entry, sequence, block)| {
                b.push_bind(entry.config_id.get())
                    .push_bind(sequence)
                    .push_bind(entry.group_id.get())
                    .push_bind(entry.stratum_key.as_str().to_string())
                    .push_bind(block)
                    .push_bind(entry.randomisation_code.clone());
            });
            let result = query.build().execute(&mut *self.tx).await?;
            inserted += result.rows_affected();
        }
        tracing::debug!(inserted, "Sealed entries inserted");
        Ok(inserted)
    }

    async fn count_entries(&mut self, config: ConfigId) -> StoreResult<u64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM randomization_sealed_list WHERE config_id = $1",
        )
        .bind(config.get())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn pop_next(
        &mut self,
        config: ConfigId,
        stratum: &StratumKey,
        claim: &Claim,
    ) -> StoreResult<Option<SealedListEntry>> {
        let sql = format!(
            "UPDATE randomization_sealed_list \
             SET is_used = TRUE, used_by_subject_id = $3, used_by_user_id = $4, used_at = $5 \
             WHERE id = ( \
                 SELECT id FROM randomization_sealed_list \
                 WHERE config_id = $1 AND stratum_key = $2 AND NOT is_used \
                 ORDER BY sequence_number \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {}",
            ENTRY_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(config.get())
            .bind(stratum.as_str())
            .bind(claim.subject_id.get())
            .bind(claim.user_id.get())
            .bind(claim.at)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|err| {
                if violates(&err, SUBJECT_INDEX) {
                    StoreError::DuplicateSubject {
                        config,
                        subject: claim.subject_id,
                    }
                } else {
                    StoreError::from(err)
                }
            })?;
        row.as_ref().map(entry_from_row).transpose()
    }

    async fn entry_for_subject(
        &mut self,
        config: ConfigId,
        subject: SubjectId,
    ) -> StoreResult<Option<SealedListEntry>> {
        let sql = format!(
            "SELECT {} FROM randomization_sealed_list \
             WHERE config_id = $1 AND used_by_subject_id = $2 AND is_used",
            ENTRY_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(config.get())
            .bind(subject.get())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(entry_from_row).transpose()
    }

    async fn entry_counts(&mut self, config: ConfigId) -> StoreResult<Vec<EntryCount>> {
        let rows = sqlx::query(
            "SELECT stratum_key, group_id, COUNT(*) AS total, \
             COUNT(*) FILTER (WHERE is_used) AS used \
             FROM randomization_sealed_list WHERE config_id = $1 \
             GROUP BY stratum_key, group_id ORDER BY stratum_key, group_id",
        )
        .bind(config.get())
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter()
            .map(|row| -> StoreResult<EntryCount> {
                let stratum_key: String = row.try_get("stratum_key")?;
                let total: i64 = row.try_get("total")?;
                let used: i64 = row.try_get("used")?;
                Ok(EntryCount {
                    stratum_key: StratumKey::from_stored(stratum_key),
                    group_id: GroupId(row.try_get("group_id")?),
                    total: total.max(0) as u64,
                    used: used.max(0) as u64,
                })
            })
            .collect()
    }

    async fn upsert_assignment(&mut self, assignment: &Assignment) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO subject_group_map \
             (study_subject_id, study_group_class_id, study_group_id, assigned_by, assigned_at, notes) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (study_subject_id, study_group_class_id) DO UPDATE SET \
             study_group_id = EXCLUDED.study_group_id, assigned_by = EXCLUDED.assigned_by, \
             assigned_at = EXCLUDED.assigned_at, notes = EXCLUDED.notes",
        )
        .bind(assignment.subject_id.get())
        .bind(assignment.group_class_id.get())
        .bind(assignment.group_id.get())
        .bind(assignment.assigned_by.get())
        .bind(assignment.assigned_at)
        .bind(&assignment.notes)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn append_audit(&mut self, record: &AuditRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO audit_log_event \
             (user_id, entity_type, entity_id, old_value, new_value, description, recorded_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(record.actor.get())
        .bind(&record.entity_type)
        .bind(record.entity_id)
        .bind(&record.old_value)
        .bind(&record.new_value)
        .bind(&record.description)
        .bind(record.recorded_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
