//! The randomisation transaction.

use super::{audit, RandomisationService, SEALED_LIST_ENTITY};
use crate::error::{RandomisationError, RandomisationResult, StateError, StoreError};
use crate::model::{Assignment, Claim, RandomisationOutcome, RandomiseRequest};
use crate::store::{RandomisationStore, StoreTransaction};
use chrono::Utc;
use trial_core::builder::StratumKey;
use trial_core::types::{Caller, DesignType, GroupLabel, RandomisationConfig, ValidationError};

impl<S: RandomisationStore> RandomisationService<S> {
    /// Assign a subject to a group by opening the next sealed envelope.
    ///
    /// Resolving the design, consuming the entry, writing the assignment and
    /// appending the audit record form one transaction. The returned group and
    /// code are needed by emergency unblinding and are never logged.
    pub async fn randomise_subject(
        &self,
        caller: &Caller,
        request: RandomiseRequest,
    ) -> RandomisationResult<RandomisationOutcome> {
        if !caller.can_randomise() {
            tracing::warn!(user_id = %caller.user_id, role = %caller.role, "Randomisation refused");
            return Err(RandomisationError::forbidden(format!(
                "role '{}' may not randomise subjects",
                caller.role
            )));
        }

        let mut tx = self.store.begin().await?;
        let result = Self::randomise_in(&mut tx, caller, &request).await;
        Self::complete(tx, result).await
    }

    async fn randomise_in(
        tx: &mut S::Tx,
        caller: &Caller,
        request: &RandomiseRequest,
    ) -> RandomisationResult<RandomisationOutcome> {
        let trial = request.trial_id;
        let subject = request.subject_id;

        let config = tx.active_config(trial).await?.ok_or_else(|| {
            tracing::warn!(trial_id = %trial, "Randomisation without active design");
            StateError::NoActiveDesign { trial }
        })?;

        if !tx.subject_enrolled(trial, subject).await? {
            return Err(ValidationError::SubjectNotEnrolled { subject, trial }.into());
        }

        if tx.entry_for_subject(config.id, subject).await?.is_some() {
            tracing::warn!(config_id = %config.id, subject_id = %subject, "Repeat randomisation refused");
            return Err(StateError::AlreadyRandomised {
                subject,
                config: config.id,
            }
            .into());
        }

        let stratum = stratum_for(&config, request)?;
        let now = Utc::now();
        let claim = Claim {
            subject_id: subject,
            user_id: caller.user_id,
            at: now,
        };

        let entry = match tx.pop_next(config.id, &stratum, &claim).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                tracing::warn!(config_id = %config.id, stratum = %stratum, "Randomisation list exhausted");
                return Err(RandomisationError::Exhausted {
                    config: config.id,
                    stratum,
                });
            }
            Err(StoreError::DuplicateSubject { config, subject }) => {
                return Err(StateError::AlreadyRandomised { subject, config }.into());
            }
            Err(err) => return Err(err.into()),
        };

        let label = GroupLabel::present(config.blinding, tx.group_name(entry.group_id).await?);

        tx.upsert_assignment(&Assignment {
            subject_id: subject,
            group_class_id: config.group_class_id,
            group_id: entry.group_id,
            assigned_by: caller.user_id,
            assigned_at: now,
            notes: format!("Randomised with code {}", entry.randomisation_code),
        })
        .await?;

        let mut record = audit(
            caller.user_id,
            SEALED_LIST_ENTITY,
            entry.id,
            format!(
                "Subject {} randomised to {}",
                subject,
                label.display_name().unwrap_or("an unknown group")
            ),
            now,
        );
        record.new_value = Some(entry.randomisation_code.clone());
        tx.append_audit(&record).await?;

        tracing::info!(
            config_id = %config.id,
            subject_id = %subject,
            stratum = %stratum,
            user_id = %caller.user_id,
            "Subject randomised"
        );

        Ok(RandomisationOutcome {
            randomisation_code: entry.randomisation_code,
            group_id: entry.group_id,
            blinded: label.is_blinded(),
            group_name: label,
            sequence_number: entry.sequence_number,
            stratum_key: entry.stratum_key,
            config_id: config.id,
            randomised_at: now,
        })
    }
}

/// Stratum queue the subject draws from.
///
/// Covariates supplied for a non-stratified design are ignored.
fn stratum_for(
    config: &RandomisationConfig,
    request: &RandomiseRequest,
) -> Result<StratumKey, ValidationError> {
    match config.design.design_type {
        DesignType::Stratified => StratumKey::resolve(
            &config.design.stratification_factors,
            &request.stratum_values,
        ),
        DesignType::Simple | DesignType::Block => Ok(StratumKey::default_stratum()),
    }
}
