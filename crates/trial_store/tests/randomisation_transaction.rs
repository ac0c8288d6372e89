//! Randomisation Transaction Tests
//!
//! Slot consumption, blinding presentation, exhaustion and rollback behaviour
//! of `randomise_subject` against the in-memory store.

mod common;

use common::*;
use std::collections::BTreeSet;
use trial_core::types::{BlindingLevel, GroupLabel};
use trial_store::{ErrorKind, RandomisationError, RandomisationService, StateError};

/// Test an open-label design reveals the group name
#[tokio::test]
async fn test_open_label_returns_group_name() {
    let service = RandomisationService::new(enrolled_store(1).await);
    let config = activated(&service, block_design(8), BlindingLevel::OpenLabel).await;

    let outcome = service.randomise_subject(&investigator(), request(1)).await.unwrap();

    assert_eq!(outcome.config_id, config.id);
    assert_eq!(outcome.sequence_number, 1);
    assert_eq!(outcome.stratum_key.as_str(), "default");
    assert!(!outcome.blinded);
    let expected = if outcome.group_id == PLACEBO { "Placebo" } else { "Active" };
    assert_eq!(outcome.group_name, GroupLabel::Named(expected.to_string()));
    assert_eq!(outcome.randomisation_code, format!("RND-{}-0001", config.id));
}

/// Test a double-blind design hides the name but keeps the true group id
#[tokio::test]
async fn test_double_blind_conceals_group_name() {
    let store = enrolled_store(1).await;
    let service = RandomisationService::new(store.clone());
    let config = activated(&service, block_design(8), BlindingLevel::DoubleBlind).await;

    let outcome = service.randomise_subject(&admin(), request(1)).await.unwrap();

    assert!(outcome.blinded);
    assert_eq!(outcome.group_name, GroupLabel::Blinded);
    let first = store.entries(config.id).await.remove(0);
    assert_eq!(outcome.group_id, first.group_id);

    let json = serde_json::to_value(&outcome).unwrap();
    assert_eq!(json["groupName"], "[Blinded]");
    assert_eq!(json["groupId"], first.group_id.get());
}

/// Test the assignment and audit trail record the consumed slot
#[tokio::test]
async fn test_randomisation_writes_assignment_and_audit() {
    let store = enrolled_store(1).await;
    let service = RandomisationService::new(store.clone());
    let config = activated(&service, block_design(8), BlindingLevel::DoubleBlind).await;

    let outcome = service.randomise_subject(&investigator(), request(1)).await.unwrap();

    let assignments = store.assignments().await;
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].subject_id, subject(1));
    assert_eq!(assignments[0].group_class_id, CLASS);
    assert_eq!(assignments[0].group_id, outcome.group_id);
    assert_eq!(assignments[0].assigned_by, investigator().user_id);

    let entry = store.entries(config.id).await.remove(0);
    assert!(entry.is_used);
    assert_eq!(entry.used_by_subject, Some(subject(1)));
    assert_eq!(entry.used_by_user, Some(investigator().user_id));

    let record = store.audit_log().await.pop().unwrap();
    assert_eq!(record.entity_type, "randomization_sealed_list");
    assert_eq!(record.entity_id, entry.id);
    assert_eq!(record.old_value, None);
    assert_eq!(record.new_value.as_deref(), Some(outcome.randomisation_code.as_str()));
    assert!(record.description.contains("[Blinded]"));
    assert!(!record.description.contains("Placebo"));
    assert!(!record.description.contains("Active"));
}

/// Test a subject cannot be randomised twice under one design
#[tokio::test]
async fn test_no_double_allocation() {
    let store = enrolled_store(1).await;
    let service = RandomisationService::new(store.clone());
    let config = activated(&service, block_design(8), BlindingLevel::DoubleBlind).await;

    service.randomise_subject(&investigator(), request(1)).await.unwrap();
    let err = service
        .randomise_subject(&investigator(), request(1))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RandomisationError::State(StateError::AlreadyRandomised { .. })
    ));
    let used = store
        .entries(config.id)
        .await
        .iter()
        .filter(|e| e.is_used)
        .count();
    assert_eq!(used, 1);
}

/// Test 50 concurrent requests against 50 slots each get a distinct slot
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_randomisation_consumes_distinct_slots() {
    let store = enrolled_store(50).await;
    let service = RandomisationService::new(store.clone());
    let config = activated(&service, block_design(50), BlindingLevel::DoubleBlind).await;

    let handles: Vec<_> = (1..=50)
        .map(|n| {
            let service = service.clone();
            tokio::spawn(async move { service.randomise_subject(&investigator(), request(n)).await })
        })
        .collect();

    let mut codes = BTreeSet::new();
    let mut sequences = BTreeSet::new();
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        codes.insert(outcome.randomisation_code);
        sequences.insert(outcome.sequence_number);
    }

    assert_eq!(codes.len(), 50);
    assert_eq!(sequences, (1..=50).collect::<BTreeSet<u32>>());

    let entries = store.entries(config.id).await;
    assert!(entries.iter().all(|e| e.is_used));
    let subjects: BTreeSet<_> = entries.iter().filter_map(|e| e.used_by_subject).collect();
    assert_eq!(subjects.len(), 50);
    assert_eq!(store.assignments().await.len(), 50);
}

/// Test slots are consumed in ascending sequence order
#[tokio::test]
async fn test_slots_consumed_in_sequence_order() {
    let store = enrolled_store(5).await;
    let service = RandomisationService::new(store.clone());
    let config = activated(&service, block_design(8), BlindingLevel::OpenLabel).await;
    let entries = store.entries(config.id).await;

    for n in 1..=5 {
        let outcome = service.randomise_subject(&investigator(), request(n)).await.unwrap();
        let expected = &entries[(n - 1) as usize];
        assert_eq!(outcome.sequence_number, expected.sequence_number);
        assert_eq!(outcome.group_id, expected.group_id);
    }
}

/// Test an empty stratum is an exhaustion error and leaves no assignment
#[tokio::test]
async fn test_exhaustion_leaves_no_assignment() {
    let store = enrolled_store(3).await;
    let service = RandomisationService::new(store.clone());
    activated(&service, block_design(2), BlindingLevel::DoubleBlind).await;

    service.randomise_subject(&investigator(), request(1)).await.unwrap();
    service.randomise_subject(&investigator(), request(2)).await.unwrap();
    let audit_before = store.audit_log().await.len();

    let err = service
        .randomise_subject(&investigator(), request(3))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Exhausted);
    assert_eq!(err.kind().code(), "list_exhausted");

    assert_eq!(store.assignments().await.len(), 2);
    assert_eq!(store.audit_log().await.len(), audit_before);
}

/// Test a failed assignment write rolls back the slot consumption
#[tokio::test]
async fn test_assignment_failure_rolls_back() {
    let store = enrolled_store(1).await;
    let service = RandomisationService::new(store.clone());
    let config = activated(&service, block_design(8), BlindingLevel::DoubleBlind).await;
    let audit_before = store.audit_log().await.len();

    store.fail_next_assignment();
    let err = service
        .randomise_subject(&investigator(), request(1))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Store);

    assert!(store.entries(config.id).await.iter().all(|e| !e.is_used));
    assert!(store.assignments().await.is_empty());
    assert_eq!(store.audit_log().await.len(), audit_before);

    let outcome = service.randomise_subject(&investigator(), request(1)).await.unwrap();
    assert_eq!(outcome.sequence_number, 1);
}

/// Test stratified requests draw from the subject's own stratum
#[tokio::test]
async fn test_stratified_randomisation_uses_subject_stratum() {
    let store = enrolled_store(4).await;
    let service = RandomisationService::new(store.clone());
    activated(&service, stratified_design(16), BlindingLevel::DoubleBlind).await;

    let first = service
        .randomise_subject(&investigator(), stratified_request(1, "south", "senior"))
        .await
        .unwrap();
    assert_eq!(first.stratum_key.as_str(), "age:senior|site:south");
    assert_eq!(first.sequence_number, 1);

    let second = service
        .randomise_subject(&investigator(), stratified_request(2, "south", "senior"))
        .await
        .unwrap();
    assert_eq!(second.sequence_number, 2);

    let other = service
        .randomise_subject(&investigator(), stratified_request(3, "north", "adult"))
        .await
        .unwrap();
    assert_eq!(other.stratum_key.as_str(), "age:adult|site:north");
    assert_eq!(other.sequence_number, 1);
}

/// Test stratified designs reject incomplete or unknown covariates
#[tokio::test]
async fn test_stratified_randomisation_validates_values() {
    let store = enrolled_store(2).await;
    let service = RandomisationService::new(store.clone());
    let config = activated(&service, stratified_design(16), BlindingLevel::DoubleBlind).await;

    let err = service
        .randomise_subject(&investigator(), request(1))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().contains("site"));

    let err = service
        .randomise_subject(&investigator(), stratified_request(1, "east", "adult"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().contains("east"));

    assert!(store.entries(config.id).await.iter().all(|e| !e.is_used));
}

/// Test a trial without an active design cannot randomise
#[tokio::test]
async fn test_no_active_design() {
    let service = RandomisationService::new(enrolled_store(1).await);
    service
        .save_config(&admin(), draft(block_design(8), BlindingLevel::DoubleBlind))
        .await
        .unwrap();

    let err = service
        .randomise_subject(&investigator(), request(1))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RandomisationError::State(StateError::NoActiveDesign { .. })
    ));
}

/// Test subjects outside the trial are rejected
#[tokio::test]
async fn test_unenrolled_subject_rejected() {
    let service = RandomisationService::new(enrolled_store(1).await);
    activated(&service, block_design(8), BlindingLevel::DoubleBlind).await;

    let err = service
        .randomise_subject(&investigator(), request(7))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

/// Test monitors may not randomise
#[tokio::test]
async fn test_monitor_cannot_randomise() {
    let service = RandomisationService::new(enrolled_store(1).await);
    activated(&service, block_design(8), BlindingLevel::OpenLabel).await;

    let err = service
        .randomise_subject(&monitor(), request(1))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
}

/// Test list statistics hide per-group consumption from blinded roles
#[tokio::test]
async fn test_list_stats_respect_blinding() {
    let service = RandomisationService::new(enrolled_store(3).await);
    let config = activated(&service, block_design(8), BlindingLevel::DoubleBlind).await;
    for n in 1..=3 {
        service.randomise_subject(&investigator(), request(n)).await.unwrap();
    }

    let stats = service.list_stats(&investigator(), config.id).await.unwrap();
    assert!(stats.is_active && stats.is_locked);
    assert_eq!((stats.total, stats.used, stats.remaining), (8, 3, 5));
    assert_eq!(stats.strata.len(), 1);
    assert!(stats.strata[0].allocated.is_none());

    let stats = service.list_stats(&statistician(), config.id).await.unwrap();
    let allocated = stats.strata[0].allocated.as_ref().unwrap();
    assert_eq!(allocated.iter().map(|g| g.used).sum::<u64>(), 3);
}

/// Test open-label statistics show per-group consumption to everyone
#[tokio::test]
async fn test_list_stats_open_label() {
    let service = RandomisationService::new(enrolled_store(1).await);
    let config = activated(&service, block_design(8), BlindingLevel::OpenLabel).await;

    let stats = service.list_stats(&monitor(), config.id).await.unwrap();
    let allocated = stats.strata[0].allocated.as_ref().unwrap();
    assert_eq!(allocated.len(), 2);
    assert!(allocated.iter().all(|g| g.used == 0));
}
