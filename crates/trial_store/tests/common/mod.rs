//! Shared fixtures for store integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use trial_core::rng::Seed;
use trial_core::types::{
    AllocationDesign, AllocationRatios, BlindingLevel, Caller, GroupClassId, GroupId, NewConfig,
    RandomisationConfig, Role, StratificationFactor, SubjectId, TrialId, UserId,
};
use trial_store::memory::MemoryStore;
use trial_store::model::RandomiseRequest;
use trial_store::RandomisationService;

pub const TRIAL: TrialId = TrialId(1);
pub const CLASS: GroupClassId = GroupClassId(10);
pub const PLACEBO: GroupId = GroupId(1);
pub const ACTIVE: GroupId = GroupId(2);

pub fn admin() -> Caller {
    Caller::new(UserId(1), Role::Administrator)
}

pub fn data_manager() -> Caller {
    Caller::new(UserId(2), Role::DataManager)
}

pub fn investigator() -> Caller {
    Caller::new(UserId(3), Role::Investigator)
}

pub fn monitor() -> Caller {
    Caller::new(UserId(4), Role::Monitor)
}

pub fn statistician() -> Caller {
    Caller::new(UserId(5), Role::UnblindedStatistician)
}

pub fn subject(n: i64) -> SubjectId {
    SubjectId(100 + n)
}

/// Memory store with a two-arm trial and `subjects` enrolled subjects.
pub async fn enrolled_store(subjects: i64) -> MemoryStore {
    let store = MemoryStore::new();
    store
        .register_trial(
            TRIAL,
            CLASS,
            &[(PLACEBO, "Placebo"), (ACTIVE, "Active")],
            (1..=subjects).map(subject),
        )
        .await;
    store
}

pub fn two_arm() -> AllocationRatios {
    AllocationRatios::equal([PLACEBO, ACTIVE])
}

pub fn block_design(total_slots: u32) -> AllocationDesign {
    AllocationDesign::block(two_arm(), 4, total_slots)
}

pub fn stratified_design(total_slots: u32) -> AllocationDesign {
    AllocationDesign::stratified(
        two_arm(),
        4,
        vec![
            StratificationFactor::new("site", ["north", "south"]),
            StratificationFactor::new("age", ["adult", "senior"]),
        ],
        total_slots,
    )
}

/// Draft with the fixed seed `abc`.
pub fn draft(design: AllocationDesign, blinding: BlindingLevel) -> NewConfig {
    NewConfig {
        trial_id: TRIAL,
        name: "Primary allocation".to_string(),
        description: None,
        blinding,
        group_class_id: CLASS,
        design,
        seed: Some(Seed::parse("abc").unwrap()),
    }
}

/// Save, generate and activate a design.
pub async fn activated(
    service: &RandomisationService<MemoryStore>,
    design: AllocationDesign,
    blinding: BlindingLevel,
) -> RandomisationConfig {
    let config = service
        .save_config(&admin(), draft(design, blinding))
        .await
        .unwrap();
    service.generate_list(&admin(), config.id).await.unwrap();
    service.activate_config(&admin(), config.id).await.unwrap()
}

pub fn request(n: i64) -> RandomiseRequest {
    RandomiseRequest {
        trial_id: TRIAL,
        subject_id: subject(n),
        stratum_values: BTreeMap::new(),
    }
}

pub fn stratified_request(n: i64, site: &str, age: &str) -> RandomiseRequest {
    RandomiseRequest {
        stratum_values: BTreeMap::from([
            ("site".to_string(), site.to_string()),
            ("age".to_string(), age.to_string()),
        ]),
        ..request(n)
    }
}
