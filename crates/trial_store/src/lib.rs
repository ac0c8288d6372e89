//! # trial_store: Persistence and Transactions for Trial Randomisation
//!
//! ## Layer 2 (Engine) Role
//!
//! trial_store sits on top of `trial_core` and owns everything with side
//! effects:
//! - The configuration store and its draft → generated → active lifecycle
//! - The sealed list store with skip-locked consumption
//! - The randomisation transaction (entry, assignment and audit in one unit)
//! - Store backends: in-memory for tests and development, PostgreSQL for
//!   production
//!
//! ## Transaction Discipline
//!
//! Every operation of [`RandomisationService`] opens one transaction through
//! the [`RandomisationStore`] trait and either commits all of its writes or
//! none of them.
//!
//! ## Usage Examples
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use trial_store::memory::MemoryStore;
//! use trial_store::model::RandomiseRequest;
//! use trial_store::RandomisationService;
//! use trial_core::types::*;
//!
//! # tokio_test::block_on(async {
//! let store = MemoryStore::new();
//! store
//!     .register_trial(TrialId(1), GroupClassId(1), &[(GroupId(1), "Placebo"), (GroupId(2), "Active")], [SubjectId(100)])
//!     .await;
//! let service = RandomisationService::new(store);
//! let admin = Caller::new(UserId(1), Role::Administrator);
//!
//! let ratios = AllocationRatios::equal([GroupId(1), GroupId(2)]);
//! let draft = NewConfig {
//!     trial_id: TrialId(1),
//!     name: "Main".to_string(),
//!     description: None,
//!     blinding: BlindingLevel::OpenLabel,
//!     group_class_id: GroupClassId(1),
//!     design: AllocationDesign::block(ratios, 4, 8),
//!     seed: None,
//! };
//! let config = service.save_config(&admin, draft).await.unwrap();
//! service.generate_list(&admin, config.id).await.unwrap();
//! service.activate_config(&admin, config.id).await.unwrap();
//!
//! let request = RandomiseRequest {
//!     trial_id: TrialId(1),
//!     subject_id: SubjectId(100),
//!     stratum_values: BTreeMap::new(),
//! };
//! let outcome = service.randomise_subject(&admin, request).await.unwrap();
//! assert_eq!(outcome.sequence_number, 1);
//! # });
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod error;
pub mod memory;
pub mod model;
pub mod patch;
pub mod postgres;
pub mod service;
pub mod store;

pub use error::{
    ErrorKind, RandomisationError, RandomisationResult, StateError, StoreError, StoreResult,
};
pub use service::{EngineSettings, RandomisationService};
pub use store::{RandomisationStore, RowLock, StoreTransaction};
