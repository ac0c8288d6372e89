//! Core identifier, design and access types.
//!
//! This module provides:
//! - `ids`: Typed identifiers for trials, subjects, groups, configs and users
//! - `design`: The list-shaping part of a randomisation design
//! - `config`: Persisted randomisation configurations and their drafts
//! - `access`: Caller identity, roles and blinding presentation
//! - `error`: Validation errors raised before any mutation

pub mod access;
pub mod config;
pub mod design;
pub mod error;
pub mod ids;

pub use access::{Caller, GroupLabel, Role, BLINDED_PLACEHOLDER};
pub use config::{NewConfig, RandomisationConfig};
pub use design::{
    block_len, AllocationDesign, AllocationRatios, BlindingLevel, DesignType,
    StratificationFactor, MAX_BLOCK_LEN, MAX_RATIO_TOTAL,
};
pub use error::ValidationError;
pub use ids::{ConfigId, GroupClassId, GroupId, SubjectId, TrialId, UserId};
