//! Validation errors.
//!
//! Raised before any state is touched. The `Display` text is surfaced to the
//! caller verbatim, so every message names the offending value.

use super::ids::{GroupId, SubjectId, TrialId};
use thiserror::Error;

/// A design or request that cannot be accepted as given.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Fewer than two treatment groups carry an allocation ratio.
    #[error("At least two treatment groups are required (found {found})")]
    TooFewGroups {
        /// Number of groups supplied
        found: usize,
    },

    /// A group was given a ratio of zero.
    #[error("Allocation ratio for group {group} must be at least 1")]
    ZeroRatio {
        /// Offending group
        group: GroupId,
    },

    /// Ratios sum past the supported maximum.
    #[error("Allocation ratios must sum to at most {max}")]
    RatioTotalTooLarge {
        /// Maximum allowed sum
        max: u32,
    },

    /// A ratio names a group the trial does not define.
    #[error("Treatment group {group} is not defined for this trial")]
    UnknownGroup {
        /// Offending group
        group: GroupId,
    },

    /// Block size configuration is unusable.
    #[error("Invalid block size: {0}")]
    InvalidBlockSize(String),

    /// Requested slot count is zero or above the allowed maximum.
    #[error("Total slots must be between 1 and {max} (got {requested})")]
    InvalidSlotCount {
        /// Requested count
        requested: u32,
        /// Maximum allowed
        max: u32,
    },

    /// Stratified design without any factor.
    #[error("A stratified design requires at least one stratification factor")]
    MissingFactors,

    /// Factors supplied for a design that does not stratify.
    #[error("Stratification factors are only allowed for stratified designs")]
    UnexpectedFactors,

    /// A factor definition is malformed.
    #[error("Invalid stratification factor: {0}")]
    InvalidFactor(String),

    /// No value supplied for a declared factor at randomisation time.
    #[error("Missing value for stratification factor '{factor}'")]
    MissingStratumValue {
        /// Factor name
        factor: String,
    },

    /// Value outside the factor's declared set.
    #[error("Value '{value}' is not allowed for stratification factor '{factor}'")]
    UnknownStratumValue {
        /// Factor name
        factor: String,
        /// Supplied value
        value: String,
    },

    /// Value supplied for a factor the design does not declare.
    #[error("'{factor}' is not a stratification factor of this design")]
    UnexpectedStratumValue {
        /// Supplied factor name
        factor: String,
    },

    /// Caller-supplied seed is malformed.
    #[error("Invalid seed: {0}")]
    InvalidSeed(String),

    /// Configuration name is empty.
    #[error("Configuration name must not be blank")]
    BlankName,

    /// Subject is not enrolled in the trial being randomised.
    #[error("Subject {subject} is not enrolled in trial {trial}")]
    SubjectNotEnrolled {
        /// Subject
        subject: SubjectId,
        /// Trial
        trial: TrialId,
    },

    /// A configuration patch carries no fields or inconsistent fields.
    #[error("Invalid update: {0}")]
    InvalidPatch(String),
}

impl ValidationError {
    /// Create a block size error
    pub fn block_size(msg: impl Into<String>) -> Self {
        Self::InvalidBlockSize(msg.into())
    }

    /// Create a factor definition error
    pub fn factor(msg: impl Into<String>) -> Self {
        Self::InvalidFactor(msg.into())
    }
}
