//! Trial metadata for the memory backend
//!
//! The memory store has no trial datastore behind it, so trials, treatment
//! groups and enrolled subjects are seeded from a TOML file:
//!
//! ```toml
//! [[trials]]
//! id = 1
//! subjects = [101, 102, 103]
//!
//! [[trials.groups]]
//! id = 1
//! class = 10
//! name = "Placebo"
//! ```

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use trial_core::types::{GroupClassId, GroupId, SubjectId, TrialId};
use trial_store::memory::MemoryStore;

/// Fixture loading error
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("Failed to read fixtures: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse fixtures: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Treatment group entry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GroupFixture {
    pub id: GroupId,
    pub class: GroupClassId,
    pub name: String,
}

/// Trial entry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TrialFixture {
    pub id: TrialId,
    #[serde(default)]
    pub groups: Vec<GroupFixture>,
    #[serde(default)]
    pub subjects: Vec<SubjectId>,
}

/// Fixture file contents
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Fixtures {
    #[serde(default)]
    pub trials: Vec<TrialFixture>,
}

impl Fixtures {
    /// Parse fixtures from TOML text
    pub fn parse(content: &str) -> Result<Self, FixtureError> {
        Ok(toml::from_str(content)?)
    }

    /// Read fixtures from a file
    pub fn from_file(path: &Path) -> Result<Self, FixtureError> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    /// Register every trial with the store
    pub async fn load_into(&self, store: &MemoryStore) {
        for trial in &self.trials {
            for group in &trial.groups {
                store
                    .register_trial(
                        trial.id,
                        group.class,
                        &[(group.id, group.name.as_str())],
                        std::iter::empty(),
                    )
                    .await;
            }
            store
                .register_trial(
                    trial.id,
                    GroupClassId(0),
                    &[],
                    trial.subjects.iter().copied(),
                )
                .await;

            tracing::debug!(
                trial_id = %trial.id,
                groups = trial.groups.len(),
                subjects = trial.subjects.len(),
                "Trial fixture loaded"
            );
        }
    }
}
