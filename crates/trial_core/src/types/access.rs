//! Caller identity and blinding presentation.

use super::design::BlindingLevel;
use super::ids::UserId;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Text returned in place of a group name under blinding.
pub const BLINDED_PLACEHOLDER: &str = "[Blinded]";

/// Role supplied by the authentication layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Trial system administrator
    Administrator,
    /// Data manager maintaining trial set-up
    DataManager,
    /// Site investigator
    Investigator,
    /// Site research coordinator
    Coordinator,
    /// Read-only monitor
    Monitor,
    /// Independent statistician allowed to see allocations
    UnblindedStatistician,
}

impl Role {
    /// Stable lowercase code
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Administrator => "administrator",
            Role::DataManager => "data_manager",
            Role::Investigator => "investigator",
            Role::Coordinator => "coordinator",
            Role::Monitor => "monitor",
            Role::UnblindedStatistician => "unblinded_statistician",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "administrator" | "admin" => Ok(Role::Administrator),
            "data_manager" => Ok(Role::DataManager),
            "investigator" => Ok(Role::Investigator),
            "coordinator" => Ok(Role::Coordinator),
            "monitor" => Ok(Role::Monitor),
            "unblinded_statistician" => Ok(Role::UnblindedStatistician),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authenticated caller of an engine operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Caller {
    /// User id recorded in audit entries
    pub user_id: UserId,
    /// Role granted by the authentication layer
    pub role: Role,
}

impl Caller {
    /// Create a caller
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    /// May create, edit, generate and activate designs
    pub fn can_configure(&self) -> bool {
        matches!(self.role, Role::Administrator | Role::DataManager)
    }

    /// May randomise subjects
    pub fn can_randomise(&self) -> bool {
        !matches!(self.role, Role::Monitor)
    }

    /// May see which group consumed slots went to under `blinding`
    pub fn can_view_allocation(&self, blinding: BlindingLevel) -> bool {
        !blinding.is_blinded()
            || matches!(self.role, Role::Administrator | Role::UnblindedStatistician)
    }
}

/// Presented group name.
///
/// Keeps "hidden on purpose" distinct from "could not be resolved".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupLabel {
    /// Resolved, visible group name
    Named(String),
    /// Withheld because the design is blinded
    Blinded,
    /// Group no longer present in the trial metadata
    Unknown,
}

impl GroupLabel {
    /// Label for `name` under `blinding`
    pub fn present(blinding: BlindingLevel, name: Option<String>) -> Self {
        if blinding.is_blinded() {
            return GroupLabel::Blinded;
        }
        match name {
            Some(name) => GroupLabel::Named(name),
            None => GroupLabel::Unknown,
        }
    }

    /// Text shown to trial staff, `None` when unresolved
    pub fn display_name(&self) -> Option<&str> {
        match self {
            GroupLabel::Named(name) => Some(name),
            GroupLabel::Blinded => Some(BLINDED_PLACEHOLDER),
            GroupLabel::Unknown => None,
        }
    }

    /// Whether the label hides the true name
    pub fn is_blinded(&self) -> bool {
        matches!(self, GroupLabel::Blinded)
    }
}

impl Serialize for GroupLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.display_name() {
            Some(name) => serializer.serialize_str(name),
            None => serializer.serialize_none(),
        }
    }
}
