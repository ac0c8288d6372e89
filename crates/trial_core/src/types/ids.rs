//! Typed identifiers.
//!
//! Every table key the engine touches gets its own newtype so a subject id can
//! never be passed where a treatment group id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Returns the raw database key.
            #[inline]
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse().map(Self)
            }
        }
    };
}

id_newtype!(
    /// Identifier of a trial (`study` row).
    TrialId
);
id_newtype!(
    /// Identifier of an enrolled subject (`study_subject` row).
    SubjectId
);
id_newtype!(
    /// Identifier of a treatment group (`study_group` row).
    GroupId
);
id_newtype!(
    /// Identifier of the trial's group classification the assignment lives under.
    GroupClassId
);
id_newtype!(
    /// Identifier of a randomisation configuration.
    ConfigId
);
id_newtype!(
    /// Identifier of an authenticated user.
    UserId
);
