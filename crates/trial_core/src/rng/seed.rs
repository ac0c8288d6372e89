//! Generator seeds.

use crate::types::ValidationError;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bytes of operating-system entropy in a freshly generated seed.
pub const SEED_BYTES: usize = 32;

/// Longest caller-supplied seed accepted.
pub const MAX_SEED_LEN: usize = 128;

/// Seed a sealed list is derived from.
///
/// `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Seed(String);

impl Seed {
    /// Draw a fresh hex-encoded seed from the operating system CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; SEED_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Accept a caller-supplied seed.
    ///
    /// Seeds are 1 to 128 printable ASCII characters without whitespace.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        if raw.is_empty() {
            return Err(ValidationError::InvalidSeed("seed must not be empty".to_string()));
        }
        if raw.len() > MAX_SEED_LEN {
            return Err(ValidationError::InvalidSeed(format!(
                "seed longer than {} characters",
                MAX_SEED_LEN
            )));
        }
        if !raw.chars().all(|c| c.is_ascii_graphic()) {
            return Err(ValidationError::InvalidSeed(
                "seed must be printable ASCII without whitespace".to_string(),
            ));
        }
        Ok(Self(raw.to_string()))
    }

    /// Seed text as stored
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Seed {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Seed::parse(&value)
    }
}

impl From<Seed> for String {
    fn from(seed: Seed) -> Self {
        seed.0
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Seed(<redacted>)")
    }
}
