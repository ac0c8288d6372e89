//! Stratum keys.
//!
//! A key is the canonical encoding of one combination of factor values:
//! `factor:value` pairs sorted by factor name and joined with `|`. The same
//! encoding is produced at generation time and when a subject is randomised,
//! whatever order the values were supplied in.

use crate::types::{StratificationFactor, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Key used by every non-stratified design.
pub const DEFAULT_STRATUM: &str = "default";

/// Identifier of one per-stratum queue.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StratumKey(String);

impl StratumKey {
    /// The single stratum of simple and block designs
    pub fn default_stratum() -> Self {
        Self(DEFAULT_STRATUM.to_string())
    }

    /// Canonical key for a set of `(factor, value)` pairs
    ///
    /// Pairs are always sorted by factor name, never kept in declaration
    /// order: generation and lookup both go through here and must agree.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut pairs: Vec<(&str, &str)> = pairs.into_iter().collect();
        if pairs.is_empty() {
            return Self::default_stratum();
        }
        pairs.sort_by(|a, b| a.0.cmp(b.0));
        let key = pairs
            .iter()
            .map(|(factor, value)| format!("{}:{}", factor, value))
            .collect::<Vec<_>>()
            .join("|");
        Self(key)
    }

    /// Rebuild a key read back from storage
    pub fn from_stored(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Resolve a subject's covariates against the declared factors.
    ///
    /// Every declared factor needs an allowed value and undeclared factors are
    /// rejected. There is no fallback to the default stratum.
    pub fn resolve(
        factors: &[StratificationFactor],
        values: &BTreeMap<String, String>,
    ) -> Result<Self, ValidationError> {
        if let Some(extra) = values
            .keys()
            .find(|name| !factors.iter().any(|f| &f.name == *name))
        {
            return Err(ValidationError::UnexpectedStratumValue {
                factor: extra.clone(),
            });
        }

        let mut pairs = Vec::with_capacity(factors.len());
        for factor in factors {
            let value = values
                .get(&factor.name)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ValidationError::MissingStratumValue {
                    factor: factor.name.clone(),
                })?;
            if !factor.allows(value) {
                return Err(ValidationError::UnknownStratumValue {
                    factor: factor.name.clone(),
                    value: value.to_string(),
                });
            }
            pairs.push((factor.name.as_str(), value));
        }
        Ok(Self::from_pairs(pairs))
    }

    /// Key text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StratumKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// All strata of a factor set, in generation order.
///
/// Cartesian product over factors in declaration order; the first factor
/// varies slowest and values follow their declared order.
pub fn enumerate_strata(factors: &[StratificationFactor]) -> Vec<StratumKey> {
    if factors.is_empty() {
        return vec![StratumKey::default_stratum()];
    }

    let mut combinations: Vec<Vec<(&str, &str)>> = vec![Vec::new()];
    for factor in factors {
        let mut next = Vec::with_capacity(combinations.len() * factor.values.len());
        for prefix in &combinations {
            for value in &factor.values {
                let mut combo = prefix.clone();
                combo.push((factor.name.as_str(), value.as_str()));
                next.push(combo);
            }
        }
        combinations = next;
    }

    combinations
        .into_iter()
        .map(StratumKey::from_pairs)
        .collect()
}
