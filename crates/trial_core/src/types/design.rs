//! List-shaping design parameters.
//!
//! [`AllocationDesign`] holds every field that influences the generated
//! sealed list. Changing any of them invalidates a previously generated list.

use super::error::ValidationError;
use super::ids::GroupId;
use serde::{de, Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Characters reserved by the stratum key encoding.
const RESERVED_KEY_CHARS: [char; 2] = [':', '|'];

/// Upper bound on the number of strata a factor set may expand to.
pub const MAX_STRATA: usize = 1024;

/// Upper bound on the sum of all allocation ratios.
pub const MAX_RATIO_TOTAL: u32 = 1000;

/// Upper bound on the slots in one expanded block.
pub const MAX_BLOCK_LEN: u32 = 1000;

/// Slots in a block of nominal `size`: `ratio_sum * max(1, floor(size / ratio_sum))`.
///
/// `ratio_sum` must be non-zero.
pub fn block_len(ratio_sum: u32, size: u32) -> u64 {
    u64::from(ratio_sum) * u64::from((size / ratio_sum).max(1))
}

/// Randomisation design family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesignType {
    /// Independent ratio-weighted draw per slot
    Simple,
    /// Permuted blocks honouring the allocation ratio
    Block,
    /// Permuted blocks run independently per stratum
    Stratified,
}

impl DesignType {
    /// Stable lowercase code used in storage and APIs
    pub fn as_str(&self) -> &'static str {
        match self {
            DesignType::Simple => "simple",
            DesignType::Block => "block",
            DesignType::Stratified => "stratified",
        }
    }

    /// Whether the design is built from permuted blocks
    pub fn uses_blocks(&self) -> bool {
        !matches!(self, DesignType::Simple)
    }
}

impl FromStr for DesignType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simple" => Ok(DesignType::Simple),
            "block" => Ok(DesignType::Block),
            "stratified" => Ok(DesignType::Stratified),
            other => Err(format!("unknown design type '{}'", other)),
        }
    }
}

impl fmt::Display for DesignType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much of the true assignment is withheld from trial staff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlindingLevel {
    /// Everyone sees the assigned group
    OpenLabel,
    /// Subject is blinded
    SingleBlind,
    /// Subject and investigator are blinded
    #[default]
    DoubleBlind,
    /// Subject, investigator and analyst are blinded
    TripleBlind,
}

impl BlindingLevel {
    /// Stable lowercase code used in storage and APIs
    pub fn as_str(&self) -> &'static str {
        match self {
            BlindingLevel::OpenLabel => "open_label",
            BlindingLevel::SingleBlind => "single_blind",
            BlindingLevel::DoubleBlind => "double_blind",
            BlindingLevel::TripleBlind => "triple_blind",
        }
    }

    /// Anything other than open label hides the group name
    pub fn is_blinded(&self) -> bool {
        !matches!(self, BlindingLevel::OpenLabel)
    }
}

impl FromStr for BlindingLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open_label" => Ok(BlindingLevel::OpenLabel),
            "single_blind" => Ok(BlindingLevel::SingleBlind),
            "double_blind" => Ok(BlindingLevel::DoubleBlind),
            "triple_blind" => Ok(BlindingLevel::TripleBlind),
            other => Err(format!("unknown blinding level '{}'", other)),
        }
    }
}

impl fmt::Display for BlindingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Treatment group to integer allocation weight.
///
/// Ordered by group id so cumulative sums and block contents are built in a
/// fixed order for a given design.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct AllocationRatios(BTreeMap<GroupId, u32>);

// Keys arrive as strings from JSON objects, including through flattened
// structs where serde cannot coerce them to integers itself.
impl<'de> Deserialize<'de> for AllocationRatios {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<String, u32>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(key, ratio)| {
                key.parse::<GroupId>()
                    .map(|group| (group, ratio))
                    .map_err(|_| de::Error::custom(format!("invalid treatment group id '{}'", key)))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map(Self)
    }
}

impl AllocationRatios {
    /// Wrap a group-to-ratio map
    pub fn new(ratios: BTreeMap<GroupId, u32>) -> Self {
        Self(ratios)
    }

    /// Equal allocation across the given groups
    pub fn equal(groups: impl IntoIterator<Item = GroupId>) -> Self {
        Self(groups.into_iter().map(|g| (g, 1)).collect())
    }

    /// Sum of all ratios, saturating at `u32::MAX`
    pub fn total(&self) -> u32 {
        self.0.values().fold(0u32, |acc, ratio| acc.saturating_add(*ratio))
    }

    /// Sum of all ratios, rejected above [`MAX_RATIO_TOTAL`]
    pub fn checked_total(&self) -> Result<u32, ValidationError> {
        let too_large = ValidationError::RatioTotalTooLarge {
            max: MAX_RATIO_TOTAL,
        };
        let total = self
            .0
            .values()
            .try_fold(0u32, |acc, ratio| acc.checked_add(*ratio))
            .ok_or_else(|| too_large.clone())?;
        if total > MAX_RATIO_TOTAL {
            return Err(too_large);
        }
        Ok(total)
    }

    /// Number of groups
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no group is configured
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Ratio for one group, if configured
    pub fn get(&self, group: GroupId) -> Option<u32> {
        self.0.get(&group).copied()
    }

    /// Groups and ratios in ascending group order
    pub fn iter(&self) -> impl Iterator<Item = (GroupId, u32)> + '_ {
        self.0.iter().map(|(g, r)| (*g, *r))
    }

    /// Configured groups in ascending order
    pub fn groups(&self) -> impl Iterator<Item = GroupId> + '_ {
        self.0.keys().copied()
    }

    /// Reject fewer than two groups, zero weights and oversized totals
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.0.len() < 2 {
            return Err(ValidationError::TooFewGroups {
                found: self.0.len(),
            });
        }
        if let Some((group, _)) = self.iter().find(|(_, ratio)| *ratio == 0) {
            return Err(ValidationError::ZeroRatio { group });
        }
        self.checked_total()?;
        Ok(())
    }
}

/// A baseline covariate the list is partitioned by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StratificationFactor {
    /// Factor name, e.g. `sex`
    pub name: String,
    /// Allowed values in declaration order
    pub values: Vec<String>,
}

impl StratificationFactor {
    /// Create a factor from a name and its allowed values
    pub fn new(name: impl Into<String>, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `value` is one of the declared values
    pub fn allows(&self, value: &str) -> bool {
        self.values.iter().any(|v| v == value)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        check_key_token(&self.name, "factor name")?;
        if self.values.is_empty() {
            return Err(ValidationError::factor(format!(
                "factor '{}' declares no values",
                self.name
            )));
        }
        let mut seen = BTreeSet::new();
        for value in &self.values {
            check_key_token(value, "factor value")?;
            if !seen.insert(value.as_str()) {
                return Err(ValidationError::factor(format!(
                    "factor '{}' declares value '{}' twice",
                    self.name, value
                )));
            }
        }
        Ok(())
    }
}

fn check_key_token(token: &str, what: &str) -> Result<(), ValidationError> {
    if token.trim().is_empty() {
        return Err(ValidationError::factor(format!("{} must not be blank", what)));
    }
    if token.contains(RESERVED_KEY_CHARS) {
        return Err(ValidationError::factor(format!(
            "{} '{}' must not contain ':' or '|'",
            what, token
        )));
    }
    Ok(())
}

/// Every parameter that shapes the generated list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationDesign {
    /// Design family
    pub design_type: DesignType,
    /// Nominal block size (ignored by simple designs)
    #[serde(default)]
    pub block_size: u32,
    /// Draw each block's size from `block_sizes`
    #[serde(default)]
    pub variable_block_size: bool,
    /// Alternative block sizes for variable blocking
    #[serde(default)]
    pub block_sizes: Vec<u32>,
    /// Group allocation weights
    pub ratios: AllocationRatios,
    /// Stratification factors in declaration order
    #[serde(default)]
    pub stratification_factors: Vec<StratificationFactor>,
    /// Number of slots to pre-generate
    pub total_slots: u32,
}

impl AllocationDesign {
    /// Simple design over `ratios`
    pub fn simple(ratios: AllocationRatios, total_slots: u32) -> Self {
        Self {
            design_type: DesignType::Simple,
            block_size: 0,
            variable_block_size: false,
            block_sizes: Vec::new(),
            ratios,
            stratification_factors: Vec::new(),
            total_slots,
        }
    }

    /// Fixed-size block design over `ratios`
    pub fn block(ratios: AllocationRatios, block_size: u32, total_slots: u32) -> Self {
        Self {
            design_type: DesignType::Block,
            block_size,
            ..Self::simple(ratios, total_slots)
        }
    }

    /// Stratified block design
    pub fn stratified(
        ratios: AllocationRatios,
        block_size: u32,
        factors: Vec<StratificationFactor>,
        total_slots: u32,
    ) -> Self {
        Self {
            design_type: DesignType::Stratified,
            stratification_factors: factors,
            ..Self::block(ratios, block_size, total_slots)
        }
    }

    /// Enable variable block sizes drawn from `sizes`
    pub fn with_variable_blocks(mut self, sizes: Vec<u32>) -> Self {
        self.variable_block_size = true;
        self.block_sizes = sizes;
        self
    }

    /// Number of strata the design expands to
    pub fn stratum_count(&self) -> usize {
        if self.design_type != DesignType::Stratified {
            return 1;
        }
        self.stratification_factors
            .iter()
            .map(|f| f.values.len())
            .product()
    }

    /// Reject any block size, base or alternative, whose expanded block would
    /// exceed [`MAX_BLOCK_LEN`] slots.
    pub fn check_block_lengths(&self) -> Result<(), ValidationError> {
        let ratio_sum = self.ratios.checked_total()?;
        let alternatives: &[u32] = if self.variable_block_size {
            self.block_sizes.as_slice()
        } else {
            &[]
        };
        for &size in std::iter::once(&self.block_size).chain(alternatives) {
            let len = block_len(ratio_sum, size);
            if len > u64::from(MAX_BLOCK_LEN) {
                return Err(ValidationError::block_size(format!(
                    "block size {} expands to {} slots (maximum {})",
                    size, len, MAX_BLOCK_LEN
                )));
            }
        }
        Ok(())
    }

    /// Structural validation; `max_total_slots` bounds the list length.
    pub fn validate(&self, max_total_slots: u32) -> Result<(), ValidationError> {
        self.ratios.validate()?;

        if self.total_slots == 0 || self.total_slots > max_total_slots {
            return Err(ValidationError::InvalidSlotCount {
                requested: self.total_slots,
                max: max_total_slots,
            });
        }

        if self.design_type.uses_blocks() {
            if self.block_size == 0 {
                return Err(ValidationError::block_size("block size must be at least 1"));
            }
            if self.variable_block_size {
                if self.block_sizes.is_empty() {
                    return Err(ValidationError::block_size(
                        "variable block size enabled without alternative sizes",
                    ));
                }
                if self.block_sizes.contains(&0) {
                    return Err(ValidationError::block_size(
                        "alternative block sizes must be at least 1",
                    ));
                }
            }
            self.check_block_lengths()?;
        }

        match self.design_type {
            DesignType::Stratified => {
                if self.stratification_factors.is_empty() {
                    return Err(ValidationError::MissingFactors);
                }
                let mut names = BTreeSet::new();
                let mut strata: usize = 1;
                for factor in &self.stratification_factors {
                    factor.validate()?;
                    if !names.insert(factor.name.as_str()) {
                        return Err(ValidationError::factor(format!(
                            "factor '{}' is declared twice",
                            factor.name
                        )));
                    }
                    strata = strata.saturating_mul(factor.values.len());
                }
                if strata > MAX_STRATA {
                    return Err(ValidationError::factor(format!(
                        "factors expand to {} strata (maximum {})",
                        strata, MAX_STRATA
                    )));
                }
            }
            DesignType::Simple | DesignType::Block => {
                if !self.stratification_factors.is_empty() {
                    return Err(ValidationError::UnexpectedFactors);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_arm() -> AllocationRatios {
        AllocationRatios::new(BTreeMap::from([(GroupId(1), 1), (GroupId(2), 1)]))
    }

    #[test]
    fn test_ratio_validation() {
        let one = AllocationRatios::equal([GroupId(1)]);
        assert_eq!(
            one.validate(),
            Err(ValidationError::TooFewGroups { found: 1 })
        );

        let zero = AllocationRatios::new(BTreeMap::from([(GroupId(1), 1), (GroupId(2), 0)]));
        assert_eq!(
            zero.validate(),
            Err(ValidationError::ZeroRatio { group: GroupId(2) })
        );

        assert!(two_arm().validate().is_ok());
        assert_eq!(two_arm().total(), 2);
    }

    #[test]
    fn test_ratio_total_is_bounded() {
        let overflowing = AllocationRatios::new(BTreeMap::from([(GroupId(1), u32::MAX), (GroupId(2), 1)]));
        assert_eq!(overflowing.total(), u32::MAX);
        assert_eq!(
            overflowing.validate(),
            Err(ValidationError::RatioTotalTooLarge { max: MAX_RATIO_TOTAL })
        );

        let large = AllocationRatios::new(BTreeMap::from([(GroupId(1), 50_000_000), (GroupId(2), 1)]));
        let design = AllocationDesign::block(large, 4, 10);
        assert_eq!(
            design.validate(100),
            Err(ValidationError::RatioTotalTooLarge { max: MAX_RATIO_TOTAL })
        );
        assert!(AllocationDesign::simple(overflowing, 10).validate(100).is_err());

        let at_limit = AllocationRatios::new(BTreeMap::from([(GroupId(1), 999), (GroupId(2), 1)]));
        assert_eq!(at_limit.checked_total(), Ok(MAX_RATIO_TOTAL));
    }

    #[test]
    fn test_block_length_is_bounded() {
        let design = AllocationDesign::block(two_arm(), u32::MAX, 10);
        assert!(matches!(
            design.validate(100),
            Err(ValidationError::InvalidBlockSize(_))
        ));

        let design = AllocationDesign::block(two_arm(), 4, 10).with_variable_blocks(vec![2, 5000]);
        assert!(matches!(
            design.validate(100),
            Err(ValidationError::InvalidBlockSize(_))
        ));

        let design = AllocationDesign::block(two_arm(), MAX_BLOCK_LEN, 10);
        assert!(design.validate(100).is_ok());
        assert_eq!(block_len(3, 7), 6);
        assert_eq!(block_len(3, 2), 3);
    }

    #[test]
    fn test_block_design_requires_block_size() {
        let design = AllocationDesign::block(two_arm(), 0, 10);
        assert!(matches!(
            design.validate(100),
            Err(ValidationError::InvalidBlockSize(_))
        ));
    }

    #[test]
    fn test_variable_blocks_require_sizes() {
        let design = AllocationDesign::block(two_arm(), 4, 10).with_variable_blocks(vec![]);
        assert!(design.validate(100).is_err());

        let design = AllocationDesign::block(two_arm(), 4, 10).with_variable_blocks(vec![2, 0]);
        assert!(design.validate(100).is_err());

        let design = AllocationDesign::block(two_arm(), 4, 10).with_variable_blocks(vec![2, 4, 6]);
        assert!(design.validate(100).is_ok());
    }

    #[test]
    fn test_slot_bounds() {
        let design = AllocationDesign::simple(two_arm(), 0);
        assert_eq!(
            design.validate(100),
            Err(ValidationError::InvalidSlotCount {
                requested: 0,
                max: 100
            })
        );
        let design = AllocationDesign::simple(two_arm(), 101);
        assert!(design.validate(100).is_err());
    }

    #[test]
    fn test_stratified_factor_rules() {
        let design = AllocationDesign::stratified(two_arm(), 4, vec![], 10);
        assert_eq!(design.validate(100), Err(ValidationError::MissingFactors));

        let design = AllocationDesign::stratified(
            two_arm(),
            4,
            vec![StratificationFactor::new("site", Vec::<String>::new())],
            10,
        );
        assert!(design.validate(100).is_err());

        let design = AllocationDesign::stratified(
            two_arm(),
            4,
            vec![StratificationFactor::new("age:band", ["young", "old"])],
            10,
        );
        assert!(design.validate(100).is_err());

        let design = AllocationDesign::stratified(
            two_arm(),
            4,
            vec![
                StratificationFactor::new("sex", ["F", "M"]),
                StratificationFactor::new("sex", ["F", "M"]),
            ],
            10,
        );
        assert!(design.validate(100).is_err());

        let design = AllocationDesign::stratified(
            two_arm(),
            4,
            vec![
                StratificationFactor::new("sex", ["F", "M"]),
                StratificationFactor::new("age", ["<65", ">=65"]),
            ],
            10,
        );
        assert!(design.validate(100).is_ok());
        assert_eq!(design.stratum_count(), 4);
    }

    #[test]
    fn test_factors_rejected_outside_stratified() {
        let mut design = AllocationDesign::block(two_arm(), 4, 10);
        design.stratification_factors = vec![StratificationFactor::new("sex", ["F", "M"])];
        assert_eq!(design.validate(100), Err(ValidationError::UnexpectedFactors));
    }

    #[test]
    fn test_enum_codes_round_trip() {
        for level in [
            BlindingLevel::OpenLabel,
            BlindingLevel::SingleBlind,
            BlindingLevel::DoubleBlind,
            BlindingLevel::TripleBlind,
        ] {
            assert_eq!(level.as_str().parse::<BlindingLevel>().unwrap(), level);
        }
        assert_eq!("Block".parse::<DesignType>().unwrap(), DesignType::Block);
        assert!("adaptive".parse::<DesignType>().is_err());
        assert!(!BlindingLevel::OpenLabel.is_blinded());
        assert!(BlindingLevel::SingleBlind.is_blinded());
    }

    #[test]
    fn test_ratios_deserialise_from_json_object() {
        let ratios: AllocationRatios = serde_json::from_str(r#"{"2": 1, "1": 2}"#).unwrap();
        let order: Vec<_> = ratios.iter().collect();
        assert_eq!(order, vec![(GroupId(1), 2), (GroupId(2), 1)]);
    }
}
