//! Field-mask configuration updates.
//!
//! A [`ConfigPatch`] names exactly the columns it changes through
//! [`ConfigField`], so backends build partial `UPDATE`s from a closed set of
//! column names instead of assembling SQL from request keys.

use serde::Deserialize;
use std::collections::BTreeSet;
use trial_core::types::{
    AllocationRatios, BlindingLevel, DesignType, GroupClassId, RandomisationConfig,
    StratificationFactor, ValidationError,
};

/// A patchable configuration column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConfigField {
    /// `name`
    Name,
    /// `description`
    Description,
    /// `blinding`
    Blinding,
    /// `group_class_id`
    GroupClass,
    /// `design_type`
    DesignType,
    /// `block_size`
    BlockSize,
    /// `variable_block_size`
    VariableBlockSize,
    /// `block_sizes`
    BlockSizes,
    /// `ratios`
    Ratios,
    /// `stratification_factors`
    StratificationFactors,
    /// `total_slots`
    TotalSlots,
}

impl ConfigField {
    /// Column name in `randomization_config`
    pub const fn column(self) -> &'static str {
        match self {
            ConfigField::Name => "name",
            ConfigField::Description => "description",
            ConfigField::Blinding => "blinding",
            ConfigField::GroupClass => "group_class_id",
            ConfigField::DesignType => "design_type",
            ConfigField::BlockSize => "block_size",
            ConfigField::VariableBlockSize => "variable_block_size",
            ConfigField::BlockSizes => "block_sizes",
            ConfigField::Ratios => "ratios",
            ConfigField::StratificationFactors => "stratification_factors",
            ConfigField::TotalSlots => "total_slots",
        }
    }

    /// Whether changing the field invalidates a generated list
    pub const fn shapes_list(self) -> bool {
        !matches!(
            self,
            ConfigField::Name | ConfigField::Description | ConfigField::Blinding
        )
    }
}

/// Partial update of a draft configuration.
///
/// Seed, trial, creator and lifecycle flags are not patchable. An empty
/// `description` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConfigPatch {
    /// New name
    pub name: Option<String>,
    /// New description
    pub description: Option<String>,
    /// New blinding level
    pub blinding: Option<BlindingLevel>,
    /// New group classification
    pub group_class_id: Option<GroupClassId>,
    /// New design type
    pub design_type: Option<DesignType>,
    /// New base block size
    pub block_size: Option<u32>,
    /// Toggle variable block sizes
    pub variable_block_size: Option<bool>,
    /// New alternative block sizes
    pub block_sizes: Option<Vec<u32>>,
    /// New allocation ratios
    pub ratios: Option<AllocationRatios>,
    /// New stratification factors
    pub stratification_factors: Option<Vec<StratificationFactor>>,
    /// New slot count
    pub total_slots: Option<u32>,
}

impl ConfigPatch {
    /// Empty patch
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the description
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the blinding level
    pub fn blinding(mut self, blinding: BlindingLevel) -> Self {
        self.blinding = Some(blinding);
        self
    }

    /// Set the base block size
    pub fn block_size(mut self, size: u32) -> Self {
        self.block_size = Some(size);
        self
    }

    /// Set the allocation ratios
    pub fn ratios(mut self, ratios: AllocationRatios) -> Self {
        self.ratios = Some(ratios);
        self
    }

    /// Set the slot count
    pub fn total_slots(mut self, slots: u32) -> Self {
        self.total_slots = Some(slots);
        self
    }

    /// Columns this patch writes, in a fixed order
    pub fn fields(&self) -> BTreeSet<ConfigField> {
        let mut fields = BTreeSet::new();
        let mut mark = |present: bool, field: ConfigField| {
            if present {
                fields.insert(field);
            }
        };
        mark(self.name.is_some(), ConfigField::Name);
        mark(self.description.is_some(), ConfigField::Description);
        mark(self.blinding.is_some(), ConfigField::Blinding);
        mark(self.group_class_id.is_some(), ConfigField::GroupClass);
        mark(self.design_type.is_some(), ConfigField::DesignType);
        mark(self.block_size.is_some(), ConfigField::BlockSize);
        mark(self.variable_block_size.is_some(), ConfigField::VariableBlockSize);
        mark(self.block_sizes.is_some(), ConfigField::BlockSizes);
        mark(self.ratios.is_some(), ConfigField::Ratios);
        mark(
            self.stratification_factors.is_some(),
            ConfigField::StratificationFactors,
        );
        mark(self.total_slots.is_some(), ConfigField::TotalSlots);
        fields
    }

    /// Whether any written field invalidates a generated list
    pub fn shapes_list(&self) -> bool {
        self.fields().into_iter().any(ConfigField::shapes_list)
    }

    /// Reject patches that write nothing
    pub fn ensure_not_empty(&self) -> Result<(), ValidationError> {
        if self.fields().is_empty() {
            return Err(ValidationError::InvalidPatch(
                "no updatable fields supplied".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply the masked fields to `config`
    pub fn apply_to(&self, config: &mut RandomisationConfig) {
        if let Some(name) = &self.name {
            config.name = name.clone();
        }
        if let Some(description) = &self.description {
            config.description = if description.trim().is_empty() {
                None
            } else {
                Some(description.clone())
            };
        }
        if let Some(blinding) = self.blinding {
            config.blinding = blinding;
        }
        if let Some(class) = self.group_class_id {
            config.group_class_id = class;
        }
        let design = &mut config.design;
        if let Some(design_type) = self.design_type {
            design.design_type = design_type;
        }
        if let Some(size) = self.block_size {
            design.block_size = size;
        }
        if let Some(variable) = self.variable_block_size {
            design.variable_block_size = variable;
        }
        if let Some(sizes) = &self.block_sizes {
            design.block_sizes = sizes.clone();
        }
        if let Some(ratios) = &self.ratios {
            design.ratios = ratios.clone();
        }
        if let Some(factors) = &self.stratification_factors {
            design.stratification_factors = factors.clone();
        }
        if let Some(slots) = self.total_slots {
            design.total_slots = slots;
        }
    }
}
