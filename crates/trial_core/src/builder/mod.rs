//! # Sealed List Construction
//!
//! Turns an [`AllocationDesign`] into ordered per-stratum allocation
//! sequences, consuming draws from one [`SeededGenerator`]:
//!
//! - **Simple**: one ratio-weighted draw per slot, no block structure
//! - **Block**: permuted blocks whose contents match the ratio exactly,
//!   optionally with each block's size drawn from a list of alternatives
//! - **Stratified**: the block algorithm run per stratum over
//!   `ceil(total / strata)` slots, strata visited in a fixed order against the
//!   same generator
//!
//! Given the same seed and design the output is identical, draw for draw.

mod strata;

pub use strata::{enumerate_strata, StratumKey, DEFAULT_STRATUM};

use crate::rng::SeededGenerator;
use crate::types::{
    block_len, AllocationDesign, AllocationRatios, DesignType, GroupId, ValidationError,
};
use serde::Serialize;

/// One pre-generated assignment slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationSlot {
    /// Target treatment group
    pub group_id: GroupId,
    /// 1-based block within the stratum, 0 for simple designs
    pub block_number: u32,
}

/// Ordered slots of one stratum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StratumList {
    /// Stratum the slots belong to
    pub key: StratumKey,
    /// Slots in sequence order (sequence number = index + 1)
    pub slots: Vec<AllocationSlot>,
}

/// Output of [`build_list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedList {
    /// Strata in generation order
    pub strata: Vec<StratumList>,
}

/// A slot positioned in the whole generated list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionedSlot<'a> {
    /// 1-based position across the whole list, in generation order
    pub ordinal: u32,
    /// Owning stratum
    pub stratum: &'a StratumKey,
    /// 1-based sequence number within the stratum
    pub sequence_number: u32,
    /// Slot contents
    pub slot: AllocationSlot,
}

impl GeneratedList {
    /// Number of slots over all strata
    pub fn total_slots(&self) -> usize {
        self.strata.iter().map(|s| s.slots.len()).sum()
    }

    /// Slots of one stratum
    pub fn stratum(&self, key: &StratumKey) -> Option<&StratumList> {
        self.strata.iter().find(|s| &s.key == key)
    }

    /// Every slot with its list ordinal and in-stratum sequence number
    pub fn positioned(&self) -> impl Iterator<Item = PositionedSlot<'_>> + '_ {
        self.strata
            .iter()
            .flat_map(|stratum| {
                stratum
                    .slots
                    .iter()
                    .enumerate()
                    .map(move |(index, slot)| (stratum, index, *slot))
            })
            .enumerate()
            .map(|(position, (stratum, index, slot))| PositionedSlot {
                ordinal: position as u32 + 1,
                stratum: &stratum.key,
                sequence_number: index as u32 + 1,
                slot,
            })
    }
}

/// Build the sealed list for `design`.
///
/// Only the ratio structure and block lengths are re-checked here; callers
/// validate the full design against their slot limits first.
pub fn build_list(
    design: &AllocationDesign,
    rng: &mut SeededGenerator,
) -> Result<GeneratedList, ValidationError> {
    design.ratios.validate()?;
    let total = design.total_slots as usize;

    let strata = match design.design_type {
        DesignType::Simple => vec![StratumList {
            key: StratumKey::default_stratum(),
            slots: simple_sequence(&design.ratios, total, rng),
        }],
        DesignType::Block => vec![StratumList {
            key: StratumKey::default_stratum(),
            slots: block_sequence(design, total, rng)?,
        }],
        DesignType::Stratified => {
            if design.stratification_factors.is_empty() {
                return Err(ValidationError::MissingFactors);
            }
            let keys = enumerate_strata(&design.stratification_factors);
            let per_stratum = total.div_ceil(keys.len());
            let mut lists = Vec::with_capacity(keys.len());
            for key in keys {
                let slots = block_sequence(design, per_stratum, rng)?;
                lists.push(StratumList { key, slots });
            }
            lists
        }
    };

    Ok(GeneratedList { strata })
}

/// Independent ratio-weighted draws.
fn simple_sequence(
    ratios: &AllocationRatios,
    count: usize,
    rng: &mut SeededGenerator,
) -> Vec<AllocationSlot> {
    let total = f64::from(ratios.total());
    (0..count)
        .map(|_| {
            let draw = rng.gen_uniform() * total;
            AllocationSlot {
                group_id: pick_weighted(ratios, draw),
                block_number: 0,
            }
        })
        .collect()
}

/// First group whose cumulative ratio boundary meets or exceeds `draw`.
fn pick_weighted(ratios: &AllocationRatios, draw: f64) -> GroupId {
    let mut cumulative = 0.0;
    let mut last = None;
    for (group, ratio) in ratios.iter() {
        cumulative += f64::from(ratio);
        if cumulative >= draw {
            return group;
        }
        last = Some(group);
    }
    // draw < total, so only reachable through float rounding
    last.unwrap_or(GroupId(0))
}

/// Permuted blocks until `count` slots exist; the last block may be cut short.
fn block_sequence(
    design: &AllocationDesign,
    count: usize,
    rng: &mut SeededGenerator,
) -> Result<Vec<AllocationSlot>, ValidationError> {
    let ratio_sum = design.ratios.checked_total()?;
    let variable = design.variable_block_size && !design.block_sizes.is_empty();
    if !variable && design.block_size == 0 {
        return Err(ValidationError::block_size("block size must be at least 1"));
    }
    design.check_block_lengths()?;

    let mut slots = Vec::with_capacity(count);
    let mut block_number = 0u32;
    while slots.len() < count {
        let nominal = if variable {
            design.block_sizes[rng.gen_index(design.block_sizes.len())]
        } else {
            design.block_size
        };
        block_number += 1;

        let mut block = block_contents(&design.ratios, nominal, ratio_sum);
        rng.shuffle(&mut block);

        let remaining = count - slots.len();
        slots.extend(block.into_iter().take(remaining).map(|group_id| AllocationSlot {
            group_id,
            block_number,
        }));
    }
    Ok(slots)
}

/// Multiset of a block: each group repeated `ratio * multiplier` times in
/// group order, `multiplier = max(1, floor(size / ratio_sum))`.
///
/// Block lengths are checked before this is reached.
fn block_contents(ratios: &AllocationRatios, size: u32, ratio_sum: u32) -> Vec<GroupId> {
    let multiplier = (size / ratio_sum).max(1) as usize;
    let mut block = Vec::with_capacity(block_len(ratio_sum, size) as usize);
    for (group, ratio) in ratios.iter() {
        block.extend(std::iter::repeat(group).take(ratio as usize * multiplier));
    }
    block
}
