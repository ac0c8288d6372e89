//! Design previews.
//!
//! Runs the list builder over a candidate design with a throwaway seed so its
//! balance can be inspected before anything is saved. Nothing here is
//! persisted.

use crate::builder::{build_list, StratumKey};
use crate::rng::{Seed, SeededGenerator};
use crate::types::{GroupId, NewConfig, ValidationError};
use serde::Serialize;

/// Default cap on preview length.
pub const DEFAULT_PREVIEW_SLOTS: u32 = 200;

/// One previewed slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewSlot {
    /// Stratum the slot belongs to
    pub stratum_key: StratumKey,
    /// 1-based sequence within the stratum
    pub sequence_number: u32,
    /// Target group
    pub group_id: GroupId,
    /// Block number, 0 for simple designs
    pub block_number: u32,
}

/// Realised share of one group.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupFrequency {
    /// Group
    pub group_id: GroupId,
    /// Slots allocated to the group
    pub count: usize,
    /// Realised percentage of all previewed slots
    pub percentage: f64,
    /// Percentage implied by the allocation ratio
    pub expected_percentage: f64,
}

/// Slot count of one previewed stratum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StratumCount {
    /// Stratum
    pub stratum_key: StratumKey,
    /// Slots generated for it
    pub count: usize,
}

/// Result of [`preview_design`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewReport {
    /// Throwaway seed the preview was drawn from
    pub seed: String,
    /// Slots the candidate design asked for
    pub requested_slots: u32,
    /// Slots actually generated
    pub generated_slots: usize,
    /// Whether the request was cut down to the preview cap
    pub truncated: bool,
    /// Generated sequence
    pub sequence: Vec<PreviewSlot>,
    /// Per-group realised frequencies, in group order
    pub frequencies: Vec<GroupFrequency>,
    /// Per-stratum slot counts
    pub strata: Vec<StratumCount>,
}

/// Preview `candidate` with a fresh seed, capped at `max_slots`.
///
/// Any seed carried by the candidate is ignored.
pub fn preview_design(candidate: &NewConfig, max_slots: u32) -> Result<PreviewReport, ValidationError> {
    preview_with_seed(candidate, max_slots, Seed::generate())
}

/// Preview with a known seed.
pub fn preview_with_seed(
    candidate: &NewConfig,
    max_slots: u32,
    seed: Seed,
) -> Result<PreviewReport, ValidationError> {
    let requested_slots = candidate.design.total_slots;
    let mut design = candidate.design.clone();
    design.total_slots = requested_slots.min(max_slots);

    if candidate.name.trim().is_empty() {
        return Err(ValidationError::BlankName);
    }
    design.validate(max_slots)?;

    let mut rng = SeededGenerator::new(seed.clone());
    let list = build_list(&design, &mut rng)?;

    // Per-stratum ceil-shares can overshoot the cap; keep the first
    // `max_slots` in generation order.
    let cap = max_slots as usize;
    let truncated = requested_slots > max_slots || list.total_slots() > cap;
    let sequence: Vec<PreviewSlot> = list
        .positioned()
        .take(cap)
        .map(|p| PreviewSlot {
            stratum_key: p.stratum.clone(),
            sequence_number: p.sequence_number,
            group_id: p.slot.group_id,
            block_number: p.slot.block_number,
        })
        .collect();

    let generated_slots = sequence.len();
    let ratio_total = f64::from(design.ratios.total());
    let frequencies = design
        .ratios
        .iter()
        .map(|(group_id, ratio)| {
            let count = sequence.iter().filter(|s| s.group_id == group_id).count();
            GroupFrequency {
                group_id,
                count,
                percentage: percentage(count as f64, generated_slots as f64),
                expected_percentage: percentage(f64::from(ratio), ratio_total),
            }
        })
        .collect();

    let mut budget = generated_slots;
    let strata = list
        .strata
        .iter()
        .map(|s| {
            let count = s.slots.len().min(budget);
            budget -= count;
            StratumCount {
                stratum_key: s.key.clone(),
                count,
            }
        })
        .collect();

    Ok(PreviewReport {
        seed: seed.as_str().to_string(),
        requested_slots,
        generated_slots,
        truncated,
        sequence,
        frequencies,
        strata,
    })
}

fn percentage(part: f64, whole: f64) -> f64 {
    if whole == 0.0 {
        0.0
    } else {
        part / whole * 100.0
    }
}
