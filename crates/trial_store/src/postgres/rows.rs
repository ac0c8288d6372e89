//! Row mapping between Postgres and the model types.

use crate::error::{StoreError, StoreResult};
use crate::model::SealedListEntry;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::Row;
use trial_core::builder::StratumKey;
use trial_core::rng::Seed;
use trial_core::types::{
    AllocationDesign, AllocationRatios, BlindingLevel, ConfigId, DesignType, GroupClassId, GroupId,
    RandomisationConfig, StratificationFactor, SubjectId, TrialId, UserId,
};

/// Column list matching [`config_from_row`]
pub(crate) const CONFIG_COLUMNS: &str = "id, trial_id, name, description, blinding, \
     group_class_id, design_type, block_size, variable_block_size, block_sizes, ratios, \
     stratification_factors, seed, total_slots, is_active, is_locked, created_by, created_at, \
     updated_at, activated_at";

/// Column list matching [`entry_from_row`]
pub(crate) const ENTRY_COLUMNS: &str = "id, config_id, sequence_number, group_id, stratum_key, \
     block_number, randomization_code, is_used, used_by_subject_id, used_at, used_by_user_id";

fn unsigned(value: i32, column: &str) -> StoreResult<u32> {
    u32::try_from(value).map_err(|_| StoreError::corrupt(format!("negative {}: {}", column, value)))
}

/// Map `u32` model values onto `INTEGER` columns
pub(crate) fn signed(value: u32, column: &str) -> StoreResult<i32> {
    i32::try_from(value)
        .map_err(|_| StoreError::corrupt(format!("{} out of range: {}", column, value)))
}

pub(crate) fn config_from_row(row: &PgRow) -> StoreResult<RandomisationConfig> {
    let blinding: String = row.try_get("blinding")?;
    let design_type: String = row.try_get("design_type")?;
    let seed: String = row.try_get("seed")?;
    let Json(block_sizes): Json<Vec<u32>> = row.try_get("block_sizes")?;
    let Json(ratios): Json<AllocationRatios> = row.try_get("ratios")?;
    let Json(stratification_factors): Json<Vec<StratificationFactor>> =
        row.try_get("stratification_factors")?;

    let design = AllocationDesign {
        design_type: design_type
            .parse::<DesignType>()
            .map_err(StoreError::corrupt)?,
        block_size: unsigned(row.try_get("block_size")?, "block_size")?,
        variable_block_size: row.try_get("variable_block_size")?,
        block_sizes,
        ratios,
        stratification_factors,
        total_slots: unsigned(row.try_get("total_slots")?, "total_slots")?,
    };

    Ok(RandomisationConfig {
        id: ConfigId(row.try_get("id")?),
        trial_id: TrialId(row.try_get("trial_id")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        blinding: blinding
            .parse::<BlindingLevel>()
            .map_err(StoreError::corrupt)?,
        group_class_id: GroupClassId(row.try_get("group_class_id")?),
        design,
        seed: Seed::parse(&seed).map_err(|e| StoreError::corrupt(e.to_string()))?,
        is_active: row.try_get("is_active")?,
        is_locked: row.try_get("is_locked")?,
        created_by: UserId(row.try_get("created_by")?),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        activated_at: row.try_get("activated_at")?,
    })
}

pub(crate) fn entry_from_row(row: &PgRow) -> StoreResult<SealedListEntry> {
    let used_by_subject: Option<i64> = row.try_get("used_by_subject_id")?;
    let used_by_user: Option<i64> = row.try_get("used_by_user_id")?;
    let stratum_key: String = row.try_get("stratum_key")?;

    Ok(SealedListEntry {
        id: row.try_get("id")?,
        config_id: ConfigId(row.try_get("config_id")?),
        sequence_number: unsigned(row.try_get("sequence_number")?, "sequence_number")?,
        group_id: GroupId(row.try_get("group_id")?),
        stratum_key: StratumKey::from_stored(stratum_key),
        block_number: unsigned(row.try_get("block_number")?, "block_number")?,
        randomisation_code: row.try_get("randomization_code")?,
        is_used: row.try_get("is_used")?,
        used_by_subject: used_by_subject.map(SubjectId),
        used_at: row.try_get("used_at")?,
        used_by_user: used_by_user.map(UserId),
    })
}
