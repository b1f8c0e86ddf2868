//! Drive/model/brand/vendor lookup tables.
//!
//! Drive identity is resolved by serial number; snapshot rows never repeat
//! the serial or model string once the import normalizer has run. Model and
//! drive rows are created here, from the staging table, before any snapshot
//! rows move — the import join silently drops rows whose serial is still
//! unregistered.

pub mod augment;

use tracing::info;

use crate::core::errors::Result;
use crate::schema::{DRIVES_TABLE, MODELS_TABLE, STAGING_TABLE, UNKNOWN_ID};
use crate::store::Database;

/// One row of the drives table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveRecord {
    /// Stable integer id; the high bits of every packed snapshot key.
    pub id: i64,
    /// Unique serial number as reported by the telemetry feed.
    pub serial_number: String,
    /// Model reference; [`UNKNOWN_ID`] until resolved.
    pub model_id: i64,
}

/// Counts from one [`register_models_and_drives`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogSummary {
    /// Model rows created.
    pub new_models: usize,
    /// Drive rows created.
    pub new_drives: usize,
}

/// Register every model string and serial number present in staging.
///
/// Idempotent: rows already known are left untouched, so this can run before
/// every import batch cycle. New models land under the unknown brand until an
/// augmenter resolves them. One transaction.
pub fn register_models_and_drives(db: &Database) -> Result<CatalogSummary> {
    let tx = db.conn().unchecked_transaction()?;

    let new_models = tx.execute(
        &format!(
            "INSERT INTO {MODELS_TABLE} (name)
             SELECT DISTINCT model FROM {STAGING_TABLE}
             WHERE model NOT IN (SELECT name FROM {MODELS_TABLE})"
        ),
        [],
    )?;

    let new_drives = tx.execute(
        &format!(
            "INSERT INTO {DRIVES_TABLE} (serial_number, model_id)
             SELECT s.serial_number, m.id
             FROM (
                 SELECT serial_number, min(model) AS model
                 FROM {STAGING_TABLE}
                 GROUP BY serial_number
             ) s
             JOIN {MODELS_TABLE} m ON m.name = s.model
             WHERE s.serial_number NOT IN (SELECT serial_number FROM {DRIVES_TABLE})"
        ),
        [],
    )?;

    tx.commit()?;
    if new_models + new_drives > 0 {
        info!(new_models, new_drives, "catalog registration");
    }
    Ok(CatalogSummary {
        new_models,
        new_drives,
    })
}

/// Look a drive up by serial number.
pub fn drive_by_serial(db: &Database, serial: &str) -> Result<Option<DriveRecord>> {
    use rusqlite::OptionalExtension as _;
    let record = db
        .conn()
        .query_row(
            &format!(
                "SELECT id, serial_number, model_id FROM {DRIVES_TABLE} WHERE serial_number = ?1"
            ),
            [serial],
            |row| {
                Ok(DriveRecord {
                    id: row.get(0)?,
                    serial_number: row.get(1)?,
                    model_id: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(record)
}

/// Largest assigned drive id, if any drives exist. The import normalizer
/// checks this against the packed-key bit budget before moving rows.
pub fn max_drive_id(db: &Database) -> Result<Option<i64>> {
    let max: Option<i64> = db.conn().query_row(
        &format!("SELECT max(id) FROM {DRIVES_TABLE}"),
        [],
        |row| row.get(0),
    )?;
    Ok(max)
}

/// Number of registered models, excluding the unknown sentinel.
pub fn model_count(db: &Database) -> Result<i64> {
    let count = db.conn().query_row(
        &format!("SELECT count(*) FROM {MODELS_TABLE} WHERE id != {UNKNOWN_ID}"),
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Number of registered drives.
pub fn drive_count(db: &Database) -> Result<i64> {
    let count = db
        .conn()
        .query_row(&format!("SELECT count(*) FROM {DRIVES_TABLE}"), [], |row| {
            row.get(0)
        })?;
    Ok(count)
}

/// Drives whose model identity is still unresolved: either the drive points
/// at the unknown model, or its model's brand was never identified.
pub fn drives_with_unknown_model(db: &Database) -> Result<Vec<i64>> {
    let mut stmt = db.conn().prepare_cached(&format!(
        "SELECT d.id
         FROM {DRIVES_TABLE} d
         JOIN {MODELS_TABLE} m ON d.model_id = m.id
         WHERE d.model_id = {UNKNOWN_ID} OR m.brand_id = {UNKNOWN_ID}
         ORDER BY d.id"
    ))?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(ids)
}
