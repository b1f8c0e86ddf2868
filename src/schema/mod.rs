//! Table definitions and schema lifecycle: creation and additive upgrade.
//!
//! Column lists are generated from the SMART attribute catalog
//! ([`attrs::SMART_ATTR_IDS`]) so the staging table, the permanent snapshot
//! table, and the import transfer list can never drift apart.

pub mod attrs;

use tracing::info;

use crate::core::errors::{DsError, Result};
use crate::store::Database;

// DO NOT rename without migrating live databases.
pub const VENDORS_TABLE: &str = "vendors";
pub const BRANDS_TABLE: &str = "brands";
pub const MODELS_TABLE: &str = "models";
pub const DRIVES_TABLE: &str = "drives";
/// Permanent snapshot table; its rowid is the packed drive-id/day key.
pub const SNAPSHOT_TABLE: &str = "drive_stats";
/// CSV landing zone; drained by the import normalizer.
pub const STAGING_TABLE: &str = "drive_stats_staging";
/// Per-drive lifetime statistics, in the attached analytics database.
pub const ANALYTICS_TABLE: &str = "analytics.drives_analytics";
/// Excluded-drive set, in the attached analytics database.
pub const ANOMALIES_TABLE: &str = "analytics.anomalies";

/// Reserved id for the "unknown" vendor, brand, and model rows.
pub const UNKNOWN_ID: i64 = 0;

/// One column of a managed table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    /// Column name.
    pub name: String,
    /// Type and constraints as they appear in the declaration.
    pub decl: &'static str,
}

impl ColumnSpec {
    fn new(name: impl Into<String>, decl: &'static str) -> Self {
        Self {
            name: name.into(),
            decl,
        }
    }
}

/// Canonical columns of the staging table, in CSV order.
pub fn staging_columns() -> Vec<ColumnSpec> {
    let mut columns = vec![
        ColumnSpec::new("date", "TEXT NOT NULL"),
        ColumnSpec::new("serial_number", "TEXT NOT NULL"),
        ColumnSpec::new("model", "TEXT NOT NULL"),
    ];
    columns.extend(measurement_columns());
    columns
}

/// Canonical columns of the permanent snapshot table.
pub fn snapshot_columns() -> Vec<ColumnSpec> {
    let mut columns = vec![ColumnSpec::new("packed_rowid", "INTEGER NOT NULL PRIMARY KEY")];
    columns.extend(measurement_columns());
    columns
}

/// The measurement columns shared by staging and snapshot tables; also the
/// list the import normalizer copies verbatim between them.
pub fn measurement_columns() -> Vec<ColumnSpec> {
    let mut columns = vec![
        ColumnSpec::new("capacity_bytes", "INTEGER NOT NULL"),
        ColumnSpec::new("failure", "INTEGER NOT NULL"),
    ];
    for (normalized, raw) in attrs::smart_column_pairs() {
        columns.push(ColumnSpec::new(normalized, "INTEGER"));
        columns.push(ColumnSpec::new(raw, "INTEGER"));
    }
    columns
}

fn create_table_sql(table: &str, columns: &[ColumnSpec]) -> String {
    let body = columns
        .iter()
        .map(|c| format!("    {} {}", c.name, c.decl))
        .collect::<Vec<_>>()
        .join(",\n");
    format!("CREATE TABLE {table} (\n{body}\n);")
}

// ──────────────────── creation ────────────────────

/// Create the catalog, staging, and snapshot tables in the main database.
///
/// Fails with [`DsError::TableExists`] before issuing any DDL if a managed
/// table is already present. Each table group is one transaction.
pub fn create_tables(db: &Database) -> Result<()> {
    for table in [
        VENDORS_TABLE,
        BRANDS_TABLE,
        MODELS_TABLE,
        DRIVES_TABLE,
        STAGING_TABLE,
        SNAPSHOT_TABLE,
    ] {
        if db.has_table("main", table)? {
            return Err(DsError::TableExists {
                table: table.to_string(),
            });
        }
    }

    let tx = db.conn().unchecked_transaction()?;
    tx.execute_batch(&format!(
        "CREATE TABLE {VENDORS_TABLE} (
            id   INTEGER NOT NULL PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
         );
         CREATE TABLE {BRANDS_TABLE} (
            id        INTEGER NOT NULL PRIMARY KEY,
            name      TEXT NOT NULL UNIQUE,
            vendor_id INTEGER NOT NULL REFERENCES {VENDORS_TABLE}(id)
         );
         CREATE TABLE {MODELS_TABLE} (
            id         INTEGER NOT NULL PRIMARY KEY,
            name       TEXT NOT NULL UNIQUE,
            brand_id   INTEGER NOT NULL DEFAULT 0 REFERENCES {BRANDS_TABLE}(id),
            attributes TEXT
         );
         CREATE TABLE {DRIVES_TABLE} (
            id            INTEGER NOT NULL PRIMARY KEY,
            serial_number TEXT NOT NULL UNIQUE,
            model_id      INTEGER NOT NULL DEFAULT 0 REFERENCES {MODELS_TABLE}(id)
         );
         INSERT INTO {VENDORS_TABLE} (id, name) VALUES (0, 'unknown');
         INSERT INTO {BRANDS_TABLE} (id, name, vendor_id) VALUES (0, 'unknown', 0);
         INSERT INTO {MODELS_TABLE} (id, name, brand_id) VALUES (0, 'unknown', 0);"
    ))?;
    tx.commit()?;

    let tx = db.conn().unchecked_transaction()?;
    tx.execute_batch(&create_table_sql(STAGING_TABLE, &staging_columns()))?;
    tx.commit()?;

    let tx = db.conn().unchecked_transaction()?;
    tx.execute_batch(&create_table_sql(SNAPSHOT_TABLE, &snapshot_columns()))?;
    tx.commit()?;

    info!("created catalog, staging, and snapshot tables");
    Ok(())
}

/// Create the analytics tables in the attached analytics database.
///
/// Idempotent: the analytics store accretes across preprocess runs, so
/// re-creation must be a no-op rather than a failure.
pub fn create_analytics_tables(db: &Database) -> Result<()> {
    let tx = db.conn().unchecked_transaction()?;
    tx.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {ANALYTICS_TABLE} (
            id           INTEGER NOT NULL PRIMARY KEY,
            last_date    INTEGER NOT NULL,
            first_date   INTEGER NOT NULL,
            failure_date INTEGER
         );
         CREATE TABLE IF NOT EXISTS {ANOMALIES_TABLE} (
            id   INTEGER NOT NULL PRIMARY KEY,
            info TEXT NOT NULL
         );"
    ))?;
    tx.commit()?;
    Ok(())
}

// ──────────────────── upgrade ────────────────────

/// Diff `desired` against the live table and append the missing columns.
///
/// Column removal is unsupported in the underlying store without a
/// rebuild-and-copy; a canonical list that drops a live column raises
/// [`DsError::Schema`] before any DDL runs. All additions commit in one
/// transaction.
pub fn upgrade_table(db: &Database, table: &str, desired: &[ColumnSpec]) -> Result<()> {
    let live = db.table_columns(table)?;
    let live_set: std::collections::HashSet<&str> = live.iter().map(String::as_str).collect();
    let desired_set: std::collections::HashSet<&str> =
        desired.iter().map(|c| c.name.as_str()).collect();

    let removed: Vec<&str> = live
        .iter()
        .map(String::as_str)
        .filter(|name| !desired_set.contains(name))
        .collect();
    if !removed.is_empty() {
        return Err(DsError::Schema {
            table: table.to_string(),
            details: format!("column removal is not supported (live-only columns: {removed:?})"),
        });
    }

    let to_add: Vec<&ColumnSpec> = desired
        .iter()
        .filter(|c| !live_set.contains(c.name.as_str()))
        .collect();
    if to_add.is_empty() {
        return Ok(());
    }

    let tx = db.conn().unchecked_transaction()?;
    for column in &to_add {
        tx.execute_batch(&format!(
            "ALTER TABLE {table} ADD COLUMN {} {};",
            column.name, column.decl
        ))?;
    }
    tx.commit()?;
    info!(table, added = to_add.len(), "schema upgraded");
    Ok(())
}

/// Upgrade the snapshot table to the canonical column list.
///
/// The staging table is deliberately excluded: its column order must match
/// the CSV layout exactly, so a revised layout means dropping and recreating
/// it between imports, not altering it in place.
pub fn upgrade_schema(db: &Database) -> Result<()> {
    upgrade_table(db, SNAPSHOT_TABLE, &snapshot_columns())
}
