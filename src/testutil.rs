//! Shared fixtures for the unit tests: staged rows, seeded snapshots, and
//! pre-built in-memory databases.

use crate::codec;
use crate::schema;
use crate::store::Database;

/// A staging-table row in the shape the CSV loader produces.
#[derive(Debug, Clone)]
pub struct StagedRow {
    pub date: String,
    pub serial_number: String,
    pub model: String,
    pub capacity_bytes: i64,
    pub failure: bool,
    pub power_on_hours: Option<i64>,
}

impl StagedRow {
    pub fn new(date: &str, serial: &str, model: &str) -> Self {
        Self {
            date: date.to_string(),
            serial_number: serial.to_string(),
            model: model.to_string(),
            capacity_bytes: 4_000_787_030_016,
            failure: false,
            power_on_hours: None,
        }
    }

    pub fn failed(mut self) -> Self {
        self.failure = true;
        self
    }

    pub fn with_power_on_hours(mut self, hours: i64) -> Self {
        self.power_on_hours = Some(hours);
        self
    }
}

pub fn seed_staging_row(db: &Database, row: &StagedRow) {
    db.conn()
        .execute(
            "INSERT INTO drive_stats_staging
                 (date, serial_number, model, capacity_bytes, failure, smart_9_raw)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                row.date,
                row.serial_number,
                row.model,
                row.capacity_bytes,
                i64::from(row.failure),
                row.power_on_hours,
            ],
        )
        .unwrap();
}

/// Insert one permanent snapshot row directly, bypassing the import path.
pub fn seed_snapshot(db: &Database, drive_id: i64, ordinal: u32, failure: bool, poh: Option<i64>) {
    let key = codec::pack(drive_id, ordinal).unwrap();
    db.conn()
        .execute(
            "INSERT INTO drive_stats (packed_rowid, capacity_bytes, failure, smart_9_raw)
             VALUES (?1, 4000787030016, ?2, ?3)",
            rusqlite::params![key, i64::from(failure), poh],
        )
        .unwrap();
}

/// All snapshot keys, sorted.
pub fn snapshot_keys(db: &Database) -> Vec<i64> {
    let mut stmt = db
        .conn()
        .prepare("SELECT packed_rowid FROM drive_stats ORDER BY packed_rowid")
        .unwrap();
    stmt.query_map([], |row| row.get(0))
        .unwrap()
        .collect::<rusqlite::Result<Vec<i64>>>()
        .unwrap()
}

/// In-memory database with main and analytics schemas created.
pub fn fresh_full_db() -> Database {
    let db = Database::open_in_memory().unwrap();
    schema::create_tables(&db).unwrap();
    schema::create_analytics_tables(&db).unwrap();
    db
}
