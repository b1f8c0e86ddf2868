//! Connection lifecycle for the embedded store: PRAGMAs, memory-map sizing,
//! the analytics attach, and table introspection.
//!
//! Single connection, single writer. Every multi-statement mutation in the
//! crate runs inside an explicit transaction on this connection; commit is
//! the sole durability boundary. Concurrent write attempts surface the
//! store's native busy/locked failure unmodified.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};
use tracing::{debug, warn};

use crate::core::config::Config;
use crate::core::errors::{DsError, Result};

/// Name under which the analytics database is attached.
pub const ANALYTICS_DB: &str = "analytics";

const MIB: u64 = 1024 * 1024;

/// Handle over the main + analytics database pair.
pub struct Database {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Database {
    /// Open (or create) the store described by `config` and attach the
    /// analytics database.
    pub fn open(config: &Config) -> Result<Self> {
        let storage = &config.storage;
        if let Some(parent) = storage.db_path.parent() {
            fs::create_dir_all(parent).map_err(|source| DsError::io(parent, source))?;
        }

        let conn = Connection::open_with_flags(
            &storage.db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        apply_pragmas(&conn)?;
        apply_mmap(&conn, "main", &storage.db_path, storage.mmap_budget_bytes)?;
        if let Some(temp_dir) = &storage.temp_dir {
            apply_temp_dir(&conn, temp_dir);
        }

        conn.execute(
            "ATTACH DATABASE ?1 AS analytics",
            [storage.analytics_path.to_string_lossy()],
        )?;
        apply_mmap(
            &conn,
            ANALYTICS_DB,
            &storage.analytics_path,
            storage.analytics_mmap_budget_bytes,
        )?;

        Ok(Self {
            conn,
            path: Some(storage.db_path.clone()),
        })
    }

    /// In-memory store with an in-memory analytics attach — for testing.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("ATTACH DATABASE ':memory:' AS analytics", [])?;
        Ok(Self { conn, path: None })
    }

    /// Path of the main database file, if file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Borrow the underlying connection. Crate modules compose their own
    /// statements; transactions come from [`Connection::unchecked_transaction`].
    /// Also the escape hatch for ad-hoc queries the typed API does not cover.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    // ──────────────────── introspection ────────────────────

    /// Whether `table` exists in the given attached database (`main` or
    /// `analytics`).
    pub fn has_table(&self, db_id: &str, table: &str) -> Result<bool> {
        let sql =
            format!("SELECT count(*) FROM {db_id}.sqlite_master WHERE type = 'table' AND name = ?1");
        let count: i64 = self.conn.query_row(&sql, [table], |row| row.get(0))?;
        Ok(count > 0)
    }

    /// All table names in the given attached database.
    pub fn table_names(&self, db_id: &str) -> Result<Vec<String>> {
        let sql = format!("SELECT name FROM {db_id}.sqlite_master WHERE type = 'table'");
        let mut stmt = self.conn.prepare(&sql)?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    /// Live column names of a table, in declaration order.
    pub fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        let sql = format!("PRAGMA table_info({table})");
        let mut stmt = self.conn.prepare(&sql)?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    /// Check that WAL mode is active (for diagnostics).
    pub fn is_wal_mode(&self) -> bool {
        self.conn
            .query_row("PRAGMA journal_mode", [], |row| row.get::<_, String>(0))
            .map(|mode| mode.eq_ignore_ascii_case("wal"))
            .unwrap_or(false)
    }
}

// ──────────────────── pragmas ────────────────────

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -8000;
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(())
}

/// Size the memory-map window to the current file size (rounded up to a
/// mebibyte) clamped to the configured budget.
fn apply_mmap(conn: &Connection, db_id: &str, path: &Path, budget: u64) -> Result<()> {
    let size = mmap_size_for(path, budget);
    conn.execute_batch(&format!("PRAGMA {db_id}.mmap_size = {size};"))?;
    debug!(db_id, size, "memory map sized");
    Ok(())
}

fn mmap_size_for(path: &Path, budget: u64) -> u64 {
    let file_len = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    let rounded = file_len.div_ceil(MIB).saturating_add(1) * MIB;
    rounded.min(budget)
}

/// Point the store's scratch space at the configured directory. The pragma
/// is deprecated upstream and may be compiled out; a refusal only costs the
/// redirection, so it is logged and ignored.
fn apply_temp_dir(conn: &Connection, temp_dir: &Path) {
    let dir = temp_dir.to_string_lossy().replace('\'', "''");
    if let Err(err) = conn.execute_batch(&format!("PRAGMA temp_store_directory = '{dir}';")) {
        warn!(%err, "scratch directory pragma refused; engine default stays");
    }
}
