//! Staging-table drain: resolve drive identity, pack row keys, move rows.
//!
//! CSV import lands snapshot rows in the staging table verbatim. This module
//! normalizes them into the permanent snapshot table in fixed-size batches,
//! where each batch is one transaction: insert the batch into the snapshot
//! table, delete it from staging, commit. An interrupt between statements
//! rolls the whole batch back, so on resume at most one batch is replayed —
//! and replay is idempotent because the insert keys on the packed rowid.
//!
//! Staging rows whose serial number has no drive record yet are dropped,
//! counted, and logged; drive-table population may lag snapshot import
//! across datasets, so this is survivable, not fatal.

use tracing::{info, warn};

use crate::codec;
use crate::core::config::Config;
use crate::core::errors::{DsError, Result};
use crate::schema::{self, DRIVES_TABLE, SNAPSHOT_TABLE, STAGING_TABLE};
use crate::store::Database;

/// Cumulative progress after one committed batch.
#[derive(Debug, Clone)]
pub struct ImportProgress {
    /// Staging rows consumed so far (moved + dropped).
    pub rows_processed: u64,
    /// Short description of the operation just completed.
    pub operation: String,
}

/// Final accounting of one [`ImportNormalizer::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Rows moved into the snapshot table.
    pub moved: u64,
    /// Rows dropped for lack of a matching drive record.
    pub dropped: u64,
    /// Transactions committed.
    pub batches: u32,
}

/// Batch mover from staging to the permanent snapshot table.
pub struct ImportNormalizer<'db> {
    db: &'db Database,
    batch_size: u32,
}

impl<'db> ImportNormalizer<'db> {
    /// Normalizer with an explicit batch size (must be ≥ 1).
    #[must_use]
    pub const fn new(db: &'db Database, batch_size: u32) -> Self {
        Self {
            db,
            batch_size: if batch_size == 0 { 1 } else { batch_size },
        }
    }

    /// Normalizer configured from `[import]`.
    #[must_use]
    pub const fn from_config(db: &'db Database, config: &Config) -> Self {
        Self::new(db, config.import.batch_size)
    }

    /// Drain the staging table to completion.
    ///
    /// `progress` is invoked after every committed batch; partial progress
    /// before a fatal error is therefore visible and the run is resumable.
    pub fn run(&self, mut progress: impl FnMut(&ImportProgress)) -> Result<ImportSummary> {
        self.guard_bit_budget()?;

        let conn = self.db.conn();
        let bounds: (Option<i64>, Option<i64>) = conn.query_row(
            &format!("SELECT min(rowid), max(rowid) FROM {STAGING_TABLE}"),
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let (Some(min_seq), Some(max_seq)) = bounds else {
            return Ok(ImportSummary::default());
        };

        let insert_sql = Self::normalize_batch_sql();
        let delete_sql = format!("DELETE FROM {STAGING_TABLE} WHERE rowid < ?1");

        let mut summary = ImportSummary::default();
        let batch = i64::from(self.batch_size);
        let mut upper = min_seq + batch;

        // The upper bound walks past max_seq by at most one batch, so gaps
        // in the staging rowid sequence can never end the loop early.
        while upper - batch <= max_seq {
            let tx = conn.unchecked_transaction()?;
            let inserted = tx.execute(&insert_sql, [upper])?;
            let deleted = tx.execute(&delete_sql, [upper])?;
            tx.commit()?;

            summary.moved += inserted as u64;
            summary.dropped += (deleted - inserted) as u64;
            summary.batches += 1;
            progress(&ImportProgress {
                rows_processed: summary.moved + summary.dropped,
                operation: format!("committed batch below sequence {upper}"),
            });
            upper += batch;
        }

        if summary.dropped > 0 {
            warn!(
                dropped = summary.dropped,
                "staging rows had no matching drive record"
            );
        }
        info!(
            moved = summary.moved,
            batches = summary.batches,
            "staging table drained"
        );
        progress(&ImportProgress {
            rows_processed: summary.moved + summary.dropped,
            operation: "finished".to_string(),
        });
        Ok(summary)
    }

    /// The per-batch `INSERT … SELECT`: packed key from the drive join plus
    /// the measurement columns copied verbatim.
    fn normalize_batch_sql() -> String {
        let transfer: Vec<String> = schema::measurement_columns()
            .into_iter()
            .map(|c| c.name)
            .collect();
        let target_list = transfer.join(", ");
        let source_list = transfer
            .iter()
            .map(|name| format!("s.{name}"))
            .collect::<Vec<_>>()
            .join(", ");
        let packed = codec::sql_to_oid("d.id", &codec::sql_date_to_ord("s.date"));
        format!(
            "INSERT OR REPLACE INTO {SNAPSHOT_TABLE} (packed_rowid, {target_list})
             SELECT {packed}, {source_list}
             FROM {STAGING_TABLE} s
             INNER JOIN {DRIVES_TABLE} d ON s.serial_number = d.serial_number
             WHERE s.rowid < ?1"
        )
    }

    /// Refuse to move anything if a staged date or an assigned drive id
    /// would not fit the packed-key bit fields. Truncation would silently
    /// break the within-drive key ordering, so this is checked up front.
    fn guard_bit_budget(&self) -> Result<()> {
        let conn = self.db.conn();
        let ord_expr = codec::sql_date_to_ord("date");
        let bounds: (Option<i64>, Option<i64>) = conn.query_row(
            &format!("SELECT min({ord_expr}), max({ord_expr}) FROM {STAGING_TABLE}"),
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        if let (Some(min_ord), Some(max_ord)) = bounds {
            if min_ord < 0 {
                return Err(DsError::ordinal_overflow(min_ord, 0));
            }
            if max_ord > i64::from(codec::MAX_DAY_ORDINAL) {
                return Err(DsError::ordinal_overflow(
                    max_ord,
                    i64::from(codec::MAX_DAY_ORDINAL),
                ));
            }
        }

        if let Some(max_id) = crate::catalog::max_drive_id(self.db)? {
            if max_id > codec::MAX_DRIVE_ID {
                return Err(DsError::drive_id_overflow(max_id, codec::MAX_DRIVE_ID));
            }
        }
        Ok(())
    }
}
