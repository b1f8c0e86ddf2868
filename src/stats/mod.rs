//! Per-drive lifetime statistics: first-seen, last-seen, and failure
//! ordinals, maintained incrementally in the analytics database.
//!
//! Every computation here leans on the packed-key layout: a drive's
//! snapshots occupy one contiguous rowid range, so first/last snapshot is a
//! range-bounded `min`/`max` over the primary key — no secondary index, no
//! full scan. The one unavoidable full scan is the failure-flag search,
//! because the layout is optimized for selection by drive, not by date.

#![allow(missing_docs)]

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::anomaly::AnomalyDetector;
use crate::codec;
use crate::core::errors::Result;
use crate::schema::{ANALYTICS_TABLE, DRIVES_TABLE, SNAPSHOT_TABLE};
use crate::store::Database;

/// One analytics record. `first_date` and `failure_date` are fixed at
/// detection time; only `last_date` ever moves (forward).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveStats {
    pub id: i64,
    pub first_date: u32,
    pub last_date: u32,
    pub failure_date: Option<u32>,
}

/// A snapshot row that carried the failure flag, decoded from its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureRecord {
    pub id: i64,
    pub failure_date: u32,
}

/// A drive queued for stats computation, with its failure ordinal when the
/// failure scan already found one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsCandidate {
    pub id: i64,
    pub failure_date: Option<u32>,
}

impl From<i64> for StatsCandidate {
    fn from(id: i64) -> Self {
        Self {
            id,
            failure_date: None,
        }
    }
}

/// Queries and upserts over the analytics store.
pub struct StatsEngine<'db> {
    db: &'db Database,
}

impl<'db> StatsEngine<'db> {
    #[must_use]
    pub const fn new(db: &'db Database) -> Self {
        Self { db }
    }

    /// Drives present in the drive table with no analytics record yet.
    pub fn find_nonevaluated_drives(&self) -> Result<Vec<i64>> {
        let mut stmt = self.db.conn().prepare_cached(&format!(
            "SELECT id FROM {DRIVES_TABLE}
             WHERE id NOT IN (SELECT id FROM {ANALYTICS_TABLE})
             ORDER BY id"
        ))?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    /// Non-failed drives whose `last_date` trails the global maximum —
    /// newer snapshots may have arrived for them since the last pass.
    pub fn find_outdated_candidates(&self) -> Result<Vec<DriveStats>> {
        let mut stmt = self.db.conn().prepare_cached(&format!(
            "SELECT id, first_date, last_date, failure_date FROM {ANALYTICS_TABLE}
             WHERE failure_date IS NULL
               AND last_date < (SELECT max(last_date) FROM {ANALYTICS_TABLE})
             ORDER BY id"
        ))?;
        let records = stmt
            .query_map([], |row| {
                Ok(DriveStats {
                    id: row.get(0)?,
                    first_date: row.get(1)?,
                    last_date: row.get(2)?,
                    failure_date: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Full stats for each candidate via a range-bounded min/max over the
    /// packed key. A drive with zero snapshot rows yields nothing — an
    /// empty range must never become a stats record.
    pub fn compute_stats_for_drives(
        &self,
        candidates: &[StatsCandidate],
        mut progress: impl FnMut(u64),
    ) -> Result<Vec<DriveStats>> {
        let mut stmt = self.db.conn().prepare_cached(&format!(
            "SELECT min(packed_rowid), max(packed_rowid) FROM {SNAPSHOT_TABLE}
             WHERE packed_rowid >= ?1 AND packed_rowid <= ?2"
        ))?;

        let mut records = Vec::with_capacity(candidates.len());
        for (done, candidate) in candidates.iter().enumerate() {
            let lo = codec::pack(candidate.id, 0)?;
            let hi = codec::pack(candidate.id, codec::MAX_DAY_ORDINAL)?;
            let range: (Option<i64>, Option<i64>) =
                stmt.query_row([lo, hi], |row| Ok((row.get(0)?, row.get(1)?)))?;
            if let (Some(min_key), Some(max_key)) = range {
                records.push(DriveStats {
                    id: candidate.id,
                    first_date: codec::unpack(min_key).1,
                    last_date: codec::unpack(max_key).1,
                    failure_date: candidate.failure_date,
                });
            } else {
                debug!(drive = candidate.id, "no snapshots; skipped");
            }
            // Skipped drives still count toward progress.
            progress(done as u64 + 1);
        }
        Ok(records)
    }

    /// Refresh `last_date` only, scanning from the previously recorded
    /// `last_date` upward — already-seen history is never rescanned. Sound
    /// as long as snapshot history is never backfilled before a drive's
    /// recorded `first_date`; a backfilling importer would need a full
    /// recompute instead.
    pub fn recompute_stats_for_drives(
        &self,
        stale: &[DriveStats],
        mut progress: impl FnMut(u64),
    ) -> Result<Vec<DriveStats>> {
        let mut stmt = self.db.conn().prepare_cached(&format!(
            "SELECT max(packed_rowid) FROM {SNAPSHOT_TABLE}
             WHERE packed_rowid >= ?1 AND packed_rowid <= ?2"
        ))?;

        let mut records = Vec::with_capacity(stale.len());
        for (done, record) in stale.iter().enumerate() {
            let lo = codec::pack(record.id, record.last_date)?;
            let hi = codec::pack(record.id, codec::MAX_DAY_ORDINAL)?;
            let max_key: Option<i64> = stmt.query_row([lo, hi], |row| row.get(0))?;
            if let Some(max_key) = max_key {
                records.push(DriveStats {
                    last_date: codec::unpack(max_key).1,
                    ..*record
                });
            }
            progress(done as u64 + 1);
        }
        Ok(records)
    }

    /// Every snapshot row flagged as a failure, decoded to (drive, day).
    /// This is the one full-table scan in the pipeline; the key layout
    /// cannot narrow a predicate on the failure flag.
    pub fn find_failure_records(&self) -> Result<Vec<FailureRecord>> {
        let mut stmt = self.db.conn().prepare_cached(&format!(
            "SELECT packed_rowid FROM {SNAPSHOT_TABLE} WHERE failure = 1"
        ))?;
        let mut records = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .map(|key| {
                let (id, failure_date) = codec::unpack(key?);
                Ok(FailureRecord { id, failure_date })
            })
            .collect::<rusqlite::Result<Vec<_>>>()?;
        records.sort_unstable_by_key(|r| (r.id, r.failure_date));
        Ok(records)
    }

    /// Bulk upsert, one transaction. Inserts create the full record;
    /// conflicts advance `last_date` and fill a still-null `failure_date`,
    /// but never touch `first_date` or overwrite an existing failure.
    pub fn save_stats_for_drives(&self, records: &[DriveStats]) -> Result<()> {
        let tx = self.db.conn().unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT INTO {ANALYTICS_TABLE} (id, last_date, first_date, failure_date)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                     last_date = excluded.last_date,
                     failure_date = coalesce(failure_date, excluded.failure_date)"
            ))?;
            for record in records {
                stmt.execute(rusqlite::params![
                    record.id,
                    record.last_date,
                    record.first_date,
                    record.failure_date,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// All stored analytics records, for inspection and tests.
    pub fn saved_stats(&self) -> Result<Vec<DriveStats>> {
        let mut stmt = self.db.conn().prepare_cached(&format!(
            "SELECT id, first_date, last_date, failure_date FROM {ANALYTICS_TABLE} ORDER BY id"
        ))?;
        let records = stmt
            .query_map([], |row| {
                Ok(DriveStats {
                    id: row.get(0)?,
                    first_date: row.get(1)?,
                    last_date: row.get(2)?,
                    failure_date: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}

// ──────────────────── orchestration ────────────────────

/// Counts from one [`run_preprocess`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreprocessSummary {
    /// Failure-flagged snapshot rows found.
    pub failure_records: usize,
    /// Full stats records computed (failed + nonevaluated drives).
    pub computed: usize,
    /// Stale records whose `last_date` was refreshed.
    pub recomputed: usize,
    /// Candidates skipped for having zero snapshots.
    pub skipped_empty: usize,
    /// Anomalous drives flagged and saved.
    pub anomalies: usize,
}

/// The full stats pass: failure scan, candidate discovery, computation,
/// upsert, anomaly detection. `progress` receives `(phase, items done)`.
pub fn run_preprocess(
    db: &Database,
    mut progress: impl FnMut(&'static str, u64),
) -> Result<PreprocessSummary> {
    let engine = StatsEngine::new(db);

    progress("scanning failure records", 0);
    let failures = engine.find_failure_records()?;
    let outdated = engine.find_outdated_candidates()?;
    let nonevaluated = engine.find_nonevaluated_drives()?;
    info!(
        failures = failures.len(),
        outdated = outdated.len(),
        nonevaluated = nonevaluated.len(),
        "preprocess candidates found"
    );

    // One candidate per drive: the earliest failure ordinal wins, and
    // failed drives subsume their nonevaluated entry.
    let mut candidates: BTreeMap<i64, StatsCandidate> = BTreeMap::new();
    for failure in &failures {
        let entry = candidates
            .entry(failure.id)
            .or_insert(StatsCandidate::from(failure.id));
        entry.failure_date = Some(
            entry
                .failure_date
                .map_or(failure.failure_date, |d| d.min(failure.failure_date)),
        );
    }
    for id in nonevaluated {
        candidates.entry(id).or_insert(StatsCandidate::from(id));
    }
    let candidates: Vec<StatsCandidate> = candidates.into_values().collect();

    let recomputed =
        engine.recompute_stats_for_drives(&outdated, |n| progress("recomputing outdated", n))?;
    let computed =
        engine.compute_stats_for_drives(&candidates, |n| progress("computing stats", n))?;
    let skipped_empty = candidates.len() - computed.len();

    progress("saving stats", 0);
    let mut all = recomputed;
    let recomputed_count = all.len();
    let computed_count = computed.len();
    all.extend(computed);
    engine.save_stats_for_drives(&all)?;

    progress("detecting anomalies", 0);
    let detector = AnomalyDetector::new(db);
    let anomalies = detector.detect_anomalies(&failures)?;
    detector.save_anomalies(&anomalies)?;

    let summary = PreprocessSummary {
        failure_records: failures.len(),
        computed: computed_count,
        recomputed: recomputed_count,
        skipped_empty,
        anomalies: anomalies.len(),
    };
    info!(?summary, "preprocess finished");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{fresh_full_db, seed_snapshot};

    fn register_drive(db: &Database, id: i64) {
        db.conn()
            .execute(
                "INSERT INTO drives (id, serial_number, model_id) VALUES (?1, ?2, 1)",
                rusqlite::params![id, format!("SER{id}")],
            )
            .unwrap();
    }

    fn seeded_db() -> Database {
        let db = fresh_full_db();
        db.conn()
            .execute("INSERT INTO models (id, name, brand_id) VALUES (1, 'M1', 0)", [])
            .unwrap();
        db
    }

    #[test]
    fn compute_finds_first_and_last_ordinals() {
        let db = seeded_db();
        register_drive(&db, 3);
        for ordinal in [10, 15, 22, 30] {
            seed_snapshot(&db, 3, ordinal, ordinal == 22, None);
        }

        let engine = StatsEngine::new(&db);
        let failures = engine.find_failure_records().unwrap();
        assert_eq!(
            failures,
            vec![FailureRecord {
                id: 3,
                failure_date: 22
            }]
        );

        let candidates = vec![StatsCandidate {
            id: 3,
            failure_date: Some(22),
        }];
        let stats = engine.compute_stats_for_drives(&candidates, |_| {}).unwrap();
        assert_eq!(
            stats,
            vec![DriveStats {
                id: 3,
                first_date: 10,
                last_date: 30,
                failure_date: Some(22),
            }]
        );
    }

    #[test]
    fn drive_without_snapshots_never_gets_a_record() {
        let db = seeded_db();
        register_drive(&db, 1);
        register_drive(&db, 2);
        seed_snapshot(&db, 1, 5, false, None);

        let summary = run_preprocess(&db, |_, _| {}).unwrap();
        assert_eq!(summary.computed, 1);
        assert_eq!(summary.skipped_empty, 1);

        let saved = StatsEngine::new(&db).saved_stats().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].id, 1);
    }

    #[test]
    fn progress_counts_skipped_candidates_too() {
        let db = seeded_db();
        register_drive(&db, 1);
        register_drive(&db, 2);
        register_drive(&db, 3);
        seed_snapshot(&db, 2, 7, false, None);

        let candidates: Vec<StatsCandidate> =
            [1, 2, 3].map(StatsCandidate::from).to_vec();
        let mut seen: Vec<u64> = Vec::new();
        let stats = StatsEngine::new(&db)
            .compute_stats_for_drives(&candidates, |n| seen.push(n))
            .unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(seen, vec![1, 2, 3], "every candidate reports progress");
    }

    #[test]
    fn neighbour_drives_do_not_bleed_into_the_range() {
        let db = seeded_db();
        for id in [6, 7, 8] {
            register_drive(&db, id);
        }
        seed_snapshot(&db, 6, 100, false, None);
        seed_snapshot(&db, 7, 3, false, None);
        seed_snapshot(&db, 7, 9, false, None);
        seed_snapshot(&db, 8, 1, false, None);

        let engine = StatsEngine::new(&db);
        let stats = engine
            .compute_stats_for_drives(&[StatsCandidate::from(7)], |_| {})
            .unwrap();
        assert_eq!(stats[0].first_date, 3);
        assert_eq!(stats[0].last_date, 9);
    }

    #[test]
    fn recompute_extends_last_date_only() {
        let db = seeded_db();
        register_drive(&db, 4);
        for ordinal in [10, 20] {
            seed_snapshot(&db, 4, ordinal, false, None);
        }
        let engine = StatsEngine::new(&db);
        let stats = engine
            .compute_stats_for_drives(&[StatsCandidate::from(4)], |_| {})
            .unwrap();
        engine.save_stats_for_drives(&stats).unwrap();

        // New snapshots arrive.
        seed_snapshot(&db, 4, 35, false, None);
        let refreshed = engine.recompute_stats_for_drives(&stats, |_| {}).unwrap();
        assert_eq!(
            refreshed,
            vec![DriveStats {
                id: 4,
                first_date: 10,
                last_date: 35,
                failure_date: None,
            }]
        );
    }

    #[test]
    fn outdated_candidates_exclude_failed_and_current() {
        let db = seeded_db();
        let engine = StatsEngine::new(&db);
        engine
            .save_stats_for_drives(&[
                DriveStats {
                    id: 1,
                    first_date: 0,
                    last_date: 50,
                    failure_date: None,
                },
                DriveStats {
                    id: 2,
                    first_date: 0,
                    last_date: 40,
                    failure_date: None,
                },
                DriveStats {
                    id: 3,
                    first_date: 0,
                    last_date: 30,
                    failure_date: Some(30),
                },
            ])
            .unwrap();

        let outdated = engine.find_outdated_candidates().unwrap();
        let ids: Vec<i64> = outdated.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2], "failed and up-to-date drives are not stale");
    }

    #[test]
    fn upsert_preserves_first_date_and_failure_date() {
        let db = seeded_db();
        let engine = StatsEngine::new(&db);
        engine
            .save_stats_for_drives(&[DriveStats {
                id: 9,
                first_date: 10,
                last_date: 20,
                failure_date: Some(15),
            }])
            .unwrap();
        // A later save with different first/failure values must only move
        // last_date.
        engine
            .save_stats_for_drives(&[DriveStats {
                id: 9,
                first_date: 99,
                last_date: 25,
                failure_date: Some(77),
            }])
            .unwrap();

        let saved = engine.saved_stats().unwrap();
        assert_eq!(
            saved,
            vec![DriveStats {
                id: 9,
                first_date: 10,
                last_date: 25,
                failure_date: Some(15),
            }]
        );
    }

    #[test]
    fn preprocess_summary_counts_line_up() {
        let db = seeded_db();
        for id in [1, 2] {
            register_drive(&db, id);
        }
        for ordinal in [10, 15, 22, 30] {
            seed_snapshot(&db, 1, ordinal, ordinal == 22, None);
        }
        seed_snapshot(&db, 2, 12, false, None);

        let summary = run_preprocess(&db, |_, _| {}).unwrap();
        assert_eq!(summary.failure_records, 1);
        assert_eq!(summary.computed, 2);
        assert_eq!(summary.skipped_empty, 0);

        let saved = StatsEngine::new(&db).saved_stats().unwrap();
        assert_eq!(
            saved[0],
            DriveStats {
                id: 1,
                first_date: 10,
                last_date: 30,
                failure_date: Some(22),
            }
        );
    }
}
