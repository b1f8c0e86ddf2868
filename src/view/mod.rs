//! Denormalized per-drive feature rows for survival-style analysis.
//!
//! Joins the analytics records back to the snapshot table at the packed
//! first/last/failure keys, pulling the SMART power-on-hours counter from
//! the boundary snapshots, and excludes every drive listed in the anomalies
//! table. A *reduced* database carries the catalog and analytics tables but
//! no snapshot table; against one of those the view serves presence-window
//! figures only.

#![allow(missing_docs)]

use tracing::debug;

use crate::codec;
use crate::core::errors::Result;
use crate::schema::attrs;
use crate::schema::{ANALYTICS_TABLE, ANOMALIES_TABLE, DRIVES_TABLE, SNAPSHOT_TABLE};
use crate::store::Database;

/// Which drives to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveSelection {
    /// Drives with a recorded failure; their window ends at the failure day.
    Failed,
    /// Drives never recorded as failed; window ends at the last-seen day.
    NonFailed,
    /// Both, in one result set.
    All,
}

/// One denormalized feature row.
#[derive(Debug, Clone, PartialEq)]
pub struct DriveFeatureRow {
    pub id: i64,
    pub model_id: i64,
    pub failed: bool,
    pub first_date: u32,
    pub last_date: u32,
    pub failure_date: Option<u32>,
    /// Days between first-seen and window end, inclusive.
    pub days_in_dataset: i64,
    /// Best available estimate of total days worked, in days.
    pub duration_worked: f64,
}

/// Read-only feature view over an opened database pair.
pub struct DenormalizedStatsView<'db> {
    db: &'db Database,
    reduced: bool,
}

impl<'db> DenormalizedStatsView<'db> {
    /// Bind to a database, probing whether the snapshot table is present.
    pub fn new(db: &'db Database) -> Result<Self> {
        let reduced = !db.has_table("main", SNAPSHOT_TABLE)?;
        if reduced {
            debug!("snapshot table absent; view runs in reduced mode");
        }
        Ok(Self { db, reduced })
    }

    /// Whether this database lacks the snapshot table.
    #[must_use]
    pub const fn is_reduced(&self) -> bool {
        self.reduced
    }

    /// The query for one failed/non-failed variant. Both variants project
    /// the same column list, so they stay union-compatible.
    #[must_use]
    pub fn build_query(failed: bool, reduced: bool) -> String {
        let (end_ord, predicate) = if failed {
            ("a.failure_date", "a.failure_date IS NOT NULL")
        } else {
            ("a.last_date", "a.failure_date IS NULL")
        };

        let (end_smart, first_smart, joins) = if reduced {
            ("NULL".to_string(), "NULL".to_string(), String::new())
        } else {
            let hours = attrs::raw_column(attrs::POWER_ON_HOURS);
            let end_key = codec::sql_to_oid("a.id", end_ord);
            let first_key = codec::sql_to_oid("a.id", "a.first_date");
            (
                format!("se.{hours} / 24.0"),
                format!("sf.{hours} / 24.0"),
                format!(
                    "LEFT JOIN {SNAPSHOT_TABLE} se ON se.packed_rowid = {end_key}
                     LEFT JOIN {SNAPSHOT_TABLE} sf ON sf.packed_rowid = {first_key}"
                ),
            )
        };

        format!(
            "SELECT a.id, d.model_id, a.first_date, a.last_date, a.failure_date,
                    {end_ord} - a.first_date AS days_in_dataset,
                    {end_smart} AS end_worked_days,
                    {first_smart} AS first_worked_days
             FROM {ANALYTICS_TABLE} a
             JOIN {DRIVES_TABLE} d ON d.id = a.id
             {joins}
             WHERE {predicate}
               AND a.id NOT IN (SELECT id FROM {ANOMALIES_TABLE})"
        )
    }

    /// Failed and non-failed variants in one result set.
    #[must_use]
    pub fn build_query_unioned(reduced: bool) -> String {
        format!(
            "{} UNION ALL {}",
            Self::build_query(true, reduced),
            Self::build_query(false, reduced)
        )
    }

    /// Fetch feature rows, ordered by drive id.
    ///
    /// `duration_worked` preference: the SMART power-on-hours figure from
    /// the window-end snapshot; else the first-seen SMART figure plus the
    /// presence window; else the presence window alone. Reduced databases
    /// always land on the last arm.
    pub fn fetch(&self, selection: DriveSelection) -> Result<Vec<DriveFeatureRow>> {
        let sql = match selection {
            DriveSelection::Failed => Self::build_query(true, self.reduced),
            DriveSelection::NonFailed => Self::build_query(false, self.reduced),
            DriveSelection::All => Self::build_query_unioned(self.reduced),
        };

        let mut stmt = self.db.conn().prepare(&sql)?;
        let mut rows = stmt
            .query_map([], |row| {
                let first_date: u32 = row.get(2)?;
                let last_date: u32 = row.get(3)?;
                let failure_date: Option<u32> = row.get(4)?;
                let days_in_dataset: i64 = row.get(5)?;
                let end_worked_days: Option<f64> = row.get(6)?;
                let first_worked_days: Option<f64> = row.get(7)?;

                let end_ord = failure_date.unwrap_or(last_date);
                // Widened before subtracting: a hand-edited analytics row
                // can place failure_date before first_date.
                let window = f64::from(end_ord) - f64::from(first_date);
                #[allow(clippy::cast_precision_loss)]
                let duration_worked = end_worked_days
                    .or_else(|| first_worked_days.map(|d| d + window))
                    .unwrap_or(days_in_dataset as f64);

                Ok(DriveFeatureRow {
                    id: row.get(0)?,
                    model_id: row.get(1)?,
                    failed: failure_date.is_some(),
                    first_date,
                    last_date,
                    failure_date,
                    days_in_dataset,
                    duration_worked,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.sort_unstable_by_key(|r| r.id);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::anomaly::{AnomalyDetector, AnomalyInfo};
    use crate::stats::{DriveStats, StatsEngine};
    use crate::testutil::{fresh_full_db, seed_snapshot};

    fn register_drive(db: &Database, id: i64, model_id: i64) {
        db.conn()
            .execute(
                "INSERT INTO drives (id, serial_number, model_id) VALUES (?1, ?2, ?3)",
                rusqlite::params![id, format!("SER{id}"), model_id],
            )
            .unwrap();
    }

    /// Analytics + drive rows for one failed drive (1) and one survivor (2).
    fn two_drive_db() -> Database {
        let db = fresh_full_db();
        db.conn()
            .execute("INSERT INTO brands (id, name, vendor_id) VALUES (1, 'B1', 0)", [])
            .unwrap();
        db.conn()
            .execute("INSERT INTO models (id, name, brand_id) VALUES (1, 'M1', 1)", [])
            .unwrap();
        register_drive(&db, 1, 1);
        register_drive(&db, 2, 1);
        StatsEngine::new(&db)
            .save_stats_for_drives(&[
                DriveStats {
                    id: 1,
                    first_date: 10,
                    last_date: 20,
                    failure_date: Some(20),
                },
                DriveStats {
                    id: 2,
                    first_date: 10,
                    last_date: 40,
                    failure_date: None,
                },
            ])
            .unwrap();
        db
    }

    #[test]
    fn selections_partition_failed_and_survivors() {
        let db = two_drive_db();
        let view = DenormalizedStatsView::new(&db).unwrap();
        assert!(!view.is_reduced());

        let failed = view.fetch(DriveSelection::Failed).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, 1);
        assert!(failed[0].failed);
        assert_eq!(failed[0].days_in_dataset, 10);

        let survivors = view.fetch(DriveSelection::NonFailed).unwrap();
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].id, 2);
        assert!(!survivors[0].failed);
        assert_eq!(survivors[0].days_in_dataset, 30);

        let all = view.fetch(DriveSelection::All).unwrap();
        assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn anomalous_drives_are_excluded_from_every_selection() {
        let db = two_drive_db();
        let mut anomalies: BTreeMap<i64, AnomalyInfo> = BTreeMap::new();
        anomalies.insert(
            1,
            AnomalyInfo {
                overshoot_days: Some(3),
                ..AnomalyInfo::default()
            },
        );
        AnomalyDetector::new(&db).save_anomalies(&anomalies).unwrap();

        let view = DenormalizedStatsView::new(&db).unwrap();
        assert!(view.fetch(DriveSelection::Failed).unwrap().is_empty());
        let all = view.fetch(DriveSelection::All).unwrap();
        assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn duration_prefers_smart_hours_at_window_end() {
        let db = two_drive_db();
        // Drive 1: 480 hours at the failure snapshot.
        seed_snapshot(&db, 1, 20, true, Some(480));

        let view = DenormalizedStatsView::new(&db).unwrap();
        let failed = view.fetch(DriveSelection::Failed).unwrap();
        assert!((failed[0].duration_worked - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn duration_falls_back_to_first_snapshot_then_window() {
        let db = two_drive_db();
        // Drive 2 has hours only at its first snapshot: synthetic figure is
        // 240/24 + (40 - 10) = 40 days.
        seed_snapshot(&db, 2, 10, false, Some(240));

        let view = DenormalizedStatsView::new(&db).unwrap();
        let rows = view.fetch(DriveSelection::All).unwrap();
        let survivor = rows.iter().find(|r| r.id == 2).unwrap();
        assert!((survivor.duration_worked - 40.0).abs() < f64::EPSILON);

        // Drive 1 has no snapshots at all: presence window only.
        let failed = rows.iter().find(|r| r.id == 1).unwrap();
        assert!((failed.duration_worked - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn inverted_presence_window_does_not_panic() {
        let db = two_drive_db();
        // A hand-edited record with the failure placed before first-seen.
        db.conn()
            .execute(
                "UPDATE analytics.drives_analytics SET failure_date = 5 WHERE id = 1",
                [],
            )
            .unwrap();

        let view = DenormalizedStatsView::new(&db).unwrap();
        let failed = view.fetch(DriveSelection::Failed).unwrap();
        assert_eq!(failed[0].days_in_dataset, -5);
        assert!((failed[0].duration_worked - (-5.0)).abs() < f64::EPSILON);
    }

    #[test]
    fn reduced_database_serves_presence_window_figures() {
        let db = two_drive_db();
        seed_snapshot(&db, 1, 20, true, Some(480));
        db.conn().execute("DROP TABLE drive_stats", []).unwrap();

        let view = DenormalizedStatsView::new(&db).unwrap();
        assert!(view.is_reduced());
        let failed = view.fetch(DriveSelection::Failed).unwrap();
        assert!((failed[0].duration_worked - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn reduced_mode_still_excludes_anomalous_drives() {
        let db = two_drive_db();
        let mut anomalies: BTreeMap<i64, AnomalyInfo> = BTreeMap::new();
        anomalies.insert(
            1,
            AnomalyInfo {
                failure_dates: Some(vec![18, 20]),
                ..AnomalyInfo::default()
            },
        );
        AnomalyDetector::new(&db).save_anomalies(&anomalies).unwrap();
        db.conn().execute("DROP TABLE drive_stats", []).unwrap();

        let view = DenormalizedStatsView::new(&db).unwrap();
        assert!(view.is_reduced());
        assert!(view.fetch(DriveSelection::Failed).unwrap().is_empty());
        let all = view.fetch(DriveSelection::All).unwrap();
        assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn variant_queries_stay_union_compatible() {
        for reduced in [false, true] {
            let failed = DenormalizedStatsView::build_query(true, reduced);
            let alive = DenormalizedStatsView::build_query(false, reduced);
            let unioned = DenormalizedStatsView::build_query_unioned(reduced);
            assert!(unioned.contains(&failed));
            assert!(unioned.contains(&alive));
        }
    }
}
