//! Detection of drives whose telemetry contradicts itself.
//!
//! Anomalous drives stay in the snapshot and analytics tables untouched;
//! they are only listed in the anomalies table so survival-style queries can
//! exclude them. Three signals are currently recognized: a drive reported
//! failed more than once, a drive with snapshots dated after its failure,
//! and a drive whose model or brand was never identified.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::errors::Result;
use crate::schema::{ANALYTICS_TABLE, ANOMALIES_TABLE, DRIVES_TABLE, UNKNOWN_ID};
use crate::stats::FailureRecord;
use crate::store::Database;

/// Everything known to be wrong with one drive. Stored as the JSON payload
/// of its anomalies row; absent fields mean that signal did not fire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalyInfo {
    /// All failure ordinals, present when there was more than one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_dates: Option<Vec<u32>>,
    /// Days the drive kept reporting after its recorded failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overshoot_days: Option<i64>,
    /// Model or brand still unresolved.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unknown_model: bool,
}

impl AnomalyInfo {
    fn merge(&mut self, other: Self) {
        if other.failure_dates.is_some() {
            self.failure_dates = other.failure_dates;
        }
        if other.overshoot_days.is_some() {
            self.overshoot_days = other.overshoot_days;
        }
        self.unknown_model |= other.unknown_model;
    }
}

/// Drives that reported failure on more than one day, with every ordinal.
#[must_use]
pub fn detect_multiple_failures(failures: &[FailureRecord]) -> BTreeMap<i64, Vec<u32>> {
    let mut by_drive: BTreeMap<i64, Vec<u32>> = BTreeMap::new();
    for record in failures {
        by_drive.entry(record.id).or_default().push(record.failure_date);
    }
    by_drive.retain(|_, dates| dates.len() > 1);
    for dates in by_drive.values_mut() {
        dates.sort_unstable();
    }
    by_drive
}

/// Detector over the analytics store.
pub struct AnomalyDetector<'db> {
    db: &'db Database,
}

impl<'db> AnomalyDetector<'db> {
    #[must_use]
    pub const fn new(db: &'db Database) -> Self {
        Self { db }
    }

    /// Drives whose stats say they kept reporting after failing, with the
    /// overshoot in days.
    pub fn detect_post_failure_usage(&self) -> Result<BTreeMap<i64, i64>> {
        let mut stmt = self.db.conn().prepare_cached(&format!(
            "SELECT id, last_date - failure_date FROM {ANALYTICS_TABLE}
             WHERE failure_date IS NOT NULL AND last_date > failure_date
             ORDER BY id"
        ))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<BTreeMap<i64, i64>>>()?;
        Ok(rows)
    }

    /// Drives still pointing at the unknown-model sentinel. A drive under a
    /// known model whose *brand* is unresolved is not anomalous; that is the
    /// augmenters' backlog, not contradictory telemetry.
    pub fn detect_unknown_model(&self) -> Result<Vec<i64>> {
        let mut stmt = self.db.conn().prepare_cached(&format!(
            "SELECT id FROM {DRIVES_TABLE} WHERE model_id = {UNKNOWN_ID} ORDER BY id"
        ))?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    /// Run every detector and merge the results per drive.
    pub fn detect_anomalies(
        &self,
        failures: &[FailureRecord],
    ) -> Result<BTreeMap<i64, AnomalyInfo>> {
        let mut anomalies: BTreeMap<i64, AnomalyInfo> = BTreeMap::new();

        for (id, dates) in detect_multiple_failures(failures) {
            anomalies.entry(id).or_default().merge(AnomalyInfo {
                failure_dates: Some(dates),
                ..AnomalyInfo::default()
            });
        }
        for (id, overshoot) in self.detect_post_failure_usage()? {
            anomalies.entry(id).or_default().merge(AnomalyInfo {
                overshoot_days: Some(overshoot),
                ..AnomalyInfo::default()
            });
        }
        for id in self.detect_unknown_model()? {
            anomalies.entry(id).or_default().merge(AnomalyInfo {
                unknown_model: true,
                ..AnomalyInfo::default()
            });
        }

        if !anomalies.is_empty() {
            info!(count = anomalies.len(), "anomalous drives flagged");
        }
        Ok(anomalies)
    }

    /// Replace the stored anomaly set wholesale, one transaction. The set
    /// is recomputed from scratch every pass, so drives whose anomalies
    /// were explained away disappear from the table.
    pub fn save_anomalies(&self, anomalies: &BTreeMap<i64, AnomalyInfo>) -> Result<()> {
        let tx = self.db.conn().unchecked_transaction()?;
        tx.execute(&format!("DELETE FROM {ANOMALIES_TABLE}"), [])?;
        {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT INTO {ANOMALIES_TABLE} (id, info) VALUES (?1, ?2)"
            ))?;
            for (id, info) in anomalies {
                stmt.execute(rusqlite::params![id, serde_json::to_string(info)?])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// The stored anomaly set.
    pub fn load_anomalies(&self) -> Result<BTreeMap<i64, AnomalyInfo>> {
        let mut stmt = self
            .db
            .conn()
            .prepare_cached(&format!("SELECT id, info FROM {ANOMALIES_TABLE}"))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(id, raw)| Ok((id, serde_json::from_str(&raw)?)))
            .collect()
    }
}
