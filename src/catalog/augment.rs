//! Model-attribute enrichment seam.
//!
//! Decoding vendor strings into technical attributes (capacity class, RPM,
//! interface, form factor, …) is external knowledge. The crate only defines
//! the seam: an ordered registry of [`ModelAugmenter`] implementations,
//! assembled explicitly at one composition point and applied in descending
//! priority. No directory scanning, no implicit discovery.

use serde_json::{Map, Value};
use tracing::debug;

use crate::core::errors::Result;
use crate::schema::MODELS_TABLE;
use crate::store::Database;

/// A model row as presented to augmenters.
#[derive(Debug, Clone)]
pub struct ModelRecord {
    /// Model id (never the unknown sentinel).
    pub id: i64,
    /// Raw model string from the telemetry feed.
    pub name: String,
    /// Current brand reference.
    pub brand_id: i64,
    /// Decoded technical attributes, accreted across augmenters.
    pub attributes: Map<String, Value>,
}

/// One enrichment capability. `apply` returns whether it contributed
/// anything; a miss is normal, not an error.
pub trait ModelAugmenter {
    /// Stable name for diagnostics.
    fn name(&self) -> &'static str;
    /// Higher runs earlier.
    fn priority(&self) -> u32;
    /// Enrich the record in place.
    fn apply(&self, record: &mut ModelRecord) -> bool;
}

/// Explicit, ordered augmenter list.
#[derive(Default)]
pub struct AugmenterRegistry {
    augmenters: Vec<Box<dyn ModelAugmenter>>,
}

impl AugmenterRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an augmenter, keeping the list sorted by descending
    /// priority. Registration order breaks ties.
    pub fn register(&mut self, augmenter: Box<dyn ModelAugmenter>) {
        self.augmenters.push(augmenter);
        self.augmenters
            .sort_by_key(|a| std::cmp::Reverse(a.priority()));
    }

    /// Number of registered augmenters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.augmenters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.augmenters.is_empty()
    }

    /// Run every augmenter over one record; returns how many contributed.
    pub fn augment(&self, record: &mut ModelRecord) -> usize {
        self.augmenters
            .iter()
            .filter(|a| {
                let hit = a.apply(record);
                if hit {
                    debug!(augmenter = a.name(), model = %record.name, "augmented");
                }
                hit
            })
            .count()
    }
}

/// Apply the registry to every known model and persist the enriched
/// attribute payloads. Returns the number of models updated.
pub fn augment_models(db: &Database, registry: &AugmenterRegistry) -> Result<usize> {
    let mut records = {
        let mut stmt = db.conn().prepare_cached(&format!(
            "SELECT id, name, brand_id, attributes FROM {MODELS_TABLE} WHERE id != 0"
        ))?;
        let rows = stmt
            .query_map([], |row| {
                let raw: Option<String> = row.get(3)?;
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?, raw))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
    }
    .into_iter()
    .map(|(id, name, brand_id, raw)| {
        let attributes = raw
            .as_deref()
            .map(serde_json::from_str::<Map<String, Value>>)
            .transpose()?
            .unwrap_or_default();
        Ok(ModelRecord {
            id,
            name,
            brand_id,
            attributes,
        })
    })
    .collect::<Result<Vec<_>>>()?;

    let tx = db.conn().unchecked_transaction()?;
    let mut updated = 0_usize;
    for record in &mut records {
        if registry.augment(record) == 0 {
            continue;
        }
        let payload = serde_json::to_string(&record.attributes)?;
        tx.execute(
            &format!("UPDATE {MODELS_TABLE} SET attributes = ?1, brand_id = ?2 WHERE id = ?3"),
            rusqlite::params![payload, record.brand_id, record.id],
        )?;
        updated += 1;
    }
    tx.commit()?;
    Ok(updated)
}
