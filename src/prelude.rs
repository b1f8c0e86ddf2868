//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use drivestats::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{DsError, Result};

// Store & schema
pub use crate::schema::{create_analytics_tables, create_tables, upgrade_schema};
pub use crate::store::Database;

// Catalog
pub use crate::catalog::augment::{AugmenterRegistry, ModelAugmenter, ModelRecord};
pub use crate::catalog::{CatalogSummary, register_models_and_drives};

// Import
pub use crate::import::{ImportNormalizer, ImportProgress, ImportSummary};

// Stats & anomalies
pub use crate::anomaly::{AnomalyDetector, AnomalyInfo};
pub use crate::stats::{DriveStats, PreprocessSummary, StatsEngine, run_preprocess};

// View
pub use crate::view::{DenormalizedStatsView, DriveFeatureRow, DriveSelection};
