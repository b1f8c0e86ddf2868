//! Configuration: TOML file + complete defaults.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{DsError, Result};

/// Full drivestats configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub import: ImportConfig,
}

/// Paths and resource budgets for the embedded store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    /// Main database (catalog + snapshot tables).
    pub db_path: PathBuf,
    /// Analytics database, attached as a second file.
    pub analytics_path: PathBuf,
    /// Scratch directory for the store's temporary files. `None` leaves the
    /// engine default in place.
    pub temp_dir: Option<PathBuf>,
    /// Upper bound for the memory-map window over the main database file.
    pub mmap_budget_bytes: u64,
    /// Upper bound for the memory-map window over the analytics file.
    pub analytics_mmap_budget_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./db.sqlite"),
            analytics_path: PathBuf::from("./analytics.sqlite"),
            temp_dir: None,
            mmap_budget_bytes: 1024 * 1024 * 1024,
            analytics_mmap_budget_bytes: 12 * 1024 * 1024,
        }
    }
}

/// Knobs for the staging-table drain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ImportConfig {
    /// Rows moved per transaction. Smaller batches mean less journal space
    /// and less work lost on interrupt; larger batches mean less commit
    /// overhead. Final table contents are identical either way.
    pub batch_size: u32,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self { batch_size: 100 }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| DsError::io(path, source))?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot possibly work.
    pub fn validate(&self) -> Result<()> {
        if self.import.batch_size == 0 {
            return Err(DsError::InvalidConfig {
                details: "import.batch_size must be at least 1".to_string(),
            });
        }
        if self.storage.db_path == self.storage.analytics_path {
            return Err(DsError::InvalidConfig {
                details: "storage.db_path and storage.analytics_path must differ".to_string(),
            });
        }
        Ok(())
    }
}
