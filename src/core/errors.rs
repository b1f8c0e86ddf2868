//! DS-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, DsError>;

/// Top-level error type for the drivestats store.
///
/// Storage-layer failures (`Sql`, `Io`) are fatal by design: the store is
/// single-writer and never retries a failed transaction.
#[derive(Debug, Error)]
pub enum DsError {
    #[error("[DS-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[DS-1002] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[DS-1101] unsupported schema migration for {table}: {details}")]
    Schema { table: String, details: String },

    #[error("[DS-1102] table {table} already exists")]
    TableExists { table: String },

    #[error("[DS-1201] {what} {value} exceeds the packed-rowid budget (max {max})")]
    RangeOverflow {
        what: &'static str,
        value: i64,
        max: i64,
    },

    #[error("[DS-1202] unparseable calendar date: {value}")]
    BadDate { value: String },

    #[error("[DS-2001] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[DS-2002] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[DS-3001] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DsError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "DS-1001",
            Self::ConfigParse { .. } => "DS-1002",
            Self::Schema { .. } => "DS-1101",
            Self::TableExists { .. } => "DS-1102",
            Self::RangeOverflow { .. } => "DS-1201",
            Self::BadDate { .. } => "DS-1202",
            Self::Sql { .. } => "DS-2001",
            Self::Serialization { .. } => "DS-2002",
            Self::Io { .. } => "DS-3001",
        }
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for overflow of the day-ordinal bit field.
    #[must_use]
    pub const fn ordinal_overflow(value: i64, max: i64) -> Self {
        Self::RangeOverflow {
            what: "day ordinal",
            value,
            max,
        }
    }

    /// Convenience constructor for overflow of the drive-id bit field.
    #[must_use]
    pub const fn drive_id_overflow(value: i64, max: i64) -> Self {
        Self::RangeOverflow {
            what: "drive id",
            value,
            max,
        }
    }
}

impl From<rusqlite::Error> for DsError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for DsError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for DsError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
