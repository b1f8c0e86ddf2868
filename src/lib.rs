#![forbid(unsafe_code)]

//! drivestats — storage and analytics engine for fleet-scale hard-drive
//! SMART telemetry.
//!
//! Daily snapshot CSVs land in a staging table, get normalized into a
//! permanent snapshot table keyed by a packed (drive, day) rowid, and are
//! reduced to per-drive lifetime statistics, anomaly flags, and
//! denormalized feature rows for survival analysis:
//!
//! 1. **Packed keys** — `drive_id << 13 | day_ordinal` as the physical
//!    rowid, so one drive's history is one contiguous key range
//! 2. **Recoverable import** — staging drained in single-transaction
//!    batches, resumable and idempotent after interruption
//! 3. **Incremental analytics** — first/last/failure dates maintained by
//!    range-bounded lookups, anomalous drives flagged and excluded
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use drivestats::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use drivestats::core::config::Config;
//! use drivestats::import::ImportNormalizer;
//! ```

pub mod prelude;

pub mod anomaly;
pub mod catalog;
pub mod codec;
pub mod core;
pub mod import;
pub mod schema;
pub mod stats;
pub mod store;
pub mod view;

#[cfg(test)]
mod testutil;
