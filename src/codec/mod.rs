//! Packed row-identifier codec: (drive id, calendar day) ⇄ one 32-bit key.
//!
//! The permanent snapshot table's physical rowid *is* the packed value, so a
//! drive's whole history occupies one contiguous integer range and
//! "first/last snapshot of drive X" becomes a range-bounded min/max lookup
//! instead of an index scan. The same arithmetic is therefore needed twice:
//! as host functions for decoding fetched keys, and as SQL expression
//! fragments for composing queries that run inside the store.
//!
//! Layout: `drive_id << 13 | day_ordinal`, where the ordinal counts days
//! since 2012-01-01 UTC. 13 ordinal bits cap the dataset at 8191 days
//! (~22.4 years past the epoch) and 18 id bits cap it at 262143 drives.
//! Overflow of either field is a hard error, never a silent truncation:
//! a truncated ordinal would break the within-drive monotonicity that the
//! whole storage layout depends on.

use chrono::NaiveDate;

use crate::core::errors::{DsError, Result};

/// Low bits of the packed key: day ordinal.
pub const BITS_PER_DATE: u32 = 13;
/// High bits of the packed key: drive id.
pub const BITS_PER_DRIVE_ID: u32 = 18;

/// Largest representable day ordinal (8191 ⇒ dates through mid-2034).
pub const MAX_DAY_ORDINAL: u32 = (1 << BITS_PER_DATE) - 1;
/// Largest representable drive id.
pub const MAX_DRIVE_ID: i64 = (1 << BITS_PER_DRIVE_ID) - 1;

/// Days from the Unix epoch to the codec epoch (2012-01-01 UTC).
/// `epoch_date` asserts this constant in tests.
pub const UNIX_DAY_OFFSET: i64 = 15340;

/// The codec epoch as a calendar date.
#[must_use]
pub fn epoch_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2012, 1, 1).unwrap_or_default()
}

/// Days since the codec epoch for a calendar date.
pub fn day_ordinal(date: NaiveDate) -> Result<u32> {
    let days = (date - epoch_date()).num_days();
    if !(0..=i64::from(MAX_DAY_ORDINAL)).contains(&days) {
        return Err(DsError::ordinal_overflow(days, i64::from(MAX_DAY_ORDINAL)));
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok(days as u32)
}

/// Calendar date for a day ordinal.
pub fn date_from_ordinal(ordinal: u32) -> Result<NaiveDate> {
    if ordinal > MAX_DAY_ORDINAL {
        return Err(DsError::ordinal_overflow(
            i64::from(ordinal),
            i64::from(MAX_DAY_ORDINAL),
        ));
    }
    epoch_date()
        .checked_add_days(chrono::Days::new(u64::from(ordinal)))
        .ok_or_else(|| DsError::BadDate {
            value: format!("ordinal {ordinal}"),
        })
}

/// Pack a drive id and a day ordinal into one sortable key.
pub fn pack(drive_id: i64, ordinal: u32) -> Result<i64> {
    if !(0..=MAX_DRIVE_ID).contains(&drive_id) {
        return Err(DsError::drive_id_overflow(drive_id, MAX_DRIVE_ID));
    }
    if ordinal > MAX_DAY_ORDINAL {
        return Err(DsError::ordinal_overflow(
            i64::from(ordinal),
            i64::from(MAX_DAY_ORDINAL),
        ));
    }
    Ok(drive_id << BITS_PER_DATE | i64::from(ordinal))
}

/// Inverse of [`pack`]: shift/mask a stored key back into its parts.
///
/// Total for any key produced by [`pack`]; keys from other sources get the
/// id taken from the high bits, whatever they hold.
#[must_use]
pub fn unpack(packed: i64) -> (i64, u32) {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let ordinal = (packed & i64::from(MAX_DAY_ORDINAL)) as u32;
    (packed >> BITS_PER_DATE, ordinal)
}

// ──────────────────── SQL expression forms ────────────────────
//
// Query-language equivalents of the host functions above, for composing
// statements that operate on packed keys inside the store. Arguments are SQL
// expressions (column references, parameters, literals), not values.

/// Day ordinal for a `YYYY-MM-DD` text expression.
#[must_use]
pub fn sql_date_to_ord(date_expr: &str) -> String {
    format!("(cast(strftime('%s', {date_expr}) / 86400 as int) - {UNIX_DAY_OFFSET})")
}

/// Packed key from a drive-id expression and an ordinal expression.
#[must_use]
pub fn sql_to_oid(drive_id_expr: &str, ord_expr: &str) -> String {
    format!("({drive_id_expr} << {BITS_PER_DATE} | {ord_expr})")
}

/// Day ordinal extracted from a packed-key expression.
#[must_use]
pub fn sql_ord_from_oid(oid_expr: &str) -> String {
    format!("({oid_expr} & {MAX_DAY_ORDINAL})")
}

/// Drive id extracted from a packed-key expression.
#[must_use]
pub fn sql_drive_id_from_oid(oid_expr: &str) -> String {
    format!("({oid_expr} >> {BITS_PER_DATE})")
}

/// Predicate selecting one drive's contiguous key range, optionally narrowed
/// to `[min_ord_expr, max_ord_expr]`.
#[must_use]
pub fn sql_drive_range(
    drive_id_expr: &str,
    min_ord_expr: &str,
    max_ord_expr: &str,
    oid_expr: &str,
) -> String {
    format!(
        "({oid} >= {lo} and {oid} <= {hi})",
        oid = oid_expr,
        lo = sql_to_oid(drive_id_expr, min_ord_expr),
        hi = sql_to_oid(drive_id_expr, max_ord_expr),
    )
}

/// Predicate selecting one drive's full key range.
#[must_use]
pub fn sql_this_drive(drive_id_expr: &str, oid_expr: &str) -> String {
    sql_drive_range(drive_id_expr, "0", &MAX_DAY_ORDINAL.to_string(), oid_expr)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn unix_day_offset_matches_chrono() {
        let unix_epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
        assert_eq!((epoch_date() - unix_epoch).num_days(), UNIX_DAY_OFFSET);
    }

    #[test]
    fn bit_budget_covers_31_bits() {
        assert_eq!(BITS_PER_DATE + BITS_PER_DRIVE_ID, 31);
        assert_eq!(pack(MAX_DRIVE_ID, MAX_DAY_ORDINAL).unwrap(), (1 << 31) - 1);
    }

    #[test]
    fn known_date_ordinals() {
        assert_eq!(day_ordinal(epoch_date()).unwrap(), 0);
        let jan_11 = NaiveDate::from_ymd_opt(2012, 1, 11).unwrap();
        assert_eq!(day_ordinal(jan_11).unwrap(), 10);
        assert_eq!(date_from_ordinal(10).unwrap(), jan_11);
    }

    #[test]
    fn pre_epoch_date_rejected() {
        let date = NaiveDate::from_ymd_opt(2011, 12, 31).unwrap();
        let err = day_ordinal(date).unwrap_err();
        assert_eq!(err.code(), "DS-1201");
    }

    #[test]
    fn overflow_is_detected_not_truncated() {
        assert!(pack(0, MAX_DAY_ORDINAL + 1).is_err());
        assert!(pack(MAX_DRIVE_ID + 1, 0).is_err());
        assert!(pack(-1, 0).is_err());
        assert!(pack(MAX_DRIVE_ID, MAX_DAY_ORDINAL).is_ok());
    }

    #[test]
    fn sql_forms_spell_out_the_arithmetic() {
        assert_eq!(sql_to_oid("dr.id", "42"), "(dr.id << 13 | 42)");
        assert_eq!(sql_ord_from_oid("oid"), "(oid & 8191)");
        assert_eq!(sql_drive_id_from_oid("oid"), "(oid >> 13)");
        assert_eq!(
            sql_this_drive(":id", "packed_rowid"),
            "(packed_rowid >= (:id << 13 | 0) and packed_rowid <= (:id << 13 | 8191))"
        );
        assert!(sql_date_to_ord("`date`").contains("15340"));
    }

    proptest! {
        #[test]
        fn round_trip(drive_id in 0..=MAX_DRIVE_ID, ordinal in 0..=MAX_DAY_ORDINAL) {
            let packed = pack(drive_id, ordinal).unwrap();
            prop_assert_eq!(unpack(packed), (drive_id, ordinal));
        }

        #[test]
        fn monotonic_within_drive(
            drive_id in 0..=MAX_DRIVE_ID,
            a in 0..=MAX_DAY_ORDINAL,
            b in 0..=MAX_DAY_ORDINAL,
        ) {
            prop_assume!(a < b);
            prop_assert!(pack(drive_id, a).unwrap() < pack(drive_id, b).unwrap());
        }

        #[test]
        fn drive_ranges_never_overlap(
            a in 0..MAX_DRIVE_ID,
            ord_a in 0..=MAX_DAY_ORDINAL,
            ord_b in 0..=MAX_DAY_ORDINAL,
        ) {
            // Any key of drive a sorts below any key of drive a+1.
            prop_assert!(pack(a, ord_a).unwrap() < pack(a + 1, ord_b).unwrap());
        }

        #[test]
        fn date_ordinal_round_trip(ordinal in 0..=MAX_DAY_ORDINAL) {
            let date = date_from_ordinal(ordinal).unwrap();
            prop_assert_eq!(day_ordinal(date).unwrap(), ordinal);
        }
    }
}
