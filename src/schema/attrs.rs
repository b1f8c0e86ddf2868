//! The versioned catalog of SMART attribute numbers tracked by the dataset.

/// SMART attribute ids present in the telemetry CSVs, in canonical column
/// order. This list is append-only: new dataset revisions add ids at the
/// positions the vendor publishes, and `upgrade_schema` appends the new
/// columns to live tables.
pub const SMART_ATTR_IDS: &[u16] = &[
    1, 2, 3, 4, 5, //
    7, 8, 9, 10, 11, 12, 13, //
    15, 16, 17, //
    22, 23, 24, //
    168, 170, 173, 174, 177, 179, //
    181, 182, 183, 184, //
    187, 188, 189, 190, 191, 192, 193, 194, 195, 196, 197, 198, 199, 200, 201, //
    218, 220, //
    222, 223, 224, 225, 226, //
    231, 232, 233, //
    235, //
    240, 241, 242, //
    250, 251, 252, //
    254, 255,
];

/// Attribute 9: power-on hours, the raw figure behind working-duration
/// features in the denormalized view.
pub const POWER_ON_HOURS: u16 = 9;

/// Column name of the normalized reading for an attribute id.
#[must_use]
pub fn normalized_column(attr_id: u16) -> String {
    format!("smart_{attr_id}_normalized")
}

/// Column name of the raw reading for an attribute id.
#[must_use]
pub fn raw_column(attr_id: u16) -> String {
    format!("smart_{attr_id}_raw")
}

/// The `(normalized, raw)` column-name pairs for every tracked attribute,
/// in canonical order.
pub fn smart_column_pairs() -> impl Iterator<Item = (String, String)> {
    SMART_ATTR_IDS
        .iter()
        .map(|&id| (normalized_column(id), raw_column(id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_is_sorted_and_duplicate_free() {
        assert!(SMART_ATTR_IDS.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn catalog_tracks_roughly_sixty_attributes() {
        assert_eq!(SMART_ATTR_IDS.len(), 62);
        assert!(SMART_ATTR_IDS.contains(&POWER_ON_HOURS));
    }

    #[test]
    fn column_names_pair_up() {
        let pairs: Vec<_> = smart_column_pairs().collect();
        assert_eq!(pairs.len(), SMART_ATTR_IDS.len());
        assert_eq!(pairs[0].0, "smart_1_normalized");
        assert_eq!(pairs[0].1, "smart_1_raw");
    }
}
