//! US state FIPS code tables.
//!
//! Every partition the resolver works on is a US state (or DC). Source
//! records identify their state in different ways: crime extracts carry
//! a two-letter abbreviation, listing exports carry the full state name,
//! and tract GEOIDs start with the two-digit FIPS code. This module maps
//! between all three.

/// One row of the state table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateInfo {
    /// Two-digit FIPS code (e.g. `"48"`).
    pub fips: &'static str,
    /// Two-letter USPS abbreviation (e.g. `"TX"`).
    pub abbr: &'static str,
    /// Full name as it appears in listing exports (e.g. `"Texas"`).
    pub name: &'static str,
}

const fn state(fips: &'static str, abbr: &'static str, name: &'static str) -> StateInfo {
    StateInfo { fips, abbr, name }
}

/// The 50 states + DC, ordered by FIPS code.
pub const STATES: &[StateInfo] = &[
    state("01", "AL", "Alabama"),
    state("02", "AK", "Alaska"),
    state("04", "AZ", "Arizona"),
    state("05", "AR", "Arkansas"),
    state("06", "CA", "California"),
    state("08", "CO", "Colorado"),
    state("09", "CT", "Connecticut"),
    state("10", "DE", "Delaware"),
    state("11", "DC", "District of Columbia"),
    state("12", "FL", "Florida"),
    state("13", "GA", "Georgia"),
    state("15", "HI", "Hawaii"),
    state("16", "ID", "Idaho"),
    state("17", "IL", "Illinois"),
    state("18", "IN", "Indiana"),
    state("19", "IA", "Iowa"),
    state("20", "KS", "Kansas"),
    state("21", "KY", "Kentucky"),
    state("22", "LA", "Louisiana"),
    state("23", "ME", "Maine"),
    state("24", "MD", "Maryland"),
    state("25", "MA", "Massachusetts"),
    state("26", "MI", "Michigan"),
    state("27", "MN", "Minnesota"),
    state("28", "MS", "Mississippi"),
    state("29", "MO", "Missouri"),
    state("30", "MT", "Montana"),
    state("31", "NE", "Nebraska"),
    state("32", "NV", "Nevada"),
    state("33", "NH", "New Hampshire"),
    state("34", "NJ", "New Jersey"),
    state("35", "NM", "New Mexico"),
    state("36", "NY", "New York"),
    state("37", "NC", "North Carolina"),
    state("38", "ND", "North Dakota"),
    state("39", "OH", "Ohio"),
    state("40", "OK", "Oklahoma"),
    state("41", "OR", "Oregon"),
    state("42", "PA", "Pennsylvania"),
    state("44", "RI", "Rhode Island"),
    state("45", "SC", "South Carolina"),
    state("46", "SD", "South Dakota"),
    state("47", "TN", "Tennessee"),
    state("48", "TX", "Texas"),
    state("49", "UT", "Utah"),
    state("50", "VT", "Vermont"),
    state("51", "VA", "Virginia"),
    state("53", "WA", "Washington"),
    state("54", "WV", "West Virginia"),
    state("55", "WI", "Wisconsin"),
    state("56", "WY", "Wyoming"),
];

/// Looks up a state by its two-digit FIPS code.
#[must_use]
pub fn by_fips(fips: &str) -> Option<&'static StateInfo> {
    STATES.iter().find(|s| s.fips == fips)
}

/// Looks up a state by abbreviation (case-insensitive).
#[must_use]
pub fn by_abbr(abbr: &str) -> Option<&'static StateInfo> {
    let abbr = abbr.trim();
    STATES.iter().find(|s| s.abbr.eq_ignore_ascii_case(abbr))
}

/// Looks up a state by full name (case-insensitive).
#[must_use]
pub fn by_name(name: &str) -> Option<&'static StateInfo> {
    let name = name.trim();
    STATES.iter().find(|s| s.name.eq_ignore_ascii_case(name))
}

/// Maps a two-letter state abbreviation to the corresponding FIPS code.
#[must_use]
pub fn abbr_to_fips(abbr: &str) -> Option<&'static str> {
    by_abbr(abbr).map(|s| s.fips)
}

/// Maps a two-digit FIPS code to the full state name.
///
/// Returns `"Unknown"` for unrecognized codes.
#[must_use]
pub fn state_name(fips: &str) -> &'static str {
    by_fips(fips).map_or("Unknown", |s| s.name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_has_fifty_states_plus_dc() {
        assert_eq!(STATES.len(), 51);
    }

    #[test]
    fn lookups_agree_for_every_state() {
        for s in STATES {
            assert_eq!(by_fips(s.fips), Some(s));
            assert_eq!(by_abbr(s.abbr), Some(s));
            assert_eq!(by_name(s.name), Some(s));
        }
    }

    #[test]
    fn abbr_lookup_ignores_case_and_whitespace() {
        assert_eq!(abbr_to_fips("tx"), Some("48"));
        assert_eq!(abbr_to_fips(" Ny "), Some("36"));
        assert_eq!(by_name("district of columbia").map(|s| s.abbr), Some("DC"));
    }

    #[test]
    fn unknown_codes() {
        assert_eq!(by_fips("03"), None);
        assert_eq!(abbr_to_fips("XX"), None);
        assert_eq!(state_name("99"), "Unknown");
    }
}
