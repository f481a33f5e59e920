use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of an originating utility feed, e.g. `UTILITY1`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical text form shared by every join key.
///
/// - surrounding whitespace is trimmed
/// - a blank value is absent
/// - an integral decimal rendering (`"1042.0"`, `"7.00"`) collapses to its
///   integer text, so a key exported once as a number and once as a string
///   compares equal
pub fn normalize_key(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some((int, frac)) = trimmed.split_once('.') {
        let int_is_digits = !int.is_empty() && int.bytes().all(|b| b.is_ascii_digit());
        let frac_is_zeros = !frac.is_empty() && frac.bytes().all(|b| b == b'0');
        if int_is_digits && frac_is_zeros {
            return Some(int.to_string());
        }
    }

    Some(trimmed.to_string())
}

macro_rules! join_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Builds the identifier from raw source text; `None` when blank.
            pub fn parse(raw: &str) -> Option<Self> {
                normalize_key(raw).map(Self)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

join_key!(
    /// Service point (premise) identifier, unique within a source.
    LocationId
);

join_key!(
    /// Meter identifier, unique within a source.
    MeterId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_key_trims_and_rejects_blank() {
        assert_eq!(normalize_key("  MTR-1 "), Some("MTR-1".to_string()));
        assert_eq!(normalize_key("   "), None);
        assert_eq!(normalize_key(""), None);
    }

    #[test]
    fn numeric_and_string_meter_ids_compare_equal() {
        assert_eq!(MeterId::parse("1042.0"), MeterId::parse("1042"));
        assert_eq!(MeterId::parse("1042.000"), MeterId::parse(" 1042 "));
    }

    #[test]
    fn non_integral_decimals_are_kept_verbatim() {
        assert_eq!(MeterId::parse("10.5").unwrap().as_str(), "10.5");
        assert_eq!(LocationId::parse("SP-1.0").unwrap().as_str(), "SP-1.0");
        assert_eq!(LocationId::parse(".0").unwrap().as_str(), ".0");
    }

    #[test]
    fn identifiers_serialize_as_plain_strings() {
        let id = LocationId::parse("P-9").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"P-9\"");
    }
}
