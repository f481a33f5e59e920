use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A timestamp as it came out of a source record.
///
/// Decode failures are kept as `Unparseable` together with the raw text so
/// they can be counted later; they are never replaced by a default instant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum SourceTimestamp {
    Missing,
    Unparseable(String),
    Parsed(#[serde(with = "time::serde::rfc3339")] OffsetDateTime),
}

impl SourceTimestamp {
    /// Applies a source-specific decoding rule to an optional raw value.
    pub fn decode<F>(raw: Option<&str>, rule: F) -> Self
    where
        F: FnOnce(&str) -> Option<OffsetDateTime>,
    {
        match raw {
            None => Self::Missing,
            Some(text) => match rule(text) {
                Some(ts) => Self::Parsed(ts),
                None => Self::Unparseable(text.to_string()),
            },
        }
    }

    pub fn parsed(&self) -> Option<OffsetDateTime> {
        match self {
            Self::Parsed(ts) => Some(*ts),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    pub fn is_unparseable(&self) -> bool {
        matches!(self, Self::Unparseable(_))
    }
}
