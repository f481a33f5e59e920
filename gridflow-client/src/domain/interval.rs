use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{LocationId, MeterId, SourceId, SourceTimestamp};

/// How an interval obtained its `location_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationOrigin {
    /// Carried by the source record itself.
    Source,
    /// Looked up through the meter table.
    Meter,
    /// Not known yet, or the lookup failed.
    Unresolved,
}

/// One measured usage value over a time span.
///
/// `interval_end` is `interval_start + duration_seconds` and is absent when
/// either side is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalReading {
    pub source_id: SourceId,
    pub location_id: Option<LocationId>,
    pub location_origin: LocationOrigin,
    pub meter_id: Option<MeterId>,
    pub interval_start: SourceTimestamp,
    #[serde(with = "time::serde::rfc3339::option")]
    pub interval_end: Option<OffsetDateTime>,
    pub duration_seconds: Option<i64>,
    pub value: Option<f64>,
    pub quality: Option<String>,
    pub channel: Option<String>,
    pub last_update_time: SourceTimestamp,
    pub exported_at: SourceTimestamp,
}

impl IntervalReading {
    /// A reading is linked once it can be attributed to a location.
    pub fn is_linked(&self) -> bool {
        self.location_id.is_some()
    }
}
