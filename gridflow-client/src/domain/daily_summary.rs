use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

use super::{LocationId, SourceId};

time::serde::format_description!(calendar_day, Date, "[year]-[month]-[day]");

/// Usage for one location on one calendar day.
///
/// The bucket is half-open: `bucket_start <= interval_start < bucket_end`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub source_id: SourceId,
    pub location_id: LocationId,
    #[serde(with = "calendar_day")]
    pub day: Date,
    #[serde(with = "time::serde::rfc3339")]
    pub bucket_start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub bucket_end: OffsetDateTime,
    pub total_usage: f64,
    pub interval_count: u64,
    pub peak_value: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub peak_ts: OffsetDateTime,
    pub pit_value: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub pit_ts: OffsetDateTime,
}
