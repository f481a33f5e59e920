use serde::{Deserialize, Serialize};

use super::{LocationId, MeterId, SourceId, SourceTimestamp};

/// A physical metering device. Unique on `(source_id, meter_id)`.
///
/// `location_id` is absent when the source carries no meter → location link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meter {
    pub source_id: SourceId,
    pub meter_id: Option<MeterId>,
    pub location_id: Option<LocationId>,
    pub serial_number: Option<String>,
    pub meter_type: Option<String>,
    pub meter_category: Option<String>,
    pub meter_status: Option<String>,
    pub installed_at: SourceTimestamp,
    pub removed_at: SourceTimestamp,
    pub created_at: SourceTimestamp,
    pub updated_at: SourceTimestamp,
}
