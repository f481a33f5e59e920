use serde::{Deserialize, Serialize};

use super::{LocationId, SourceId, SourceTimestamp};

/// A physical metered location. Unique on `(source_id, location_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicePoint {
    pub source_id: SourceId,
    pub location_id: Option<LocationId>,
    pub service_point_number: Option<String>,
    pub house_num: Option<String>,
    pub street: Option<String>,
    pub house_supp: Option<String>,
    pub city: Option<String>,
    pub zip: Option<String>,
    pub state: Option<String>,
    pub installed_at: SourceTimestamp,
    pub removed_at: SourceTimestamp,
    pub created_at: SourceTimestamp,
    pub updated_at: SourceTimestamp,
}
