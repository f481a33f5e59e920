use serde::{Deserialize, Serialize};

use super::IntervalReading;

/// One canonical interval with meter and service point context denormalized
/// onto it. Context fields are absent when the corresponding join missed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageFact {
    #[serde(flatten)]
    pub reading: IntervalReading,
    pub linked: bool,
    pub meter_matched: bool,
    pub location_matched: bool,

    // meter context
    pub serial_number: Option<String>,
    pub meter_type: Option<String>,
    pub meter_category: Option<String>,
    pub meter_status: Option<String>,

    // location context
    pub service_point_number: Option<String>,
    pub house_num: Option<String>,
    pub street: Option<String>,
    pub house_supp: Option<String>,
    pub city: Option<String>,
    pub zip: Option<String>,
    pub state: Option<String>,
}
