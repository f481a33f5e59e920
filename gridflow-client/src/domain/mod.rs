pub mod daily_summary;
pub mod ids;
pub mod interval;
pub mod meter;
pub mod service_point;
pub mod timestamp;
pub mod usage_fact;

pub use daily_summary::DailySummary;
pub use ids::{normalize_key, LocationId, MeterId, SourceId};
pub use interval::{IntervalReading, LocationOrigin};
pub use meter::Meter;
pub use service_point::ServicePoint;
pub use timestamp::SourceTimestamp;
pub use usage_fact::UsageFact;
