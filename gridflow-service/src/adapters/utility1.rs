use gridflow_client::domain::SourceTimestamp;

use crate::{
    adapters::{
        parse_measure, parse_seconds, timestamps::parse_iso, FieldReader, PartialInterval,
        PartialMeter, PartialServicePoint, SourceAdapter,
    },
    landing::EntityKind,
    pipeline::PipelineError,
};

/// Utility 1 extracts.
///
/// Service points carry street-level addresses without house numbers,
/// meters carry no location link, and intervals name their service
/// delivery point directly. Timestamps are ISO text.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utility1Adapter;

fn iso(raw: Option<&str>) -> SourceTimestamp {
    SourceTimestamp::decode(raw, parse_iso)
}

impl SourceAdapter for Utility1Adapter {
    fn kind(&self) -> &'static str {
        "utility1"
    }

    fn required_columns(&self, entity: EntityKind) -> &'static [&'static str] {
        match entity {
            EntityKind::ServicePoints => &[
                "service_point_id",
                "service_point_number",
                "service_point_street",
                "service_point_city",
                "service_point_zip",
                "service_point_state",
            ],
            EntityKind::Meters => &["meter_id"],
            EntityKind::Intervals => &[
                "service_delivery_point_id",
                "meter_id",
                "channel",
                "duration",
                "value",
                "quality",
                "timestamp",
            ],
        }
    }

    fn service_point(&self, rec: &FieldReader<'_>) -> Result<PartialServicePoint, PipelineError> {
        Ok(PartialServicePoint {
            location_id: rec.required_text("service_point_id")?,
            service_point_number: rec.required_text("service_point_number")?,
            house_num: None,
            street: rec.required_text("service_point_street")?,
            house_supp: None,
            city: rec.required_text("service_point_city")?,
            zip: rec.required_text("service_point_zip")?,
            state: rec.required_text("service_point_state")?,
            installed_at: Some(iso(rec.optional("installed_at"))),
            removed_at: Some(iso(rec.optional("removed_at"))),
            created_at: Some(iso(rec.optional("created"))),
            updated_at: Some(iso(rec.optional("updated"))),
        })
    }

    fn meter(&self, rec: &FieldReader<'_>) -> Result<PartialMeter, PipelineError> {
        let meter_id = rec.required_text("meter_id")?;
        Ok(PartialMeter {
            serial_number: meter_id.clone(),
            meter_id,
            location_id: None,
            meter_type: rec.optional_text("meter_type"),
            meter_category: rec.optional_text("meter_category"),
            meter_status: None,
            installed_at: None,
            removed_at: None,
            created_at: None,
            updated_at: None,
        })
    }

    fn interval(&self, rec: &FieldReader<'_>) -> Result<PartialInterval, PipelineError> {
        Ok(PartialInterval {
            location_id: rec.required_text("service_delivery_point_id")?,
            meter_id: rec.required_text("meter_id")?,
            interval_start: Some(iso(rec.required("timestamp")?)),
            duration_seconds: parse_seconds(rec.required("duration")?),
            value: parse_measure(rec.required("value")?),
            quality: rec.required_text("quality")?,
            channel: rec.required_text("channel")?,
            last_update_time: Some(iso(rec.optional("last_update_time"))),
            exported_at: Some(iso(rec.optional("exported_at"))),
        })
    }
}
