use gridflow_client::domain::SourceTimestamp;

use crate::{
    adapters::{
        parse_measure, parse_seconds, timestamps::parse_compact_numeric, FieldReader,
        PartialInterval, PartialMeter, PartialServicePoint, SourceAdapter,
    },
    landing::EntityKind,
    pipeline::PipelineError,
};

/// Utility 2 extracts.
///
/// Premises carry house numbers and supplements, meters link to premises,
/// and intervals only name a meter. Timestamps are fixed-width numbers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utility2Adapter;

fn numeric(raw: Option<&str>) -> SourceTimestamp {
    SourceTimestamp::decode(raw, parse_compact_numeric)
}

impl SourceAdapter for Utility2Adapter {
    fn kind(&self) -> &'static str {
        "utility2"
    }

    fn required_columns(&self, entity: EntityKind) -> &'static [&'static str] {
        match entity {
            EntityKind::ServicePoints => &[
                "premise_id",
                "premise_house_num",
                "premise_street",
                "premise_city",
                "premise_zip",
                "premise_region",
            ],
            EntityKind::Meters => &["premise_id", "meter_id", "meter_number", "meter_type"],
            EntityKind::Intervals => &["channel", "duration", "meter_id", "quality", "timestamp", "value"],
        }
    }

    fn service_point(&self, rec: &FieldReader<'_>) -> Result<PartialServicePoint, PipelineError> {
        Ok(PartialServicePoint {
            location_id: rec.required_text("premise_id")?,
            service_point_number: None,
            house_num: rec.required_text("premise_house_num")?,
            street: rec.required_text("premise_street")?,
            house_supp: rec.optional_text("premise_house_supp"),
            city: rec.required_text("premise_city")?,
            zip: rec.required_text("premise_zip")?,
            state: rec.required_text("premise_region")?,
            installed_at: None,
            removed_at: None,
            created_at: Some(numeric(rec.optional("created_date"))),
            updated_at: None,
        })
    }

    fn meter(&self, rec: &FieldReader<'_>) -> Result<PartialMeter, PipelineError> {
        Ok(PartialMeter {
            meter_id: rec.required_text("meter_id")?,
            location_id: rec.required_text("premise_id")?,
            serial_number: rec.required_text("meter_number")?,
            meter_type: rec.required_text("meter_type")?,
            meter_category: rec.optional_text("meter_channel"),
            meter_status: rec.optional_text("meter_status"),
            installed_at: Some(numeric(rec.optional("installed_at"))),
            removed_at: Some(numeric(rec.optional("removed_at"))),
            created_at: Some(numeric(rec.optional("created"))),
            updated_at: Some(numeric(rec.optional("updated"))),
        })
    }

    fn interval(&self, rec: &FieldReader<'_>) -> Result<PartialInterval, PipelineError> {
        Ok(PartialInterval {
            location_id: None,
            meter_id: rec.required_text("meter_id")?,
            interval_start: Some(numeric(rec.required("timestamp")?)),
            duration_seconds: parse_seconds(rec.required("duration")?),
            value: parse_measure(rec.required("value")?),
            quality: rec.required_text("quality")?,
            channel: rec.required_text("channel")?,
            last_update_time: None,
            exported_at: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landing::RawTable;
    use gridflow_client::domain::SourceId;
    use time::macros::datetime;

    const INTERVAL_COLUMNS: [&str; 6] = ["channel", "duration", "meter_id", "quality", "timestamp", "value"];

    fn interval_of(row: &[&str]) -> PartialInterval {
        let source = SourceId::new("UTILITY2");
        let table = RawTable::from_rows(&INTERVAL_COLUMNS, &[row]);
        let rec = FieldReader::new(&source, EntityKind::Intervals, table.records().next().unwrap());
        Utility2Adapter.interval(&rec).unwrap()
    }

    #[test]
    fn numeric_date_decodes_to_calendar_day() {
        let partial = interval_of(&["E", "3600", "1042", "A", "20250123", "2.5"]);
        assert_eq!(
            partial.interval_start,
            Some(SourceTimestamp::Parsed(datetime!(2025-01-23 00:00:00 UTC)))
        );
        assert!(partial.location_id.is_none());
        assert_eq!(partial.meter_id.as_deref(), Some("1042"));
    }

    #[test]
    fn bad_numeric_date_is_marked_unparseable() {
        let partial = interval_of(&["E", "3600", "1042", "A", "2025-01-23", "2.5"]);
        assert_eq!(
            partial.interval_start,
            Some(SourceTimestamp::Unparseable("2025-01-23".to_string()))
        );

        let partial = interval_of(&["E", "3600", "1042", "A", "", "2.5"]);
        assert_eq!(partial.interval_start, Some(SourceTimestamp::Missing));
    }

    #[test]
    fn meter_links_to_premise() {
        let source = SourceId::new("UTILITY2");
        let table = RawTable::from_rows(
            &["premise_id", "meter_id", "meter_number", "meter_type", "meter_channel", "installed_at"],
            &[&["P-7", "1042", "SN-1042", "AMI", "kWh", "20200105"]],
        );
        let rec = FieldReader::new(&source, EntityKind::Meters, table.records().next().unwrap());
        let partial = Utility2Adapter.meter(&rec).unwrap();

        assert_eq!(partial.location_id.as_deref(), Some("P-7"));
        assert_eq!(partial.serial_number.as_deref(), Some("SN-1042"));
        assert_eq!(partial.meter_category.as_deref(), Some("kWh"));
        assert_eq!(
            partial.installed_at,
            Some(SourceTimestamp::Parsed(datetime!(2020-01-05 00:00:00 UTC)))
        );
        assert_eq!(partial.removed_at, Some(SourceTimestamp::Missing));
    }
}
