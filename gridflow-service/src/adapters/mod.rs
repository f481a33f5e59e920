//! Source adapters: one per utility schema.
//!
//! An adapter maps a single raw record to a partial canonical record. It
//! never looks at other records; joins and deduplication happen later.

pub mod timestamps;
pub mod utility1;
pub mod utility2;

use std::{collections::HashMap, sync::Arc};

use gridflow_client::domain::{SourceId, SourceTimestamp};

use crate::{
    landing::{EntityKind, RawRecord, RawTable},
    pipeline::PipelineError,
};

pub use utility1::Utility1Adapter;
pub use utility2::Utility2Adapter;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PartialServicePoint {
    pub location_id: Option<String>,
    pub service_point_number: Option<String>,
    pub house_num: Option<String>,
    pub street: Option<String>,
    pub house_supp: Option<String>,
    pub city: Option<String>,
    pub zip: Option<String>,
    pub state: Option<String>,
    pub installed_at: Option<SourceTimestamp>,
    pub removed_at: Option<SourceTimestamp>,
    pub created_at: Option<SourceTimestamp>,
    pub updated_at: Option<SourceTimestamp>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PartialMeter {
    pub meter_id: Option<String>,
    pub location_id: Option<String>,
    pub serial_number: Option<String>,
    pub meter_type: Option<String>,
    pub meter_category: Option<String>,
    pub meter_status: Option<String>,
    pub installed_at: Option<SourceTimestamp>,
    pub removed_at: Option<SourceTimestamp>,
    pub created_at: Option<SourceTimestamp>,
    pub updated_at: Option<SourceTimestamp>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PartialInterval {
    pub location_id: Option<String>,
    pub meter_id: Option<String>,
    pub interval_start: Option<SourceTimestamp>,
    pub duration_seconds: Option<i64>,
    pub value: Option<f64>,
    pub quality: Option<String>,
    pub channel: Option<String>,
    pub last_update_time: Option<SourceTimestamp>,
    pub exported_at: Option<SourceTimestamp>,
}

/// A raw record together with the source it came from.
///
/// Missing expected columns surface as `PipelineError::MissingColumn`
/// naming the source, table and field.
pub struct FieldReader<'a> {
    source_id: &'a SourceId,
    entity: EntityKind,
    record: RawRecord<'a>,
}

impl<'a> FieldReader<'a> {
    pub fn new(source_id: &'a SourceId, entity: EntityKind, record: RawRecord<'a>) -> Self {
        Self {
            source_id,
            entity,
            record,
        }
    }

    pub fn source_id(&self) -> &SourceId {
        self.source_id
    }

    /// A column the adapter cannot work without; the cell may still be blank.
    pub fn required(&self, field: &str) -> Result<Option<&'a str>, PipelineError> {
        self.record.get(field).ok_or_else(|| PipelineError::MissingColumn {
            source_id: self.source_id.to_string(),
            table: self.entity.as_str(),
            field: field.to_string(),
        })
    }

    /// A column some extracts of this source omit.
    pub fn optional(&self, field: &str) -> Option<&'a str> {
        self.record.get(field).flatten()
    }

    pub fn required_text(&self, field: &str) -> Result<Option<String>, PipelineError> {
        Ok(self.required(field)?.map(str::to_string))
    }

    pub fn optional_text(&self, field: &str) -> Option<String> {
        self.optional(field).map(str::to_string)
    }
}

/// Parses a measured value; unparseable and non-finite values are absent.
pub fn parse_measure(raw: Option<&str>) -> Option<f64> {
    raw.and_then(|s| s.parse::<f64>().ok()).filter(|v| v.is_finite())
}

/// Parses a whole, non-negative number of seconds, tolerating `900.0`.
/// Negative durations are absent so no interval ends before it starts.
pub fn parse_seconds(raw: Option<&str>) -> Option<i64> {
    let s = raw?;
    let seconds = match s.parse::<i64>() {
        Ok(v) => v,
        Err(_) => {
            let v = s.parse::<f64>().ok()?;
            if !(v.is_finite() && v.fract() == 0.0 && v.abs() < i64::MAX as f64) {
                return None;
            }
            v as i64
        }
    };
    (seconds >= 0).then_some(seconds)
}

/// Raw record → partial canonical record, for one source schema.
pub trait SourceAdapter: Send + Sync {
    /// Registry key, referenced by `adapter = "..."` in source config.
    fn kind(&self) -> &'static str;

    /// Columns that must be present in the landed table for `entity`.
    fn required_columns(&self, entity: EntityKind) -> &'static [&'static str];

    fn service_point(&self, rec: &FieldReader<'_>) -> Result<PartialServicePoint, PipelineError>;

    fn meter(&self, rec: &FieldReader<'_>) -> Result<PartialMeter, PipelineError>;

    fn interval(&self, rec: &FieldReader<'_>) -> Result<PartialInterval, PipelineError>;
}

/// Checks the header of a landed table against the adapter's schema, so a
/// mismatch fails even when the table has no rows.
pub fn check_schema(
    adapter: &dyn SourceAdapter,
    source_id: &SourceId,
    entity: EntityKind,
    table: &RawTable,
) -> Result<(), PipelineError> {
    match adapter
        .required_columns(entity)
        .iter()
        .find(|c| !table.has_column(c))
    {
        Some(missing) => Err(PipelineError::MissingColumn {
            source_id: source_id.to_string(),
            table: entity.as_str(),
            field: missing.to_string(),
        }),
        None => Ok(()),
    }
}

/// Maps every record of `table` through `map_record`, in table order.
pub fn adapt_table<T, F>(
    adapter: &dyn SourceAdapter,
    source_id: &SourceId,
    entity: EntityKind,
    table: &RawTable,
    map_record: F,
) -> Result<Vec<T>, PipelineError>
where
    F: Fn(&dyn SourceAdapter, &FieldReader<'_>) -> Result<T, PipelineError>,
{
    check_schema(adapter, source_id, entity, table)?;
    table
        .records()
        .map(|record| map_record(adapter, &FieldReader::new(source_id, entity, record)))
        .collect()
}

/// Adapter implementations keyed by kind.
#[derive(Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<&'static str, Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn empty() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn get(&self, kind: &str) -> Result<Arc<dyn SourceAdapter>, PipelineError> {
        self.adapters
            .get(kind)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownAdapter(kind.to_string()))
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(Utility1Adapter));
        registry.register(Arc::new(Utility2Adapter));
        registry
    }
}
