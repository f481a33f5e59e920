use std::collections::{BTreeMap, HashMap, HashSet};

use gridflow_client::domain::{IntervalReading, LocationId, MeterId, SourceId, SourceTimestamp};
use serde::Deserialize;

use crate::pipeline::PipelineError;

/// Fields that can make up the interval measurement key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupField {
    Source,
    /// The location when the row has one, otherwise its meter.
    LocationOrMeter,
    Meter,
    IntervalStart,
    Channel,
}

pub const DEFAULT_DEDUP_KEY: [DedupField; 5] = [
    DedupField::Source,
    DedupField::LocationOrMeter,
    DedupField::Meter,
    DedupField::IntervalStart,
    DedupField::Channel,
];

/// Which row survives among rows sharing a key.
///
/// Neither policy reconciles values: duplicates with different values are
/// resolved purely by position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    #[default]
    FirstWins,
    LastWins,
}

/// A validated key field list. Always contains `Channel`: a source may emit
/// several physical quantities for the same meter and instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupKey(Vec<DedupField>);

impl DedupKey {
    pub fn new(fields: Vec<DedupField>) -> Result<Self, PipelineError> {
        if !fields.contains(&DedupField::Channel) {
            return Err(PipelineError::Config(
                "dedup_key must include 'channel'; without it distinct measurement channels collapse"
                    .to_string(),
            ));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = fields.iter().find(|f| !seen.insert(**f)) {
            return Err(PipelineError::Config(format!("dedup_key lists {dup:?} twice")));
        }
        Ok(Self(fields))
    }

    pub fn fields(&self) -> &[DedupField] {
        &self.0
    }
}

impl Default for DedupKey {
    fn default() -> Self {
        Self(DEFAULT_DEDUP_KEY.to_vec())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeyPart {
    Absent,
    Source(SourceId),
    Location(LocationId),
    Meter(MeterId),
    Instant(i128),
    Unparseable(String),
    Channel(String),
}

fn key_of(row: &IntervalReading, key: &DedupKey) -> Vec<KeyPart> {
    key.fields()
        .iter()
        .map(|field| match field {
            DedupField::Source => KeyPart::Source(row.source_id.clone()),
            DedupField::LocationOrMeter => match (&row.location_id, &row.meter_id) {
                (Some(loc), _) => KeyPart::Location(loc.clone()),
                (None, Some(meter)) => KeyPart::Meter(meter.clone()),
                (None, None) => KeyPart::Absent,
            },
            DedupField::Meter => row
                .meter_id
                .clone()
                .map_or(KeyPart::Absent, KeyPart::Meter),
            DedupField::IntervalStart => match &row.interval_start {
                SourceTimestamp::Parsed(ts) => KeyPart::Instant(ts.unix_timestamp_nanos()),
                SourceTimestamp::Unparseable(raw) => KeyPart::Unparseable(raw.clone()),
                SourceTimestamp::Missing => KeyPart::Absent,
            },
            DedupField::Channel => row
                .channel
                .clone()
                .map_or(KeyPart::Absent, KeyPart::Channel),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct DedupOutcome {
    pub rows: Vec<IntervalReading>,
    /// Rows removed per source; every source in the input is listed.
    pub dropped: BTreeMap<SourceId, u64>,
}

impl DedupOutcome {
    pub fn total_dropped(&self) -> u64 {
        self.dropped.values().sum()
    }
}

/// Collapses interval rows sharing `key`, keeping input order among survivors.
pub fn deduplicate(
    rows: Vec<IntervalReading>,
    key: &DedupKey,
    policy: DuplicatePolicy,
) -> DedupOutcome {
    let keys: Vec<Vec<KeyPart>> = rows.iter().map(|row| key_of(row, key)).collect();

    let keep: Vec<bool> = match policy {
        DuplicatePolicy::FirstWins => {
            let mut seen = HashSet::with_capacity(keys.len());
            keys.iter().map(|k| seen.insert(k)).collect()
        }
        DuplicatePolicy::LastWins => {
            let mut last = HashMap::with_capacity(keys.len());
            for (idx, k) in keys.iter().enumerate() {
                last.insert(k, idx);
            }
            keys.iter()
                .enumerate()
                .map(|(idx, k)| last.get(k) == Some(&idx))
                .collect()
        }
    };

    let mut dropped: BTreeMap<SourceId, u64> = BTreeMap::new();
    let mut survivors = Vec::with_capacity(rows.len());
    for (row, kept) in rows.into_iter().zip(keep) {
        let counter = dropped.entry(row.source_id.clone()).or_default();
        if kept {
            survivors.push(row);
        } else {
            *counter += 1;
        }
    }

    for (source, count) in &dropped {
        if *count > 0 {
            metrics::counter!(
                "gridflow_intervals_deduplicated_total",
                "source" => source.to_string()
            )
            .increment(*count);
            tracing::warn!(source = %source, dropped = count, ?policy, "duplicate interval rows dropped");
        }
    }

    DedupOutcome {
        rows: survivors,
        dropped,
    }
}
