//! Data-quality snapshot over every layer of a run.
//!
//! The analyzer only reads: it never filters a table and it never fails.
//! Defects in source data show up here as counts instead of errors.

pub mod render;
pub mod stats;

use std::collections::{BTreeMap, BTreeSet, HashSet};

use gridflow_client::domain::{
    DailySummary, IntervalReading, LocationId, Meter, ServicePoint, SourceId, SourceTimestamp,
    UsageFact,
};
use serde::Serialize;
use time::OffsetDateTime;

use crate::{
    config::PipelineConfig,
    landing::{EntityKind, LandingCounts},
    transform::resolve::SourceLinkage,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Landing,
    Standardized,
    Product,
    Experience,
}

impl Layer {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Landing => "landing",
            Self::Standardized => "standardized",
            Self::Product => "product",
            Self::Experience => "experience",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DqSettings {
    pub iqr_multiplier: f64,
    pub timestamp_floor: OffsetDateTime,
}

impl From<&PipelineConfig> for DqSettings {
    fn from(cfg: &PipelineConfig) -> Self {
        Self {
            iqr_multiplier: cfg.iqr_multiplier,
            timestamp_floor: cfg.timestamp_floor,
        }
    }
}

/// Rows one invariant removed from one source's table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateCount {
    pub table: &'static str,
    pub source_id: SourceId,
    pub dropped: u64,
}

/// Borrowed view of everything a run produced.
#[derive(Debug, Clone, Copy)]
pub struct DqInputs<'a> {
    pub landing: &'a [(SourceId, LandingCounts)],
    pub service_points: &'a [ServicePoint],
    pub meters: &'a [Meter],
    pub intervals: &'a [IntervalReading],
    pub usage_facts: &'a [UsageFact],
    pub daily_summaries: &'a [DailySummary],
    pub duplicates: &'a [DuplicateCount],
    pub linkage: &'a BTreeMap<SourceId, SourceLinkage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowCount {
    pub layer: Layer,
    pub table: &'static str,
    pub source_id: SourceId,
    pub rows: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NullRate {
    pub table: &'static str,
    pub field: &'static str,
    pub nulls: u64,
    pub total: u64,
    pub rate: f64,
    pub flagged: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferentialIntegrity {
    pub intervals: u64,
    /// Intervals whose meter reference is absent or matches no meter.
    pub meter_orphans: u64,
    pub meter_orphan_pct: f64,
    /// Intervals whose location is absent or matches no service point.
    pub location_orphans: u64,
    pub location_orphan_pct: f64,
    pub unlinked_intervals: u64,
    pub meters_without_location: u64,
    pub service_points_without_meter: u64,
    pub service_points_without_interval: u64,
    pub meter_linkage: BTreeMap<SourceId, SourceLinkage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimestampSanity {
    #[serde(with = "time::serde::rfc3339::option")]
    pub min_interval_start: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub max_interval_start: Option<OffsetDateTime>,
    pub missing: u64,
    pub unparseable: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub floor: OffsetDateTime,
    pub before_floor: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueDistribution {
    pub count: u64,
    pub missing: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    pub q1: Option<f64>,
    pub q3: Option<f64>,
    pub lower_fence: Option<f64>,
    pub upper_fence: Option<f64>,
    pub negatives: u64,
    pub zeros: u64,
    pub outliers: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalPeak {
    pub value: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub source_id: SourceId,
    pub location_id: LocationId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperienceSummary {
    pub total_rows: u64,
    pub distinct_locations: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub first_bucket_start: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_bucket_end: Option<OffsetDateTime>,
    pub min_interval_count: Option<u64>,
    pub max_interval_count: Option<u64>,
    pub mean_interval_count: Option<f64>,
    pub global_peak: Option<GlobalPeak>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DqSnapshot {
    pub row_counts: Vec<RowCount>,
    pub duplicates_dropped: Vec<DuplicateCount>,
    pub null_rates: Vec<NullRate>,
    pub referential_integrity: ReferentialIntegrity,
    pub timestamps: TimestampSanity,
    pub values: ValueDistribution,
    pub experience: ExperienceSummary,
}

impl DqSnapshot {
    pub fn rows(&self, layer: Layer, table: &str) -> u64 {
        self.row_counts
            .iter()
            .filter(|c| c.layer == layer && c.table == table)
            .map(|c| c.rows)
            .sum()
    }
}

fn pct(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

fn count_per_source<'a, T: 'a>(
    rows: impl IntoIterator<Item = &'a T>,
    source_of: fn(&T) -> &SourceId,
) -> BTreeMap<SourceId, u64> {
    let mut counts = BTreeMap::new();
    for row in rows {
        *counts.entry(source_of(row).clone()).or_default() += 1;
    }
    counts
}

fn row_counts(inputs: &DqInputs<'_>) -> Vec<RowCount> {
    let mut out = Vec::new();

    for kind in EntityKind::ALL {
        for (source_id, counts) in inputs.landing {
            out.push(RowCount {
                layer: Layer::Landing,
                table: kind.as_str(),
                source_id: source_id.clone(),
                rows: counts.get(kind),
            });
        }
    }

    // Every landed source appears in every later layer, even with zero rows.
    let per_layer = [
        (
            Layer::Standardized,
            "service_points",
            count_per_source(inputs.service_points, |r| &r.source_id),
        ),
        (
            Layer::Standardized,
            "meters",
            count_per_source(inputs.meters, |r| &r.source_id),
        ),
        (
            Layer::Standardized,
            "intervals",
            count_per_source(inputs.intervals, |r| &r.source_id),
        ),
        (
            Layer::Product,
            "usage_facts",
            count_per_source(inputs.usage_facts, |r| &r.reading.source_id),
        ),
        (
            Layer::Experience,
            "daily_summaries",
            count_per_source(inputs.daily_summaries, |r| &r.source_id),
        ),
    ];

    for (layer, table, counts) in per_layer {
        let sources: BTreeSet<&SourceId> = inputs
            .landing
            .iter()
            .map(|(id, _)| id)
            .chain(counts.keys())
            .collect();
        for source_id in sources {
            out.push(RowCount {
                layer,
                table,
                source_id: source_id.clone(),
                rows: counts.get(source_id).copied().unwrap_or(0),
            });
        }
    }
    out
}

fn null_rate<T>(table: &'static str, field: &'static str, rows: &[T], is_null: impl Fn(&T) -> bool) -> NullRate {
    let nulls = rows.iter().filter(|r| is_null(r)).count() as u64;
    let total = rows.len() as u64;
    let rate = if total == 0 { 0.0 } else { nulls as f64 / total as f64 };
    NullRate {
        table,
        field,
        nulls,
        total,
        rate,
        flagged: nulls > 0,
    }
}

fn null_rates(inputs: &DqInputs<'_>) -> Vec<NullRate> {
    let rates = vec![
        null_rate("service_points", "location_id", inputs.service_points, |r| {
            r.location_id.is_none()
        }),
        null_rate("meters", "meter_id", inputs.meters, |r| r.meter_id.is_none()),
        null_rate("meters", "location_id", inputs.meters, |r| r.location_id.is_none()),
        null_rate("intervals", "meter_id", inputs.intervals, |r| r.meter_id.is_none()),
        null_rate("intervals", "location_id", inputs.intervals, |r| r.location_id.is_none()),
        null_rate("intervals", "interval_start", inputs.intervals, |r| {
            r.interval_start.parsed().is_none()
        }),
        null_rate("intervals", "channel", inputs.intervals, |r| r.channel.is_none()),
        null_rate("intervals", "value", inputs.intervals, |r| r.value.is_none()),
        null_rate("usage_facts", "location_id", inputs.usage_facts, |r| {
            r.reading.location_id.is_none()
        }),
    ];

    for rate in rates.iter().filter(|r| r.flagged) {
        tracing::warn!(
            table = rate.table,
            field = rate.field,
            nulls = rate.nulls,
            rate = rate.rate,
            "critical field has nulls"
        );
    }
    rates
}

fn sp_without<'a>(
    service_points: &'a [ServicePoint],
    refs: &HashSet<(&'a SourceId, &'a LocationId)>,
) -> u64 {
    service_points
        .iter()
        .filter(|sp| match &sp.location_id {
            Some(loc) => !refs.contains(&(&sp.source_id, loc)),
            None => true,
        })
        .count() as u64
}

fn referential_integrity(inputs: &DqInputs<'_>) -> ReferentialIntegrity {
    let meter_keys: HashSet<_> = inputs
        .meters
        .iter()
        .filter_map(|m| m.meter_id.as_ref().map(|id| (&m.source_id, id)))
        .collect();
    let sp_keys: HashSet<_> = inputs
        .service_points
        .iter()
        .filter_map(|sp| sp.location_id.as_ref().map(|loc| (&sp.source_id, loc)))
        .collect();
    let metered_locations: HashSet<_> = inputs
        .meters
        .iter()
        .filter_map(|m| m.location_id.as_ref().map(|loc| (&m.source_id, loc)))
        .collect();
    let read_locations: HashSet<_> = inputs
        .intervals
        .iter()
        .filter_map(|r| r.location_id.as_ref().map(|loc| (&r.source_id, loc)))
        .collect();

    let intervals = inputs.intervals.len() as u64;
    let meter_orphans = inputs
        .intervals
        .iter()
        .filter(|r| match &r.meter_id {
            Some(id) => !meter_keys.contains(&(&r.source_id, id)),
            None => true,
        })
        .count() as u64;
    let location_orphans = inputs
        .intervals
        .iter()
        .filter(|r| match &r.location_id {
            Some(loc) => !sp_keys.contains(&(&r.source_id, loc)),
            None => true,
        })
        .count() as u64;

    ReferentialIntegrity {
        intervals,
        meter_orphans,
        meter_orphan_pct: pct(meter_orphans, intervals),
        location_orphans,
        location_orphan_pct: pct(location_orphans, intervals),
        unlinked_intervals: inputs.intervals.iter().filter(|r| !r.is_linked()).count() as u64,
        meters_without_location: inputs.meters.iter().filter(|m| m.location_id.is_none()).count()
            as u64,
        service_points_without_meter: sp_without(inputs.service_points, &metered_locations),
        service_points_without_interval: sp_without(inputs.service_points, &read_locations),
        meter_linkage: inputs.linkage.clone(),
    }
}

fn timestamp_sanity(intervals: &[IntervalReading], floor: OffsetDateTime) -> TimestampSanity {
    let mut sanity = TimestampSanity {
        min_interval_start: None,
        max_interval_start: None,
        missing: 0,
        unparseable: 0,
        floor,
        before_floor: 0,
    };

    for row in intervals {
        match row.interval_start {
            SourceTimestamp::Missing => sanity.missing += 1,
            SourceTimestamp::Unparseable(_) => sanity.unparseable += 1,
            SourceTimestamp::Parsed(ts) => {
                sanity.min_interval_start = Some(sanity.min_interval_start.map_or(ts, |m| m.min(ts)));
                sanity.max_interval_start = Some(sanity.max_interval_start.map_or(ts, |m| m.max(ts)));
                if ts < floor {
                    sanity.before_floor += 1;
                }
            }
        }
    }
    sanity
}

fn value_distribution(intervals: &[IntervalReading], k: f64) -> ValueDistribution {
    let values: Vec<f64> = intervals.iter().filter_map(|r| r.value).collect();
    let missing = (intervals.len() - values.len()) as u64;
    let summary = stats::describe(values.iter().copied());
    let fences = summary.map(|d| {
        let iqr = d.q3 - d.q1;
        (d.q1 - k * iqr, d.q3 + k * iqr)
    });

    ValueDistribution {
        count: values.len() as u64,
        missing,
        min: summary.map(|d| d.min),
        max: summary.map(|d| d.max),
        mean: summary.map(|d| d.mean),
        median: summary.map(|d| d.median),
        q1: summary.map(|d| d.q1),
        q3: summary.map(|d| d.q3),
        lower_fence: fences.map(|f| f.0),
        upper_fence: fences.map(|f| f.1),
        negatives: values.iter().filter(|v| **v < 0.0).count() as u64,
        zeros: values.iter().filter(|v| **v == 0.0).count() as u64,
        outliers: fences.map_or(0, |(lo, hi)| {
            values.iter().filter(|v| **v < lo || **v > hi).count() as u64
        }),
    }
}

fn experience_summary(summaries: &[DailySummary]) -> ExperienceSummary {
    let locations: HashSet<_> = summaries.iter().map(|s| (&s.source_id, &s.location_id)).collect();
    let counts = stats::describe(summaries.iter().map(|s| s.interval_count as f64));

    let global_peak = summaries
        .iter()
        .reduce(|best, s| {
            if s.peak_value > best.peak_value
                || (s.peak_value == best.peak_value && s.peak_ts < best.peak_ts)
            {
                s
            } else {
                best
            }
        })
        .map(|s| GlobalPeak {
            value: s.peak_value,
            ts: s.peak_ts,
            source_id: s.source_id.clone(),
            location_id: s.location_id.clone(),
        });

    ExperienceSummary {
        total_rows: summaries.len() as u64,
        distinct_locations: locations.len() as u64,
        first_bucket_start: summaries.iter().map(|s| s.bucket_start).min(),
        last_bucket_end: summaries.iter().map(|s| s.bucket_end).max(),
        min_interval_count: summaries.iter().map(|s| s.interval_count).min(),
        max_interval_count: summaries.iter().map(|s| s.interval_count).max(),
        mean_interval_count: counts.map(|d| d.mean),
        global_peak,
    }
}

/// Computes the full snapshot for one run.
pub fn analyze(inputs: &DqInputs<'_>, settings: &DqSettings) -> DqSnapshot {
    let snapshot = DqSnapshot {
        row_counts: row_counts(inputs),
        duplicates_dropped: inputs.duplicates.to_vec(),
        null_rates: null_rates(inputs),
        referential_integrity: referential_integrity(inputs),
        timestamps: timestamp_sanity(inputs.intervals, settings.timestamp_floor),
        values: value_distribution(inputs.intervals, settings.iqr_multiplier),
        experience: experience_summary(inputs.daily_summaries),
    };

    tracing::info!(
        intervals = snapshot.referential_integrity.intervals,
        meter_orphans = snapshot.referential_integrity.meter_orphans,
        location_orphans = snapshot.referential_integrity.location_orphans,
        outliers = snapshot.values.outliers,
        "data quality snapshot computed"
    );
    snapshot
}
