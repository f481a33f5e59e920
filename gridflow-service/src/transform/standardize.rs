//! Entity normalizers: partial adapter output → canonical tables.
//!
//! Join keys become `LocationId`/`MeterId` here, right after adapter output
//! and before any table from different sources is concatenated.

use std::{
    collections::{BTreeMap, HashSet},
    hash::Hash,
};

use gridflow_client::domain::{
    normalize_key, IntervalReading, LocationId, LocationOrigin, Meter, MeterId, ServicePoint,
    SourceId, SourceTimestamp,
};
use time::Duration;

use crate::{
    adapters::{adapt_table, PartialInterval, PartialMeter, PartialServicePoint, SourceAdapter},
    landing::{EntityKind, SourceLanding},
    pipeline::PipelineError,
};

/// Canonical tables of a single source, in landing order.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardizedSource {
    pub source_id: SourceId,
    pub service_points: Vec<ServicePoint>,
    pub meters: Vec<Meter>,
    pub intervals: Vec<IntervalReading>,
}

fn ts(field: Option<SourceTimestamp>) -> SourceTimestamp {
    field.unwrap_or(SourceTimestamp::Missing)
}

pub fn service_point_from(source_id: &SourceId, p: PartialServicePoint) -> ServicePoint {
    ServicePoint {
        source_id: source_id.clone(),
        location_id: p.location_id.as_deref().and_then(LocationId::parse),
        service_point_number: p.service_point_number,
        house_num: p.house_num,
        street: p.street,
        house_supp: p.house_supp,
        city: p.city,
        zip: p.zip,
        state: p.state,
        installed_at: ts(p.installed_at),
        removed_at: ts(p.removed_at),
        created_at: ts(p.created_at),
        updated_at: ts(p.updated_at),
    }
}

pub fn meter_from(source_id: &SourceId, p: PartialMeter) -> Meter {
    Meter {
        source_id: source_id.clone(),
        meter_id: p.meter_id.as_deref().and_then(MeterId::parse),
        location_id: p.location_id.as_deref().and_then(LocationId::parse),
        serial_number: p.serial_number,
        meter_type: p.meter_type,
        meter_category: p.meter_category,
        meter_status: p.meter_status,
        installed_at: ts(p.installed_at),
        removed_at: ts(p.removed_at),
        created_at: ts(p.created_at),
        updated_at: ts(p.updated_at),
    }
}

pub fn interval_from(source_id: &SourceId, p: PartialInterval) -> IntervalReading {
    let interval_start = ts(p.interval_start);
    let interval_end = match (interval_start.parsed(), p.duration_seconds) {
        (Some(start), Some(secs)) => start.checked_add(Duration::seconds(secs)),
        _ => None,
    };
    let location_id = p.location_id.as_deref().and_then(LocationId::parse);

    IntervalReading {
        source_id: source_id.clone(),
        location_origin: if location_id.is_some() {
            LocationOrigin::Source
        } else {
            LocationOrigin::Unresolved
        },
        location_id,
        meter_id: p.meter_id.as_deref().and_then(MeterId::parse),
        interval_start,
        interval_end,
        duration_seconds: p.duration_seconds,
        value: p.value,
        quality: p.quality,
        channel: p.channel.as_deref().and_then(normalize_key),
        last_update_time: ts(p.last_update_time),
        exported_at: ts(p.exported_at),
    }
}

/// Runs one source's landed tables through its adapter.
pub fn standardize_source(
    adapter: &dyn SourceAdapter,
    landing: &SourceLanding,
) -> Result<StandardizedSource, PipelineError> {
    let source_id = &landing.source_id;

    let service_points = adapt_table(
        adapter,
        source_id,
        EntityKind::ServicePoints,
        &landing.service_points,
        |a, rec| a.service_point(rec),
    )?
    .into_iter()
    .map(|p| service_point_from(source_id, p))
    .collect();

    let meters = adapt_table(adapter, source_id, EntityKind::Meters, &landing.meters, |a, rec| {
        a.meter(rec)
    })?
    .into_iter()
    .map(|p| meter_from(source_id, p))
    .collect();

    let intervals = adapt_table(
        adapter,
        source_id,
        EntityKind::Intervals,
        &landing.intervals,
        |a, rec| a.interval(rec),
    )?
    .into_iter()
    .map(|p| interval_from(source_id, p))
    .collect();

    Ok(StandardizedSource {
        source_id: source_id.clone(),
        service_points,
        meters,
        intervals,
    })
}

/// A combined cross-source table plus what its invariants removed.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityTable<T> {
    pub rows: Vec<T>,
    pub duplicates_dropped: BTreeMap<SourceId, u64>,
}

/// Keeps the first row per present key. Rows without a key are retained so
/// the analyzer can count them.
fn unique_by<T, K, F>(rows: Vec<T>, source_of: fn(&T) -> &SourceId, key_of: F) -> EntityTable<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> Option<K>,
{
    let mut seen = HashSet::with_capacity(rows.len());
    let mut duplicates_dropped: BTreeMap<SourceId, u64> = BTreeMap::new();
    let mut kept = Vec::with_capacity(rows.len());

    for row in rows {
        let counter = duplicates_dropped.entry(source_of(&row).clone()).or_default();
        match key_of(&row) {
            Some(key) if seen.contains(&key) => *counter += 1,
            Some(key) => {
                seen.insert(key);
                kept.push(row);
            }
            None => kept.push(row),
        }
    }

    EntityTable {
        rows: kept,
        duplicates_dropped,
    }
}

/// Concatenates service points across sources; unique on `(source_id, location_id)`.
pub fn combine_service_points<I>(batches: I) -> EntityTable<ServicePoint>
where
    I: IntoIterator<Item = Vec<ServicePoint>>,
{
    let rows: Vec<ServicePoint> = batches.into_iter().flatten().collect();
    unique_by(rows, |sp| &sp.source_id, |sp| {
        sp.location_id.clone().map(|loc| (sp.source_id.clone(), loc))
    })
}

/// Concatenates meters across sources; unique on `(source_id, meter_id)`.
pub fn combine_meters<I>(batches: I) -> EntityTable<Meter>
where
    I: IntoIterator<Item = Vec<Meter>>,
{
    let rows: Vec<Meter> = batches.into_iter().flatten().collect();
    unique_by(rows, |m| &m.source_id, |m| {
        m.meter_id.clone().map(|id| (m.source_id.clone(), id))
    })
}
