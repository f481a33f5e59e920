use std::collections::{BTreeMap, HashMap, HashSet};

use gridflow_client::domain::{IntervalReading, LocationOrigin, Meter, MeterId, SourceId};
use serde::Serialize;

use crate::pipeline::PipelineError;

/// Lookup of meters by `(source_id, meter_id)`.
///
/// Duplicate keys would fan the join out, so they fail the run instead of
/// silently picking one.
pub fn meter_index(meters: &[Meter]) -> Result<HashMap<(&SourceId, &MeterId), &Meter>, PipelineError> {
    let mut index = HashMap::with_capacity(meters.len());
    for meter in meters {
        if let Some(meter_id) = &meter.meter_id {
            if index.insert((&meter.source_id, meter_id), meter).is_some() {
                return Err(PipelineError::JoinFanOut {
                    table: "meters",
                    key: format!("{}/{}", meter.source_id, meter_id),
                });
            }
        }
    }
    Ok(index)
}

/// When to treat a poor meter-match ratio as a pipeline bug.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkageGuard {
    pub floor: f64,
    pub min_rows: u64,
}

impl LinkageGuard {
    /// Fails when `matched / attempted` drops below the floor once enough
    /// rows were looked up. Sources that landed no meters are exempt.
    pub fn check(
        &self,
        source: &SourceId,
        has_meters: bool,
        matched: u64,
        attempted: u64,
    ) -> Result<(), PipelineError> {
        if !has_meters || attempted == 0 || attempted < self.min_rows {
            return Ok(());
        }
        if (matched as f64 / attempted as f64) < self.floor {
            return Err(PipelineError::LinkageCollapse {
                source_id: source.to_string(),
                matched,
                attempted,
            });
        }
        Ok(())
    }
}

/// Meter lookups made for one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SourceLinkage {
    /// Rows that arrived without a location.
    pub attempted: u64,
    /// Of those, rows whose meter exists.
    pub meter_matched: u64,
    /// Of those, rows that obtained a location.
    pub resolved: u64,
}

impl SourceLinkage {
    pub fn coverage(&self) -> Option<f64> {
        (self.attempted > 0).then(|| self.meter_matched as f64 / self.attempted as f64)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolveOutcome {
    pub rows: Vec<IntervalReading>,
    pub linkage: BTreeMap<SourceId, SourceLinkage>,
}

impl ResolveOutcome {
    pub fn unlinked(&self) -> usize {
        self.rows.iter().filter(|r| !r.is_linked()).count()
    }
}

/// Fills `location_id` from the meter table for rows that lack one.
///
/// Unresolvable rows are kept with an absent location and
/// `LocationOrigin::Unresolved`; nothing is dropped.
pub fn resolve_locations(
    rows: Vec<IntervalReading>,
    meters: &[Meter],
    guard: &LinkageGuard,
) -> Result<ResolveOutcome, PipelineError> {
    let index = meter_index(meters)?;
    let sources_with_meters: HashSet<&SourceId> = meters.iter().map(|m| &m.source_id).collect();

    let mut linkage: BTreeMap<SourceId, SourceLinkage> = BTreeMap::new();
    let mut resolved_rows = Vec::with_capacity(rows.len());

    for mut row in rows {
        if row.location_id.is_some() {
            resolved_rows.push(row);
            continue;
        }

        let stats = linkage.entry(row.source_id.clone()).or_default();
        stats.attempted += 1;

        let meter = row
            .meter_id
            .as_ref()
            .and_then(|id| index.get(&(&row.source_id, id)));
        if let Some(meter) = meter {
            stats.meter_matched += 1;
            if let Some(location) = &meter.location_id {
                stats.resolved += 1;
                row.location_id = Some(location.clone());
                row.location_origin = LocationOrigin::Meter;
            }
        }
        resolved_rows.push(row);
    }

    for (source, stats) in &linkage {
        let coverage = stats.coverage().unwrap_or(1.0);
        let unresolved = stats.attempted - stats.resolved;

        tracing::info!(
            source = %source,
            attempted = stats.attempted,
            meter_matched = stats.meter_matched,
            resolved = stats.resolved,
            coverage,
            "meter linkage resolved"
        );
        if unresolved > 0 {
            metrics::counter!("gridflow_intervals_unlinked_total", "source" => source.to_string())
                .increment(unresolved);
            tracing::warn!(source = %source, unresolved, "interval rows left without a location");
        }

        guard.check(
            source,
            sources_with_meters.contains(source),
            stats.meter_matched,
            stats.attempted,
        )?;
    }

    Ok(ResolveOutcome {
        rows: resolved_rows,
        linkage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridflow_client::domain::{LocationId, SourceTimestamp};
    use time::macros::datetime;

    const GUARD: LinkageGuard = LinkageGuard {
        floor: 0.01,
        min_rows: 100,
    };

    fn meter(source: &str, id: &str, location: Option<&str>) -> Meter {
        Meter {
            source_id: SourceId::new(source),
            meter_id: MeterId::parse(id),
            location_id: location.and_then(LocationId::parse),
            serial_number: None,
            meter_type: None,
            meter_category: None,
            meter_status: None,
            installed_at: SourceTimestamp::Missing,
            removed_at: SourceTimestamp::Missing,
            created_at: SourceTimestamp::Missing,
            updated_at: SourceTimestamp::Missing,
        }
    }

    fn interval(source: &str, meter: &str) -> IntervalReading {
        IntervalReading {
            source_id: SourceId::new(source),
            location_id: None,
            location_origin: LocationOrigin::Unresolved,
            meter_id: MeterId::parse(meter),
            interval_start: SourceTimestamp::Parsed(datetime!(2025-01-22 00:00:00 UTC)),
            interval_end: None,
            duration_seconds: None,
            value: Some(1.0),
            quality: None,
            channel: Some("E".to_string()),
            last_update_time: SourceTimestamp::Missing,
            exported_at: SourceTimestamp::Missing,
        }
    }

    #[test]
    fn full_meter_coverage_when_every_meter_exists() {
        // Meter ids arrive as float text on one side and integer text on the other.
        let meters = vec![meter("U2", "1042.0", Some("P-1")), meter("U2", "1043", Some("P-2"))];
        let rows = (0..150)
            .map(|i| interval("U2", if i % 2 == 0 { "1042" } else { "1043.0" }))
            .collect();

        let out = resolve_locations(rows, &meters, &GUARD).unwrap();
        let stats = out.linkage[&SourceId::new("U2")];

        assert_eq!(stats.attempted, 150);
        assert_eq!(stats.meter_matched, 150);
        assert_eq!(stats.coverage(), Some(1.0));
        assert_eq!(out.unlinked(), 0);
        assert!(out.rows.iter().all(|r| r.location_origin == LocationOrigin::Meter));
        assert_eq!(out.rows[0].location_id, LocationId::parse("P-1"));
        assert_eq!(out.rows[1].location_id, LocationId::parse("P-2"));
    }

    #[test]
    fn orphan_rows_are_retained_unlinked() {
        let meters = vec![meter("U2", "M2", Some("P-1")), meter("U2", "M3", None)];
        let rows = vec![interval("U2", "M2"), interval("U2", "NOPE"), interval("U2", "M3")];

        let out = resolve_locations(rows, &meters, &GUARD).unwrap();
        assert_eq!(out.rows.len(), 3);
        assert_eq!(out.unlinked(), 2);
        assert!(!out.rows[1].is_linked());
        assert_eq!(out.rows[1].location_origin, LocationOrigin::Unresolved);
        // Meter found but it has no location.
        assert!(!out.rows[2].is_linked());

        let stats = out.linkage[&SourceId::new("U2")];
        assert_eq!((stats.attempted, stats.meter_matched, stats.resolved), (3, 2, 1));
    }

    #[test]
    fn source_provided_locations_are_kept() {
        let mut row = interval("U1", "M1");
        row.location_id = LocationId::parse("SP-1");
        row.location_origin = LocationOrigin::Source;

        let out = resolve_locations(vec![row.clone()], &[], &GUARD).unwrap();
        assert_eq!(out.rows, vec![row]);
        assert!(out.linkage.is_empty());
    }

    #[test]
    fn near_zero_coverage_fails_the_run() {
        let meters = vec![meter("U2", "MTR-0001", Some("P-1"))];
        let rows = (0..200).map(|i| interval("U2", &i.to_string())).collect();

        let err = resolve_locations(rows, &meters, &GUARD).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::LinkageCollapse { matched: 0, attempted: 200, .. }
        ));
    }

    #[test]
    fn duplicate_meter_keys_are_a_fan_out() {
        let meters = vec![meter("U2", "M2", Some("P-1")), meter("U2", "M2", Some("P-2"))];
        let err = resolve_locations(vec![interval("U2", "M2")], &meters, &GUARD).unwrap_err();
        assert!(matches!(err, PipelineError::JoinFanOut { table: "meters", .. }));
    }
}
