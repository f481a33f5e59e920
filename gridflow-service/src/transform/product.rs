use std::collections::{BTreeMap, HashMap, HashSet};

use gridflow_client::domain::{IntervalReading, LocationId, Meter, ServicePoint, SourceId, UsageFact};

use crate::{
    pipeline::PipelineError,
    transform::resolve::{meter_index, LinkageGuard},
};

fn service_point_index(
    service_points: &[ServicePoint],
) -> Result<HashMap<(&SourceId, &LocationId), &ServicePoint>, PipelineError> {
    let mut index = HashMap::with_capacity(service_points.len());
    for sp in service_points {
        if let Some(location) = &sp.location_id {
            if index.insert((&sp.source_id, location), sp).is_some() {
                return Err(PipelineError::JoinFanOut {
                    table: "service_points",
                    key: format!("{}/{}", sp.source_id, location),
                });
            }
        }
    }
    Ok(index)
}

fn fact_from(
    reading: &IntervalReading,
    meter: Option<&Meter>,
    service_point: Option<&ServicePoint>,
) -> UsageFact {
    let meter_field = |f: fn(&Meter) -> &Option<String>| meter.and_then(|m| f(m).clone());
    let sp_field = |f: fn(&ServicePoint) -> &Option<String>| service_point.and_then(|sp| f(sp).clone());

    UsageFact {
        reading: reading.clone(),
        linked: reading.is_linked(),
        meter_matched: meter.is_some(),
        location_matched: service_point.is_some(),
        serial_number: meter_field(|m| &m.serial_number),
        meter_type: meter_field(|m| &m.meter_type),
        meter_category: meter_field(|m| &m.meter_category),
        meter_status: meter_field(|m| &m.meter_status),
        service_point_number: sp_field(|sp| &sp.service_point_number),
        house_num: sp_field(|sp| &sp.house_num),
        street: sp_field(|sp| &sp.street),
        house_supp: sp_field(|sp| &sp.house_supp),
        city: sp_field(|sp| &sp.city),
        zip: sp_field(|sp| &sp.zip),
        state: sp_field(|sp| &sp.state),
    }
}

/// Denormalizes meter and service point context onto every interval.
///
/// Both joins are left joins, so the output has exactly one fact per
/// interval in input order. The meter join is checked per source against
/// `guard`, including rows whose location came from the source itself.
pub fn build_usage_facts(
    service_points: &[ServicePoint],
    meters: &[Meter],
    intervals: &[IntervalReading],
    guard: &LinkageGuard,
) -> Result<Vec<UsageFact>, PipelineError> {
    let meters_by_id = meter_index(meters)?;
    let sps_by_location = service_point_index(service_points)?;

    let facts: Vec<UsageFact> = intervals
        .iter()
        .map(|reading| {
            let meter = reading
                .meter_id
                .as_ref()
                .and_then(|id| meters_by_id.get(&(&reading.source_id, id)).copied());
            let service_point = reading
                .location_id
                .as_ref()
                .and_then(|loc| sps_by_location.get(&(&reading.source_id, loc)).copied());
            fact_from(reading, meter, service_point)
        })
        .collect();

    if facts.len() != intervals.len() {
        return Err(PipelineError::Cardinality {
            stage: "usage_facts",
            expected: intervals.len(),
            actual: facts.len(),
        });
    }

    let sources_with_meters: HashSet<&SourceId> = meters.iter().map(|m| &m.source_id).collect();
    let mut meter_join: BTreeMap<&SourceId, (u64, u64)> = BTreeMap::new();
    for fact in &facts {
        let (matched, attempted) = meter_join.entry(&fact.reading.source_id).or_default();
        *attempted += 1;
        if fact.meter_matched {
            *matched += 1;
        }
    }
    for (source, (matched, attempted)) in meter_join {
        guard.check(source, sources_with_meters.contains(source), matched, attempted)?;
    }

    metrics::counter!("gridflow_usage_facts_total").increment(facts.len() as u64);
    tracing::info!(
        facts = facts.len(),
        unlinked = facts.iter().filter(|f| !f.linked).count(),
        "usage facts built"
    );

    Ok(facts)
}
