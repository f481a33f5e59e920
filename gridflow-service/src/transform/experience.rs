use std::collections::BTreeMap;

use gridflow_client::domain::{DailySummary, LocationId, SourceId, UsageFact};
use time::{Date, Duration, OffsetDateTime};

#[derive(Debug)]
struct Bucket {
    earliest: OffsetDateTime,
    latest: OffsetDateTime,
    total: f64,
    count: u64,
    peak: (f64, OffsetDateTime),
    pit: (f64, OffsetDateTime),
}

impl Bucket {
    fn new(ts: OffsetDateTime, value: f64) -> Self {
        Self {
            earliest: ts,
            latest: ts,
            total: value,
            count: 1,
            peak: (value, ts),
            pit: (value, ts),
        }
    }

    fn add(&mut self, ts: OffsetDateTime, value: f64) {
        self.earliest = self.earliest.min(ts);
        self.latest = self.latest.max(ts);
        self.total += value;
        self.count += 1;
        if value > self.peak.0 || (value == self.peak.0 && ts < self.peak.1) {
            self.peak = (value, ts);
        }
        if value < self.pit.0 || (value == self.pit.0 && ts < self.pit.1) {
            self.pit = (value, ts);
        }
    }
}

/// Rolls linked usage facts up to one row per location and calendar day.
///
/// The day is taken in the offset the interval was recorded with. A bucket
/// spans `[midnight, next midnight)`, where the start uses the offset of its
/// earliest row and the end the offset of its latest, so days that cross a
/// DST change still cover all of their rows. Facts that are unlinked, lack
/// a parsed start or lack a value are skipped.
pub fn build_daily_summaries(facts: &[UsageFact]) -> Vec<DailySummary> {
    let mut buckets: BTreeMap<(SourceId, LocationId, Date), Bucket> = BTreeMap::new();
    let mut skipped = 0u64;

    for fact in facts.iter().filter(|f| f.linked) {
        let r = &fact.reading;
        let (Some(location), Some(ts), Some(value)) = (&r.location_id, r.interval_start.parsed(), r.value)
        else {
            skipped += 1;
            continue;
        };

        buckets
            .entry((r.source_id.clone(), location.clone(), ts.date()))
            .and_modify(|b| b.add(ts, value))
            .or_insert_with(|| Bucket::new(ts, value));
    }

    let summaries: Vec<DailySummary> = buckets
        .into_iter()
        .map(|((source_id, location_id, day), b)| {
            let bucket_start = day.midnight().assume_offset(b.earliest.offset());
            let bucket_end = match day.next_day() {
                Some(next) => next.midnight().assume_offset(b.latest.offset()),
                None => bucket_start.saturating_add(Duration::DAY),
            };
            DailySummary {
                source_id,
                location_id,
                day,
                bucket_start,
                bucket_end,
                total_usage: b.total,
                interval_count: b.count,
                peak_value: b.peak.0,
                peak_ts: b.peak.1,
                pit_value: b.pit.0,
                pit_ts: b.pit.1,
            }
        })
        .collect();

    metrics::counter!("gridflow_daily_summaries_total").increment(summaries.len() as u64);
    if skipped > 0 {
        tracing::warn!(skipped, "linked facts without a start or value left out of daily summaries");
    }
    tracing::info!(summaries = summaries.len(), "daily summaries built");

    summaries
}
