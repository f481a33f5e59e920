use std::fmt::Write;

use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use super::{DqSnapshot, Layer};

fn ts(value: Option<OffsetDateTime>) -> String {
    value
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_else(|| "-".to_string())
}

fn num(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.3}"))
}

/// Plain-text report of a snapshot, one section per concern.
pub fn render_text(dq: &DqSnapshot) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_report(&mut out, dq);
    out
}

fn write_report(out: &mut String, dq: &DqSnapshot) -> std::fmt::Result {
    writeln!(out, "=== ROW COUNTS ===")?;
    for layer in [Layer::Landing, Layer::Standardized, Layer::Product, Layer::Experience] {
        for c in dq.row_counts.iter().filter(|c| c.layer == layer) {
            writeln!(out, "{:<13} {:<16} {:<12} {:>10}", layer.as_str(), c.table, c.source_id, c.rows)?;
        }
    }

    writeln!(out, "\n=== DUPLICATES DROPPED ===")?;
    let dropped: Vec<_> = dq.duplicates_dropped.iter().filter(|d| d.dropped > 0).collect();
    if dropped.is_empty() {
        writeln!(out, "none")?;
    }
    for d in dropped {
        writeln!(out, "{:<16} {:<12} {:>10}", d.table, d.source_id, d.dropped)?;
    }

    writeln!(out, "\n=== NULL RATES (critical fields) ===")?;
    for r in &dq.null_rates {
        let flag = if r.flagged { "  <-- nulls present" } else { "" };
        writeln!(
            out,
            "{:<16} {:<16} {:>8}/{:<8} {:>7.2}%{flag}",
            r.table,
            r.field,
            r.nulls,
            r.total,
            r.rate * 100.0
        )?;
    }

    let ri = &dq.referential_integrity;
    writeln!(out, "\n=== REFERENTIAL INTEGRITY ===")?;
    writeln!(out, "intervals:                       {}", ri.intervals)?;
    writeln!(out, "meter orphans:                   {} ({:.2}%)", ri.meter_orphans, ri.meter_orphan_pct)?;
    writeln!(
        out,
        "location orphans:                {} ({:.2}%)",
        ri.location_orphans, ri.location_orphan_pct
    )?;
    writeln!(out, "unlinked intervals:              {}", ri.unlinked_intervals)?;
    writeln!(out, "meters without location:         {}", ri.meters_without_location)?;
    writeln!(out, "service points without meter:    {}", ri.service_points_without_meter)?;
    writeln!(out, "service points without interval: {}", ri.service_points_without_interval)?;
    for (source, l) in &ri.meter_linkage {
        writeln!(
            out,
            "meter linkage {source}: {}/{} matched, {} resolved",
            l.meter_matched, l.attempted, l.resolved
        )?;
    }

    let t = &dq.timestamps;
    writeln!(out, "\n=== TIMESTAMPS (interval_start) ===")?;
    writeln!(out, "range:       {} .. {}", ts(t.min_interval_start), ts(t.max_interval_start))?;
    writeln!(out, "missing:     {}", t.missing)?;
    writeln!(out, "unparseable: {}", t.unparseable)?;
    writeln!(out, "before {}: {}", ts(Some(t.floor)), t.before_floor)?;

    let v = &dq.values;
    writeln!(out, "\n=== VALUES ===")?;
    writeln!(out, "count {} (missing {})", v.count, v.missing)?;
    writeln!(out, "min {}  max {}  mean {}", num(v.min), num(v.max), num(v.mean))?;
    writeln!(out, "q1 {}  median {}  q3 {}", num(v.q1), num(v.median), num(v.q3))?;
    writeln!(
        out,
        "fences [{}, {}]  outliers {}  negatives {}  zeros {}",
        num(v.lower_fence),
        num(v.upper_fence),
        v.outliers,
        v.negatives,
        v.zeros
    )?;

    let e = &dq.experience;
    writeln!(out, "\n=== EXPERIENCE SUMMARY (DAILY) ===")?;
    if e.total_rows == 0 {
        writeln!(out, "No rows in summary table")?;
        return Ok(());
    }
    writeln!(out, "rows {}  locations {}", e.total_rows, e.distinct_locations)?;
    writeln!(out, "date range: {} -> {}", ts(e.first_bucket_start), ts(e.last_bucket_end))?;
    writeln!(
        out,
        "interval_count min {}  max {}  mean {}",
        e.min_interval_count.map_or_else(|| "-".to_string(), |c| c.to_string()),
        e.max_interval_count.map_or_else(|| "-".to_string(), |c| c.to_string()),
        num(e.mean_interval_count)
    )?;
    if let Some(peak) = &e.global_peak {
        writeln!(
            out,
            "global peak {:.3} at {} ({}/{})",
            peak.value,
            ts(Some(peak.ts)),
            peak.source_id,
            peak.location_id
        )?;
    }
    Ok(())
}
