use std::{fs, path::PathBuf, sync::Arc};

use gridflow_client::domain::{LocationId, LocationOrigin, SourceId};
use gridflow_service::{
    adapters::AdapterRegistry,
    config::{AppConfig, SourceConfig},
    landing::{csv_file::load_source, RawTable, SourceLanding},
    quality::Layer,
    sinks::ndjson,
    transform::security::{PiiAccessLevel, MASK},
    Pipeline, PipelineError, PipelineRun,
};
use time::macros::{date, datetime};

fn fixture_dir(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn config_toml() -> String {
    format!(
        r#"
        [pipeline]
        timestamp_floor = "2000-01-01T00:00:00Z"

        [[pipeline.sources]]
        id = "UTILITY1"
        adapter = "utility1"
        landing_dir = "{}"

        [[pipeline.sources]]
        id = "UTILITY2"
        adapter = "utility2"
        landing_dir = "{}"

        [output]
        dir = "unused"
        pii_access_level = "external"
        "#,
        fixture_dir("utility1").display(),
        fixture_dir("utility2").display(),
    )
}

fn pipeline() -> (AppConfig, Arc<Pipeline>) {
    let cfg = AppConfig::from_toml_str(&config_toml()).unwrap();
    let pipeline = Pipeline::new(cfg.pipeline.clone(), AdapterRegistry::default()).unwrap();
    (cfg, Arc::new(pipeline))
}

fn run_sequential() -> PipelineRun {
    let (cfg, pipeline) = pipeline();
    let landings: Vec<SourceLanding> = cfg
        .pipeline
        .sources
        .iter()
        .map(|s| load_source(s).unwrap())
        .collect();
    pipeline.run(&landings).unwrap()
}

#[test]
fn two_sources_yield_one_fact_and_one_summary_each() {
    let run = run_sequential();
    let u1 = SourceId::new("UTILITY1");
    let u2 = SourceId::new("UTILITY2");

    // Three identical utility2 rows collapse to one.
    assert_eq!(run.standardized.intervals.len(), 2);
    assert_eq!(run.usage_facts.len(), run.standardized.intervals.len());

    let fact_u1 = run.usage_facts.iter().find(|f| f.reading.source_id == u1).unwrap();
    assert_eq!(fact_u1.reading.location_id, LocationId::parse("1"));
    assert_eq!(fact_u1.reading.location_origin, LocationOrigin::Source);
    assert!(fact_u1.linked && fact_u1.meter_matched && fact_u1.location_matched);
    assert_eq!(fact_u1.reading.interval_end, Some(datetime!(2025-01-22 01:00 UTC)));

    let fact_u2 = run.usage_facts.iter().find(|f| f.reading.source_id == u2).unwrap();
    assert_eq!(fact_u2.reading.location_id, LocationId::parse("P-2"));
    assert_eq!(fact_u2.reading.location_origin, LocationOrigin::Meter);
    assert_eq!(fact_u2.reading.value, Some(20.0));
    assert_eq!(fact_u2.street.as_deref(), Some("Main St"));

    assert_eq!(run.daily_summaries.len(), 2);
    for (summary, value) in run.daily_summaries.iter().zip([10.0, 20.0]) {
        assert_eq!(summary.day, date!(2025 - 01 - 22));
        assert_eq!(summary.interval_count, 1);
        assert_eq!(summary.total_usage, value);
        assert_eq!(summary.peak_value, value);
        assert_eq!(summary.pit_value, value);
        assert_eq!(summary.bucket_start, datetime!(2025-01-22 00:00 UTC));
        assert_eq!(summary.bucket_end, datetime!(2025-01-23 00:00 UTC));
    }

    let dq = &run.snapshot;
    assert_eq!(dq.rows(Layer::Landing, "intervals"), 4);
    assert_eq!(dq.rows(Layer::Standardized, "intervals"), 2);
    assert_eq!(dq.rows(Layer::Experience, "daily_summaries"), 2);
    let dropped = dq
        .duplicates_dropped
        .iter()
        .find(|d| d.table == "intervals" && d.source_id == u2)
        .unwrap();
    assert_eq!(dropped.dropped, 2);
    assert_eq!(dq.referential_integrity.meter_orphans, 0);
    assert_eq!(dq.referential_integrity.location_orphans, 0);
}

#[test]
fn unmatched_meter_is_kept_unlinked_and_counted() {
    let (_, pipeline) = pipeline();
    let utility1 = load_source(&SourceConfig {
        id: SourceId::new("UTILITY1"),
        adapter: "utility1".to_string(),
        landing_dir: fixture_dir("utility1"),
        file_prefix: None,
    })
    .unwrap();
    let utility2 = SourceLanding {
        source_id: SourceId::new("UTILITY2"),
        service_points: RawTable::from_rows(
            &[
                "premise_id",
                "premise_house_num",
                "premise_street",
                "premise_city",
                "premise_zip",
                "premise_region",
            ],
            &[&["P-2", "12", "Main St", "Troy", "12180", "NY"]],
        ),
        meters: RawTable::from_rows(
            &["premise_id", "meter_id", "meter_number", "meter_type"],
            &[&["P-2", "M2", "SN-2002", "AMI"]],
        ),
        intervals: RawTable::from_rows(
            &["channel", "duration", "meter_id", "quality", "timestamp", "value"],
            &[
                &["E", "3600", "M2", "A", "20250122", "20"],
                &["E", "3600", "M9", "A", "20250122", "5"],
            ],
        ),
    };

    let run = pipeline.run(&[utility1, utility2]).unwrap();

    let orphan = run
        .usage_facts
        .iter()
        .find(|f| f.reading.meter_id.as_ref().map(|m| m.as_str()) == Some("M9"))
        .unwrap();
    assert!(!orphan.linked);
    assert_eq!(orphan.reading.location_id, None);
    assert_eq!(orphan.reading.location_origin, LocationOrigin::Unresolved);

    // Excluded from summaries: one per linked location only.
    assert_eq!(run.daily_summaries.len(), 2);
    assert!(run.daily_summaries.iter().all(|s| s.total_usage != 5.0));

    let ri = &run.snapshot.referential_integrity;
    assert_eq!(ri.meter_orphans, 1);
    assert_eq!(ri.unlinked_intervals, 1);
    assert_eq!(ri.location_orphans, 1);
}

#[test]
fn reruns_write_byte_identical_tables() {
    let (cfg, _) = pipeline();
    let first = tempfile::TempDir::new().unwrap();
    let second = tempfile::TempDir::new().unwrap();

    let run_a = run_sequential();
    let run_b = run_sequential();
    ndjson::write_run(first.path(), &run_a, cfg.output.pii_access_level).unwrap();
    ndjson::write_run(second.path(), &run_b, cfg.output.pii_access_level).unwrap();

    for file in [
        "service_points.ndjson",
        "meters.ndjson",
        "intervals.ndjson",
        "usage_facts.ndjson",
        "daily_summaries.ndjson",
        ndjson::SNAPSHOT_FILE,
    ] {
        let a = fs::read(first.path().join(file)).unwrap();
        let b = fs::read(second.path().join(file)).unwrap();
        assert_eq!(a, b, "{file} differs between runs");
    }
    assert_eq!(run_a.table_digests().unwrap(), run_b.table_digests().unwrap());
}

#[test]
fn exported_facts_are_masked_for_external_readers() {
    let run = run_sequential();
    let dir = tempfile::TempDir::new().unwrap();
    ndjson::write_run(dir.path(), &run, PiiAccessLevel::External).unwrap();

    let text = fs::read_to_string(dir.path().join("usage_facts.ndjson")).unwrap();
    assert!(text.contains(MASK));
    assert!(!text.contains("Main St"));
    assert!(text.contains("\"zip\":\"121**\""));

    // The standardized layer is internal and keeps the address.
    let sps = fs::read_to_string(dir.path().join("service_points.ndjson")).unwrap();
    assert!(sps.contains("Main St"));
}

#[test]
fn landing_with_the_wrong_schema_names_source_table_and_field() {
    let (_, pipeline) = pipeline();
    let wrong = load_source(&SourceConfig {
        id: SourceId::new("UTILITY1"),
        adapter: "utility1".to_string(),
        landing_dir: fixture_dir("utility2"),
        file_prefix: Some("utility2".to_string()),
    })
    .unwrap();
    let utility2 = load_source(&SourceConfig {
        id: SourceId::new("UTILITY2"),
        adapter: "utility2".to_string(),
        landing_dir: fixture_dir("utility2"),
        file_prefix: None,
    })
    .unwrap();

    let err = pipeline.run(&[wrong, utility2]).unwrap_err();
    match err {
        PipelineError::MissingColumn { source_id, table, field } => {
            assert_eq!(source_id, "UTILITY1");
            assert_eq!(table, "service_points");
            assert_eq!(field, "service_point_id");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn meter_join_collapse_fails_for_a_source_with_its_own_locations() {
    let (cfg, pipeline) = pipeline();
    let mut landings: Vec<SourceLanding> = cfg
        .pipeline
        .sources
        .iter()
        .map(|s| load_source(s).unwrap())
        .collect();

    let utility1 = &mut landings[0];
    utility1.meters = RawTable::new(&["METER_ID", "METER_TYPE", "METER_CATEGORY"]);
    utility1.intervals = RawTable::new(&[
        "SERVICE_DELIVERY_POINT_ID",
        "METER_ID",
        "CHANNEL",
        "DURATION",
        "VALUE",
        "QUALITY",
        "TIMESTAMP",
    ]);
    for i in 0..200 {
        utility1
            .meters
            .push_row(vec![format!("MTR-{i}"), "AMI".to_string(), "residential".to_string()]);
        utility1.intervals.push_row(vec![
            "1".to_string(),
            i.to_string(),
            "E".to_string(),
            "3600".to_string(),
            "1".to_string(),
            "A".to_string(),
            format!("2025-01-22T00:{:02}:00Z", i % 60),
        ]);
    }

    match pipeline.run(&landings).unwrap_err() {
        PipelineError::LinkageCollapse {
            source_id,
            matched,
            attempted,
        } => {
            assert_eq!(source_id, "UTILITY1");
            assert_eq!((matched, attempted), (0, 200));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn concurrent_run_matches_sequential_run() {
    let (_, pipeline) = pipeline();
    let concurrent = pipeline.run_concurrent(load_source).await.unwrap();
    assert_eq!(concurrent, run_sequential());
}
