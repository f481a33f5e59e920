use std::{collections::BTreeMap, sync::Arc};

use futures::Stream;
use gridflow_client::domain::{DailySummary, IntervalReading, Meter, ServicePoint, SourceId, UsageFact};

use crate::{
    adapters::AdapterRegistry,
    config::{PipelineConfig, SourceConfig},
    landing::{LandingCounts, SourceLanding},
    quality::{self, DqInputs, DqSettings, DqSnapshot, DuplicateCount},
    sinks::ndjson,
    transform::{
        dedup::{deduplicate, DedupKey},
        experience::build_daily_summaries,
        product::build_usage_facts,
        resolve::{resolve_locations, LinkageGuard, SourceLinkage},
        standardize::{combine_meters, combine_service_points, standardize_source, StandardizedSource},
    },
};

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("source '{source_id}' table '{table}' is missing expected column '{field}'")]
    MissingColumn {
        source_id: String,
        table: &'static str,
        field: String,
    },
    #[error("no adapter registered under '{0}'")]
    UnknownAdapter(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("landing error: {0}")]
    Landing(String),
    #[error("join on {table} fans out: key {key} appears more than once")]
    JoinFanOut { table: &'static str, key: String },
    #[error("{stage} produced {actual} rows, expected {expected}")]
    Cardinality {
        stage: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("meter linkage collapsed for source '{source_id}': {matched} of {attempted} lookups matched")]
    LinkageCollapse {
        source_id: String,
        matched: u64,
        attempted: u64,
    },
    #[error("sink error: {0}")]
    Sink(String),
    #[error("worker task failed: {0}")]
    Task(String),
}

/// Consumes a stream of finished rows.
#[async_trait::async_trait]
pub trait Sink<T>: Send + Sync {
    async fn run<S>(&self, input: S) -> Result<(), PipelineError>
    where
        S: Stream<Item = T> + Send + Unpin + 'static;
}

/// One source after landing and adaptation.
#[derive(Debug, Clone, PartialEq)]
pub struct LandedSource {
    pub counts: LandingCounts,
    pub standardized: StandardizedSource,
}

/// The standardized layer: canonical entities after uniqueness, dedup and
/// location resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardizedTables {
    pub landing: Vec<(SourceId, LandingCounts)>,
    pub service_points: Vec<ServicePoint>,
    pub meters: Vec<Meter>,
    pub intervals: Vec<IntervalReading>,
    pub duplicates: Vec<DuplicateCount>,
    pub linkage: BTreeMap<SourceId, SourceLinkage>,
}

/// Every table of a completed run plus its quality snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRun {
    pub standardized: StandardizedTables,
    pub usage_facts: Vec<UsageFact>,
    pub daily_summaries: Vec<DailySummary>,
    pub snapshot: DqSnapshot,
}

impl PipelineRun {
    /// blake3 of each output table's NDJSON encoding, keyed by table name.
    pub fn table_digests(&self) -> Result<BTreeMap<&'static str, String>, PipelineError> {
        fn digest<T: serde::Serialize>(rows: &[T]) -> Result<String, PipelineError> {
            Ok(blake3::hash(&ndjson::encode_table(rows)?).to_hex().to_string())
        }

        let s = &self.standardized;
        Ok(BTreeMap::from([
            ("service_points", digest(&s.service_points)?),
            ("meters", digest(&s.meters)?),
            ("intervals", digest(&s.intervals)?),
            ("usage_facts", digest(&self.usage_facts)?),
            ("daily_summaries", digest(&self.daily_summaries)?),
        ]))
    }
}

/// Configured batch pipeline. Holds no state between runs.
pub struct Pipeline {
    config: PipelineConfig,
    dedup_key: DedupKey,
    registry: AdapterRegistry,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, registry: AdapterRegistry) -> Result<Self, PipelineError> {
        let dedup_key = config.validate()?;
        for source in &config.sources {
            registry.get(&source.adapter)?;
        }
        Ok(Self {
            config,
            dedup_key,
            registry,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn source_config(&self, id: &SourceId) -> Result<&SourceConfig, PipelineError> {
        self.config
            .sources
            .iter()
            .find(|s| &s.id == id)
            .ok_or_else(|| PipelineError::Config(format!("source '{id}' is not configured")))
    }

    /// Adapts one landed source with its configured adapter.
    pub fn standardize(&self, landing: &SourceLanding) -> Result<LandedSource, PipelineError> {
        let source = self.source_config(&landing.source_id)?;
        let adapter = self.registry.get(&source.adapter)?;
        let standardized = standardize_source(adapter.as_ref(), landing)?;

        tracing::info!(
            source = %landing.source_id,
            adapter = %source.adapter,
            service_points = standardized.service_points.len(),
            meters = standardized.meters.len(),
            intervals = standardized.intervals.len(),
            "source standardized"
        );

        Ok(LandedSource {
            counts: landing.counts(),
            standardized,
        })
    }

    /// Adapts every configured source in configured order.
    pub fn standardize_all(&self, landings: &[SourceLanding]) -> Result<Vec<LandedSource>, PipelineError> {
        if let Some(extra) = landings
            .iter()
            .find(|l| self.source_config(&l.source_id).is_err())
        {
            return Err(PipelineError::Config(format!(
                "landing given for unconfigured source '{}'",
                extra.source_id
            )));
        }

        self.config
            .sources
            .iter()
            .map(|source| {
                let mut matching = landings.iter().filter(|l| l.source_id == source.id);
                match (matching.next(), matching.next()) {
                    (Some(landing), None) => self.standardize(landing),
                    (None, _) => Err(PipelineError::Landing(format!("no landing for source '{}'", source.id))),
                    (Some(_), Some(_)) => Err(PipelineError::Landing(format!(
                        "source '{}' landed more than once",
                        source.id
                    ))),
                }
            })
            .collect()
    }

    /// Lands and adapts every configured source on the blocking pool.
    ///
    /// Handles are awaited in configured order, so the result is the same as
    /// [`Pipeline::standardize_all`] over the same landings.
    pub async fn standardize_concurrent<F>(self: Arc<Self>, load: F) -> Result<Vec<LandedSource>, PipelineError>
    where
        F: Fn(&SourceConfig) -> Result<SourceLanding, PipelineError> + Send + Sync + 'static,
    {
        let load = Arc::new(load);
        let handles: Vec<_> = self
            .config
            .sources
            .iter()
            .cloned()
            .map(|source| {
                let pipeline = Arc::clone(&self);
                let load = Arc::clone(&load);
                tokio::task::spawn_blocking(move || {
                    let landing = load(&source)?;
                    if landing.source_id != source.id {
                        return Err(PipelineError::Landing(format!(
                            "loader for '{}' returned source '{}'",
                            source.id, landing.source_id
                        )));
                    }
                    pipeline.standardize(&landing)
                })
            })
            .collect();

        let mut landed = Vec::with_capacity(handles.len());
        for handle in handles {
            let source = handle
                .await
                .map_err(|e| PipelineError::Task(format!("standardization worker: {e}")))??;
            landed.push(source);
        }
        Ok(landed)
    }

    /// Concatenates sources, enforces entity uniqueness, deduplicates
    /// intervals and resolves their locations.
    pub fn build_standardized(&self, sources: Vec<LandedSource>) -> Result<StandardizedTables, PipelineError> {
        let mut landing = Vec::with_capacity(sources.len());
        let mut sp_batches = Vec::with_capacity(sources.len());
        let mut meter_batches = Vec::with_capacity(sources.len());
        let mut intervals = Vec::new();

        for source in sources {
            let s = source.standardized;
            landing.push((s.source_id, source.counts));
            sp_batches.push(s.service_points);
            meter_batches.push(s.meters);
            intervals.extend(s.intervals);
        }

        let service_points = combine_service_points(sp_batches);
        let meters = combine_meters(meter_batches);
        let dedup = deduplicate(intervals, &self.dedup_key, self.config.duplicate_policy);

        let guard = self.linkage_guard();
        let intervals_dropped = dedup.total_dropped();
        let resolved = resolve_locations(dedup.rows, &meters.rows, &guard)?;

        let mut duplicates = Vec::with_capacity(landing.len() * 3);
        for (source_id, _) in &landing {
            for (table, dropped) in [
                ("service_points", &service_points.duplicates_dropped),
                ("meters", &meters.duplicates_dropped),
                ("intervals", &dedup.dropped),
            ] {
                duplicates.push(DuplicateCount {
                    table,
                    source_id: source_id.clone(),
                    dropped: dropped.get(source_id).copied().unwrap_or(0),
                });
            }
        }

        tracing::info!(
            service_points = service_points.rows.len(),
            meters = meters.rows.len(),
            intervals = resolved.rows.len(),
            duplicates_dropped = intervals_dropped,
            unlinked = resolved.unlinked(),
            "standardized layer built"
        );

        Ok(StandardizedTables {
            landing,
            service_points: service_points.rows,
            meters: meters.rows,
            intervals: resolved.rows,
            duplicates,
            linkage: resolved.linkage,
        })
    }

    fn linkage_guard(&self) -> LinkageGuard {
        LinkageGuard {
            floor: self.config.linkage_floor,
            min_rows: self.config.linkage_min_rows,
        }
    }

    /// Builds the product and experience layers and analyzes the whole run.
    pub fn finish(&self, standardized: StandardizedTables) -> Result<PipelineRun, PipelineError> {
        let usage_facts = build_usage_facts(
            &standardized.service_points,
            &standardized.meters,
            &standardized.intervals,
            &self.linkage_guard(),
        )?;
        let daily_summaries = build_daily_summaries(&usage_facts);

        let snapshot = quality::analyze(
            &DqInputs {
                landing: &standardized.landing,
                service_points: &standardized.service_points,
                meters: &standardized.meters,
                intervals: &standardized.intervals,
                usage_facts: &usage_facts,
                daily_summaries: &daily_summaries,
                duplicates: &standardized.duplicates,
                linkage: &standardized.linkage,
            },
            &DqSettings::from(&self.config),
        );

        Ok(PipelineRun {
            standardized,
            usage_facts,
            daily_summaries,
            snapshot,
        })
    }

    /// Sequential end-to-end run over already landed sources.
    pub fn run(&self, landings: &[SourceLanding]) -> Result<PipelineRun, PipelineError> {
        let landed = self.standardize_all(landings)?;
        let standardized = self.build_standardized(landed)?;
        self.finish(standardized)
    }

    /// End-to-end run with per-source landing and adaptation in parallel.
    pub async fn run_concurrent<F>(self: Arc<Self>, load: F) -> Result<PipelineRun, PipelineError>
    where
        F: Fn(&SourceConfig) -> Result<SourceLanding, PipelineError> + Send + Sync + 'static,
    {
        let landed = Arc::clone(&self).standardize_concurrent(load).await?;
        let standardized = self.build_standardized(landed)?;
        self.finish(standardized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landing::RawTable;
    use std::path::PathBuf;

    fn source(id: &str, adapter: &str) -> SourceConfig {
        SourceConfig {
            id: SourceId::new(id),
            adapter: adapter.to_string(),
            landing_dir: PathBuf::new(),
            file_prefix: None,
        }
    }

    fn utility2_landing(id: &str) -> SourceLanding {
        SourceLanding {
            source_id: SourceId::new(id),
            service_points: RawTable::from_rows(
                &[
                    "premise_id",
                    "premise_house_num",
                    "premise_street",
                    "premise_city",
                    "premise_zip",
                    "premise_region",
                ],
                &[&["P-1", "12", "Main St", "Albany", "12207", "NY"]],
            ),
            meters: RawTable::from_rows(
                &["premise_id", "meter_id", "meter_number", "meter_type"],
                &[&["P-1", "1042.0", "SN-1", "AMI"]],
            ),
            intervals: RawTable::from_rows(
                &["channel", "duration", "meter_id", "quality", "timestamp", "value"],
                &[
                    &["E", "3600", "1042", "A", "20250122", "20"],
                    &["E", "3600", "1042", "A", "20250122", "21"],
                ],
            ),
        }
    }

    #[test]
    fn unknown_adapter_is_rejected_at_construction() {
        let cfg = PipelineConfig::new(vec![source("X", "utility9")]);
        let err = Pipeline::new(cfg, AdapterRegistry::default()).err().unwrap();
        assert!(matches!(err, PipelineError::UnknownAdapter(kind) if kind == "utility9"));
    }

    #[test]
    fn missing_landing_for_a_configured_source_fails() {
        let cfg = PipelineConfig::new(vec![source("U2", "utility2"), source("U3", "utility2")]);
        let pipeline = Pipeline::new(cfg, AdapterRegistry::default()).unwrap();
        let err = pipeline.run(&[utility2_landing("U2")]).unwrap_err();
        assert!(matches!(err, PipelineError::Landing(msg) if msg.contains("U3")));
    }

    #[test]
    fn run_links_through_meters_and_reports_duplicates() {
        let cfg = PipelineConfig::new(vec![source("U2", "utility2")]);
        let pipeline = Pipeline::new(cfg, AdapterRegistry::default()).unwrap();
        let run = pipeline.run(&[utility2_landing("U2")]).unwrap();

        let s = &run.standardized;
        assert_eq!(s.intervals.len(), 1);
        assert_eq!(s.intervals[0].value, Some(20.0));
        assert!(s.intervals[0].is_linked());
        assert_eq!(run.usage_facts.len(), 1);
        assert_eq!(run.daily_summaries.len(), 1);

        let dropped: Vec<_> = s.duplicates.iter().map(|d| (d.table, d.dropped)).collect();
        assert_eq!(dropped, vec![("service_points", 0), ("meters", 0), ("intervals", 1)]);
    }

    #[test]
    fn digests_are_stable_across_runs() {
        let cfg = PipelineConfig::new(vec![source("U2", "utility2")]);
        let pipeline = Pipeline::new(cfg, AdapterRegistry::default()).unwrap();
        let landings = [utility2_landing("U2")];

        let a = pipeline.run(&landings).unwrap().table_digests().unwrap();
        let b = pipeline.run(&landings).unwrap().table_digests().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 5);
    }

    #[tokio::test]
    async fn concurrent_standardization_matches_sequential() {
        let cfg = PipelineConfig::new(vec![source("A", "utility2"), source("B", "utility2")]);
        let pipeline = Arc::new(Pipeline::new(cfg, AdapterRegistry::default()).unwrap());

        let sequential = pipeline
            .run(&[utility2_landing("A"), utility2_landing("B")])
            .unwrap();
        let concurrent = Arc::clone(&pipeline)
            .run_concurrent(|s: &SourceConfig| Ok(utility2_landing(s.id.as_str())))
            .await
            .unwrap();

        assert_eq!(sequential, concurrent);
    }
}
