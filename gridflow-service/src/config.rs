use serde::Deserialize;
use std::{collections::HashSet, fs, path::PathBuf};
use time::{macros::datetime, OffsetDateTime};

use gridflow_client::domain::SourceId;

use crate::{
    pipeline::PipelineError,
    transform::{
        dedup::{DedupField, DedupKey, DuplicatePolicy, DEFAULT_DEDUP_KEY},
        security::PiiAccessLevel,
    },
};

/// One active source: which adapter decodes it and where its extracts land.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub id: SourceId,
    pub adapter: String,
    #[serde(default)]
    pub landing_dir: PathBuf,
    /// File name prefix of the landed CSVs; defaults to the adapter kind.
    pub file_prefix: Option<String>,
}

impl SourceConfig {
    pub fn file_prefix(&self) -> &str {
        self.file_prefix.as_deref().unwrap_or(&self.adapter)
    }
}

fn default_dedup_key() -> Vec<DedupField> {
    DEFAULT_DEDUP_KEY.to_vec()
}

fn default_iqr_multiplier() -> f64 {
    1.5
}

fn default_timestamp_floor() -> OffsetDateTime {
    datetime!(2000-01-01 00:00:00 UTC)
}

fn default_linkage_floor() -> f64 {
    0.01
}

fn default_linkage_min_rows() -> u64 {
    100
}

/// Everything the pipeline entrypoint needs; there is no ambient state.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub sources: Vec<SourceConfig>,
    #[serde(default = "default_dedup_key")]
    pub dedup_key: Vec<DedupField>,
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
    #[serde(default = "default_iqr_multiplier")]
    pub iqr_multiplier: f64,
    #[serde(default = "default_timestamp_floor", with = "time::serde::rfc3339")]
    pub timestamp_floor: OffsetDateTime,
    /// Minimum meter-match ratio before resolution is treated as broken.
    #[serde(default = "default_linkage_floor")]
    pub linkage_floor: f64,
    /// Lookups a source needs before the linkage floor is enforced.
    #[serde(default = "default_linkage_min_rows")]
    pub linkage_min_rows: u64,
}

impl PipelineConfig {
    pub fn new(sources: Vec<SourceConfig>) -> Self {
        Self {
            sources,
            dedup_key: default_dedup_key(),
            duplicate_policy: DuplicatePolicy::default(),
            iqr_multiplier: default_iqr_multiplier(),
            timestamp_floor: default_timestamp_floor(),
            linkage_floor: default_linkage_floor(),
            linkage_min_rows: default_linkage_min_rows(),
        }
    }

    /// Validates the settings and returns the checked dedup key.
    pub fn validate(&self) -> Result<DedupKey, PipelineError> {
        if self.sources.is_empty() {
            return Err(PipelineError::Config("at least one source must be configured".to_string()));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if !seen.insert(&source.id) {
                return Err(PipelineError::Config(format!("source '{}' configured twice", source.id)));
            }
        }

        if !self.iqr_multiplier.is_finite() || self.iqr_multiplier <= 0.0 {
            return Err(PipelineError::Config(format!(
                "iqr_multiplier must be positive, got {}",
                self.iqr_multiplier
            )));
        }

        if !(0.0..=1.0).contains(&self.linkage_floor) {
            return Err(PipelineError::Config(format!(
                "linkage_floor must be within [0, 1], got {}",
                self.linkage_floor
            )));
        }

        DedupKey::new(self.dedup_key.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    pub dir: PathBuf,
    #[serde(default)]
    pub pii_access_level: PiiAccessLevel,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuestDbConfig {
    pub ilp_tcp_addr: String,
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Prometheus textfile written at the end of a run.
    pub textfile_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub output: OutputConfig,
    pub questdb: Option<QuestDbConfig>,
    pub metrics: Option<MetricsConfig>,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("GRIDFLOW_CONFIG").unwrap_or_else(|_| "gridflow-config.toml".to_string());
        let contents = fs::read_to_string(&path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        cfg.pipeline.validate()?;
        Ok(cfg)
    }
}
