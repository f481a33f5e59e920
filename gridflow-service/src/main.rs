use std::sync::Arc;

use anyhow::Result;
use gridflow_service::{
    adapters::AdapterRegistry,
    config::AppConfig,
    landing::csv_file::load_source,
    metrics_export, observability,
    sinks::{ndjson, publish_run},
    Pipeline,
};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    // Load configuration
    let cfg = AppConfig::load()?;

    if cfg.metrics.is_some() {
        metrics_export::init()?;
    }

    let pipeline = Arc::new(Pipeline::new(cfg.pipeline.clone(), AdapterRegistry::default())?);
    let run = pipeline.run_concurrent(load_source).await?;

    let level = cfg.output.pii_access_level;
    ndjson::write_run(&cfg.output.dir, &run, level)?;
    for (table, digest) in run.table_digests()? {
        tracing::info!(table, digest = %digest, "table digest");
    }

    if let Some(questdb) = &cfg.questdb {
        publish_run(questdb, &run, level).await?;
    }

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_export::write_textfile(&metrics_cfg.textfile_path)?;
    }

    Ok(())
}
