use std::{env, path::PathBuf, sync::Arc};

use anyhow::{bail, Result};
use gridflow_service::{
    adapters::AdapterRegistry, config::AppConfig, landing::csv_file::load_source, observability,
    sinks::ndjson, Pipeline,
};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() > 2 {
        bail!("usage: build_experience [output_dir]");
    }

    let cfg = AppConfig::load()?;
    let out_dir = args.get(1).map(PathBuf::from).unwrap_or_else(|| cfg.output.dir.clone());

    let pipeline = Arc::new(Pipeline::new(cfg.pipeline.clone(), AdapterRegistry::default())?);
    let run = pipeline.run_concurrent(load_source).await?;

    ndjson::write_experience(&out_dir, &run, cfg.output.pii_access_level)?;
    Ok(())
}
