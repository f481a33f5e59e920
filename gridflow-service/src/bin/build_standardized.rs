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
        bail!("usage: build_standardized [output_dir]");
    }

    // GRIDFLOW_CONFIG selects the config file; the output dir can be overridden.
    let cfg = AppConfig::load()?;
    let out_dir = args.get(1).map(PathBuf::from).unwrap_or_else(|| cfg.output.dir.clone());

    let pipeline = Arc::new(Pipeline::new(cfg.pipeline.clone(), AdapterRegistry::default())?);
    let landed = Arc::clone(&pipeline).standardize_concurrent(load_source).await?;
    let tables = pipeline.build_standardized(landed)?;

    ndjson::write_standardized(&out_dir, &tables)?;
    Ok(())
}
