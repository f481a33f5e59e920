use std::{env, sync::Arc};

use anyhow::{bail, Result};
use gridflow_service::{
    adapters::AdapterRegistry, config::AppConfig, landing::csv_file::load_source, observability,
    quality::render::render_text, Pipeline,
};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    let json = match args.get(1).map(String::as_str) {
        None => false,
        Some("--json") if args.len() == 2 => true,
        _ => bail!("usage: print_dq_snapshot [--json]"),
    };

    let cfg = AppConfig::load()?;
    let pipeline = Arc::new(Pipeline::new(cfg.pipeline.clone(), AdapterRegistry::default())?);
    let run = pipeline.run_concurrent(load_source).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&run.snapshot)?);
    } else {
        print!("{}", render_text(&run.snapshot));
    }
    Ok(())
}
