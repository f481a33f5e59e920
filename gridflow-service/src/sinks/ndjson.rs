use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::Serialize;

use crate::{
    pipeline::{PipelineError, PipelineRun, StandardizedTables},
    transform::security::{mask_usage_facts, PiiAccessLevel},
};

pub const SNAPSHOT_FILE: &str = "dq_snapshot.json";

fn sink_err(context: &str, e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Sink(format!("{context}: {e}"))
}

/// One JSON document per row, each terminated by `\n`, in table order.
pub fn encode_table<T: Serialize>(rows: &[T]) -> Result<Vec<u8>, PipelineError> {
    let mut out = Vec::with_capacity(rows.len().saturating_mul(256));
    for row in rows {
        serde_json::to_writer(&mut out, row).map_err(|e| sink_err("ndjson encode", e))?;
        out.push(b'\n');
    }
    Ok(out)
}

/// Writes `<dir>/<table>.ndjson`, replacing any previous file.
pub fn write_table<T: Serialize>(dir: &Path, table: &str, rows: &[T]) -> Result<PathBuf, PipelineError> {
    let path = dir.join(format!("{table}.ndjson"));
    fs::write(&path, encode_table(rows)?).map_err(|e| sink_err(&path.display().to_string(), e))?;

    metrics::counter!("gridflow_exported_rows_total", "table" => table.to_string())
        .increment(rows.len() as u64);
    tracing::info!(path = %path.display(), rows = rows.len(), "table exported");
    Ok(path)
}

pub fn write_standardized(dir: &Path, tables: &StandardizedTables) -> Result<(), PipelineError> {
    fs::create_dir_all(dir).map_err(|e| sink_err(&dir.display().to_string(), e))?;
    write_table(dir, "service_points", &tables.service_points)?;
    write_table(dir, "meters", &tables.meters)?;
    write_table(dir, "intervals", &tables.intervals)?;
    Ok(())
}

/// Writes the product and experience layers. Usage facts are masked for
/// `level` before they leave the process.
pub fn write_experience(dir: &Path, run: &PipelineRun, level: PiiAccessLevel) -> Result<(), PipelineError> {
    fs::create_dir_all(dir).map_err(|e| sink_err(&dir.display().to_string(), e))?;
    write_table(dir, "usage_facts", &mask_usage_facts(&run.usage_facts, level))?;
    write_table(dir, "daily_summaries", &run.daily_summaries)?;
    Ok(())
}

pub fn write_snapshot(dir: &Path, run: &PipelineRun) -> Result<PathBuf, PipelineError> {
    fs::create_dir_all(dir).map_err(|e| sink_err(&dir.display().to_string(), e))?;
    let path = dir.join(SNAPSHOT_FILE);
    let json = serde_json::to_vec_pretty(&run.snapshot).map_err(|e| sink_err("snapshot encode", e))?;
    fs::write(&path, json).map_err(|e| sink_err(&path.display().to_string(), e))?;
    Ok(path)
}

/// Every layer plus the quality snapshot.
pub fn write_run(dir: &Path, run: &PipelineRun, level: PiiAccessLevel) -> Result<(), PipelineError> {
    write_standardized(dir, &run.standardized)?;
    write_experience(dir, run, level)?;
    write_snapshot(dir, run)?;
    Ok(())
}
