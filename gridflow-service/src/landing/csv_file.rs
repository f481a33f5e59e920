use std::{fs::File, path::Path};

use crate::{
    config::SourceConfig,
    landing::{EntityKind, RawTable, SourceLanding},
    pipeline::PipelineError,
};

/// Reads one landed CSV file into a `RawTable`, keeping every row as text.
pub fn read_table(path: &Path) -> Result<RawTable, PipelineError> {
    let file = File::open(path).map_err(|e| {
        PipelineError::Landing(format!("failed to open CSV file {}: {e}", path.display()))
    })?;
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(file);
    let headers = rdr
        .headers()
        .map_err(|e| {
            PipelineError::Landing(format!("failed to read CSV headers of {}: {e}", path.display()))
        })?
        .clone();

    let mut table = RawTable::new(headers.iter());
    for result in rdr.records() {
        let record = result.map_err(|e| {
            PipelineError::Landing(format!("failed to read CSV record in {}: {e}", path.display()))
        })?;
        table.push_row(record.iter().map(str::to_string).collect());
    }

    Ok(table)
}

/// Loads `<landing_dir>/<prefix>_{service_points,meters,intervals}.csv`.
pub fn load_source(source: &SourceConfig) -> Result<SourceLanding, PipelineError> {
    let load = |kind: EntityKind| -> Result<RawTable, PipelineError> {
        let path = source
            .landing_dir
            .join(format!("{}_{}.csv", source.file_prefix(), kind.as_str()));
        let table = read_table(&path)?;

        metrics::counter!(
            "gridflow_landing_rows_total",
            "source" => source.id.to_string(),
            "table" => kind.as_str()
        )
        .increment(table.len() as u64);
        tracing::info!(
            source = %source.id,
            table = kind.as_str(),
            rows = table.len(),
            path = %path.display(),
            "landing table loaded"
        );

        Ok(table)
    };

    Ok(SourceLanding {
        source_id: source.id.clone(),
        service_points: load(EntityKind::ServicePoints)?,
        meters: load(EntityKind::Meters)?,
        intervals: load(EntityKind::Intervals)?,
    })
}
