use std::{fs, path::Path};

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static PROM_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Installs the Prometheus recorder. Later calls are no-ops.
pub fn init() -> Result<()> {
    if PROM_HANDLE.get().is_some() {
        return Ok(());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus metrics recorder")?;

    // Ignore error if the handle was already set; this should only be called once.
    let _ = PROM_HANDLE.set(handle);
    Ok(())
}

/// Current exposition text, or `None` before [`init`].
pub fn render() -> Option<String> {
    PROM_HANDLE.get().map(PrometheusHandle::render)
}

/// Writes the exposition text for a node-exporter textfile collector.
///
/// The file is written next to its target and renamed into place so a
/// scrape never sees a partial file.
pub fn write_textfile(path: &Path) -> Result<()> {
    let Some(text) = render() else {
        tracing::warn!(path = %path.display(), "metrics recorder not installed; textfile not written");
        return Ok(());
    };

    replace_file(path, &text)?;
    tracing::info!(path = %path.display(), "metrics textfile written");
    Ok(())
}

fn replace_file(path: &Path, text: &str) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let tmp = path.with_extension("prom.tmp");
    fs::write(&tmp, text).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}
