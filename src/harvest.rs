//! Top-level entry points.
//!
//! [`harvest`] wires the production collaborators (child processes through
//! tokio, PDFs over HTTP) into a [`Pipeline`] and runs it. Callers that need
//! fakes or a progress callback build the [`Pipeline`] themselves.

use crate::config::HarvestConfig;
use crate::error::HarvestError;
use crate::fetch::HttpPdfSource;
use crate::output::RunSummary;
use crate::pipeline::{Pipeline, RunOptions};
use crate::process::TokioProcessRunner;
use crate::progress::ProgressCallback;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Build the production pipeline for `config`.
pub fn production_pipeline(config: HarvestConfig) -> Result<Pipeline, HarvestError> {
    config.validate()?;
    let source = HttpPdfSource::new(config.fetch.timeout_secs)?;
    Ok(Pipeline::new(
        Arc::new(config),
        Arc::new(TokioProcessRunner),
        Arc::new(source),
    ))
}

/// Run the selected stages of the pipeline against one finding aid.
///
/// # Errors
/// Only structural failures are returned: an unreadable or malformed finding
/// aid, an unreadable or corrupt checkpoint, a held run lock. Per-item
/// problems are logged and counted in the returned [`RunSummary`].
pub async fn harvest(
    ead_path: impl AsRef<Path>,
    config: HarvestConfig,
    options: &RunOptions,
    progress: Option<ProgressCallback>,
) -> Result<RunSummary, HarvestError> {
    let ead_path = ead_path.as_ref();
    info!("Starting harvest of {}", ead_path.display());

    let mut pipeline = production_pipeline(config)?;
    if let Some(progress) = progress {
        pipeline = pipeline.with_progress(progress);
    }
    let summary = pipeline.run(ead_path, options).await?;

    info!(
        stages = summary.stages.len(),
        failed = summary.total_failed(),
        early_exit = summary.early_exit,
        "Harvest finished"
    );
    Ok(summary)
}

/// Synchronous wrapper around [`harvest`].
///
/// Creates a temporary current-thread tokio runtime internally.
pub fn harvest_sync(
    ead_path: impl AsRef<Path>,
    config: HarvestConfig,
    options: &RunOptions,
) -> Result<RunSummary, HarvestError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| HarvestError::Internal(format!("Failed to create tokio runtime: {e}")))?
        .block_on(harvest(ead_path, config, options, None))
}
