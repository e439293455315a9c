//! The staged, checkpointed harvest pipeline.
//!
//! Each submodule implements one stage's per-item work. [`Pipeline`] drives
//! them in a fixed order, one stage at a time over the whole item list:
//!
//! ```text
//! harvest ──▶ extract ──▶ normalize ──▶ compress ──▶ manifest ──▶ finalize ──▶ update-document
//! (scan +     (pdfimages) (convert)     (kdu)        (folder.xml   (move to     (rewrite <dao>)
//!  fetch)                                             + XSLT)       final roots)
//! ```
//!
//! Every stage after `harvest` loads the checkpoint, walks every item in
//! discovery order, and writes the checkpoint back when done, whatever
//! happened to individual items. An item whose prerequisite is missing is
//! skipped with a diagnostic and, lacking the stage's output, is skipped by
//! every later stage as well. Only structural problems (unreadable source
//! document, unreadable or corrupt checkpoint) abort the run.
//!
//! A re-run can start at any stage with [`RunOptions::resume_from`]; each
//! stage refuses to regenerate outputs that already exist, so repeating a
//! stage is safe.

pub mod compress;
pub mod extract;
pub mod finalize;
pub mod normalize;
pub mod package;

use crate::config::HarvestConfig;
use crate::error::{HarvestError, ItemError};
use crate::fetch::{Fetcher, PdfSource, Persisted};
use crate::item::WorkItem;
use crate::lock::RunLock;
use crate::manifest::long_side;
use crate::output::{RunSummary, StageReport};
use crate::process::ProcessRunner;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::scan::Scanner;
use crate::store::CheckpointStore;
use crate::update::{DocumentUpdater, UpdateOutcome};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, Instrument, Span};

/// One phase of the pipeline, in execution order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// Scan the finding aid and retrieve every selected PDF.
    Harvest,
    Extract,
    Normalize,
    Compress,
    Manifest,
    Finalize,
    UpdateDocument,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Harvest,
        Stage::Extract,
        Stage::Normalize,
        Stage::Compress,
        Stage::Manifest,
        Stage::Finalize,
        Stage::UpdateDocument,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Harvest => "harvest",
            Stage::Extract => "extract",
            Stage::Normalize => "normalize",
            Stage::Compress => "compress",
            Stage::Manifest => "manifest",
            Stage::Finalize => "finalize",
            Stage::UpdateDocument => "update-document",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.name() == s)
            .ok_or_else(|| {
                let names: Vec<_> = Stage::ALL.iter().map(|s| s.name()).collect();
                format!("unknown stage '{s}' (expected one of: {})", names.join(", "))
            })
    }
}

/// Which contiguous range of stages to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// First stage to run. Anything after `Harvest` starts from the checkpoint.
    pub resume_from: Stage,
    /// Last stage to run.
    pub stop_after: Stage,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            resume_from: Stage::Harvest,
            stop_after: Stage::UpdateDocument,
        }
    }
}

impl RunOptions {
    pub fn stages(&self) -> impl Iterator<Item = Stage> + '_ {
        Stage::ALL
            .into_iter()
            .filter(|s| *s >= self.resume_from && *s <= self.stop_after)
    }
}

/// How one item fared in one stage.
#[derive(Debug)]
enum ItemOutcome {
    Done,
    Skipped(String),
    Failed(String),
}

impl ItemOutcome {
    /// Classify and log an item-level result. Call inside the item's span.
    fn from_result(result: Result<(), ItemError>) -> Self {
        match result {
            Ok(()) => ItemOutcome::Done,
            Err(e @ ItemError::NotFetched { .. }) => {
                debug!("{e}; skipping");
                ItemOutcome::Skipped(e.to_string())
            }
            Err(e) if e.is_skip() => {
                error!("{e}; skipping");
                ItemOutcome::Skipped(e.to_string())
            }
            Err(e) => {
                error!("{e}");
                ItemOutcome::Failed(e.to_string())
            }
        }
    }
}

/// Drives the stages over the checkpointed item list.
pub struct Pipeline {
    config: Arc<HarvestConfig>,
    runner: Arc<dyn ProcessRunner>,
    source: Arc<dyn PdfSource>,
    store: CheckpointStore,
    progress: ProgressCallback,
}

impl Pipeline {
    pub fn new(
        config: Arc<HarvestConfig>,
        runner: Arc<dyn ProcessRunner>,
        source: Arc<dyn PdfSource>,
    ) -> Self {
        let store = CheckpointStore::new(config.checkpoint_path());
        Self {
            config,
            runner,
            source,
            store,
            progress: Arc::new(NoopProgressCallback),
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// Run the selected stages against `ead_path` under the run lock.
    ///
    /// Returns early, with [`RunSummary::early_exit`] set, when the scan
    /// finds no eligible references.
    pub async fn run(&self, ead_path: &Path, options: &RunOptions) -> Result<RunSummary, HarvestError> {
        if options.resume_from > options.stop_after {
            return Err(HarvestError::InvalidConfig(format!(
                "cannot resume from '{}' and stop after the earlier stage '{}'",
                options.resume_from, options.stop_after
            )));
        }
        let _lock = RunLock::acquire(self.config.lock_path())?;

        let mut summary = RunSummary::default();
        for stage in options.stages() {
            if stage == Stage::Harvest {
                match self.harvest(ead_path).await? {
                    Some(report) => summary.stages.push(report),
                    None => {
                        summary.early_exit = true;
                        return Ok(summary);
                    }
                }
            } else {
                summary.stages.push(self.run_stage(stage, ead_path).await?);
            }
        }
        Ok(summary)
    }

    /// Scan the finding aid, retrieve every selected PDF, and write the
    /// first checkpoint. `None` when nothing was selected.
    pub async fn harvest(&self, ead_path: &Path) -> Result<Option<StageReport>, HarvestError> {
        let scanned = Scanner::from_config(&self.config).scan_file(ead_path)?;
        if scanned.items.is_empty() {
            return Ok(None);
        }
        let mut items = scanned.items;
        let stage = Stage::Harvest;
        let mut report = self.begin(stage, items.len());

        let fetcher = Fetcher::new(self.source.clone(), &self.config.directories.pdfs_local_root);
        for item in items.iter_mut() {
            let span = item_span(stage, item);
            let result = fetcher.fetch(item).instrument(span.clone()).await;
            let outcome = span.in_scope(|| match result {
                Ok(Some(Persisted::Written)) => ItemOutcome::Done,
                Ok(Some(Persisted::AlreadyPresent)) => {
                    ItemOutcome::Skipped("PDF already on disk".to_string())
                }
                Ok(None) => ItemOutcome::Skipped(format!(
                    "not retrieved (status {})",
                    item.fetch_status.map_or(0, |s| s.code())
                )),
                Err(e) => ItemOutcome::from_result(Err(e)),
            });
            self.record(&mut report, item, outcome);
        }

        self.finish(report, &items).map(Some)
    }

    /// Run one post-harvest stage over the checkpointed items.
    pub async fn run_stage(&self, stage: Stage, ead_path: &Path) -> Result<StageReport, HarvestError> {
        if stage == Stage::Harvest {
            return self
                .harvest(ead_path)
                .await
                .map(|report| report.unwrap_or_else(|| StageReport::new(Stage::Harvest, 0)));
        }

        let mut items = self.store.load()?;
        let mut report = self.begin(stage, items.len());
        let mut updater = match stage {
            Stage::UpdateDocument => Some(DocumentUpdater::open(ead_path)?),
            _ => None,
        };

        for item in items.iter_mut() {
            let span = item_span(stage, item);
            let outcome = match updater.as_mut() {
                Some(updater) => {
                    match span.in_scope(|| updater.apply(item))? {
                        UpdateOutcome::Hidden | UpdateOutcome::Linked => ItemOutcome::Done,
                        UpdateOutcome::Incomplete(problems) => {
                            ItemOutcome::Skipped(problems.join("; "))
                        }
                        UpdateOutcome::Unhandled(_) => {
                            ItemOutcome::Skipped("unhandled retrieval status".to_string())
                        }
                        UpdateOutcome::ReferenceNotFound => {
                            ItemOutcome::Skipped("reference not found in document".to_string())
                        }
                    }
                }
                None => {
                    let result = self.process(stage, item).instrument(span.clone()).await;
                    span.in_scope(|| ItemOutcome::from_result(result))
                }
            };
            self.record(&mut report, item, outcome);
        }

        self.finish(report, &items)
    }

    async fn process(&self, stage: Stage, item: &mut WorkItem) -> Result<(), ItemError> {
        let config = self.config.as_ref();
        let runner = self.runner.as_ref();
        match stage {
            Stage::Extract => extract::extract(config, runner, item).await,
            Stage::Normalize => normalize::normalize(config, runner, item).await,
            Stage::Compress => compress::compress(config, runner, item).await,
            Stage::Manifest => package::package(config, runner, item).await,
            Stage::Finalize => finalize::finalize(config, item).await,
            Stage::Harvest | Stage::UpdateDocument => Ok(()),
        }
    }

    fn begin(&self, stage: Stage, total: usize) -> StageReport {
        info!(stage = %stage, items = total, "Starting stage");
        self.progress.on_stage_start(stage, total);
        StageReport::new(stage, total)
    }

    fn record(&self, report: &mut StageReport, item: &WorkItem, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Done => {
                report.processed += 1;
                self.progress.on_item_done(report.stage, &item.src_url);
            }
            ItemOutcome::Skipped(reason) => {
                report.skipped += 1;
                self.progress.on_item_skipped(report.stage, &item.src_url, &reason);
            }
            ItemOutcome::Failed(reason) => {
                report.failed += 1;
                self.progress.on_item_skipped(report.stage, &item.src_url, &reason);
            }
        }
    }

    /// Checkpoint the item list and close the stage.
    fn finish(&self, report: StageReport, items: &[WorkItem]) -> Result<StageReport, HarvestError> {
        self.store.save(items)?;
        info!(
            stage = %report.stage,
            processed = report.processed,
            skipped = report.skipped,
            failed = report.failed,
            "Stage complete"
        );
        self.progress
            .on_stage_complete(report.stage, report.processed, report.skipped, report.failed);
        Ok(report)
    }
}

fn item_span(stage: Stage, item: &WorkItem) -> Span {
    info_span!(
        "item",
        stage = %stage,
        src_url = %item.src_url,
        container = %item.container_id,
        index = item.index
    )
}

/// Long side of an image, read off the async runtime.
pub(crate) async fn measure_long_side(path: &Path) -> Result<u32, ItemError> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || long_side(&owned))
        .await
        .map_err(|e| ItemError::TaskFailed(format!("Image header task panicked: {e}")))?
        .map_err(|e| ItemError::ImageHeader {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
}
