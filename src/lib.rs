//! # ead-pdf-harvest
//!
//! Harvest the PDFs linked from an EAD finding aid into archival image
//! packages, then point the finding aid at the packages.
//!
//! ## Pipeline Overview
//!
//! ```text
//! finding aid (EAD)
//!  │
//!  ├─ 1. Harvest    select PDF <dao> links, download each PDF
//!  ├─ 2. Extract    pdfimages → raw page bitmaps
//!  ├─ 3. Normalize  orient + convert → TIFF masters (bit depth, size, ICC)
//!  ├─ 4. Compress   kdu_compress → JPEG 2000 deliverables
//!  ├─ 5. Manifest   folder manifest (SHA-1, sizes, MIME) → XSLT → package
//!  ├─ 6. Finalize   move PDF + TIFFs to their permanent roots
//!  └─ 7. Update     rewrite each <dao> to hide it or link the package
//! ```
//!
//! The item list is checkpointed to `<tmp>/pdfs.txt` after every stage, so a
//! run can stop after any stage and resume from any later one.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ead_pdf_harvest::{harvest, HarvestConfig, RunOptions};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = HarvestConfig::from_file("etc/harvest.yaml")?;
//!     let summary = harvest("MC216.EAD.xml", config, &RunOptions::default(), None).await?;
//!     for report in &summary.stages {
//!         eprintln!("{}: {} processed, {} skipped, {} failed",
//!             report.stage, report.processed, report.skipped, report.failed);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf-harvest` and `folder-manifest` binaries |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! ead-pdf-harvest = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod ead;
pub mod error;
pub mod fetch;
pub mod harvest;
pub mod item;
pub mod lock;
pub mod manifest;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod scan;
pub mod store;
pub mod update;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{Directories, HarvestConfig, HarvestConfigBuilder, Resources, Utilities};
pub use error::{HarvestError, ItemError};
pub use fetch::{FetchResponse, Fetcher, HttpPdfSource, PdfSource};
pub use harvest::{harvest, harvest_sync, production_pipeline};
pub use item::{BitDepth, FetchStatus, WorkItem};
pub use manifest::{ManifestBuilder, ManifestDocument, ManifestError};
pub use output::{RunSummary, StageReport};
pub use pipeline::{Pipeline, RunOptions, Stage};
pub use process::{Invocation, ProcessOutput, ProcessRunner, TokioProcessRunner};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use scan::{ScanResult, Scanner};
pub use store::CheckpointStore;
pub use update::{DocumentUpdater, UpdateOutcome};
