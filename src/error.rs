//! Error types for the ead-pdf-harvest library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`HarvestError`] — **Fatal**: the run cannot continue at all (the
//!   finding aid is unreadable, the checkpoint file is corrupt, another run
//!   holds the lock). Returned as `Err(HarvestError)` from the pipeline.
//!
//! * [`ItemError`] — **Non-fatal**: one work item could not be advanced
//!   through a stage (missing prerequisite, pre-existing output, a converter
//!   exited non-zero). Logged with the item's context and counted in the
//!   stage report; the remaining items keep going.
//!
//! Errors raised while building a folder manifest live in
//! [`crate::manifest::ManifestError`] because the `folder-manifest` binary
//! reports them on their own.

use crate::manifest::ManifestError;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the harvester.
///
/// Per-item failures use [`ItemError`] and never abort a stage.
#[derive(Debug, Error)]
pub enum HarvestError {
    // ── Source document ───────────────────────────────────────────────────
    /// The finding aid could not be read from disk.
    #[error("Failed to read source document '{path}': {source}")]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The finding aid is not well-formed XML.
    #[error("Source document '{path}' is malformed: {detail}")]
    MalformedSource { path: PathBuf, detail: String },

    /// A PDF reference sits in a component without an `id` attribute.
    #[error("PDF reference '{href}' has no identified component two levels up\nEvery harvested <dao> must live in a <did> of a <c> carrying an id.")]
    MissingContainerId { href: String },

    /// The updated finding aid could not be written back.
    #[error("Failed to write source document '{path}': {source}")]
    SourceWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Checkpoint ────────────────────────────────────────────────────────
    /// The checkpoint file is missing or unreadable.
    #[error("Failed to read checkpoint '{path}': {source}\nRe-run from the harvest stage to rebuild it.")]
    CheckpointUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The checkpoint file was read but does not parse.
    #[error("Checkpoint '{path}' is corrupt at line {line}: {detail}")]
    CheckpointCorrupt {
        path: PathBuf,
        line: usize,
        detail: String,
    },

    /// A field value cannot be written without breaking the record format.
    #[error("Cannot checkpoint field '{field}' of {src_url}: value contains the delimiter or a line break")]
    UnencodableField { field: &'static str, src_url: String },

    /// The checkpoint file could not be written.
    #[error("Failed to write checkpoint '{path}': {source}")]
    CheckpointWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Run control ───────────────────────────────────────────────────────
    /// Another run is already working against the same roots.
    #[error("Another harvest run holds the lock '{path}'\nRemove it only if no other pdf-harvest process is running.")]
    LockHeld { path: PathBuf },

    /// The lock file could not be created or removed.
    #[error("Failed to create run lock '{path}': {source}")]
    LockFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// The configuration file could not be read or parsed.
    #[error("Failed to load configuration '{path}': {detail}")]
    ConfigUnreadable { path: PathBuf, detail: String },

    /// Validation rejected the configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single work item within one stage.
///
/// The pipeline logs it with the item's source locator and container id,
/// counts it in the [`crate::output::StageReport`], and moves on.
#[derive(Debug, Error)]
pub enum ItemError {
    /// The PDF was never retrieved successfully (status other than 200).
    #[error("PDF was not retrieved (status {status})")]
    NotFetched { status: String },

    /// A field or file an earlier stage should have produced is absent or empty.
    #[error("Missing prerequisite: {0}")]
    MissingPrerequisite(String),

    /// The target already exists; outputs are never regenerated or replaced.
    #[error("'{path}' already exists; will not regenerate or replace it")]
    OutputExists { path: PathBuf },

    /// The extraction directory already has content and needs a human look.
    #[error("'{path}' is not empty; clear it by hand to extract again")]
    DirectoryNotEmpty { path: PathBuf },

    /// The external program could not be started at all.
    #[error("Failed to launch '{program}': {source}")]
    ProcessSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The external program ran but exited unsuccessfully.
    #[error("'{program}' exited with {}", exit_description(.code))]
    ProcessFailed { program: String, code: Option<i32> },

    /// Some files of an item failed to convert while others succeeded.
    #[error("{failed} of {total} files failed to convert")]
    ConversionsFailed { failed: usize, total: usize },

    /// The pixel dimensions of an image could not be read.
    #[error("Cannot read image header of '{path}': {detail}")]
    ImageHeader { path: PathBuf, detail: String },

    /// Retrieval failed before any HTTP status was received.
    #[error("Failed to retrieve '{url}': {reason}")]
    Fetch { url: String, reason: String },

    /// Building the folder manifest failed.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// A file-system operation on one of the item's paths failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A `spawn_blocking` task panicked or was cancelled.
    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

impl ItemError {
    /// Whether the item was deliberately left alone rather than broken.
    ///
    /// Skips are the expected outcome of re-running a stage; failures need
    /// attention in the log.
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            ItemError::NotFetched { .. }
                | ItemError::MissingPrerequisite(_)
                | ItemError::OutputExists { .. }
                | ItemError::DirectoryNotEmpty { .. }
        )
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ItemError::Io {
            path: path.into(),
            source,
        }
    }
}

fn exit_description(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {c}"),
        None => "a signal".to_string(),
    }
}
