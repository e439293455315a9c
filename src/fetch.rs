//! PDF retrieval: record the HTTP status and persist successful bodies.
//!
//! Local paths are deterministic, `<pdfs_local_root>/MC216/c003[_<index>].pdf`,
//! so a re-run finds what an earlier run downloaded. An existing file is
//! never overwritten: it is logged and left as it is.
//!
//! The network side sits behind [`PdfSource`] so the persistence rules can
//! be exercised without a server.

use crate::error::{HarvestError, ItemError};
use crate::item::{FetchStatus, WorkItem};
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Status and, for a 200, the body of one retrieval.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    /// Only read when `status == 200`.
    pub body: Option<Vec<u8>>,
}

/// Something that can retrieve a PDF by locator.
#[async_trait]
pub trait PdfSource: Send + Sync {
    async fn get(&self, url: &str) -> Result<FetchResponse, ItemError>;
}

/// [`PdfSource`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpPdfSource {
    client: reqwest::Client,
}

impl HttpPdfSource {
    pub fn new(timeout_secs: u64) -> Result<Self, HarvestError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| HarvestError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PdfSource for HttpPdfSource {
    async fn get(&self, url: &str) -> Result<FetchResponse, ItemError> {
        let fetch_err = |e: reqwest::Error| ItemError::Fetch {
            url: url.to_string(),
            reason: if e.is_timeout() {
                "timed out".to_string()
            } else {
                e.to_string()
            },
        };

        let response = self.client.get(url).send().await.map_err(fetch_err)?;
        let status = response.status().as_u16();
        let body = if status == 200 {
            Some(response.bytes().await.map_err(fetch_err)?.to_vec())
        } else {
            None
        };
        Ok(FetchResponse { status, body })
    }
}

/// Outcome of writing a downloaded body to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persisted {
    Written,
    /// A file was already there; nothing was touched.
    AlreadyPresent,
}

/// Retrieves PDFs into the working PDF root.
pub struct Fetcher {
    source: Arc<dyn PdfSource>,
    pdfs_root: PathBuf,
}

impl Fetcher {
    pub fn new(source: Arc<dyn PdfSource>, pdfs_root: impl Into<PathBuf>) -> Self {
        Self {
            source,
            pdfs_root: pdfs_root.into(),
        }
    }

    /// Deterministic local path of the item's PDF.
    pub fn local_path(&self, item: &WorkItem) -> PathBuf {
        item.path_under(&self.pdfs_root, Some("pdf"))
    }

    /// Retrieve the item's PDF, recording the status on the item.
    ///
    /// A transport failure leaves the status unset. Only a 200 is persisted.
    pub async fn fetch(&self, item: &mut WorkItem) -> Result<Option<Persisted>, ItemError> {
        let response = self.source.get(&item.src_url).await?;
        let status = FetchStatus::from_code(response.status);
        item.fetch_status = Some(status);
        debug!(status = response.status, "Retrieved {}", item.src_url);

        if status != FetchStatus::Ok {
            info!(status = response.status, "{} was not retrieved", item.src_url);
            return Ok(None);
        }

        let path = self.local_path(item);
        item.pdf_path = Some(path.clone());
        let body = response.body.unwrap_or_default();
        let outcome = persist_new(&path, &body)?;
        if outcome == Persisted::AlreadyPresent {
            warn!("{} exists; no further action", path.display());
        } else {
            debug!(bytes = body.len(), "Saved {}", path.display());
        }
        Ok(Some(outcome))
    }
}

/// Write `bytes` to `path` unless something is already there.
///
/// The body goes to a temp file in the destination directory first and is
/// moved into place with a no-clobber rename, so a crash never leaves a
/// truncated PDF at the final path.
pub fn persist_new(path: &Path, bytes: &[u8]) -> Result<Persisted, ItemError> {
    if path.exists() {
        return Ok(Persisted::AlreadyPresent);
    }
    let dir = path
        .parent()
        .ok_or_else(|| ItemError::MissingPrerequisite(format!("{} has no parent", path.display())))?;
    std::fs::create_dir_all(dir).map_err(|e| ItemError::io(dir, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| ItemError::io(dir, e))?;
    tmp.write_all(bytes).map_err(|e| ItemError::io(tmp.path(), e))?;
    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(Persisted::Written),
        Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
            Ok(Persisted::AlreadyPresent)
        }
        Err(e) => Err(ItemError::io(path, e.error)),
    }
}
