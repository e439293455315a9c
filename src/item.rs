//! The work item: one PDF reference and everything derived from it.
//!
//! Items are created by the scanner, mutated in place by each stage, and
//! checkpointed by [`crate::store`] after every stage. A field is only
//! trustworthy once the stage that produces it has completed for the item.

use crate::error::ItemError;
use std::fmt;
use std::path::{Path, PathBuf};

/// Outcome of retrieving the PDF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    /// 200
    Ok,
    /// 401
    Unauthorized,
    /// 404
    NotFound,
    /// Any other HTTP status.
    Other(u16),
}

impl FetchStatus {
    pub fn from_code(code: u16) -> Self {
        match code {
            200 => FetchStatus::Ok,
            401 => FetchStatus::Unauthorized,
            404 => FetchStatus::NotFound,
            other => FetchStatus::Other(other),
        }
    }

    pub fn code(self) -> u16 {
        match self {
            FetchStatus::Ok => 200,
            FetchStatus::Unauthorized => 401,
            FetchStatus::NotFound => 404,
            FetchStatus::Other(code) => code,
        }
    }
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Bit-depth class of an extracted bitmap, decided by its file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitDepth {
    /// `.pbm`
    Bitonal,
    /// `.pgm`
    Gray,
    /// Anything else (`.ppm`, `.jpg`, …).
    Color,
}

impl BitDepth {
    pub fn from_extension(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("pbm") => BitDepth::Bitonal,
            Some("pgm") => BitDepth::Gray,
            _ => BitDepth::Color,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            BitDepth::Bitonal => 1,
            BitDepth::Gray => 8,
            BitDepth::Color => 24,
        }
    }

    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            1 => Some(BitDepth::Bitonal),
            8 => Some(BitDepth::Gray),
            24 => Some(BitDepth::Color),
            _ => None,
        }
    }

    /// Bitonal and greyscale pages are usually text and may need re-orienting.
    pub fn is_text_like(self) -> bool {
        self != BitDepth::Color
    }
}

/// One discovered PDF reference tracked through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WorkItem {
    /// Locator of the PDF as written in the finding aid.
    pub src_url: String,
    /// `id` of the component hosting the reference, e.g. `MC216_c003`.
    pub container_id: String,
    /// Normalised "title, date" of the hosting component.
    pub title: String,
    /// Number of PDF references preceding this one in the same block.
    pub index: u32,
    pub fetch_status: Option<FetchStatus>,
    pub pdf_path: Option<PathBuf>,
    pub bitmaps_dir: Option<PathBuf>,
    pub bit_depth: Option<BitDepth>,
    pub tiffs_dir: Option<PathBuf>,
    pub jp2s_dir: Option<PathBuf>,
    pub manifest_path: Option<PathBuf>,
    pub manifest_url: Option<String>,
}

impl WorkItem {
    pub fn new(
        src_url: impl Into<String>,
        container_id: impl Into<String>,
        title: impl Into<String>,
        index: u32,
    ) -> Self {
        Self {
            src_url: src_url.into(),
            container_id: container_id.into(),
            title: title.into(),
            index,
            ..Self::default()
        }
    }

    /// Canonical object id: `MC216_c003` → `MC216/c003`, with `_<index>`
    /// appended for the second and later PDFs of a component.
    pub fn object_id(&self) -> String {
        let mut id = self.container_id.replace('_', "/");
        if self.index > 0 {
            id.push('_');
            id.push_str(&self.index.to_string());
        }
        id
    }

    /// Location of this item's artifact under `root`, with an optional
    /// extension appended to the object id.
    pub fn path_under(&self, root: &Path, extension: Option<&str>) -> PathBuf {
        let mut relative = self.object_id();
        if let Some(ext) = extension {
            relative.push('.');
            relative.push_str(ext);
        }
        root.join(relative)
    }

    pub fn is_fetched(&self) -> bool {
        self.fetch_status == Some(FetchStatus::Ok)
    }

    /// Guard shared by every stage after retrieval.
    pub(crate) fn require_fetched(&self) -> Result<(), ItemError> {
        if self.is_fetched() {
            Ok(())
        } else {
            Err(ItemError::NotFetched {
                status: self
                    .fetch_status
                    .map_or_else(|| "unset".to_string(), |s| s.to_string()),
            })
        }
    }

    /// Problems that keep this item from being finalised or linked.
    ///
    /// Empty when the PDF and manifest exist and both image directories
    /// exist with content.
    pub fn missing_artifacts(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let files = [("pdf_path", &self.pdf_path), ("manifest_path", &self.manifest_path)];
        for (name, path) in files {
            match path {
                None => problems.push(format!("{name} is unset")),
                Some(p) if !p.exists() => problems.push(format!("missing: {}", p.display())),
                Some(_) => {}
            }
        }
        let dirs = [("tiffs_dir", &self.tiffs_dir), ("jp2s_dir", &self.jp2s_dir)];
        for (name, path) in dirs {
            match path {
                None => problems.push(format!("{name} is unset")),
                Some(p) if !p.exists() => problems.push(format!("missing: {}", p.display())),
                Some(p) if !is_populated_dir(p) => {
                    problems.push(format!("{} exists but is empty", p.display()))
                }
                Some(_) => {}
            }
        }
        problems
    }
}

/// `true` when `path` is a directory with at least one entry.
pub fn is_populated_dir(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Regular files directly inside `dir`, sorted by file name.
pub(crate) fn sorted_files(dir: &Path) -> Result<Vec<PathBuf>, ItemError> {
    let entries = std::fs::read_dir(dir).map_err(|e| ItemError::io(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ItemError::io(dir, e))?;
        let path = entry.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Check that an earlier stage left a populated directory behind.
pub(crate) fn require_populated(
    name: &str,
    dir: &Option<PathBuf>,
) -> Result<PathBuf, ItemError> {
    match dir {
        None => Err(ItemError::MissingPrerequisite(format!("{name} is unset"))),
        Some(p) if !p.is_dir() => Err(ItemError::MissingPrerequisite(format!(
            "{} does not exist",
            p.display()
        ))),
        Some(p) if !is_populated_dir(p) => Err(ItemError::MissingPrerequisite(format!(
            "{} is empty",
            p.display()
        ))),
        Some(p) => Ok(p.clone()),
    }
}
