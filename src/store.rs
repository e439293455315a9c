//! Work-item checkpoint: the flat delimited file written after every stage.
//!
//! ```text
//! bit_depth%%bitmaps_dir%%container_id%%…%%title
//! 8%%/data/bitmaps/MC216/c003%%MC216_c003%%…%%Correspondence, 1950
//! ```
//!
//! The first line lists the field names in alphabetical order; each further
//! line is one item with its values in the same order. Unset optional
//! fields are written as empty strings. Values are plain text on disk and
//! are parsed back into typed fields on load, so a checkpoint can be read,
//! and if need be repaired, with any text editor.
//!
//! This is the one component where failure aborts the whole run: a
//! checkpoint that cannot be read or parsed means the pipeline no longer
//! knows what it has done.

use crate::error::HarvestError;
use crate::item::{BitDepth, FetchStatus, WorkItem};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Field separator. Two characters so that single `%` in URLs survive.
pub const DELIMITER: &str = "%%";

/// Checkpoint field names, alphabetically sorted.
pub const FIELD_NAMES: [&str; 12] = [
    "bit_depth",
    "bitmaps_dir",
    "container_id",
    "fetch_status",
    "index",
    "jp2s_dir",
    "manifest_path",
    "manifest_url",
    "pdf_path",
    "src_url",
    "tiffs_dir",
    "title",
];

/// Reads and writes the checkpoint file of one run.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Overwrite the checkpoint with `items`.
    ///
    /// The file is written beside its final location and renamed over it,
    /// so an interrupted write leaves the previous checkpoint intact.
    pub fn save(&self, items: &[WorkItem]) -> Result<(), HarvestError> {
        let text = serialize(items)?;
        let write_err = |source: std::io::Error| HarvestError::CheckpointWriteFailed {
            path: self.path.clone(),
            source,
        };

        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(write_err)?;
        }
        let tmp_path = self.path.with_extension("txt.tmp");
        std::fs::write(&tmp_path, text).map_err(write_err)?;
        std::fs::rename(&tmp_path, &self.path).map_err(write_err)?;

        debug!(path = %self.path.display(), items = items.len(), "Checkpoint written");
        Ok(())
    }

    /// Load every item from the checkpoint.
    pub fn load(&self) -> Result<Vec<WorkItem>, HarvestError> {
        let text = std::fs::read_to_string(&self.path).map_err(|source| {
            HarvestError::CheckpointUnreadable {
                path: self.path.clone(),
                source,
            }
        })?;
        let items = deserialize(&text).map_err(|(line, detail)| HarvestError::CheckpointCorrupt {
            path: self.path.clone(),
            line,
            detail,
        })?;
        debug!(path = %self.path.display(), items = items.len(), "Checkpoint loaded");
        Ok(items)
    }
}

/// Render `items` as checkpoint text (header line plus one line per item).
pub fn serialize(items: &[WorkItem]) -> Result<String, HarvestError> {
    let mut out = FIELD_NAMES.join(DELIMITER);
    out.push('\n');
    for item in items {
        let mut values = Vec::with_capacity(FIELD_NAMES.len());
        for name in FIELD_NAMES {
            let value = field_value(item, name);
            if !is_encodable(&value) {
                return Err(HarvestError::UnencodableField {
                    field: name,
                    src_url: item.src_url.clone(),
                });
            }
            values.push(value);
        }
        out.push_str(&values.join(DELIMITER));
        out.push('\n');
    }
    Ok(out)
}

/// Whether `value` can be stored as one checkpoint field.
pub fn is_encodable(value: &str) -> bool {
    !(value.contains(DELIMITER) || value.contains('\n') || value.contains('\r'))
}

/// Parse checkpoint text. Errors carry the 1-based line number.
pub fn deserialize(text: &str) -> Result<Vec<WorkItem>, (usize, String)> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim_end_matches('\r')))
        .filter(|(_, line)| !line.is_empty());

    let (_, header_line) = lines
        .next()
        .ok_or_else(|| (1, "missing header line".to_string()))?;
    let header: Vec<&str> = header_line.split(DELIMITER).collect();
    validate_header(&header).map_err(|detail| (1, detail))?;

    let mut items = Vec::new();
    for (line_no, line) in lines {
        let values: Vec<&str> = line.split(DELIMITER).collect();
        if values.len() != header.len() {
            return Err((
                line_no,
                format!(
                    "expected {} fields, found {}",
                    header.len(),
                    values.len()
                ),
            ));
        }
        let record: HashMap<&str, &str> = header.iter().copied().zip(values).collect();
        items.push(item_from_record(&record).map_err(|detail| (line_no, detail))?);
    }
    Ok(items)
}

fn validate_header(header: &[&str]) -> Result<(), String> {
    if header.len() != FIELD_NAMES.len() {
        return Err(format!(
            "expected {} fields in header, found {}",
            FIELD_NAMES.len(),
            header.len()
        ));
    }
    for name in header {
        if !FIELD_NAMES.contains(name) {
            return Err(format!("unknown field '{name}' in header"));
        }
    }
    for name in FIELD_NAMES {
        if !header.contains(&name) {
            return Err(format!("header lacks field '{name}'"));
        }
    }
    Ok(())
}

fn field_value(item: &WorkItem, name: &str) -> String {
    fn path(p: &Option<PathBuf>) -> String {
        p.as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
    match name {
        "bit_depth" => item.bit_depth.map(|b| b.bits().to_string()).unwrap_or_default(),
        "bitmaps_dir" => path(&item.bitmaps_dir),
        "container_id" => item.container_id.clone(),
        "fetch_status" => item.fetch_status.map(|s| s.to_string()).unwrap_or_default(),
        "index" => item.index.to_string(),
        "jp2s_dir" => path(&item.jp2s_dir),
        "manifest_path" => path(&item.manifest_path),
        "manifest_url" => item.manifest_url.clone().unwrap_or_default(),
        "pdf_path" => path(&item.pdf_path),
        "src_url" => item.src_url.clone(),
        "tiffs_dir" => path(&item.tiffs_dir),
        "title" => item.title.clone(),
        _ => String::new(),
    }
}

fn item_from_record(record: &HashMap<&str, &str>) -> Result<WorkItem, String> {
    let get = |name: &str| record.get(name).copied().unwrap_or("");
    let opt_path = |name: &str| Some(get(name)).filter(|v| !v.is_empty()).map(PathBuf::from);
    let opt_string = |name: &str| Some(get(name)).filter(|v| !v.is_empty()).map(str::to_string);

    let index = get("index")
        .parse::<u32>()
        .map_err(|e| format!("field 'index' = '{}': {e}", get("index")))?;

    let fetch_status = match get("fetch_status") {
        "" => None,
        raw => Some(FetchStatus::from_code(
            raw.parse::<u16>()
                .map_err(|e| format!("field 'fetch_status' = '{raw}': {e}"))?,
        )),
    };

    let bit_depth = match get("bit_depth") {
        "" => None,
        raw => {
            let bits = raw
                .parse::<u8>()
                .map_err(|e| format!("field 'bit_depth' = '{raw}': {e}"))?;
            Some(
                BitDepth::from_bits(bits)
                    .ok_or_else(|| format!("field 'bit_depth' = '{raw}': not 1, 8 or 24"))?,
            )
        }
    };

    Ok(WorkItem {
        src_url: get("src_url").to_string(),
        container_id: get("container_id").to_string(),
        title: get("title").to_string(),
        index,
        fetch_status,
        pdf_path: opt_path("pdf_path"),
        bitmaps_dir: opt_path("bitmaps_dir"),
        bit_depth,
        tiffs_dir: opt_path("tiffs_dir"),
        jp2s_dir: opt_path("jp2s_dir"),
        manifest_path: opt_path("manifest_path"),
        manifest_url: opt_string("manifest_url"),
    })
}
