//! Folder manifests: regroup derived files into representations of one object.
//!
//! Every input file is tied back to the object through its path. Given the
//! object id `AC044/c0002`:
//!
//! ```text
//! /pdfs/AC044/c0002.pdf             -> fragment ".pdf"           whole
//! /tiffs/AC044/c0002/00000001.tif   -> fragment "/00000001.tif"  part
//! /jp2s/AC044/c0002/00000001.jp2    -> fragment "/00000001.jp2"  part
//! ```
//!
//! Files are grouped by `objid + fragment` with everything from the first
//! `.` stripped, and groups are emitted in key order so the same inputs
//! always produce the same document. Whole groups are written directly
//! under `<folder>`; part groups are wrapped in `<member abs_name="…">`.

pub mod image_info;

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::writer::Writer;
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub use image_info::{long_side, read_image_info, ImageInfo};

pub const DEFAULT_URN_PREFIX: &str = "urn:pudl:images";
pub const CHECKSUM_ALGORITHM: &str = "SHA-1";
pub const PDF_MIME: &str = "application/pdf";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

const HASH_BLOCK_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("object id '{objid}' is not a path segment of {path}")]
    ObjectIdNotInPath { objid: String, path: PathBuf },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot read image metadata from {path}: {detail}")]
    ImageMetadata { path: PathBuf, detail: String },

    #[error("cannot serialise manifest: {0}")]
    Write(String),

    #[error("no input files")]
    NoInputs,
}

/// Whether a file stands for the whole object or one member of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WholePart {
    Whole,
    Part,
}

impl WholePart {
    pub fn as_str(self) -> &'static str {
        match self {
            WholePart::Whole => "whole",
            WholePart::Part => "part",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Use {
    /// Archival raster (TIFF).
    Master,
    Deliverable,
}

impl Use {
    pub fn as_str(self) -> &'static str {
        match self {
            Use::Master => "master",
            Use::Deliverable => "deliverable",
        }
    }

    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("tif") | Some("tiff") => Use::Master,
            _ => Use::Deliverable,
        }
    }
}

/// One physical file mapped to a fragment of the object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Representation {
    pub path: PathBuf,
    /// `objid` + fragment, e.g. `AC044/c0002/00000001.jp2`.
    pub canonical: String,
    /// Canonical name up to the first `.`, e.g. `AC044/c0002/00000001`.
    pub group_key: String,
    pub whole_part: WholePart,
    pub usage: Use,
    pub urn: String,
    /// Lowercase hex SHA-1.
    pub checksum: String,
    pub size: u64,
    pub mime_type: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl Representation {
    /// Inspect `path` and compute everything the manifest records about it.
    pub fn from_path(objid: &str, path: &Path, urn_prefix: &str) -> Result<Self, ManifestError> {
        let path_str = path.to_string_lossy();
        let fragment = split_fragment(objid, &path_str).ok_or_else(|| {
            ManifestError::ObjectIdNotInPath {
                objid: objid.to_string(),
                path: path.to_path_buf(),
            }
        })?;

        let whole_part = if fragment.starts_with('.') {
            WholePart::Whole
        } else {
            WholePart::Part
        };
        let canonical = format!("{objid}{fragment}");
        let stem = fragment.split('.').next().unwrap_or_default();
        let group_key = format!("{objid}{stem}");
        let usage = Use::for_path(path);
        let urn = format!("{urn_prefix}:{}:{canonical}", usage.as_str());

        let size = std::fs::metadata(path)
            .map_err(|source| ManifestError::Io {
                path: path.to_path_buf(),
                source,
            })?
            .len();
        let checksum = sha1_file(path)?;

        let (mime_type, width, height) = if path.extension().is_some_and(|e| e == "pdf") {
            (PDF_MIME.to_string(), None, None)
        } else {
            let info = read_image_info(path)?;
            (info.mime_type, Some(info.width), Some(info.height))
        };

        debug!(urn = %urn, size, "{}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            canonical,
            group_key,
            whole_part,
            usage,
            urn,
            checksum,
            size,
            mime_type,
            width,
            height,
        })
    }
}

/// The part of `path` after the first `/<objid>` segment.
///
/// Returns `None` unless the id is followed by `.` or `/`, so `AC044/c0002`
/// does not match inside `AC044/c00021`.
pub fn split_fragment<'a>(objid: &str, path: &'a str) -> Option<&'a str> {
    let needle = format!("/{objid}");
    let mut search_from = 0;
    while let Some(found) = path[search_from..].find(&needle) {
        let after = search_from + found + needle.len();
        let rest = &path[after..];
        if rest.starts_with('.') || rest.starts_with('/') {
            return Some(rest);
        }
        search_from = search_from + found + 1;
    }
    None
}

/// SHA-1 of a file's content, streamed in fixed-size blocks.
pub fn sha1_file(path: &Path) -> Result<String, ManifestError> {
    let io_err = |source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(io_err)?;
    let mut hasher = Sha1::new();
    let mut block = vec![0u8; HASH_BLOCK_SIZE];
    loop {
        let n = file.read(&mut block).map_err(io_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&block[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// A top-level child of `<folder>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestEntry {
    Whole(Representation),
    Member {
        abs_name: String,
        representations: Vec<Representation>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestDocument {
    pub objid: String,
    pub docid: String,
    pub created: DateTime<Utc>,
    pub entries: Vec<ManifestEntry>,
}

impl ManifestDocument {
    pub fn created_string(&self) -> String {
        self.created.format(TIMESTAMP_FORMAT).to_string()
    }

    pub fn representation_count(&self) -> usize {
        self.entries
            .iter()
            .map(|e| match e {
                ManifestEntry::Whole(_) => 1,
                ManifestEntry::Member {
                    representations, ..
                } => representations.len(),
            })
            .sum()
    }

    pub fn to_xml_string(&self) -> Result<String, ManifestError> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        emit(
            &mut writer,
            Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
        )?;

        let created = self.created_string();
        let mut folder = BytesStart::new("folder");
        folder.push_attribute(("objid", self.objid.as_str()));
        folder.push_attribute(("docid", self.docid.as_str()));
        folder.push_attribute(("created", created.as_str()));
        emit(&mut writer, Event::Start(folder))?;

        for entry in &self.entries {
            match entry {
                ManifestEntry::Whole(rep) => write_representation(&mut writer, rep)?,
                ManifestEntry::Member {
                    abs_name,
                    representations,
                } => {
                    let mut member = BytesStart::new("member");
                    member.push_attribute(("abs_name", abs_name.as_str()));
                    emit(&mut writer, Event::Start(member))?;
                    for rep in representations {
                        write_representation(&mut writer, rep)?;
                    }
                    emit(&mut writer, Event::End(BytesEnd::new("member")))?;
                }
            }
        }
        emit(&mut writer, Event::End(BytesEnd::new("folder")))?;

        let mut xml =
            String::from_utf8(writer.into_inner()).map_err(|e| ManifestError::Write(e.to_string()))?;
        xml.push('\n');
        Ok(xml)
    }

    /// Write the document to `path` via a temp file and rename.
    pub fn write_to(&self, path: &Path) -> Result<(), ManifestError> {
        let xml = self.to_xml_string()?;
        let io_err = |source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(io_err)?;
        }
        let tmp = path.with_extension("xml.tmp");
        std::fs::write(&tmp, xml).map_err(io_err)?;
        std::fs::rename(&tmp, path).map_err(io_err)
    }
}

fn emit<W: Write>(writer: &mut Writer<W>, event: Event<'_>) -> Result<(), ManifestError> {
    writer
        .write_event(event)
        .map_err(|e| ManifestError::Write(e.to_string()))
}

fn text_element<W: Write>(
    writer: &mut Writer<W>,
    start: BytesStart<'_>,
    text: &str,
) -> Result<(), ManifestError> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    emit(writer, Event::Start(start))?;
    emit(writer, Event::Text(BytesText::new(text)))?;
    emit(writer, Event::End(BytesEnd::new(name)))
}

fn write_representation<W: Write>(
    writer: &mut Writer<W>,
    rep: &Representation,
) -> Result<(), ManifestError> {
    let mut start = BytesStart::new("representation");
    start.push_attribute(("urn", rep.urn.as_str()));
    emit(writer, Event::Start(start))?;

    text_element(writer, BytesStart::new("use"), rep.usage.as_str())?;
    let mut checksum = BytesStart::new("checksum");
    checksum.push_attribute(("type", CHECKSUM_ALGORITHM));
    text_element(writer, checksum, &rep.checksum)?;
    text_element(writer, BytesStart::new("size"), &rep.size.to_string())?;
    text_element(writer, BytesStart::new("mimetype"), &rep.mime_type)?;
    if let Some(width) = rep.width {
        text_element(writer, BytesStart::new("width"), &width.to_string())?;
    }
    if let Some(height) = rep.height {
        text_element(writer, BytesStart::new("height"), &height.to_string())?;
    }

    emit(writer, Event::End(BytesEnd::new("representation")))
}

/// Builds a [`ManifestDocument`] for one object id.
#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    objid: String,
    docid: String,
    urn_prefix: String,
}

impl ManifestBuilder {
    pub fn new(objid: impl Into<String>, docid: impl Into<String>) -> Self {
        Self {
            objid: objid.into(),
            docid: docid.into(),
            urn_prefix: DEFAULT_URN_PREFIX.to_string(),
        }
    }

    pub fn urn_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.urn_prefix = prefix.into();
        self
    }

    /// Build with the current time as the creation timestamp.
    pub fn build<P: AsRef<Path>>(&self, inputs: &[P]) -> Result<ManifestDocument, ManifestError> {
        self.build_at(inputs, Utc::now())
    }

    pub fn build_at<P: AsRef<Path>>(
        &self,
        inputs: &[P],
        created: DateTime<Utc>,
    ) -> Result<ManifestDocument, ManifestError> {
        let files = expand_inputs(inputs)?;
        if files.is_empty() {
            return Err(ManifestError::NoInputs);
        }

        let mut groups: BTreeMap<String, Vec<Representation>> = BTreeMap::new();
        for file in &files {
            let rep = Representation::from_path(&self.objid, file, &self.urn_prefix)?;
            groups.entry(rep.group_key.clone()).or_default().push(rep);
        }

        let mut entries = Vec::with_capacity(groups.len());
        for (key, members) in groups {
            if members[0].whole_part == WholePart::Whole {
                entries.extend(members.into_iter().map(ManifestEntry::Whole));
            } else {
                entries.push(ManifestEntry::Member {
                    abs_name: key,
                    representations: members,
                });
            }
        }

        Ok(ManifestDocument {
            objid: self.objid.clone(),
            docid: self.docid.clone(),
            created,
            entries,
        })
    }
}

/// Files as given, directories replaced by their regular files in name order.
pub fn expand_inputs<P: AsRef<Path>>(inputs: &[P]) -> Result<Vec<PathBuf>, ManifestError> {
    let mut files = Vec::new();
    for input in inputs {
        let input = input.as_ref();
        let io_err = |source| ManifestError::Io {
            path: input.to_path_buf(),
            source,
        };
        if input.is_file() {
            files.push(input.to_path_buf());
            continue;
        }
        let mut listed = Vec::new();
        for entry in std::fs::read_dir(input).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path.is_file() {
                listed.push(path);
            }
        }
        listed.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        files.extend(listed);
    }
    Ok(files)
}
