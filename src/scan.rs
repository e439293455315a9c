//! Discovery of PDF references in a finding aid.
//!
//! A `<dao>` is selected when its `xlink:href` contains `.pdf`, does not
//! contain the configured excluded segment, is not marked `xlink:show="none"`,
//! and is not followed by a sibling `<dao>` whose role is the METS namespace
//! (the reference was already processed by an earlier run).
//!
//! For every selected reference the scanner resolves:
//!
//! - the title, `"<unittitle>, <unitdate>"` taken from the first of each in
//!   the enclosing block, quotes escaped and whitespace normalised;
//! - the index, i.e. how many PDF references precede it in the same block;
//! - the container id, the `id` of the element two levels up.
//!
//! The document is read in a single streaming pass. Candidates are held on
//! the parent's frame until the parent closes, since both the title and a
//! disqualifying METS sibling may appear after the reference itself.

use crate::config::HarvestConfig;
use crate::ead::{is_ead, link_attributes};
use crate::error::HarvestError;
use crate::item::WorkItem;
use crate::store::{is_encodable, DELIMITER};
use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;
use regex::Regex;
use std::path::Path;
use tracing::{debug, error, info};

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// What the scan found.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// Content of `<eadid>`, used in log lines.
    pub ead_id: Option<String>,
    /// Selected references in document order.
    pub items: Vec<WorkItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    UnitTitle,
    UnitDate,
    EadId,
    Other,
}

#[derive(Debug)]
struct Candidate {
    seq: usize,
    href: String,
    index: u32,
}

/// Per-element state while its subtree is being read.
#[derive(Debug)]
struct Frame {
    kind: Kind,
    id: Option<String>,
    text: String,
    pdf_refs_seen: u32,
    candidates: Vec<Candidate>,
    unittitle: Option<String>,
    unitdate: Option<String>,
}

impl Frame {
    fn new(kind: Kind, id: Option<String>) -> Self {
        Self {
            kind,
            id,
            text: String::new(),
            pdf_refs_seen: 0,
            candidates: Vec::new(),
            unittitle: None,
            unitdate: None,
        }
    }
}

/// Finds eligible PDF references in a finding aid.
#[derive(Debug, Clone)]
pub struct Scanner {
    excluded_segment: String,
}

impl Scanner {
    pub fn new(excluded_segment: impl Into<String>) -> Self {
        Self {
            excluded_segment: excluded_segment.into(),
        }
    }

    pub fn from_config(config: &HarvestConfig) -> Self {
        Self::new(config.scan.excluded_segment.clone())
    }

    pub fn scan_file(&self, path: &Path) -> Result<ScanResult, HarvestError> {
        let xml = std::fs::read_to_string(path).map_err(|source| HarvestError::SourceUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let result = self.scan_str(&xml, path)?;
        match (&result.ead_id, result.items.len()) {
            (Some(id), 0) => info!("No (new) PDFs found in {id}"),
            (None, 0) => info!("No (new) PDFs found in {}", path.display()),
            (_, n) => info!(count = n, "Found PDF references in {}", path.display()),
        }
        Ok(result)
    }

    /// Scan an in-memory document. `origin` is only used in errors.
    pub fn scan_str(&self, xml: &str, origin: &Path) -> Result<ScanResult, HarvestError> {
        let mut reader = NsReader::from_str(xml);
        let mut stack: Vec<Frame> = Vec::new();
        let mut found: Vec<(usize, WorkItem)> = Vec::new();
        let mut ead_id = None;
        let mut seq = 0usize;

        loop {
            let at = reader.buffer_position();
            let (ns, event) = match reader.read_resolved_event() {
                Ok(pair) => pair,
                Err(e) => return Err(malformed(origin, at, e)),
            };
            match event {
                Event::Start(e) => {
                    let kind = classify(&ns, &e);
                    if is_ead(&ns, e.local_name().as_ref(), "dao") {
                        seq += 1;
                        self.visit_dao(&reader, &e, &mut stack, seq)
                            .map_err(|err| malformed(origin, at, err))?;
                    }
                    let id = id_attribute(&e).map_err(|err| malformed(origin, at, err))?;
                    stack.push(Frame::new(kind, id));
                }
                Event::Empty(e) => {
                    let kind = classify(&ns, &e);
                    if is_ead(&ns, e.local_name().as_ref(), "dao") {
                        seq += 1;
                        self.visit_dao(&reader, &e, &mut stack, seq)
                            .map_err(|err| malformed(origin, at, err))?;
                    }
                    close(Frame::new(kind, None), &mut stack, &mut found, &mut ead_id)?;
                }
                Event::Text(t) => {
                    if is_capturing(&stack) {
                        let text = t.unescape().map_err(|err| malformed(origin, at, err))?;
                        append_text(&mut stack, &text);
                    }
                }
                Event::CData(t) => {
                    if is_capturing(&stack) {
                        append_text(&mut stack, &String::from_utf8_lossy(&t));
                    }
                }
                Event::End(_) => {
                    if let Some(frame) = stack.pop() {
                        close(frame, &mut stack, &mut found, &mut ead_id)?;
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        found.sort_by_key(|(seq, _)| *seq);
        Ok(ScanResult {
            ead_id,
            items: found.into_iter().map(|(_, item)| item).collect(),
        })
    }

    /// Record a `<dao>` against its parent's frame.
    fn visit_dao(
        &self,
        reader: &NsReader<&[u8]>,
        element: &BytesStart<'_>,
        stack: &mut [Frame],
        seq: usize,
    ) -> Result<(), quick_xml::Error> {
        let Some(parent) = stack.last_mut() else {
            return Ok(());
        };
        let link = link_attributes(reader, element)?;

        if link.points_to_package() {
            // Every PDF reference before this one has been processed already.
            for c in parent.candidates.drain(..) {
                debug!("{} already has a package link", c.href);
            }
            return Ok(());
        }

        let Some(href) = link.href.as_deref() else {
            return Ok(());
        };
        if !href.contains(".pdf") {
            return Ok(());
        }
        let index = parent.pdf_refs_seen;
        parent.pdf_refs_seen += 1;

        if href.contains(&self.excluded_segment) {
            debug!("{href} is in an excluded location");
        } else if link.is_hidden() {
            debug!("{href} is hidden");
        } else {
            parent.candidates.push(Candidate {
                seq,
                href: href.to_string(),
                index,
            });
        }
        Ok(())
    }
}

fn malformed(origin: &Path, at: impl std::fmt::Display, e: quick_xml::Error) -> HarvestError {
    HarvestError::MalformedSource {
        path: origin.to_path_buf(),
        detail: format!("near byte {at}: {e}"),
    }
}

fn classify(ns: &ResolveResult<'_>, element: &BytesStart<'_>) -> Kind {
    let local = element.local_name();
    if is_ead(ns, local.as_ref(), "unittitle") {
        Kind::UnitTitle
    } else if is_ead(ns, local.as_ref(), "unitdate") {
        Kind::UnitDate
    } else if is_ead(ns, local.as_ref(), "eadid") {
        Kind::EadId
    } else {
        Kind::Other
    }
}

fn id_attribute(element: &BytesStart<'_>) -> Result<Option<String>, quick_xml::Error> {
    match element.try_get_attribute("id")? {
        Some(attr) => Ok(Some(attr.unescape_value()?.into_owned())),
        None => Ok(None),
    }
}

fn is_capturing(stack: &[Frame]) -> bool {
    stack.iter().any(|f| f.kind != Kind::Other)
}

/// Text goes to the innermost capturing frame and to every open
/// `<unittitle>`, whose value is the text of its whole subtree.
fn append_text(stack: &mut [Frame], text: &str) {
    let innermost = stack.iter().rposition(|f| f.kind != Kind::Other);
    for (i, frame) in stack.iter_mut().enumerate() {
        if frame.kind == Kind::UnitTitle || Some(i) == innermost {
            frame.text.push_str(text);
        }
    }
}

/// Fold a finished element into its parent and resolve its candidates.
fn close(
    frame: Frame,
    stack: &mut [Frame],
    found: &mut Vec<(usize, WorkItem)>,
    ead_id: &mut Option<String>,
) -> Result<(), HarvestError> {
    match frame.kind {
        Kind::UnitTitle => {
            if let Some(parent) = stack.last_mut() {
                if parent.unittitle.is_none() {
                    parent.unittitle = Some(frame.text);
                }
            }
            return Ok(());
        }
        Kind::UnitDate => {
            // A date inside a title is part of the title, not the block's date.
            if let Some(parent) = stack.last_mut().filter(|p| p.kind == Kind::Other) {
                if parent.unitdate.is_none() {
                    parent.unitdate = Some(frame.text);
                }
            }
            return Ok(());
        }
        Kind::EadId => {
            if ead_id.is_none() {
                *ead_id = Some(frame.text.trim().to_string());
            }
            return Ok(());
        }
        Kind::Other => {}
    }

    if frame.candidates.is_empty() {
        return Ok(());
    }
    let title = checkpoint_safe(compose_title(
        frame.unittitle.as_deref(),
        frame.unitdate.as_deref(),
    ));
    let host_id = stack.last().and_then(|grandparent| grandparent.id.clone());
    for candidate in frame.candidates {
        let Some(container_id) = host_id.clone() else {
            return Err(HarvestError::MissingContainerId {
                href: candidate.href,
            });
        };
        if !is_encodable(&candidate.href) || !is_encodable(&container_id) {
            error!(
                container = %container_id,
                "{} cannot be recorded in the checkpoint; skipping it",
                candidate.href
            );
            continue;
        }
        debug!(
            container = %container_id,
            index = candidate.index,
            title = %title,
            "Selected {}",
            candidate.href
        );
        found.push((
            candidate.seq,
            WorkItem::new(candidate.href, container_id, title.clone(), candidate.index),
        ));
    }
    Ok(())
}

/// `"<title>, <date>"` with quotes escaped and whitespace collapsed.
pub fn compose_title(title: Option<&str>, date: Option<&str>) -> String {
    let parts: Vec<&str> = [title, date]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    let escaped = parts.join(", ").replace('"', "&quot;").replace('\'', "&apos;");
    normalize_whitespace(&escaped)
}

/// Collapse checkpoint delimiters so a title never breaks the checkpoint.
fn checkpoint_safe(mut title: String) -> String {
    while title.contains(DELIMITER) {
        title = title.replace(DELIMITER, "%");
    }
    title
}

pub fn normalize_whitespace(s: &str) -> String {
    WHITESPACE.replace_all(s.trim(), " ").into_owned()
}
