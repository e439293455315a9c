//! Rewrites `<dao>` references in the finding aid once items are finished.
//!
//! | status       | artifacts              | change                                     |
//! |--------------|------------------------|--------------------------------------------|
//! | 401 / 404    | —                      | `xlink:show="none"`                        |
//! | 200          | all present, non-empty | `xlink:role` = METS ns, `xlink:href` = URL |
//! | 200          | anything missing       | none (error logged)                        |
//! | other, unset | —                      | none (logged as unhandled)                 |
//!
//! The document is streamed through `quick-xml` and written back event by
//! event, so everything except the edited element keeps its original bytes.
//! The file is persisted after each mutation.

use crate::ead::{is_ead, link_attributes, METS_NS, XLINK_NS};
use crate::error::HarvestError;
use crate::item::{FetchStatus, WorkItem};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::reader::NsReader;
use quick_xml::writer::Writer;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// What [`DocumentUpdater::apply`] did for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Marked `xlink:show="none"`.
    Hidden,
    /// Now points at the package document.
    Linked,
    /// Retrieved but not finished; left unchanged.
    Incomplete(Vec<String>),
    /// Status not covered by any rule; left unchanged.
    Unhandled(Option<FetchStatus>),
    /// No `<dao>` with the item's locator is left in the document.
    ReferenceNotFound,
}

/// Edit applied to one `<dao>`.
#[derive(Debug, Clone, Copy)]
enum LinkEdit<'a> {
    Hide,
    Link { href: &'a str },
}

/// Holds the finding aid in memory and writes it back after every edit.
#[derive(Debug)]
pub struct DocumentUpdater {
    path: PathBuf,
    xml: String,
}

impl DocumentUpdater {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, HarvestError> {
        let path = path.into();
        let xml = std::fs::read_to_string(&path).map_err(|source| HarvestError::SourceUnreadable {
            path: path.clone(),
            source,
        })?;
        Ok(Self { path, xml })
    }

    /// Current document text, including edits made so far.
    pub fn document(&self) -> &str {
        &self.xml
    }

    /// Apply the rule for `item` and persist the document if it changed.
    pub fn apply(&mut self, item: &WorkItem) -> Result<UpdateOutcome, HarvestError> {
        match item.fetch_status {
            Some(FetchStatus::Unauthorized) | Some(FetchStatus::NotFound) => {
                if !self.edit(&item.src_url, LinkEdit::Hide)? {
                    return Ok(self.not_found(item));
                }
                let status = item.fetch_status.map(|s| s.code()).unwrap_or_default();
                if status == 401 {
                    info!("{} is restricted; added xlink:show=\"none\"", item.src_url);
                } else {
                    warn!("{} was not found; added xlink:show=\"none\"", item.src_url);
                }
                Ok(UpdateOutcome::Hidden)
            }
            Some(FetchStatus::Ok) => {
                let mut problems = item.missing_artifacts();
                if item.manifest_url.is_none() {
                    problems.push("manifest_url is unset".to_string());
                }
                if !problems.is_empty() {
                    for problem in &problems {
                        error!("{problem}");
                    }
                    error!("dao {} will not be changed", item.src_url);
                    return Ok(UpdateOutcome::Incomplete(problems));
                }
                let href = item.manifest_url.as_deref().unwrap_or_default();
                if !self.edit(&item.src_url, LinkEdit::Link { href })? {
                    return Ok(self.not_found(item));
                }
                info!("{} now points to {href}", item.src_url);
                Ok(UpdateOutcome::Linked)
            }
            other => {
                let shown = other.map_or_else(|| "unset".to_string(), |s| s.to_string());
                warn!(status = %shown, "Unhandled: {} left unchanged", item.src_url);
                Ok(UpdateOutcome::Unhandled(other))
            }
        }
    }

    fn not_found(&self, item: &WorkItem) -> UpdateOutcome {
        warn!("No <dao> with href {} in {}", item.src_url, self.path.display());
        UpdateOutcome::ReferenceNotFound
    }

    /// Rewrite the first `<dao>` whose href is `src_url`, then persist.
    fn edit(&mut self, src_url: &str, edit: LinkEdit<'_>) -> Result<bool, HarvestError> {
        let rewritten = rewrite_first_dao(&self.xml, src_url, edit).map_err(|detail| {
            HarvestError::MalformedSource {
                path: self.path.clone(),
                detail,
            }
        })?;
        match rewritten {
            Some(xml) => {
                persist(&self.path, &xml)?;
                self.xml = xml;
                debug!("Saved {}", self.path.display());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

fn rewrite_first_dao(
    xml: &str,
    src_url: &str,
    edit: LinkEdit<'_>,
) -> Result<Option<String>, String> {
    let mut reader = NsReader::from_str(xml);
    let mut writer = Writer::new(Vec::with_capacity(xml.len() + 64));
    let mut done = false;

    loop {
        let (ns, event) = reader.read_resolved_event().map_err(|e| e.to_string())?;
        let is_dao = matches!(&event, Event::Start(e) | Event::Empty(e)
            if is_ead(&ns, e.local_name().as_ref(), "dao"));
        let event = match event {
            Event::Eof => break,
            Event::Start(e) if is_dao && !done => match edited(&reader, &e, src_url, edit)? {
                Some(replacement) => {
                    done = true;
                    Event::Start(replacement)
                }
                None => Event::Start(e),
            },
            Event::Empty(e) if is_dao && !done => match edited(&reader, &e, src_url, edit)? {
                Some(replacement) => {
                    done = true;
                    Event::Empty(replacement)
                }
                None => Event::Empty(e),
            },
            other => other,
        };
        writer.write_event(event).map_err(|e| e.to_string())?;
    }

    if !done {
        return Ok(None);
    }
    String::from_utf8(writer.into_inner())
        .map(Some)
        .map_err(|e| e.to_string())
}

/// A copy of `element` with the edit applied, or `None` if its href differs.
///
/// Attribute order is kept; attributes the edit introduces are appended
/// with the prefix the element already uses for the xlink namespace.
fn edited(
    reader: &NsReader<&[u8]>,
    element: &BytesStart<'_>,
    src_url: &str,
    edit: LinkEdit<'_>,
) -> Result<Option<BytesStart<'static>>, String> {
    let link = link_attributes(reader, element).map_err(|e| e.to_string())?;
    if link.href.as_deref() != Some(src_url) {
        return Ok(None);
    }
    let wanted: Vec<(&str, &str)> = match edit {
        LinkEdit::Hide => vec![("show", "none")],
        LinkEdit::Link { href } => vec![("role", METS_NS), ("href", href)],
    };
    let prefix = link.prefix.unwrap_or_else(|| "xlink".to_string());

    let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
    let mut out = BytesStart::new(name);
    let mut applied = vec![false; wanted.len()];
    for attr in element.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let (ns, local) = reader.resolve_attribute(attr.key);
        let in_xlink = matches!(ns, ResolveResult::Bound(Namespace(uri)) if uri == XLINK_NS.as_bytes());
        let replacement = in_xlink
            .then(|| wanted.iter().position(|(l, _)| l.as_bytes() == local.as_ref()))
            .flatten();
        match replacement {
            Some(i) => {
                let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                out.push_attribute((key.as_str(), wanted[i].1));
                applied[i] = true;
            }
            // Raw bytes: the value is already escaped.
            None => out.push_attribute((attr.key.into_inner(), &*attr.value)),
        }
    }
    for (i, (local, value)) in wanted.iter().enumerate() {
        if !applied[i] {
            out.push_attribute((format!("{prefix}:{local}").as_str(), *value));
        }
    }
    Ok(Some(out))
}

/// Replace the document on disk through a temp file in the same directory.
fn persist(path: &Path, xml: &str) -> Result<(), HarvestError> {
    let write_err = |source| HarvestError::SourceWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let dir = path
        .parent()
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(xml.as_bytes()).map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ead xmlns="urn:isbn:1-931666-22-9" xmlns:xlink="http://www.w3.org/1999/xlink">
  <!-- untouched comment -->
  <c id="MC216_c001"><did>
    <unittitle>A &amp; B</unittitle>
    <dao xlink:type="simple" xlink:href="http://x/c001.pdf"/>
  </did></c>
  <c id="MC216_c002"><did>
    <dao xlink:href="http://x/c002.pdf" xlink:show="embed"></dao>
  </did></c>
</ead>
"#;

    fn updater(dir: &Path) -> DocumentUpdater {
        let path = dir.join("MC216.EAD.xml");
        std::fs::write(&path, DOC).unwrap();
        DocumentUpdater::open(path).unwrap()
    }

    fn item(url: &str, status: u16) -> WorkItem {
        let mut item = WorkItem::new(url, "MC216_c001", "A", 0);
        item.fetch_status = Some(FetchStatus::from_code(status));
        item
    }

    #[test]
    fn unauthorized_only_gains_hidden_marker() {
        let dir = tempfile::tempdir().unwrap();
        let mut updater = updater(dir.path());

        let outcome = updater.apply(&item("http://x/c001.pdf", 401)).unwrap();
        assert_eq!(outcome, UpdateOutcome::Hidden);

        let expected = DOC.replace(
            r#"<dao xlink:type="simple" xlink:href="http://x/c001.pdf"/>"#,
            r#"<dao xlink:type="simple" xlink:href="http://x/c001.pdf" xlink:show="none"/>"#,
        );
        assert_eq!(updater.document(), expected);
        let on_disk = std::fs::read_to_string(dir.path().join("MC216.EAD.xml")).unwrap();
        assert_eq!(on_disk, expected);
    }

    #[test]
    fn existing_show_attribute_is_replaced_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let mut updater = updater(dir.path());
        updater.apply(&item("http://x/c002.pdf", 404)).unwrap();
        assert!(updater
            .document()
            .contains(r#"<dao xlink:href="http://x/c002.pdf" xlink:show="none"></dao>"#));
    }

    #[test]
    fn incomplete_item_leaves_reference_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let mut updater = updater(dir.path());
        let mut it = item("http://x/c001.pdf", 200);
        let pdf = dir.path().join("c001.pdf");
        std::fs::write(&pdf, b"%PDF").unwrap();
        it.pdf_path = Some(pdf);
        it.manifest_url = Some("http://f/MC216/c001.mets".into());

        let outcome = updater.apply(&it).unwrap();
        assert!(matches!(outcome, UpdateOutcome::Incomplete(ref p) if !p.is_empty()));
        assert_eq!(updater.document(), DOC);
    }

    #[test]
    fn complete_item_is_linked_to_package() {
        let dir = tempfile::tempdir().unwrap();
        let mut updater = updater(dir.path());
        let mut it = item("http://x/c001.pdf", 200);
        let pdf = dir.path().join("c001.pdf");
        let mets = dir.path().join("c001.mets");
        let tiffs = dir.path().join("tiffs");
        let jp2s = dir.path().join("jp2s");
        std::fs::write(&pdf, b"%PDF").unwrap();
        std::fs::write(&mets, b"<mets/>").unwrap();
        for d in [&tiffs, &jp2s] {
            std::fs::create_dir(d).unwrap();
            std::fs::write(d.join("00000001"), b"x").unwrap();
        }
        it.pdf_path = Some(pdf);
        it.manifest_path = Some(mets);
        it.tiffs_dir = Some(tiffs);
        it.jp2s_dir = Some(jp2s);
        it.manifest_url = Some("http://f/MC216/c001.mets".into());

        assert_eq!(updater.apply(&it).unwrap(), UpdateOutcome::Linked);
        assert!(updater.document().contains(
            r#"<dao xlink:type="simple" xlink:href="http://f/MC216/c001.mets" xlink:role="http://www.loc.gov/METS/"/>"#
        ));
        assert!(updater.document().contains("<!-- untouched comment -->"));
        assert!(updater.document().contains("A &amp; B"));

        // The old locator is gone, so a second pass finds nothing to edit.
        assert_eq!(updater.apply(&it).unwrap(), UpdateOutcome::ReferenceNotFound);
    }

    #[test]
    fn other_status_is_unhandled() {
        let dir = tempfile::tempdir().unwrap();
        let mut updater = updater(dir.path());
        let outcome = updater.apply(&item("http://x/c001.pdf", 503)).unwrap();
        assert_eq!(outcome, UpdateOutcome::Unhandled(Some(FetchStatus::Other(503))));
        assert_eq!(updater.document(), DOC);
    }
}
