//! Namespaces and link-attribute helpers shared by the scanner and updater.
//!
//! Only `<dao>` elements and their typed `xlink:` attributes are ever read or
//! written; the rest of the finding aid passes through untouched.

use quick_xml::events::BytesStart;
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::reader::NsReader;

/// Namespace of the finding-aid body.
pub const EAD_NS: &str = "urn:isbn:1-931666-22-9";
/// Namespace of the typed link attributes (`href`, `role`, `show`).
pub const XLINK_NS: &str = "http://www.w3.org/1999/xlink";
/// Role marking a link that points at a finished package document.
pub const METS_NS: &str = "http://www.loc.gov/METS/";

/// Whether a resolved element name is `<name>` in the EAD namespace.
pub(crate) fn is_ead(ns: &ResolveResult<'_>, local: &[u8], name: &str) -> bool {
    matches!(ns, ResolveResult::Bound(Namespace(uri)) if *uri == EAD_NS.as_bytes())
        && local == name.as_bytes()
}

/// The `xlink:` attributes of one `<dao>`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct LinkAttributes {
    pub href: Option<String>,
    pub role: Option<String>,
    pub show: Option<String>,
    /// Prefix the document binds to the xlink namespace on this element.
    pub prefix: Option<String>,
}

impl LinkAttributes {
    pub fn points_to_package(&self) -> bool {
        self.role.as_deref() == Some(METS_NS)
    }

    pub fn is_hidden(&self) -> bool {
        self.show.as_deref() == Some("none")
    }
}

/// Collect the xlink attributes of `element`, resolving prefixes against
/// the reader's current namespace scope.
pub(crate) fn link_attributes(
    reader: &NsReader<&[u8]>,
    element: &BytesStart<'_>,
) -> Result<LinkAttributes, quick_xml::Error> {
    let mut link = LinkAttributes::default();
    for attr in element.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let (ns, local) = reader.resolve_attribute(attr.key);
        if !matches!(ns, ResolveResult::Bound(Namespace(uri)) if uri == XLINK_NS.as_bytes()) {
            continue;
        }
        let slot = match local.as_ref() {
            b"href" => &mut link.href,
            b"role" => &mut link.role,
            b"show" => &mut link.show,
            _ => continue,
        };
        *slot = Some(attr.unescape_value()?.into_owned());
        if link.prefix.is_none() {
            link.prefix = attr
                .key
                .prefix()
                .map(|p| String::from_utf8_lossy(p.as_ref()).into_owned());
        }
    }
    Ok(link)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quick_xml::events::Event;

    #[test]
    fn reads_prefixed_link_attributes() {
        let xml = r#"<ead xmlns="urn:isbn:1-931666-22-9" xmlns:xl="http://www.w3.org/1999/xlink">
            <dao xl:href="http://x/a.pdf" xl:role="http://www.loc.gov/METS/" href="ignored"/>
        </ead>"#;
        let mut reader = NsReader::from_str(xml);
        loop {
            let (ns, event) = reader.read_resolved_event().unwrap();
            let dao = match &event {
                Event::Empty(e) => is_ead(&ns, e.local_name().as_ref(), "dao"),
                Event::Eof => panic!("no dao found"),
                _ => false,
            };
            if dao {
                let Event::Empty(e) = event else { unreachable!() };
                let link = link_attributes(&reader, &e).unwrap();
                assert_eq!(link.href.as_deref(), Some("http://x/a.pdf"));
                assert!(link.points_to_package());
                assert!(!link.is_hidden());
                assert_eq!(link.prefix.as_deref(), Some("xl"));
                break;
            }
        }
    }
}
