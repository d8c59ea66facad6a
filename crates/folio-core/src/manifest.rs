//! Media types declared by a book's package document
//!
//! `META-INF/container.xml` names the OPF file; its `<manifest>` lists every
//! resource with a `media-type`. Those declarations win over whatever the
//! file extension suggests.

use std::collections::HashMap;
use std::path::Path;

use eyre::{Result, WrapErr};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::href;

pub(crate) const CONTAINER_XML: &str = "META-INF/container.xml";

/// Declared media types keyed by document name.
///
/// A book without `META-INF/container.xml` has an empty manifest.
pub(crate) fn read_manifest(root: &Path) -> Result<HashMap<String, String>> {
    let container_path = root.join(CONTAINER_XML);
    if !container_path.is_file() {
        return Ok(HashMap::new());
    }
    let container_xml = std::fs::read_to_string(&container_path)
        .wrap_err_with(|| format!("Failed to read {}", container_path.display()))?;

    let Some(opf_name) = rootfile(&container_xml)
        .wrap_err_with(|| format!("Failed to parse {}", container_path.display()))?
    else {
        return Ok(HashMap::new());
    };

    let opf_path = root.join(&opf_name);
    let opf = std::fs::read_to_string(&opf_path)
        .wrap_err_with(|| format!("Failed to read package document {}", opf_path.display()))?;
    manifest_items(&opf, &opf_name)
        .wrap_err_with(|| format!("Failed to parse package document {}", opf_path.display()))
}

/// `full-path` of the first `<rootfile>`.
fn rootfile(container_xml: &str) -> Result<Option<String>> {
    let mut reader = Reader::from_str(container_xml);
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"rootfile" => {
                return attribute(&e, b"full-path");
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

/// `<item>` media types, with hrefs resolved against the OPF's own name.
fn manifest_items(opf: &str, opf_name: &str) -> Result<HashMap<String, String>> {
    let mut reader = Reader::from_str(opf);
    let mut items = HashMap::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"item" => {
                let (Some(item_href), Some(media_type)) =
                    (attribute(&e, b"href")?, attribute(&e, b"media-type")?)
                else {
                    continue;
                };
                if let Some(name) = href::href_to_name(&item_href, opf_name) {
                    items.insert(name, media_type.trim().to_ascii_lowercase());
                }
            }
            Event::Eof => return Ok(items),
            _ => {}
        }
    }
}

fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.local_name().as_ref() == key {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}
