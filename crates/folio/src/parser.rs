//! Markup parser run inside the parser process.
//!
//! Parses an (X)HTML document, stamps every element with the source line
//! its start tag sits on (`data-lnum`), and serializes the result as an
//! XHTML document. The line numbers are what the preview uses to map a
//! click in the rendered page back to an editor position and vice versa.
//!
//! The parser is forgiving about the HTML habits that show up in hand
//! edited books:
//!
//! - void elements without a closing slash, valueless attributes
//! - upper-case tag names
//! - omitted end tags (`</p>`, `</li>`, `</td>`, `</body>`, ...)
//! - HTML named entities, in text and in attribute values
//! - unescaped `<` and `&` inside `<script>` and `<style>`
//!
//! Anything else that is not well formed is an error: the preview is
//! served as `application/xhtml+xml` and a browser would refuse it anyway.

use std::borrow::Cow;

use eyre::{Result, WrapErr};
use quick_xml::escape::{resolve_html5_entity, resolve_xml_entity};
use quick_xml::events::{BytesCData, BytesEnd, BytesRef, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;

/// Attribute carrying the source line number of an element.
pub const LINE_NUMBER_ATTRIBUTE: &str = "data-lnum";

const XHTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

/// Elements that never have content in HTML.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Elements whose content is text up to the matching end tag.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

/// Elements whose end tag may be left out.
const OPTIONAL_END_ELEMENTS: &[&str] = &[
    "p", "li", "dt", "dd", "option", "optgroup", "td", "th", "tr", "thead", "tbody", "tfoot",
    "colgroup", "rb", "rt", "rp", "head", "body", "html",
];

/// Start tags that end an open `<p>`.
const P_CLOSERS: &[&str] = &[
    "address", "article", "aside", "blockquote", "dd", "details", "dialog", "div", "dl", "dt",
    "fieldset", "figcaption", "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6",
    "header", "hgroup", "hr", "li", "main", "menu", "nav", "ol", "p", "pre", "section", "table",
    "ul",
];

/// Elements whose descendants keep their tag name case.
const FOREIGN_ROOTS: &[&str] = &["svg", "math"];

/// Elements the serializer adds around a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wrapper {
    None,
    Html,
    HtmlBody,
}

/// Parse `raw` and serialize it with line number annotations.
pub fn parse_html(raw: &str) -> Result<String> {
    let mut annotator = Annotator::new(raw);
    annotator.run()?;
    annotator.finish()
}

struct Annotator<'a> {
    raw: &'a str,
    writer: Writer<Vec<u8>>,
    lines: LineCounter<'a>,
    /// Output names of the open elements, outermost first.
    stack: Vec<String>,
    wrapper: Option<Wrapper>,
}

impl<'a> Annotator<'a> {
    fn new(raw: &'a str) -> Self {
        Self {
            raw,
            writer: Writer::new(Vec::with_capacity(raw.len() + raw.len() / 4)),
            lines: LineCounter::new(raw),
            stack: Vec::with_capacity(16),
            wrapper: None,
        }
    }

    fn run(&mut self) -> Result<()> {
        let raw = self.raw;
        // Offset of the reader's input within `raw`; moves past raw text
        let mut base = 0;
        let mut reader = reader_for(raw);

        loop {
            let offset = base + position(reader.buffer_position());
            let line = self.lines.line_at(offset);

            let event = reader.read_event().map_err(|e| {
                let at = base + position(reader.error_position());
                eyre::eyre!("XML error at line {}: {}", self.lines.line_at(at), e)
            })?;

            match event {
                Event::Start(e) => {
                    let name = self.open(&e, line, false)?;
                    if RAW_TEXT_ELEMENTS.contains(&local_name(&name).as_str()) {
                        let content_start = base + position(reader.buffer_position());
                        base = self.raw_text(content_start, line)?;
                        reader = reader_for(&raw[base..]);
                    }
                }
                Event::Empty(e) => {
                    self.open(&e, line, true)?;
                }
                Event::End(e) => {
                    let name = std::str::from_utf8(e.name().as_ref())
                        .wrap_err("Invalid UTF-8 in end tag")?
                        .to_string();
                    if !is_void(&name) {
                        self.close(&name, line)?;
                    }
                }
                Event::GeneralRef(e) => self.write_entity(&e)?,
                Event::Eof => break,
                other => self.writer.write_event(other)?,
            }
        }
        Ok(())
    }

    /// Write a start tag, closing whatever it implicitly ends first.
    /// Returns the output name.
    fn open(&mut self, e: &BytesStart<'_>, line: usize, empty: bool) -> Result<String> {
        let source_name = std::str::from_utf8(e.name().as_ref())
            .wrap_err("Invalid UTF-8 in tag name")?
            .to_string();
        let local = local_name(&source_name);

        while let Some(top) = self.stack.last() {
            if !implicitly_closed_by(&local_name(top), &local) {
                break;
            }
            self.close_top()?;
        }

        if self.wrapper.is_none() {
            self.wrapper = Some(open_wrapper(&mut self.writer, &local)?);
        }

        let name = if self.in_foreign() || FOREIGN_ROOTS.contains(&local.as_str()) {
            source_name
        } else {
            source_name.to_ascii_lowercase()
        };

        let annotated = annotate(e, &name, line)?;
        if empty || is_void(&name) {
            self.writer.write_event(Event::Empty(annotated))?;
        } else {
            self.writer.write_event(Event::Start(annotated))?;
            self.stack.push(name.clone());
        }
        Ok(name)
    }

    /// Handle `</name>`, closing open elements with optional end tags on the way.
    fn close(&mut self, name: &str, line: usize) -> Result<()> {
        let Some(target) = self
            .stack
            .iter()
            .rposition(|open| open.eq_ignore_ascii_case(name))
        else {
            eyre::bail!("Unexpected end tag </{}> at line {}", name, line);
        };

        if let Some(blocking) = self.stack[target + 1..]
            .iter()
            .rev()
            .find(|open| !has_optional_end(open))
        {
            eyre::bail!(
                "Mismatched end tag at line {}: expected </{}>, found </{}>",
                line,
                blocking,
                name
            );
        }

        while self.stack.len() > target {
            self.close_top()?;
        }
        Ok(())
    }

    fn close_top(&mut self) -> Result<()> {
        if let Some(name) = self.stack.pop() {
            self.writer.write_event(Event::End(BytesEnd::new(name)))?;
        }
        Ok(())
    }

    fn in_foreign(&self) -> bool {
        self.stack
            .iter()
            .any(|open| FOREIGN_ROOTS.contains(&local_name(open).as_str()))
    }

    /// Copy the content of the raw text element on top of the stack and its
    /// end tag. Returns the offset just past the end tag.
    fn raw_text(&mut self, start: usize, line: usize) -> Result<usize> {
        let raw = self.raw;
        let name = self.stack.last().cloned().unwrap_or_default();
        let needle = format!("</{}", name.to_ascii_lowercase());
        let rest = &raw[start..];

        // ASCII lowercasing keeps byte offsets
        let close = rest
            .to_ascii_lowercase()
            .find(&needle)
            .map(|i| start + i)
            .ok_or_else(|| eyre::eyre!("Unclosed <{}> starting at line {}", name, line))?;
        let after = raw[close..]
            .find('>')
            .map(|i| close + i + 1)
            .ok_or_else(|| eyre::eyre!("Unterminated </{}> at line {}", name, line))?;

        self.write_raw_text(&raw[start..close])?;
        self.close_top()?;
        Ok(after)
    }

    fn write_raw_text(&mut self, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        if text.contains("<![CDATA[") || !text.contains(['<', '&']) {
            // Already XML-safe, as written in XHTML books
            self.writer
                .write_event(Event::Text(BytesText::from_escaped(text)))?;
        } else {
            for section in BytesCData::escaped(text) {
                self.writer.write_event(Event::CData(section))?;
            }
        }
        Ok(())
    }

    /// Keep XML entities and character references, expand HTML named entities.
    fn write_entity(&mut self, e: &BytesRef<'_>) -> Result<()> {
        if e.resolve_char_ref().ok().flatten().is_some() {
            self.writer.write_event(Event::GeneralRef(e.clone()))?;
            return Ok(());
        }
        let name = e.decode().wrap_err("Invalid entity name")?;
        if resolve_xml_entity(&name).is_some() {
            self.writer.write_event(Event::GeneralRef(e.clone()))?;
            return Ok(());
        }
        let text: Cow<'_, str> = match resolve_html5_entity(&name) {
            Some(resolved) => Cow::Borrowed(resolved),
            // Unknown entity: show it literally rather than failing the document
            None => Cow::Owned(format!("&{name};")),
        };
        self.writer.write_event(Event::Text(BytesText::new(&text)))?;
        Ok(())
    }

    fn finish(mut self) -> Result<String> {
        if let Some(open) = self.stack.iter().rev().find(|open| !has_optional_end(open)) {
            eyre::bail!("Unclosed element <{}> at end of document", open);
        }
        while !self.stack.is_empty() {
            self.close_top()?;
        }

        match self.wrapper {
            Some(Wrapper::None) => {}
            Some(Wrapper::Html) => {
                self.writer
                    .write_event(Event::End(BytesEnd::new("html")))?;
            }
            Some(Wrapper::HtmlBody) | None => {
                if self.wrapper.is_none() {
                    // No element at all: still produce a document
                    open_wrapper(&mut self.writer, "")?;
                }
                self.writer
                    .write_event(Event::End(BytesEnd::new("body")))?;
                self.writer
                    .write_event(Event::End(BytesEnd::new("html")))?;
            }
        }

        String::from_utf8(self.writer.into_inner()).wrap_err("Serializer produced invalid UTF-8")
    }
}

fn reader_for(input: &str) -> Reader<&[u8]> {
    let mut reader = Reader::from_str(input);
    reader.config_mut().trim_text(false);
    // End tags are matched against our own stack
    reader.config_mut().check_end_names = false;
    reader
}

fn position(offset: u64) -> usize {
    usize::try_from(offset).unwrap_or(usize::MAX)
}

fn local_name(name: &str) -> String {
    name.rsplit(':').next().unwrap_or(name).to_ascii_lowercase()
}

fn is_void(name: &str) -> bool {
    VOID_ELEMENTS.contains(&local_name(name).as_str())
}

fn has_optional_end(name: &str) -> bool {
    OPTIONAL_END_ELEMENTS.contains(&local_name(name).as_str())
}

/// Whether a start tag `incoming` ends the open element `open` (both local, lowercase).
fn implicitly_closed_by(open: &str, incoming: &str) -> bool {
    match open {
        "p" => P_CLOSERS.contains(&incoming),
        "li" => incoming == "li",
        "dt" | "dd" => matches!(incoming, "dt" | "dd"),
        "option" => matches!(incoming, "option" | "optgroup"),
        "optgroup" => incoming == "optgroup",
        "td" | "th" => matches!(incoming, "td" | "th" | "tr" | "thead" | "tbody" | "tfoot"),
        "tr" => matches!(incoming, "tr" | "thead" | "tbody" | "tfoot"),
        "thead" | "tbody" => matches!(incoming, "tbody" | "tfoot"),
        "rb" | "rt" | "rp" => matches!(incoming, "rb" | "rt" | "rp"),
        "head" => incoming == "body",
        _ => false,
    }
}

/// Open whatever is needed so that the first element ends up in a document.
fn open_wrapper(writer: &mut Writer<Vec<u8>>, first_element: &str) -> Result<Wrapper> {
    let wrapper = match local_name(first_element).as_str() {
        "html" => Wrapper::None,
        "head" | "body" => Wrapper::Html,
        _ => Wrapper::HtmlBody,
    };
    if wrapper != Wrapper::None {
        let mut html = BytesStart::new("html");
        html.push_attribute(("xmlns", XHTML_NAMESPACE));
        writer.write_event(Event::Start(html))?;
    }
    if wrapper == Wrapper::HtmlBody {
        writer.write_event(Event::Start(BytesStart::new("body")))?;
    }
    Ok(wrapper)
}

/// Copy a start tag under `name`, replacing any existing line number with `line`.
fn annotate(e: &BytesStart<'_>, name: &str, line: usize) -> Result<BytesStart<'static>> {
    let mut out = BytesStart::new(name.to_string());
    let mut has_xmlns = false;
    for attr in e.html_attributes() {
        let attr = attr.map_err(|err| eyre::eyre!("Bad attribute on <{}>: {}", name, err))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .wrap_err_with(|| format!("Invalid UTF-8 in attribute name on <{name}>"))?;
        if key == LINE_NUMBER_ATTRIBUTE {
            continue;
        }
        if key == "xmlns" {
            has_xmlns = true;
        }
        // HTML entities are not defined in XHTML: expand them. Values that
        // do not unescape (a bare `&` in a URL) are taken literally.
        let value = match attr.unescape_value_with(resolve_html5_entity) {
            Ok(value) => value.into_owned(),
            Err(_) => String::from_utf8_lossy(&attr.value).into_owned(),
        };
        out.push_attribute((key, value.as_str()));
    }
    if local_name(name) == "html" && !has_xmlns {
        out.push_attribute(("xmlns", XHTML_NAMESPACE));
    }
    let line = line.to_string();
    out.push_attribute((LINE_NUMBER_ATTRIBUTE, line.as_str()));
    Ok(out)
}

/// Maps byte offsets to 1-based line numbers, scanning forward only.
struct LineCounter<'a> {
    bytes: &'a [u8],
    offset: usize,
    line: usize,
}

impl<'a> LineCounter<'a> {
    fn new(raw: &'a str) -> Self {
        Self {
            bytes: raw.as_bytes(),
            offset: 0,
            line: 1,
        }
    }

    fn line_at(&mut self, offset: usize) -> usize {
        let offset = offset.min(self.bytes.len());
        if offset > self.offset {
            self.line += self.bytes[self.offset..offset]
                .iter()
                .filter(|&&b| b == b'\n')
                .count();
            self.offset = offset;
        }
        self.line
    }
}
