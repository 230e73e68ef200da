//! # Archive response decoding
//!
//! Every byte the archive sends back goes through this module:
//!
//! | Payload                         | Entry point                                   | Output          |
//! |---------------------------------|-----------------------------------------------|-----------------|
//! | Query result (5 formats)        | [`parse_table`]                               | [`Table`]       |
//! | HTML / XML / raw error document | [`parse_error`]                               | [`ArchiveError`]|
//! | UWS job document                | [`parse_job_status`]                          | [`JobStatus`]   |
//! | UWS job list                    | [`parse_job_list`]                            | [`JobSummary`]s |
//! | VODataService table set         | [`parse_tableset`]                            | [`TableSet`]    |
//!
//! Parsers are pure functions of the body bytes. Structural problems are reported as
//! [`TapError::MalformedTable`] or [`TapError::MalformedJobStatus`], both carrying an excerpt
//! of the offending body.
//!
//! ## See also
//! * [`serialize_error`] – the inverse of [`parse_error`], used to script archive failures
//!   in tests.
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::table::Table;
use crate::tap::OutputFormat;
use crate::tap_errors::TapError;

mod error_doc;
mod fits;
mod tableset;
mod text;
mod uws;
mod votable;

pub use error_doc::{parse_error, serialize_error, ArchiveError, ErrorEnvelope};
pub use tableset::{parse_tableset, ColumnMeta, TableMeta, TableSet};
pub use uws::{parse_job_list, parse_job_status, JobStatus, JobSummary, ResultRef, ServerPhase};

/// Decode a query result in the format it was requested with.
///
/// Both VOTable formats accept either serialization (`TABLEDATA`, `BINARY`, `BINARY2`): the
/// archive picks the serialization, the format only selects the container.
///
/// Errors
/// ----------
/// * [`TapError::MalformedTable`] on any structural inconsistency.
/// * [`TapError::ArchiveReported`] for a VOTable whose `QUERY_STATUS` is `ERROR`.
pub fn parse_table(content: &[u8], format: OutputFormat) -> Result<Table, TapError> {
    match format {
        OutputFormat::Csv => text::parse_csv(content),
        OutputFormat::Json => text::parse_json(content),
        OutputFormat::Votable | OutputFormat::VotablePlain => votable::parse_votable(content),
        OutputFormat::Fits => fits::parse_fits(content),
    }
}

/// Attribute of `e` whose local name (namespace prefix ignored) is `name`.
pub(crate) fn attribute(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// Unescaped content of a text or CDATA event.
pub(crate) fn event_text(event: Event<'_>) -> Option<String> {
    match event {
        Event::Text(t) => t.unescape().ok().map(|s| s.into_owned()),
        Event::CData(c) => Some(String::from_utf8_lossy(&c).into_owned()),
        _ => None,
    }
}

/// Minimal element tree for the small XML documents (UWS, VOSI) the archive returns.
///
/// Names are local names; text is the concatenation of the element's own text nodes.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct XmlNode {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    fn from_start(e: &BytesStart<'_>) -> Self {
        XmlNode {
            name: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
            attrs: e
                .attributes()
                .flatten()
                .map(|a| {
                    (
                        String::from_utf8_lossy(a.key.local_name().as_ref()).into_owned(),
                        a.unescape_value()
                            .map(|v| v.into_owned())
                            .unwrap_or_default(),
                    )
                })
                .collect(),
            ..Default::default()
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Trimmed text, `None` when empty or marked `xsi:nil="true"`.
    pub fn value(&self) -> Option<&str> {
        if self.attr("nil") == Some("true") {
            return None;
        }
        Some(self.text.trim()).filter(|t| !t.is_empty())
    }

    pub fn child_value(&self, name: &str) -> Option<&str> {
        self.child(name).and_then(XmlNode::value)
    }
}

/// Parse a whole document into its root element.
pub(crate) fn parse_xml_tree(content: &[u8]) -> Result<XmlNode, String> {
    let text = std::str::from_utf8(content).map_err(|e| format!("not UTF-8: {e}"))?;
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut stack = vec![XmlNode::default()];
    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(e) => stack.push(XmlNode::from_start(&e)),
            Event::Empty(e) => {
                let node = XmlNode::from_start(&e);
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                }
            }
            Event::End(_) => {
                let node = stack.pop().ok_or("unbalanced end tag")?;
                stack
                    .last_mut()
                    .ok_or("unbalanced end tag")?
                    .children
                    .push(node);
            }
            ev @ (Event::Text(_) | Event::CData(_)) => {
                let text = event_text(ev).ok_or("invalid character data")?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if stack.len() != 1 {
        return Err("unexpected end of document".into());
    }
    stack
        .pop()
        .and_then(|root| root.children.into_iter().next())
        .ok_or_else(|| "document has no root element".into())
}

/// Big-endian reader over a decoded binary payload.
pub(crate) struct ByteCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        ByteCursor { bytes, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    pub fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.bytes.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn array<const N: usize>(&mut self) -> Option<[u8; N]> {
        self.take(N)?.try_into().ok()
    }

    pub fn u8(&mut self) -> Option<u8> {
        self.array::<1>().map(|b| b[0])
    }

    pub fn i16(&mut self) -> Option<i16> {
        self.array().map(i16::from_be_bytes)
    }

    pub fn i32(&mut self) -> Option<i32> {
        self.array().map(i32::from_be_bytes)
    }

    pub fn i64(&mut self) -> Option<i64> {
        self.array().map(i64::from_be_bytes)
    }

    pub fn f32(&mut self) -> Option<f32> {
        self.array().map(f32::from_be_bytes)
    }

    pub fn f64(&mut self) -> Option<f64> {
        self.array().map(f64::from_be_bytes)
    }
}

/// Text of a fixed-width character field: cut at the first NUL, trailing blanks dropped.
pub(crate) fn fixed_width_text(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim_end().to_string()
}
