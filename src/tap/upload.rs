//! User table payloads.
//!
//! The archive accepts user tables as VOTable documents sent in a `multipart/form-data`
//! body, either with a query (`UPLOAD=name,param:name`) or on their own to the upload
//! endpoint. [`table_to_votable`] writes a `TABLEDATA` VOTable, [`MultipartForm`] builds the
//! request body.
use std::fmt::Write as _;

use quick_xml::escape::escape;

use crate::env_state::RequestBody;
use crate::table::{DataType, Table, Value};

/// Serialize `table` as a single-table VOTable 1.3 document with a `TABLEDATA` body.
///
/// Nulls are written as empty cells, booleans as `T`/`F`, text cells are XML-escaped.
/// Character columns are declared `arraysize="*"`.
pub fn table_to_votable(table: &Table, name: &str) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(
        "<VOTABLE version=\"1.3\" xmlns=\"http://www.ivoa.net/xml/VOTable/v1.3\">\n<RESOURCE>\n",
    );
    let _ = writeln!(out, "<TABLE name=\"{}\">", escape(name));

    for column in table.columns() {
        let _ = write!(
            out,
            "<FIELD name=\"{}\" datatype=\"{}\"",
            escape(column.name.as_str()),
            column.datatype.votable_name()
        );
        if column.datatype == DataType::Char {
            out.push_str(" arraysize=\"*\"");
        }
        if let Some(unit) = &column.unit {
            let _ = write!(out, " unit=\"{}\"", escape(unit.as_str()));
        }
        if let Some(ucd) = &column.ucd {
            let _ = write!(out, " ucd=\"{}\"", escape(ucd.as_str()));
        }
        out.push_str("/>\n");
    }

    out.push_str("<DATA><TABLEDATA>\n");
    for row in table.rows() {
        out.push_str("<TR>");
        for value in row {
            match value {
                Value::Null => out.push_str("<TD/>"),
                Value::Float(x) if x.is_nan() => out.push_str("<TD/>"),
                Value::Text(s) => {
                    let _ = write!(out, "<TD>{}</TD>", escape(s.as_str()));
                }
                other => {
                    let _ = write!(out, "<TD>{other}</TD>");
                }
            }
        }
        out.push_str("</TR>\n");
    }
    out.push_str("</TABLEDATA></DATA>\n</TABLE>\n</RESOURCE>\n</VOTABLE>\n");
    out
}

#[derive(Debug, Clone, PartialEq)]
struct Part {
    name: String,
    filename: Option<String>,
    content_type: Option<String>,
    data: Vec<u8>,
}

/// `multipart/form-data` body under construction.
#[derive(Debug, Clone, PartialEq)]
pub struct MultipartForm {
    boundary_prefix: String,
    parts: Vec<Part>,
}

impl MultipartForm {
    pub fn new(boundary_prefix: impl Into<String>) -> Self {
        MultipartForm {
            boundary_prefix: boundary_prefix.into(),
            parts: Vec::new(),
        }
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(Part {
            name: name.into(),
            filename: None,
            content_type: None,
            data: value.into().into_bytes(),
        });
        self
    }

    pub fn file(
        mut self,
        name: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        self.parts.push(Part {
            name: name.into(),
            filename: Some(filename.into()),
            content_type: Some(content_type.into()),
            data,
        });
        self
    }

    /// Boundary that does not occur in any part: the prefix, lengthened until unique.
    fn boundary(&self) -> String {
        let mut boundary = format!("----{}", self.boundary_prefix);
        while self
            .parts
            .iter()
            .any(|p| contains(&p.data, boundary.as_bytes()))
        {
            boundary.push('x');
        }
        boundary
    }

    /// Encode into a request body.
    pub fn into_body(self) -> RequestBody {
        let boundary = self.boundary();
        let mut bytes = Vec::new();
        for part in &self.parts {
            bytes.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            let disposition = match &part.filename {
                Some(filename) => format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                    part.name, filename
                ),
                None => format!("Content-Disposition: form-data; name=\"{}\"\r\n", part.name),
            };
            bytes.extend_from_slice(disposition.as_bytes());
            if let Some(ct) = &part.content_type {
                bytes.extend_from_slice(format!("Content-Type: {ct}\r\n").as_bytes());
            }
            bytes.extend_from_slice(b"\r\n");
            bytes.extend_from_slice(&part.data);
            bytes.extend_from_slice(b"\r\n");
        }
        bytes.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
        RequestBody::Multipart { boundary, bytes }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

/// Read back the parts of a body built by [`MultipartForm::into_body`] as
/// `(name, filename, data)` triples. `None` for any other body.
pub fn multipart_parts(body: &RequestBody) -> Option<Vec<(String, Option<String>, Vec<u8>)>> {
    let RequestBody::Multipart { boundary, bytes } = body else {
        return None;
    };
    let delimiter = format!("--{boundary}");
    let text = String::from_utf8_lossy(bytes);
    let mut parts = Vec::new();
    for chunk in text.split(delimiter.as_str()).skip(1) {
        if chunk.starts_with("--") {
            break;
        }
        let chunk = chunk.strip_prefix("\r\n")?;
        let (headers, data) = chunk.split_once("\r\n\r\n")?;
        let data = data.strip_suffix("\r\n").unwrap_or(data);
        let field = |key: &str| {
            headers.split("; ").find_map(|kv| {
                kv.trim()
                    .strip_prefix(key)
                    .and_then(|v| v.strip_prefix("=\""))
                    .and_then(|v| v.split('"').next())
                    .map(str::to_string)
            })
        };
        parts.push((field("name")?, field("filename"), data.as_bytes().to_vec()));
    }
    Some(parts)
}
