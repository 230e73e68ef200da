//! Archive error documents.
//!
//! The archive reports failures in three shapes: an HTML page (the servlet error page,
//! with a `Message:`/`Status:` list), an XML document (a VOTable carrying
//! `INFO name="QUERY_STATUS" value="ERROR"`, or a UWS job with an `errorSummary`), or
//! anything else, kept verbatim. [`parse_error`] picks the parser from the content type and
//! always degrades to the raw body rather than failing, so callers keep something
//! readable even when the document is not what the server claims it is.
use std::fmt;

use once_cell::sync::Lazy;
use quick_xml::escape::{escape, unescape};
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;

use super::{attribute, event_text};
use crate::tap_errors::TapError;

static HTML_MESSAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<li>\s*<b>\s*Message:?\s*</b>\s*(.*?)\s*</li>").unwrap());
static HTML_STATUS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<li>\s*<b>\s*Status:?\s*</b>\s*(\d{3})").unwrap());
static HTML_TITLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<title>(.*?)</title>").unwrap());
static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static STATUS_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([1-5]\d{2})\b").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Shape of the document an [`ArchiveError`] was read from (or is rendered to).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorEnvelope {
    Html,
    /// VOTable with a `QUERY_STATUS` info element.
    Votable,
    /// UWS job document with an `errorSummary`.
    Uws,
    /// Body kept as-is.
    Raw,
}

/// Error reported by the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveError {
    pub message: String,
    /// HTTP status from an HTML page, or the UWS error `type` (`fatal`, `transient`).
    pub code: Option<String>,
    pub envelope: ErrorEnvelope,
}

impl ArchiveError {
    pub fn new(message: impl Into<String>, code: Option<String>, envelope: ErrorEnvelope) -> Self {
        ArchiveError {
            message: message.into(),
            code,
            envelope,
        }
    }

    /// Error built from a plain message, without a server document.
    pub fn raw(message: impl Into<String>) -> Self {
        Self::new(message, None, ErrorEnvelope::Raw)
    }
}

impl fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} (code {code})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Decode an error document.
///
/// Arguments
/// -----------------
/// * `content`: response body.
/// * `content_type`: value of the `Content-Type` header, if any. `*html*` selects the HTML
///   reader, `*xml*` the VOTable/UWS reader; anything else keeps the body verbatim.
///
/// Return
/// ----------
/// * The decoded error. Fields the document does not carry degrade to the raw body.
/// * [`TapError::EmptyErrorDocument`] when `content` is empty or blank.
pub fn parse_error(content: &[u8], content_type: Option<&str>) -> Result<ArchiveError, TapError> {
    let text = String::from_utf8_lossy(content);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(TapError::EmptyErrorDocument);
    }

    let content_type = content_type.map(str::to_ascii_lowercase).unwrap_or_default();
    let parsed = if content_type.contains("html") {
        Some(parse_html_error(trimmed))
    } else if content_type.contains("xml") {
        parse_xml_error(trimmed)
    } else {
        None
    };

    Ok(parsed.unwrap_or_else(|| ArchiveError::raw(trimmed)))
}

fn decode_entities(s: &str) -> String {
    let s = s.replace("&nbsp;", " ");
    match unescape(&s) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => s,
    }
}

fn strip_tags(s: &str) -> String {
    let without_tags = HTML_TAG.replace_all(s, " ");
    WHITESPACE
        .replace_all(&decode_entities(&without_tags), " ")
        .trim()
        .to_string()
}

/// Text of the `Message:` item, markup removed but line breaks and spacing kept.
fn message_text(s: &str) -> String {
    decode_entities(&HTML_TAG.replace_all(s, "")).trim().to_string()
}

fn parse_html_error(html: &str) -> ArchiveError {
    let title = HTML_TITLE
        .captures(html)
        .map(|c| strip_tags(&c[1]))
        .filter(|t| !t.is_empty());

    let code = HTML_STATUS
        .captures(html)
        .map(|c| c[1].to_string())
        .or_else(|| {
            title
                .as_deref()
                .and_then(|t| STATUS_CODE.captures(t))
                .map(|c| c[1].to_string())
        });

    // a present but empty Message item is an empty message, not a missing one
    let message = HTML_MESSAGE
        .captures(html)
        .map(|c| message_text(&c[1]))
        .or(title)
        .unwrap_or_else(|| {
            let body = strip_tags(html);
            if body.is_empty() {
                html.to_string()
            } else {
                body
            }
        });

    ArchiveError::new(message, code, ErrorEnvelope::Html)
}

/// `None` when the document is not well-formed or carries no recognizable error.
fn parse_xml_error(xml: &str) -> Option<ArchiveError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    enum Capture {
        None,
        QueryStatus,
        UwsMessage,
    }
    let mut capture = Capture::None;
    let mut uws_type: Option<String> = None;
    let mut in_error_summary = false;
    let mut text = String::new();

    loop {
        match reader.read_event().ok()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"INFO" => {
                    let is_status = attribute(&e, b"name").as_deref() == Some("QUERY_STATUS");
                    let is_error = attribute(&e, b"value")
                        .is_some_and(|v| v.eq_ignore_ascii_case("ERROR"));
                    if is_status && is_error {
                        capture = Capture::QueryStatus;
                        text.clear();
                    }
                }
                b"errorSummary" => {
                    in_error_summary = true;
                    uws_type = attribute(&e, b"type");
                }
                b"message" if in_error_summary => {
                    capture = Capture::UwsMessage;
                    text.clear();
                }
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"INFO" => {
                let is_status = attribute(&e, b"name").as_deref() == Some("QUERY_STATUS");
                let is_error =
                    attribute(&e, b"value").is_some_and(|v| v.eq_ignore_ascii_case("ERROR"));
                if is_status && is_error {
                    return Some(ArchiveError::new(
                        "query failed without message",
                        None,
                        ErrorEnvelope::Votable,
                    ));
                }
            }
            ev @ (Event::Text(_) | Event::CData(_)) => {
                if !matches!(capture, Capture::None) {
                    text.push_str(&event_text(ev)?);
                }
            }
            Event::End(e) => match (e.local_name().as_ref(), &capture) {
                (b"INFO", Capture::QueryStatus) => {
                    return Some(ArchiveError::new(
                        text.trim(),
                        None,
                        ErrorEnvelope::Votable,
                    ));
                }
                (b"message", Capture::UwsMessage) => {
                    return Some(ArchiveError::new(
                        text.trim(),
                        uws_type,
                        ErrorEnvelope::Uws,
                    ));
                }
                (b"errorSummary", _) => in_error_summary = false,
                _ => {}
            },
            Event::Eof => return None,
            _ => {}
        }
    }
}

/// Render `error` as a document of the given shape.
///
/// The output is what the archive itself would send, and reads back through
/// [`parse_error`] with the matching content type (`text/html`, `text/xml` or `text/plain`).
pub fn serialize_error(error: &ArchiveError, kind: ErrorEnvelope) -> String {
    let message = escape(error.message.as_str());
    match kind {
        ErrorEnvelope::Html => {
            let code = error.code.as_deref().unwrap_or("500");
            format!(
                "<html><head><title>Error {code}</title></head><body>\
                 <h1>Error {code}</h1><ul>\
                 <li><b>Message: </b>{message}</li>\
                 <li><b>Status: </b>{code}</li>\
                 </ul></body></html>"
            )
        }
        ErrorEnvelope::Votable => format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <VOTABLE version=\"1.3\" xmlns=\"http://www.ivoa.net/xml/VOTable/v1.3\">\n\
             <RESOURCE type=\"results\">\n\
             <INFO name=\"QUERY_STATUS\" value=\"ERROR\">{message}</INFO>\n\
             </RESOURCE>\n\
             </VOTABLE>\n"
        ),
        ErrorEnvelope::Uws => {
            let kind = escape(error.code.as_deref().unwrap_or("fatal")).into_owned();
            format!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
                 <uws:job xmlns:uws=\"http://www.ivoa.net/xml/UWS/v1.0\">\n\
                 <uws:phase>ERROR</uws:phase>\n\
                 <uws:errorSummary type=\"{kind}\" hasDetail=\"false\">\
                 <uws:message>{message}</uws:message>\
                 </uws:errorSummary>\n\
                 </uws:job>\n"
            )
        }
        ErrorEnvelope::Raw => error.message.clone(),
    }
}

#[cfg(test)]
mod error_doc_test {
    use super::*;

    const GAIA_HTML: &str = "<html><head><title>Apache Tomcat - Error 500</title></head>\
        <body><h1>Error</h1><ul>\
        <li><b>Message: </b>Cannot parse query &#39;selec * from t&#39; for job &#39;1550&#39;</li>\
        <li><b>Status: </b>500</li>\
        </ul></body></html>";

    #[test]
    fn test_parse_html_error() {
        let err = parse_error(GAIA_HTML.as_bytes(), Some("text/html;charset=UTF-8")).unwrap();
        assert_eq!(
            err.message,
            "Cannot parse query 'selec * from t' for job '1550'"
        );
        assert_eq!(err.code.as_deref(), Some("500"));
        assert_eq!(err.envelope, ErrorEnvelope::Html);
    }

    #[test]
    fn test_html_falls_back_to_title_then_text() {
        let err = parse_error(
            b"<html><head><title>Error 401</title></head><body>nope</body></html>",
            Some("text/html"),
        )
        .unwrap();
        assert_eq!(err.message, "Error 401");
        assert_eq!(err.code.as_deref(), Some("401"));

        let err = parse_error(b"<html><body><p>Service  down</p></body></html>", Some("text/html"))
            .unwrap();
        assert_eq!(err.message, "Service down");
        assert_eq!(err.code, None);
    }

    #[test]
    fn test_parse_votable_error() {
        let doc = r#"<?xml version="1.0"?>
<VOTABLE version="1.3"><RESOURCE type="results">
<INFO name="QUERY_STATUS" value="ERROR">Table gaiadr2.nope does not exist</INFO>
</RESOURCE></VOTABLE>"#;
        let err = parse_error(doc.as_bytes(), Some("application/x-votable+xml")).unwrap();
        assert_eq!(err.message, "Table gaiadr2.nope does not exist");
        assert_eq!(err.envelope, ErrorEnvelope::Votable);
    }

    #[test]
    fn test_parse_uws_error() {
        let doc = r#"<uws:job xmlns:uws="http://www.ivoa.net/xml/UWS/v1.0">
<uws:phase>ERROR</uws:phase>
<uws:errorSummary type="transient" hasDetail="false"><uws:message>Out of memory</uws:message></uws:errorSummary>
</uws:job>"#;
        let err = parse_error(doc.as_bytes(), Some("text/xml")).unwrap();
        assert_eq!(err.message, "Out of memory");
        assert_eq!(err.code.as_deref(), Some("transient"));
        assert_eq!(err.envelope, ErrorEnvelope::Uws);
    }

    #[test]
    fn test_unknown_or_broken_documents_degrade_to_raw() {
        let err = parse_error(b"  gateway exploded \n", None).unwrap();
        assert_eq!(err, ArchiveError::raw("gateway exploded"));

        let err = parse_error(b"<not really xml", Some("text/xml")).unwrap();
        assert_eq!(err.envelope, ErrorEnvelope::Raw);
        assert_eq!(err.message, "<not really xml");
    }

    #[test]
    fn test_empty_document() {
        assert_eq!(
            parse_error(b"   ", Some("text/html")),
            Err(TapError::EmptyErrorDocument)
        );
    }

    #[test]
    fn test_serialize_round_trip() {
        let original = ArchiveError::new(
            "Column <ra> & \"dec\" unknown",
            Some("400".into()),
            ErrorEnvelope::Html,
        );
        for (kind, ct) in [
            (ErrorEnvelope::Html, "text/html"),
            (ErrorEnvelope::Votable, "text/xml"),
            (ErrorEnvelope::Uws, "application/xml"),
            (ErrorEnvelope::Raw, "text/plain"),
        ] {
            let doc = serialize_error(&original, kind);
            let back = parse_error(doc.as_bytes(), Some(ct)).unwrap();
            assert_eq!(back.message, original.message, "envelope {kind:?}");
            assert_eq!(back.envelope, kind);
        }
    }

    #[test]
    fn test_round_trip_keeps_layout_and_empty_messages() {
        for message in ["Syntax error at line 2:\n  SELECT  x\n  FROM", ""] {
            let original = ArchiveError::new(message, Some("400".into()), ErrorEnvelope::Html);
            for (kind, ct) in [
                (ErrorEnvelope::Html, "text/html"),
                (ErrorEnvelope::Votable, "text/xml"),
                (ErrorEnvelope::Uws, "text/xml"),
            ] {
                let doc = serialize_error(&original, kind);
                let back = parse_error(doc.as_bytes(), Some(ct)).unwrap();
                assert_eq!(back.message, message, "envelope {kind:?}");
                assert_eq!(back.envelope, kind);
            }
        }
    }
}
