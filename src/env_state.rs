//! # HTTP environment
//!
//! This module defines the transport seam of the crate:
//!
//! - [`HttpTransport`](crate::env_state::HttpTransport), the one trait every request to the
//!   archive goes through. [`ArchiveSession`](crate::tap::session::ArchiveSession) only
//!   knows this trait, which lets tests script the archive with an in-memory transport.
//! - [`TapEnv`](crate::env_state::TapEnv), the production implementation, wrapping a
//!   persistent [`ureq::Agent`] configured from [`TapConfig`](crate::config::TapConfig).
//!
//! ## Structure
//!
//! ```text
//! TapEnv
//! ├── http_client (ureq::Agent, global timeout, redirects disabled)
//! └── user_agent  (User-Agent header sent with every request)
//! ```
//!
//! Redirects are **not** followed: an asynchronous TAP submission answers `303 See Other`
//! and the job identifier lives in the `Location` header of that very response.
//!
//! HTTP status codes are never turned into transport errors here; the session decides
//! what a non-2xx response means.
use std::fmt::Debug;

use tracing::debug;
use ureq::Agent;

use crate::config::TapConfig;
use crate::tap_errors::TapError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Body of an outgoing request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    /// `application/x-www-form-urlencoded` fields.
    Form(Vec<(String, String)>),
    /// Pre-encoded `multipart/form-data` payload.
    Multipart { boundary: String, bytes: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    /// Query-string parameters (GET requests).
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl HttpRequest {
    /// Value of form field or query parameter `key`, whichever carries it.
    pub fn param(&self, key: &str) -> Option<&str> {
        let in_query = self.query.iter().find(|(k, _)| k == key);
        let in_form = match &self.body {
            RequestBody::Form(fields) => fields.iter().find(|(k, _)| k == key),
            _ => None,
        };
        in_query.or(in_form).map(|(_, v)| v.as_str())
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub location: Option<String>,
    /// Raw `Set-Cookie` header values, in order.
    pub set_cookies: Vec<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Executes one HTTP exchange.
///
/// Implementations must return `Ok` for every response the server sent, whatever its
/// status code, and reserve `Err` for transport failures ([`TapError::Network`]) and
/// timeouts ([`TapError::Timeout`]).
pub trait HttpTransport: Debug + Send + Sync {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TapError>;
}

/// Production transport backed by a persistent [`ureq::Agent`].
#[derive(Debug, Clone)]
pub struct TapEnv {
    pub http_client: Agent,
    config: TapConfig,
}

impl Default for TapEnv {
    fn default() -> Self {
        Self::new(&TapConfig::default())
    }
}

impl TapEnv {
    /// Create the HTTP agent from the transport part of `config`.
    pub fn new(config: &TapConfig) -> Self {
        let agent_config = Agent::config_builder()
            .timeout_global(Some(config.http_timeout))
            .http_status_as_error(false)
            .max_redirects(0)
            .build();
        let agent: Agent = agent_config.into();

        TapEnv {
            http_client: agent,
            config: config.clone(),
        }
    }

    fn map_error(&self, err: ureq::Error) -> TapError {
        match err {
            ureq::Error::Timeout(_) => TapError::Timeout(self.config.http_timeout),
            other => TapError::Network(other.to_string()),
        }
    }
}

impl HttpTransport for TapEnv {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TapError> {
        debug!(method = ?request.method, url = %request.url, "HTTP request");

        let response = match (&request.method, &request.body) {
            (HttpMethod::Get, _) => {
                let mut builder = self
                    .http_client
                    .get(&request.url)
                    .header("User-Agent", &self.config.user_agent);
                for (k, v) in &request.headers {
                    builder = builder.header(k, v);
                }
                for (k, v) in &request.query {
                    builder = builder.query(k, v);
                }
                builder.call()
            }
            (HttpMethod::Post, body) => {
                let mut builder = self
                    .http_client
                    .post(&request.url)
                    .header("User-Agent", &self.config.user_agent);
                for (k, v) in &request.headers {
                    builder = builder.header(k, v);
                }
                for (k, v) in &request.query {
                    builder = builder.query(k, v);
                }
                match body {
                    RequestBody::Empty => builder.send_empty(),
                    RequestBody::Form(fields) => builder.send_form(
                        fields.iter().map(|(k, v)| (k.as_str(), v.as_str())),
                    ),
                    RequestBody::Multipart { boundary, bytes } => builder
                        .header(
                            "Content-Type",
                            format!("multipart/form-data; boundary={boundary}"),
                        )
                        .send(&bytes[..]),
                }
            }
        };

        let mut response = response.map_err(|e| self.map_error(e))?;

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let status = response.status().as_u16();
        let content_type = header("content-type");
        let location = header("location");
        let set_cookies = response
            .headers()
            .get_all("set-cookie")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect();

        let body = response
            .body_mut()
            .with_config()
            .limit(u64::MAX)
            .read_to_vec()
            .map_err(|e| self.map_error(e))?;

        debug!(status, bytes = body.len(), "HTTP response");

        Ok(HttpResponse {
            status,
            content_type,
            location,
            set_cookies,
            body,
        })
    }
}

#[cfg(test)]
mod env_state_test {
    use super::*;

    #[test]
    fn test_request_param_lookup() {
        let req = HttpRequest {
            method: HttpMethod::Post,
            url: "http://localhost/tap/sync".into(),
            query: vec![("MAXREC".into(), "10".into())],
            headers: vec![("Cookie".into(), "JSESSIONID=abc".into())],
            body: RequestBody::Form(vec![("QUERY".into(), "select 1".into())]),
        };
        assert_eq!(req.param("QUERY"), Some("select 1"));
        assert_eq!(req.param("MAXREC"), Some("10"));
        assert_eq!(req.param("FORMAT"), None);
        assert_eq!(req.header("cookie"), Some("JSESSIONID=abc"));
    }

    #[test]
    fn test_response_classes() {
        let ok = HttpResponse {
            status: 200,
            ..Default::default()
        };
        let see_other = HttpResponse {
            status: 303,
            ..Default::default()
        };
        assert!(ok.is_success() && !ok.is_redirect());
        assert!(see_other.is_redirect() && !see_other.is_success());
    }
}
