//! # Archive session
//!
//! [`ArchiveSession`] owns the authentication state of one connection to a TAP+ archive and
//! issues every HTTP request made on its behalf.
//!
//! ## Authentication
//!
//! The archive authenticates with a form login (`POST {server}/login`, fields `username` and
//! `password`) answered by session cookies. The session keeps the `name=value` part of each
//! `Set-Cookie` header and sends them back on every later request. Only
//! [`login`](ArchiveSession::login) and [`logout`](ArchiveSession::logout) mutate this state;
//! both take `&mut self`, so the borrow checker rules out a login racing a request made
//! through the same session.
//!
//! ## Errors
//!
//! A response outside `2xx`/`3xx` becomes [`TapError::Http`], its body decoded with
//! [`parse_error`]. Transport failures are [`TapError::Network`] or [`TapError::Timeout`]. No
//! request is retried.
use std::fmt;
use std::sync::Arc;

use camino::Utf8Path;
use tracing::{debug, info, warn};

use crate::config::TapConfig;
use crate::env_state::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, RequestBody, TapEnv};
use crate::tap::endpoint::TapEndpoint;
use crate::tap::response::{parse_error, ArchiveError};
use crate::tap::upload::MultipartForm;
use crate::tap_errors::TapError;

/// User name and password for the archive login.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Read credentials from a file: user name on the first line, password on the second.
    ///
    /// Errors
    /// ----------
    /// * [`TapError::Io`] if the file cannot be read.
    /// * [`TapError::Authentication`] if either line is missing or blank.
    pub fn from_file(path: &Utf8Path) -> Result<Self, TapError> {
        let content = std::fs::read_to_string(path)?;
        let mut lines = content.lines().map(str::trim);
        let user = lines.next().filter(|l| !l.is_empty());
        let password = lines.next().filter(|l| !l.is_empty());
        match (user, password) {
            (Some(user), Some(password)) => Ok(Credentials::new(user, password)),
            _ => Err(TapError::Authentication(format!(
                "credentials file {path} must hold the user name and the password on two lines"
            ))),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Authentication state plus the request path to one archive.
///
/// Not internally synchronized: share it across threads only behind external locking.
pub struct ArchiveSession {
    endpoint: TapEndpoint,
    transport: Arc<dyn HttpTransport>,
    config: TapConfig,
    user: Option<String>,
    cookies: Vec<(String, String)>,
}

impl ArchiveSession {
    pub fn new(endpoint: TapEndpoint, transport: Arc<dyn HttpTransport>, config: TapConfig) -> Self {
        ArchiveSession {
            endpoint,
            transport,
            config,
            user: None,
            cookies: Vec::new(),
        }
    }

    /// Session over the production [`TapEnv`] transport.
    pub fn with_default_transport(endpoint: TapEndpoint, config: TapConfig) -> Self {
        let transport = Arc::new(TapEnv::new(&config));
        Self::new(endpoint, transport, config)
    }

    pub fn endpoint(&self) -> &TapEndpoint {
        &self.endpoint
    }

    pub fn config(&self) -> &TapConfig {
        &self.config
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    /// Name of the logged-in user.
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Fail with [`TapError::Authentication`] unless logged in.
    pub fn require_authenticated(&self, operation: &str) -> Result<(), TapError> {
        if self.is_authenticated() {
            Ok(())
        } else {
            Err(TapError::Authentication(format!(
                "`{operation}` requires a logged-in session"
            )))
        }
    }

    /// Log in, replacing any previous credentials once the archive accepts the new ones.
    ///
    /// Errors
    /// ----------
    /// * [`TapError::Authentication`] when the archive rejects the credentials or cannot be
    ///   reached. A previous login, if any, stays in place.
    pub fn login(&mut self, credentials: &Credentials) -> Result<(), TapError> {
        if let Some(previous) = &self.user {
            debug!(user = %previous, "refreshing login");
        }

        let url = self.endpoint.server_url("login");
        let request = HttpRequest {
            method: HttpMethod::Post,
            url,
            query: Vec::new(),
            headers: Vec::new(),
            body: RequestBody::Form(vec![
                ("username".into(), credentials.user.clone()),
                ("password".into(), credentials.password.clone()),
            ]),
        };
        let response = self
            .transport
            .execute(&request)
            .map_err(|e| TapError::Authentication(format!("login request failed: {e}")))?;

        if !(response.is_success() || response.is_redirect()) {
            let reason = parse_error(&response.body, response.content_type.as_deref())
                .map(|e| e.message)
                .unwrap_or_else(|_| "credentials rejected".to_string());
            warn!(user = %credentials.user, status = response.status, "login rejected");
            return Err(TapError::Authentication(format!(
                "HTTP {}: {reason}",
                response.status
            )));
        }

        self.cookies = response
            .set_cookies
            .iter()
            .filter_map(|c| {
                let pair = c.split(';').next()?.trim();
                let (name, value) = pair.split_once('=')?;
                Some((name.trim().to_string(), value.trim().to_string()))
            })
            .collect();
        self.user = Some(credentials.user.clone());
        info!(user = %credentials.user, host = %self.endpoint.host, "logged in");
        Ok(())
    }

    /// Read credentials from `path` (see [`Credentials::from_file`]) and log in.
    pub fn login_with_file(&mut self, path: &Utf8Path) -> Result<(), TapError> {
        let credentials = Credentials::from_file(path)?;
        self.login(&credentials)
    }

    /// Log out and forget the credentials. A failed logout request is logged, not returned.
    pub fn logout(&mut self) {
        let Some(user) = self.user.take() else {
            debug!("logout on an anonymous session");
            return;
        };
        let request = self.build(
            HttpMethod::Post,
            self.endpoint.server_url("logout"),
            Vec::new(),
            RequestBody::Empty,
        );
        match self.transport.execute(&request) {
            Ok(r) if r.is_success() || r.is_redirect() => {}
            Ok(r) => warn!(user = %user, status = r.status, "logout rejected by the archive"),
            Err(e) => warn!(user = %user, error = %e, "logout request failed"),
        }
        self.cookies.clear();
        info!(user = %user, "logged out");
    }

    fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    fn build(
        &self,
        method: HttpMethod,
        url: String,
        query: Vec<(String, String)>,
        body: RequestBody,
    ) -> HttpRequest {
        let headers = self
            .cookie_header()
            .map(|c| vec![("Cookie".to_string(), c)])
            .unwrap_or_default();
        HttpRequest {
            method,
            url,
            query,
            headers,
            body,
        }
    }

    fn send(&self, request: HttpRequest) -> Result<HttpResponse, TapError> {
        let response = self.transport.execute(&request)?;
        if response.is_success() || response.is_redirect() {
            return Ok(response);
        }
        let error = parse_error(&response.body, response.content_type.as_deref())
            .unwrap_or_else(|_| ArchiveError::raw(format!("HTTP {}", response.status)));
        debug!(status = response.status, url = %request.url, error = %error, "archive error");
        Err(TapError::Http {
            status: response.status,
            error,
        })
    }

    /// Issue one request: GET with `params` in the query string, POST with `params` as a
    /// form body.
    pub fn request(
        &self,
        url: &str,
        params: &[(&str, &str)],
        method: HttpMethod,
    ) -> Result<HttpResponse, TapError> {
        let params: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let request = match method {
            HttpMethod::Get => self.build(method, url.to_string(), params, RequestBody::Empty),
            HttpMethod::Post => {
                self.build(method, url.to_string(), Vec::new(), RequestBody::Form(params))
            }
        };
        self.send(request)
    }

    /// POST a multipart body.
    pub fn request_multipart(&self, url: &str, form: MultipartForm) -> Result<HttpResponse, TapError> {
        let request = self.build(HttpMethod::Post, url.to_string(), Vec::new(), form.into_body());
        self.send(request)
    }
}

impl fmt::Debug for ArchiveSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveSession")
            .field("endpoint", &self.endpoint)
            .field("user", &self.user)
            .field("cookies", &self.cookies.len())
            .finish()
    }
}
