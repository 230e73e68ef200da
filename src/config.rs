//! # Client configuration
//!
//! This module defines [`TapConfig`](crate::config::TapConfig) and its validating builder.
//! It centralizes the tunables shared by the HTTP transport, the session and the job
//! polling loop:
//!
//! - **Transport**: the global HTTP timeout of one request and the `User-Agent` header.
//! - **Polling**: the interval between two job status checks and the maximum time
//!   [`ArchiveClient::query`](crate::tap::client::ArchiveClient::query) waits for an
//!   asynchronous job before giving up with [`TapError::Timeout`](crate::tap_errors::TapError::Timeout).
//! - **Payloads**: the default output format requested from the archive and the
//!   boundary prefix of multipart uploads.
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use astrotap::config::TapConfig;
//! use astrotap::tap::OutputFormat;
//!
//! let config = TapConfig::builder()
//!     .poll_interval(Duration::from_millis(500))
//!     .max_wait(Duration::from_secs(120))
//!     .output_format(OutputFormat::Csv)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(config.output_format, OutputFormat::Csv);
//! ```
use std::fmt;
use std::time::Duration;

use crate::tap::OutputFormat;
use crate::tap_errors::TapError;

/// Configuration of an [`ArchiveClient`](crate::tap::client::ArchiveClient).
///
/// Defaults
/// -----------------
/// * `http_timeout`: 60 s
/// * `poll_interval`: 1 s
/// * `max_wait`: 600 s
/// * `output_format`: [`OutputFormat::Votable`]
/// * `user_agent`: `astrotap/<crate version>`
/// * `multipart_boundary`: `astrotap-boundary`
///
/// Notes & Validation
/// -----------------
/// * `http_timeout > 0`, `poll_interval > 0`.
/// * `max_wait` may be zero: the first status check that finds a non-terminal job then
///   times out immediately.
/// * `user_agent` and `multipart_boundary` must be non-empty; the boundary must be ASCII
///   alphanumeric, `-` or `_`.
#[derive(Debug, Clone, PartialEq)]
pub struct TapConfig {
    pub http_timeout: Duration,
    pub poll_interval: Duration,
    pub max_wait: Duration,
    pub output_format: OutputFormat,
    pub user_agent: String,
    pub multipart_boundary: String,
}

impl TapConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new [`TapConfigBuilder`] initialized with the default values.
    pub fn builder() -> TapConfigBuilder {
        TapConfigBuilder::new()
    }
}

impl Default for TapConfig {
    fn default() -> Self {
        TapConfig {
            http_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
            max_wait: Duration::from_secs(600),
            output_format: OutputFormat::Votable,
            user_agent: concat!("astrotap/", env!("CARGO_PKG_VERSION")).to_string(),
            multipart_boundary: "astrotap-boundary".to_string(),
        }
    }
}

/// Builder for [`TapConfig`], with validation.
#[derive(Debug, Clone)]
pub struct TapConfigBuilder {
    config: TapConfig,
}

impl Default for TapConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TapConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: TapConfig::default(),
        }
    }

    pub fn http_timeout(mut self, v: Duration) -> Self {
        self.config.http_timeout = v;
        self
    }
    pub fn poll_interval(mut self, v: Duration) -> Self {
        self.config.poll_interval = v;
        self
    }
    pub fn max_wait(mut self, v: Duration) -> Self {
        self.config.max_wait = v;
        self
    }
    pub fn output_format(mut self, v: OutputFormat) -> Self {
        self.config.output_format = v;
        self
    }
    pub fn user_agent(mut self, v: impl Into<String>) -> Self {
        self.config.user_agent = v.into();
        self
    }
    pub fn multipart_boundary(mut self, v: impl Into<String>) -> Self {
        self.config.multipart_boundary = v.into();
        self
    }

    /// Finalize the builder.
    ///
    /// Returns
    /// -----------------
    /// * `Ok(TapConfig)` when every rule listed on [`TapConfig`] holds.
    /// * `Err(TapError::InvalidConfig)` naming the first violated rule otherwise.
    pub fn build(self) -> Result<TapConfig, TapError> {
        let c = &self.config;

        if c.http_timeout.is_zero() {
            return Err(TapError::InvalidConfig("http_timeout must be > 0".into()));
        }
        if c.poll_interval.is_zero() {
            return Err(TapError::InvalidConfig("poll_interval must be > 0".into()));
        }
        if c.user_agent.trim().is_empty() {
            return Err(TapError::InvalidConfig("user_agent must not be empty".into()));
        }
        let boundary_ok = !c.multipart_boundary.is_empty()
            && c
                .multipart_boundary
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
        if !boundary_ok {
            return Err(TapError::InvalidConfig(
                "multipart_boundary must be non-empty ASCII alphanumeric, '-' or '_'".into(),
            ));
        }

        Ok(self.config)
    }
}

impl fmt::Display for TapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            const PARAM_COL: usize = 40;
            writeln!(f, "TAP client configuration")?;
            writeln!(f, "------------------------")?;

            macro_rules! line {
                ($fmt:expr, $val:expr, $comment:expr) => {{
                    let s = format!($fmt, $val);
                    let pad = if s.len() < PARAM_COL {
                        " ".repeat(PARAM_COL - s.len())
                    } else {
                        " ".to_string()
                    };
                    writeln!(f, "  {}{}# {}", s, pad, $comment)
                }};
            }

            line!("http_timeout  = {:?}", self.http_timeout, "Timeout of one HTTP request")?;
            line!("poll_interval = {:?}", self.poll_interval, "Sleep between job status checks")?;
            line!("max_wait      = {:?}", self.max_wait, "Give up waiting for a job after")?;
            line!("output_format = {}", self.output_format, "Default result format")?;
            line!("user_agent    = {}", self.user_agent, "User-Agent header")?;
            line!(
                "boundary      = {}",
                self.multipart_boundary,
                "Multipart boundary prefix"
            )?;
            Ok(())
        } else {
            write!(
                f,
                "TapConfig(http_timeout={:?}, poll_interval={:?}, max_wait={:?}, format={})",
                self.http_timeout, self.poll_interval, self.max_wait, self.output_format
            )
        }
    }
}
