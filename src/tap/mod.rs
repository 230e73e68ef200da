//! # TAP+ archive access
//!
//! This module groups everything needed to talk to a TAP+ archive (the Table Access
//! Protocol extended with job and session management, as served by the ESA Gaia archive):
//!
//! 1. [`endpoint`] – where the service lives (`TapEndpoint::from_url`).
//! 2. [`session`] – authentication state and the single request path every call takes.
//! 3. [`response`] – decoding of tabular payloads, UWS job documents, table sets and
//!    HTML/XML error documents.
//! 4. [`job`] – the query job state machine (`PENDING → EXECUTING → COMPLETED | ERROR | ABORTED`).
//! 5. [`client`] – the [`ArchiveClient`](crate::tap::client::ArchiveClient) façade: queries,
//!    job listing, table upload/inspection/deletion.
//! 6. [`upload`] – VOTable serialization and multipart encoding for user tables.
//!
//! ## Request flow
//!
//! ```text
//! ArchiveClient::query ─► Job::submit ─► ArchiveSession::request ─► HttpTransport
//!                              │                                          │
//!                              ▼                                          ▼
//!                  Job::wait / Job::poll ◄──── response::parse_job_status ◄┘
//!                              │
//!                              ▼
//!                    Job::fetch_result ─► response::parse_table ─► Table
//! ```
//!
//! ## Threading
//!
//! Nothing in this module is internally synchronized. A [`Job`](crate::tap::job::Job) and the
//! [`ArchiveSession`](crate::tap::session::ArchiveSession) it polls are meant to be driven from
//! one thread; callers sharing a client across threads must serialize access themselves, and
//! must not log in or out while a request using the session is in flight.
use std::fmt;
use std::str::FromStr;

use crate::tap_errors::TapError;

pub mod client;
pub mod endpoint;
pub mod job;
pub mod response;
pub mod session;
pub mod upload;

/// Result formats understood by the archive (`FORMAT` request parameter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    /// FITS binary table
    Fits,
    Csv,
    Json,
    /// VOTable with a `TABLEDATA` serialization
    VotablePlain,
    /// VOTable with a base64 `BINARY`/`BINARY2` serialization
    Votable,
}

impl OutputFormat {
    /// Value of the `FORMAT` request parameter.
    pub fn as_param(&self) -> &'static str {
        match self {
            OutputFormat::Fits => "fits",
            OutputFormat::Csv => "csv",
            OutputFormat::Json => "json",
            OutputFormat::VotablePlain => "votable_plain",
            OutputFormat::Votable => "votable",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_param())
    }
}

impl FromStr for OutputFormat {
    type Err = TapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fits" => Ok(OutputFormat::Fits),
            "csv" => Ok(OutputFormat::Csv),
            "json" => Ok(OutputFormat::Json),
            "votable_plain" => Ok(OutputFormat::VotablePlain),
            "votable" => Ok(OutputFormat::Votable),
            _ => Err(TapError::InvalidConfig(format!(
                "unknown output format `{s}`"
            ))),
        }
    }
}

impl TryFrom<&str> for OutputFormat {
    type Error = TapError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tap_mod_test {
    use super::*;

    #[test]
    fn test_output_format_parse() {
        assert_eq!("CSV".parse::<OutputFormat>().unwrap(), OutputFormat::Csv);
        assert_eq!(
            OutputFormat::try_from("votable_plain").unwrap(),
            OutputFormat::VotablePlain
        );
        assert!("xlsx".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::Fits.to_string(), "fits");
    }
}
