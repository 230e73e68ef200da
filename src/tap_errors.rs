use std::time::Duration;

use thiserror::Error;

use crate::tap::job::JobPhase;
use crate::tap::response::ArchiveError;

/// Maximum number of raw-body bytes kept as context in parsing errors.
const RAW_CONTEXT_LEN: usize = 512;

#[derive(Error, Debug)]
pub enum TapError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error {status}: {error}")]
    Http { status: u16, error: ArchiveError },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Malformed table ({reason}); raw body starts with: {raw}")]
    MalformedTable { reason: String, raw: String },

    #[error("Malformed job status ({reason}); raw body starts with: {raw}")]
    MalformedJobStatus { reason: String, raw: String },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Operation `{operation}` is not valid for a job in phase {phase}")]
    IllegalState {
        operation: &'static str,
        phase: JobPhase,
    },

    #[error("Missing column: {0}")]
    MissingColumn(String),

    #[error("Confirmation required: {0}")]
    ConfirmationRequired(String),

    #[error("Empty error document")]
    EmptyErrorDocument,

    #[error("Job {job_id} failed: {error}")]
    JobFailed { job_id: String, error: ArchiveError },

    #[error("Archive reported an error: {0}")]
    ArchiveReported(ArchiveError),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Unknown derived quantity: {0}")]
    UnknownQuantity(String),

    #[error("Invalid covariance matrix: {0}")]
    InvalidCovariance(String),

    #[error("Unable to perform file operation: {0}")]
    Io(#[from] std::io::Error),
}

impl TapError {
    pub(crate) fn malformed_table(reason: impl Into<String>, raw: &[u8]) -> Self {
        TapError::MalformedTable {
            reason: reason.into(),
            raw: raw_excerpt(raw),
        }
    }

    pub(crate) fn malformed_job_status(reason: impl Into<String>, raw: &[u8]) -> Self {
        TapError::MalformedJobStatus {
            reason: reason.into(),
            raw: raw_excerpt(raw),
        }
    }

    /// Whether re-issuing the same call may succeed.
    ///
    /// Transport failures and wait timeouts are retryable; every other variant
    /// describes a condition that repeating the call does not change.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TapError::Network(_) | TapError::Timeout(_))
    }
}

fn raw_excerpt(raw: &[u8]) -> String {
    let end = raw.len().min(RAW_CONTEXT_LEN);
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

impl PartialEq for TapError {
    fn eq(&self, other: &Self) -> bool {
        use TapError::*;
        match (self, other) {
            (Network(a), Network(b)) => a == b,
            (Http { status: s1, error: e1 }, Http { status: s2, error: e2 }) => {
                s1 == s2 && e1 == e2
            }
            (Authentication(a), Authentication(b)) => a == b,
            (
                MalformedTable { reason: a, .. },
                MalformedTable { reason: b, .. },
            ) => a == b,
            (
                MalformedJobStatus { reason: a, .. },
                MalformedJobStatus { reason: b, .. },
            ) => a == b,
            (Timeout(a), Timeout(b)) => a == b,
            (
                IllegalState {
                    operation: o1,
                    phase: p1,
                },
                IllegalState {
                    operation: o2,
                    phase: p2,
                },
            ) => o1 == o2 && p1 == p2,
            (MissingColumn(a), MissingColumn(b)) => a == b,
            (ConfirmationRequired(a), ConfirmationRequired(b)) => a == b,
            (
                JobFailed {
                    job_id: j1,
                    error: e1,
                },
                JobFailed {
                    job_id: j2,
                    error: e2,
                },
            ) => j1 == j2 && e1 == e2,
            (ArchiveReported(a), ArchiveReported(b)) => a == b,
            (InvalidUrl(a), InvalidUrl(b)) => a == b,
            (InvalidConfig(a), InvalidConfig(b)) => a == b,
            (TableNotFound(a), TableNotFound(b)) => a == b,
            (UnknownQuantity(a), UnknownQuantity(b)) => a == b,
            (InvalidCovariance(a), InvalidCovariance(b)) => a == b,

            // io::Error is not comparable: equal if same variant
            (Io(_), Io(_)) => true,

            (EmptyErrorDocument, EmptyErrorDocument) => true,

            _ => false,
        }
    }
}
