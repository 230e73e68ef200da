//! UWS (Universal Worker Service) job documents.
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use hifitime::{Epoch, Unit};
use once_cell::sync::Lazy;
use regex::Regex;

use super::{parse_xml_tree, ArchiveError, ErrorEnvelope, XmlNode};
use crate::constants::JobId;
use crate::tap_errors::TapError;

static UTC_OFFSET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*?\d)(Z|([+-])(\d{2}):?(\d{2}))$").unwrap());

/// Phase as reported by the server, before it is folded onto the client-side
/// [`JobPhase`](crate::tap::job::JobPhase).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerPhase {
    Pending,
    Queued,
    Executing,
    Completed,
    Error,
    Aborted,
    Unknown,
    Held,
    Suspended,
    Archived,
}

impl FromStr for ServerPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(ServerPhase::Pending),
            "QUEUED" => Ok(ServerPhase::Queued),
            "EXECUTING" => Ok(ServerPhase::Executing),
            "COMPLETED" => Ok(ServerPhase::Completed),
            "ERROR" => Ok(ServerPhase::Error),
            "ABORTED" => Ok(ServerPhase::Aborted),
            "UNKNOWN" => Ok(ServerPhase::Unknown),
            "HELD" => Ok(ServerPhase::Held),
            "SUSPENDED" => Ok(ServerPhase::Suspended),
            "ARCHIVED" => Ok(ServerPhase::Archived),
            other => Err(format!("unknown job phase `{other}`")),
        }
    }
}

impl fmt::Display for ServerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerPhase::Pending => "PENDING",
            ServerPhase::Queued => "QUEUED",
            ServerPhase::Executing => "EXECUTING",
            ServerPhase::Completed => "COMPLETED",
            ServerPhase::Error => "ERROR",
            ServerPhase::Aborted => "ABORTED",
            ServerPhase::Unknown => "UNKNOWN",
            ServerPhase::Held => "HELD",
            ServerPhase::Suspended => "SUSPENDED",
            ServerPhase::Archived => "ARCHIVED",
        };
        f.write_str(s)
    }
}

/// One `uws:result` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRef {
    pub id: String,
    pub href: String,
}

/// Decoded `uws:job` document.
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatus {
    pub job_id: JobId,
    pub run_id: Option<String>,
    pub owner_id: Option<String>,
    pub phase: ServerPhase,
    pub creation_time: Option<Epoch>,
    pub start_time: Option<Epoch>,
    pub end_time: Option<Epoch>,
    /// `uws:parameter` values keyed by their `id`, lower-cased.
    pub parameters: BTreeMap<String, String>,
    pub results: Vec<ResultRef>,
    pub error: Option<ArchiveError>,
}

impl JobStatus {
    pub fn result_href(&self, id: &str) -> Option<&str> {
        self.results
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.href.as_str())
    }

    /// ADQL text the job was submitted with.
    pub fn query(&self) -> Option<&str> {
        self.parameters.get("query").map(String::as_str)
    }
}

/// Entry of a `uws:jobs` listing.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSummary {
    pub job_id: JobId,
    pub phase: ServerPhase,
    pub href: Option<String>,
    pub run_id: Option<String>,
    pub creation_time: Option<Epoch>,
}

/// Parse a UWS timestamp such as `2019-02-20T12:56:36.769+0100`.
///
/// The offset (`Z`, `±hh:mm`, `±hhmm`) is folded into the epoch, which is returned in UTC.
/// `None` when the text is not a date.
pub(crate) fn parse_uws_time(text: &str) -> Option<Epoch> {
    let text = text.trim();
    let (naive, offset_seconds) = match UTC_OFFSET.captures(text) {
        Some(c) if &c[2] == "Z" => (c[1].to_string(), 0.0),
        Some(c) => {
            let sign = if &c[3] == "-" { -1.0 } else { 1.0 };
            let hours: f64 = c[4].parse().ok()?;
            let minutes: f64 = c[5].parse().ok()?;
            (c[1].to_string(), sign * (hours * 3600.0 + minutes * 60.0))
        }
        None => (text.to_string(), 0.0),
    };
    let local = Epoch::from_str(&naive).ok()?;
    Some(local - Unit::Second * offset_seconds)
}

fn malformed(reason: impl Into<String>, content: &[u8]) -> TapError {
    TapError::malformed_job_status(reason, content)
}

fn parse_phase(node: &XmlNode, content: &[u8]) -> Result<ServerPhase, TapError> {
    node.child_value("phase")
        .ok_or_else(|| malformed("missing phase", content))?
        .parse()
        .map_err(|reason: String| malformed(reason, content))
}

fn error_summary(job: &XmlNode) -> Option<ArchiveError> {
    let summary = job.child("errorSummary")?;
    let message = summary
        .child_value("message")
        .or_else(|| summary.value())
        .unwrap_or("job failed without error message");
    Some(ArchiveError::new(
        message,
        summary.attr("type").map(str::to_string),
        ErrorEnvelope::Uws,
    ))
}

/// Decode a `uws:job` document.
///
/// Errors
/// ----------
/// * [`TapError::MalformedJobStatus`] when the document is not XML, is not a job, or lacks
///   `jobId` or `phase`.
pub fn parse_job_status(content: &[u8]) -> Result<JobStatus, TapError> {
    let job = parse_xml_tree(content).map_err(|reason| malformed(reason, content))?;
    if job.name != "job" {
        return Err(malformed(
            format!("expected a job document, found <{}>", job.name),
            content,
        ));
    }

    let job_id = job
        .child_value("jobId")
        .ok_or_else(|| malformed("missing jobId", content))?
        .to_string();
    let phase = parse_phase(&job, content)?;

    let parameters = job
        .child("parameters")
        .map(|params| {
            params
                .children_named("parameter")
                .filter_map(|p| {
                    let id = p.attr("id")?.to_ascii_lowercase();
                    Some((id, p.value().unwrap_or_default().to_string()))
                })
                .collect()
        })
        .unwrap_or_default();

    let results = job
        .child("results")
        .map(|results| {
            results
                .children_named("result")
                .filter_map(|r| {
                    Some(ResultRef {
                        id: r.attr("id")?.to_string(),
                        href: r.attr("href")?.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let time = |name: &str| job.child_value(name).and_then(parse_uws_time);

    Ok(JobStatus {
        job_id,
        run_id: job.child_value("runId").map(str::to_string),
        owner_id: job.child_value("ownerId").map(str::to_string),
        phase,
        creation_time: time("creationTime"),
        start_time: time("startTime"),
        end_time: time("endTime"),
        parameters,
        results,
        error: error_summary(&job),
    })
}

/// Decode a `uws:jobs` listing.
pub fn parse_job_list(content: &[u8]) -> Result<Vec<JobSummary>, TapError> {
    let jobs = parse_xml_tree(content).map_err(|reason| malformed(reason, content))?;
    if jobs.name != "jobs" {
        return Err(malformed(
            format!("expected a job list, found <{}>", jobs.name),
            content,
        ));
    }

    jobs.children_named("jobref")
        .map(|jobref| {
            let job_id = jobref
                .attr("id")
                .ok_or_else(|| malformed("jobref without id", content))?
                .to_string();
            Ok(JobSummary {
                job_id,
                phase: parse_phase(jobref, content)?,
                href: jobref.attr("href").map(str::to_string),
                run_id: jobref.child_value("runId").map(str::to_string),
                creation_time: jobref
                    .child_value("creationTime")
                    .and_then(parse_uws_time),
            })
        })
        .collect()
}

#[cfg(test)]
mod uws_test {
    use super::*;

    const COMPLETED_JOB: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<uws:job xmlns:uws="http://www.ivoa.net/xml/UWS/v1.0" xmlns:xlink="http://www.w3.org/1999/xlink" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <uws:jobId><![CDATA[1550663796751O]]></uws:jobId>
  <uws:runId xsi:nil="true"/>
  <uws:ownerId><![CDATA[anonymous]]></uws:ownerId>
  <uws:phase>COMPLETED</uws:phase>
  <uws:quote xsi:nil="true"/>
  <uws:startTime>2019-02-20T12:56:36.769+0100</uws:startTime>
  <uws:endTime>2019-02-20T12:56:37.323+0100</uws:endTime>
  <uws:executionDuration>0</uws:executionDuration>
  <uws:parameters>
    <uws:parameter id="QUERY"><![CDATA[SELECT TOP 5 * FROM gaiadr2.gaia_source]]></uws:parameter>
    <uws:parameter id="format">votable</uws:parameter>
  </uws:parameters>
  <uws:results>
    <uws:result id="result" xlink:type="simple" xlink:href="http://gea.esac.esa.int/tap-server/tap/async/1550663796751O/results/result" mime="text/xml"/>
  </uws:results>
</uws:job>"#;

    #[test]
    fn test_parse_completed_job() {
        let status = parse_job_status(COMPLETED_JOB.as_bytes()).unwrap();
        assert_eq!(status.job_id, "1550663796751O");
        assert_eq!(status.phase, ServerPhase::Completed);
        assert_eq!(status.owner_id.as_deref(), Some("anonymous"));
        assert_eq!(status.run_id, None);
        assert_eq!(
            status.query(),
            Some("SELECT TOP 5 * FROM gaiadr2.gaia_source")
        );
        assert_eq!(
            status.result_href("result"),
            Some("http://gea.esac.esa.int/tap-server/tap/async/1550663796751O/results/result")
        );
        assert!(status.error.is_none());

        let start = status.start_time.unwrap();
        let end = status.end_time.unwrap();
        assert!(end > start);
        assert_eq!(start, Epoch::from_str("2019-02-20T11:56:36.769").unwrap());
    }

    #[test]
    fn test_parse_error_job() {
        let doc = r#"<uws:job xmlns:uws="http://www.ivoa.net/xml/UWS/v1.0">
<uws:jobId>42</uws:jobId><uws:phase>ERROR</uws:phase>
<uws:errorSummary type="fatal" hasDetail="true"><uws:message>Query timed out</uws:message></uws:errorSummary>
</uws:job>"#;
        let status = parse_job_status(doc.as_bytes()).unwrap();
        assert_eq!(status.phase, ServerPhase::Error);
        assert_eq!(
            status.error,
            Some(ArchiveError::new(
                "Query timed out",
                Some("fatal".into()),
                ErrorEnvelope::Uws
            ))
        );
    }

    #[test]
    fn test_missing_phase() {
        let doc = r#"<uws:job xmlns:uws="http://www.ivoa.net/xml/UWS/v1.0"><uws:jobId>42</uws:jobId></uws:job>"#;
        assert_eq!(
            parse_job_status(doc.as_bytes()),
            Err(TapError::malformed_job_status("missing phase", b""))
        );
        assert!(matches!(
            parse_job_status(b"<html>oops</html>"),
            Err(TapError::MalformedJobStatus { .. })
        ));
    }

    #[test]
    fn test_parse_job_list() {
        let doc = r#"<?xml version="1.0"?>
<uws:jobs xmlns:uws="http://www.ivoa.net/xml/UWS/v1.0" xmlns:xlink="http://www.w3.org/1999/xlink">
  <uws:jobref id="1" xlink:href="http://host/tap/async/1"><uws:phase>EXECUTING</uws:phase><uws:creationTime>2024-05-01T10:00:00Z</uws:creationTime></uws:jobref>
  <uws:jobref id="2"><uws:phase>HELD</uws:phase></uws:jobref>
</uws:jobs>"#;
        let jobs = parse_job_list(doc.as_bytes()).unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].job_id, "1");
        assert_eq!(jobs[0].phase, ServerPhase::Executing);
        assert_eq!(jobs[0].href.as_deref(), Some("http://host/tap/async/1"));
        assert!(jobs[0].creation_time.is_some());
        assert_eq!(jobs[1].phase, ServerPhase::Held);
        assert_eq!(jobs[1].href, None);
    }

    #[test]
    fn test_uws_time_offsets() {
        let utc = parse_uws_time("2024-05-01T10:00:00Z").unwrap();
        assert_eq!(parse_uws_time("2024-05-01T12:00:00+02:00"), Some(utc));
        assert_eq!(parse_uws_time("2024-05-01T05:30:00-0430"), Some(utc));
        assert_eq!(parse_uws_time("yesterday"), None);
    }
}
