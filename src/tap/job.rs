//! # Query jobs
//!
//! A [`Job`] follows one ADQL query from submission to result:
//!
//! ```text
//!            submit                    poll / wait
//! PENDING ───────────► EXECUTING ─────────────────┬──► COMPLETED  (result table, fetched once)
//!    │                     │                      ├──► ERROR      (archive error detail)
//!    │ sync submit         │ abort                └──► ABORTED
//!    └──► COMPLETED/ERROR  └──► ABORTED
//! ```
//!
//! The phase and its payload are one enum, so a result exists exactly when the job is
//! `COMPLETED` and an error detail exactly when it is `ERROR`. Transitions only move
//! forward; a server report that would move a job backwards is ignored with a warning, and
//! a terminal job never changes again.
//!
//! Synchronous queries complete within [`Job::submit`]. Asynchronous ones are driven by
//! [`Job::poll`] (one status request) or [`Job::wait`] (poll until terminal or timeout).
//!
//! A job is not internally synchronized and is meant to be driven from one thread.
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use camino::Utf8Path;
use hifitime::Epoch;
use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::constants::JobId;
use crate::env_state::{HttpMethod, HttpResponse};
use crate::table::Table;
use crate::tap::response::{
    parse_job_status, parse_table, ArchiveError, JobStatus, ServerPhase,
};
use crate::tap::session::ArchiveSession;
use crate::tap::upload::{table_to_votable, MultipartForm};
use crate::tap::OutputFormat;
use crate::tap_errors::TapError;

static SYNC_JOB_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Client-side job phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobPhase {
    Pending,
    Executing,
    Completed,
    Error,
    Aborted,
}

impl JobPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobPhase::Completed | JobPhase::Error | JobPhase::Aborted
        )
    }

    fn rank(&self) -> u8 {
        match self {
            JobPhase::Pending => 0,
            JobPhase::Executing => 1,
            JobPhase::Completed | JobPhase::Error | JobPhase::Aborted => 2,
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobPhase::Pending => "PENDING",
            JobPhase::Executing => "EXECUTING",
            JobPhase::Completed => "COMPLETED",
            JobPhase::Error => "ERROR",
            JobPhase::Aborted => "ABORTED",
        };
        f.write_str(s)
    }
}

/// Fold a server phase onto the client phases; `None` for `UNKNOWN`.
pub(crate) fn fold_server_phase(phase: ServerPhase) -> Option<JobPhase> {
    match phase {
        ServerPhase::Pending | ServerPhase::Queued | ServerPhase::Held => Some(JobPhase::Pending),
        ServerPhase::Executing | ServerPhase::Suspended => Some(JobPhase::Executing),
        ServerPhase::Completed => Some(JobPhase::Completed),
        ServerPhase::Error | ServerPhase::Archived => Some(JobPhase::Error),
        ServerPhase::Aborted => Some(JobPhase::Aborted),
        ServerPhase::Unknown => None,
    }
}

/// User table joined to a query through `UPLOAD=name,param:name`.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadSpec {
    pub table_name: String,
    pub table: Table,
}

/// Submission parameters of a query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub query: String,
    pub output_format: OutputFormat,
    pub asynchronous: bool,
    pub job_name: Option<String>,
    pub upload: Option<UploadSpec>,
    pub max_rows: Option<u64>,
}

impl QueryRequest {
    /// Synchronous VOTable query.
    pub fn new(query: impl Into<String>) -> Self {
        QueryRequest {
            query: query.into(),
            output_format: OutputFormat::Votable,
            asynchronous: false,
            job_name: None,
            upload: None,
            max_rows: None,
        }
    }

    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    pub fn asynchronous(mut self, asynchronous: bool) -> Self {
        self.asynchronous = asynchronous;
        self
    }

    pub fn job_name(mut self, name: impl Into<String>) -> Self {
        self.job_name = Some(name.into());
        self
    }

    pub fn upload(mut self, table_name: impl Into<String>, table: Table) -> Self {
        self.upload = Some(UploadSpec {
            table_name: table_name.into(),
            table,
        });
        self
    }

    pub fn max_rows(mut self, n: u64) -> Self {
        self.max_rows = Some(n);
        self
    }

    /// Query text, read from a file when `query` does not look like ADQL.
    ///
    /// Text containing `select` (any case) is used as-is; anything else is taken as the
    /// path of a file holding the query.
    pub fn resolved_query(&self) -> Result<String, TapError> {
        if self.query.to_ascii_lowercase().contains("select") {
            return Ok(self.query.clone());
        }
        let path = Utf8Path::new(self.query.trim());
        debug!(%path, "reading query from file");
        Ok(std::fs::read_to_string(path)?)
    }

    fn form_fields(&self, query: String) -> Vec<(String, String)> {
        let mut fields = vec![
            ("REQUEST".to_string(), "doQuery".to_string()),
            ("LANG".to_string(), "ADQL".to_string()),
            ("FORMAT".to_string(), self.output_format.to_string()),
            ("QUERY".to_string(), query),
        ];
        if self.asynchronous {
            fields.push(("PHASE".into(), "RUN".into()));
        }
        if let Some(name) = &self.job_name {
            fields.push(("jobname".into(), name.clone()));
        }
        if let Some(n) = self.max_rows {
            fields.push(("MAXREC".into(), n.to_string()));
        }
        if let Some(upload) = &self.upload {
            fields.push((
                "UPLOAD".into(),
                format!("{0},param:{0}", upload.table_name),
            ));
        }
        fields
    }
}

#[derive(Debug, Clone)]
struct JobResult {
    location: String,
    table: OnceCell<Table>,
}

/// Why a job ended in `ERROR`.
#[derive(Debug, Clone, PartialEq)]
pub struct JobFailure {
    pub error: ArchiveError,
    /// HTTP status of a rejected synchronous query.
    pub http_status: Option<u16>,
}

#[derive(Debug, Clone)]
enum JobState {
    Pending,
    Executing,
    Completed(JobResult),
    Error(JobFailure),
    Aborted,
}

impl JobState {
    fn phase(&self) -> JobPhase {
        match self {
            JobState::Pending => JobPhase::Pending,
            JobState::Executing => JobPhase::Executing,
            JobState::Completed(_) => JobPhase::Completed,
            JobState::Error(_) => JobPhase::Error,
            JobState::Aborted => JobPhase::Aborted,
        }
    }
}

/// One query's lifecycle.
#[derive(Debug, Clone)]
pub struct Job {
    id: JobId,
    request: QueryRequest,
    state: JobState,
    /// Job resource URL; `None` for synchronous jobs.
    url: Option<String>,
    last_status: Option<JobStatus>,
}

impl Job {
    /// Submit `request` to the archive.
    ///
    /// Synchronous requests perform the whole round trip: the job comes back `COMPLETED` with
    /// its table already cached, or `ERROR` when the archive rejected the query.
    /// Asynchronous requests come back `EXECUTING`, identified by the job id of the
    /// `303 See Other` location (or of the job document the server answered with).
    ///
    /// Errors
    /// ----------
    /// * Transport errors, [`TapError::Io`] when the query file cannot be read, and
    ///   [`TapError::MalformedTable`] when a synchronous result cannot be decoded.
    /// * For asynchronous requests, [`TapError::Http`] when the submission is rejected.
    pub fn submit(session: &ArchiveSession, request: QueryRequest) -> Result<Job, TapError> {
        let query = request.resolved_query()?;
        let endpoint = session.endpoint();
        let sub = if request.asynchronous { "async" } else { "sync" };
        let url = endpoint.tap_url(sub);
        let fields = request.form_fields(query);

        let response = match &request.upload {
            Some(upload) => {
                let votable = table_to_votable(&upload.table, &upload.table_name);
                let form = fields
                    .into_iter()
                    .fold(MultipartForm::new(&session.config().multipart_boundary), |f, (k, v)| {
                        f.text(k, v)
                    })
                    .file(
                        upload.table_name.clone(),
                        format!("{}.xml", upload.table_name),
                        "text/xml",
                        votable.into_bytes(),
                    );
                session.request_multipart(&url, form)
            }
            None => {
                let params: Vec<(&str, &str)> =
                    fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
                session.request(&url, &params, HttpMethod::Post)
            }
        };

        if request.asynchronous {
            Self::accept_async(session, request, response?)
        } else {
            Self::finish_sync(request, response)
        }
    }

    fn finish_sync(
        request: QueryRequest,
        response: Result<HttpResponse, TapError>,
    ) -> Result<Job, TapError> {
        let id = format!("sync-{}", SYNC_JOB_COUNTER.fetch_add(1, Ordering::Relaxed));
        let state = match response {
            Ok(resp) => match parse_table(&resp.body, request.output_format) {
                Ok(table) => JobState::Completed(JobResult {
                    location: String::new(),
                    table: OnceCell::with_value(table),
                }),
                Err(TapError::ArchiveReported(error)) => JobState::Error(JobFailure {
                    error,
                    http_status: None,
                }),
                Err(e) => return Err(e),
            },
            Err(TapError::Http { status, error }) => JobState::Error(JobFailure {
                error,
                http_status: Some(status),
            }),
            Err(e) => return Err(e),
        };
        info!(job_id = %id, phase = %state.phase(), "synchronous query finished");
        Ok(Job {
            id,
            request,
            state,
            url: None,
            last_status: None,
        })
    }

    fn accept_async(
        session: &ArchiveSession,
        request: QueryRequest,
        response: HttpResponse,
    ) -> Result<Job, TapError> {
        let from_location = response.location.as_deref().and_then(|loc| {
            loc.trim_end_matches('/')
                .rsplit('/')
                .next()
                .filter(|id| !id.is_empty())
                .map(str::to_string)
        });
        let (id, status) = match from_location {
            Some(id) => (id, None),
            None => {
                let status = parse_job_status(&response.body)?;
                (status.job_id.clone(), Some(status))
            }
        };

        info!(job_id = %id, "asynchronous job submitted");
        Ok(Job {
            url: Some(session.endpoint().job_url(&id)),
            id,
            request,
            state: JobState::Executing,
            last_status: status,
        })
    }

    /// Re-attach to an existing asynchronous job and read its current status.
    pub fn attach(
        session: &ArchiveSession,
        job_id: &str,
        output_format: OutputFormat,
    ) -> Result<Job, TapError> {
        let mut job = Job {
            id: job_id.to_string(),
            request: QueryRequest::new(String::new())
                .output_format(output_format)
                .asynchronous(true),
            state: JobState::Pending,
            url: Some(session.endpoint().job_url(job_id)),
            last_status: None,
        };
        job.poll(session)?;
        if let Some(query) = job.last_status.as_ref().and_then(JobStatus::query) {
            job.request.query = query.to_string();
        }
        Ok(job)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phase(&self) -> JobPhase {
        self.state.phase()
    }

    pub fn is_terminal(&self) -> bool {
        self.phase().is_terminal()
    }

    pub fn request(&self) -> &QueryRequest {
        &self.request
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Failure detail, present exactly when the phase is `ERROR`.
    pub fn failure(&self) -> Option<&JobFailure> {
        match &self.state {
            JobState::Error(f) => Some(f),
            _ => None,
        }
    }

    /// Result reference, present exactly when the phase is `COMPLETED`.
    pub fn result_location(&self) -> Option<&str> {
        match &self.state {
            JobState::Completed(r) => Some(r.location.as_str()),
            _ => None,
        }
    }

    /// Last job document read from the server.
    pub fn last_status(&self) -> Option<&JobStatus> {
        self.last_status.as_ref()
    }

    pub fn start_time(&self) -> Option<Epoch> {
        self.last_status.as_ref().and_then(|s| s.start_time)
    }

    pub fn end_time(&self) -> Option<Epoch> {
        self.last_status.as_ref().and_then(|s| s.end_time)
    }

    /// Move to `next` if that is a forward transition.
    fn advance(&mut self, next: JobState) {
        let (from, to) = (self.phase(), next.phase());
        if from.is_terminal() {
            return;
        }
        if to.rank() < from.rank() {
            warn!(job_id = %self.id, %from, %to, "ignoring backward phase transition");
            return;
        }
        if from != to {
            info!(job_id = %self.id, %from, %to, "job phase changed");
        }
        self.state = next;
    }

    fn job_url(&self, operation: &'static str) -> Result<&str, TapError> {
        self.url.as_deref().ok_or(TapError::IllegalState {
            operation,
            phase: self.phase(),
        })
    }

    /// Read the job document once and update the phase.
    ///
    /// A terminal job is left untouched and no request is made.
    pub fn poll(&mut self, session: &ArchiveSession) -> Result<JobPhase, TapError> {
        if self.is_terminal() {
            return Ok(self.phase());
        }
        let url = self.job_url("poll")?.to_string();
        let response = session.request(&url, &[], HttpMethod::Get)?;
        let status = parse_job_status(&response.body)?;
        debug!(job_id = %self.id, server_phase = %status.phase, "polled job");

        let next = match fold_server_phase(status.phase) {
            None => None,
            Some(JobPhase::Pending) => Some(JobState::Pending),
            Some(JobPhase::Executing) => Some(JobState::Executing),
            Some(JobPhase::Aborted) => Some(JobState::Aborted),
            Some(JobPhase::Completed) => {
                let location = status
                    .result_href("result")
                    .or_else(|| status.results.first().map(|r| r.href.as_str()))
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{url}/results/result"));
                Some(JobState::Completed(JobResult {
                    location,
                    table: OnceCell::new(),
                }))
            }
            Some(JobPhase::Error) => {
                let error = if status.phase == ServerPhase::Archived {
                    ArchiveError::raw("job results have been archived")
                } else {
                    status
                        .error
                        .clone()
                        .unwrap_or_else(|| ArchiveError::raw("job failed without error summary"))
                };
                Some(JobState::Error(JobFailure {
                    error,
                    http_status: None,
                }))
            }
        };

        self.last_status = Some(status);
        if let Some(next) = next {
            self.advance(next);
        }
        Ok(self.phase())
    }

    /// Poll until the job is terminal.
    ///
    /// Each round polls once, returns when the job is terminal, fails once `max_wait` has
    /// elapsed, and otherwise sleeps `min(poll_interval, remaining)` on the calling thread.
    ///
    /// Errors
    /// ----------
    /// * [`TapError::Timeout`] after `max_wait`. The job keeps its phase and can be waited on
    ///   again.
    /// * Any error of [`Job::poll`].
    pub fn wait(
        &mut self,
        session: &ArchiveSession,
        poll_interval: Duration,
        max_wait: Duration,
    ) -> Result<JobPhase, TapError> {
        let start = Instant::now();
        loop {
            let phase = self.poll(session)?;
            if phase.is_terminal() {
                return Ok(phase);
            }
            let elapsed = start.elapsed();
            if elapsed >= max_wait {
                debug!(job_id = %self.id, ?max_wait, "gave up waiting for job");
                return Err(TapError::Timeout(max_wait));
            }
            std::thread::sleep(poll_interval.min(max_wait - elapsed));
        }
    }

    /// Result table of a `COMPLETED` job.
    ///
    /// The first call downloads and decodes the result; later calls return the same table
    /// without I/O.
    ///
    /// Errors
    /// ----------
    /// * [`TapError::IllegalState`] unless the job is `COMPLETED`.
    pub fn fetch_result(&self, session: &ArchiveSession) -> Result<&Table, TapError> {
        match &self.state {
            JobState::Completed(result) => result.table.get_or_try_init(|| {
                debug!(job_id = %self.id, location = %result.location, "fetching job result");
                let response = session.request(&result.location, &[], HttpMethod::Get)?;
                parse_table(&response.body, self.request.output_format)
            }),
            _ => Err(TapError::IllegalState {
                operation: "fetch_result",
                phase: self.phase(),
            }),
        }
    }

    /// Consume the job and return its result table, fetching it if needed.
    pub fn into_result(self, session: &ArchiveSession) -> Result<Table, TapError> {
        self.fetch_result(session)?;
        let phase = self.phase();
        match self.state {
            JobState::Completed(result) => result.table.into_inner().ok_or(TapError::IllegalState {
                operation: "into_result",
                phase,
            }),
            _ => Err(TapError::IllegalState {
                operation: "into_result",
                phase,
            }),
        }
    }

    /// Ask the archive to abort the job. A terminal job is left as it is.
    pub fn abort(&mut self, session: &ArchiveSession) -> Result<JobPhase, TapError> {
        if self.is_terminal() {
            return Ok(self.phase());
        }
        let url = format!("{}/phase", self.job_url("abort")?);
        session.request(&url, &[("PHASE", "ABORT")], HttpMethod::Post)?;
        self.advance(JobState::Aborted);
        Ok(self.phase())
    }

    /// Delete the job resource on the archive. Synchronous jobs have none.
    pub fn delete(self, session: &ArchiveSession) -> Result<(), TapError> {
        let Some(url) = &self.url else {
            return Ok(());
        };
        session.request(url, &[("ACTION", "DELETE")], HttpMethod::Post)?;
        info!(job_id = %self.id, "job deleted");
        Ok(())
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Job {} [{}]", self.id, self.phase())?;
        if let JobState::Error(failure) = &self.state {
            write!(f, ": {}", failure.error)?;
        }
        Ok(())
    }
}
