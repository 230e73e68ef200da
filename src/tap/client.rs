//! # ArchiveClient: queries and table management
//!
//! [`ArchiveClient`] is the entry point of the crate. It owns an
//! [`ArchiveSession`](crate::tap::session::ArchiveSession) and builds every archive operation
//! on top of it:
//!
//! 1. **Queries**: [`query`](ArchiveClient::query) runs a synchronous or asynchronous ADQL
//!    query to completion and returns its [`Table`]; [`submit_async`](ArchiveClient::submit_async)
//!    hands back the [`Job`] for callers that drive polling themselves.
//! 2. **Jobs**: listing and deleting the asynchronous jobs of the logged-in user.
//! 3. **Tables**: the published table set (loaded once, then cached), single-table metadata,
//!    and upload or deletion of user tables.
//!
//! ## Typical usage
//!
//! ```rust, no_run
//! use astrotap::tap::client::ArchiveClient;
//! use astrotap::tap::OutputFormat;
//!
//! let client = ArchiveClient::gaia().unwrap();
//! let table = client
//!     .query("SELECT TOP 5 source_id, parallax FROM gaiadr2.gaia_source", false, OutputFormat::Votable)
//!     .unwrap();
//! println!("{} rows", table.num_rows());
//! ```
//!
//! ## See also
//! ------------
//! * [`Job`] – Lifecycle of a single query.
//! * [`parse_table`](crate::tap::response::parse_table) – Payload decoding.
use std::sync::Arc;

use camino::Utf8Path;
use once_cell::sync::OnceCell;
use tracing::{debug, info};

use crate::config::TapConfig;
use crate::env_state::{HttpMethod, HttpTransport, TapEnv};
use crate::table::Table;
use crate::tap::endpoint::TapEndpoint;
use crate::tap::job::{fold_server_phase, Job, JobPhase, QueryRequest};
use crate::tap::response::{
    parse_job_list, parse_job_status, parse_tableset, ArchiveError, JobSummary, TableMeta,
    TableSet,
};
use crate::tap::session::{ArchiveSession, Credentials};
use crate::tap::upload::{table_to_votable, MultipartForm};
use crate::tap::OutputFormat;
use crate::tap_errors::TapError;

/// Where the content of an uploaded table comes from.
#[derive(Debug, Clone, Copy)]
pub enum UploadSource<'a> {
    /// In-memory table, sent as a VOTable document.
    Table(&'a Table),
    /// Remote VOTable the archive downloads itself.
    Url(&'a str),
}

#[derive(Debug)]
pub struct ArchiveClient {
    session: ArchiveSession,
    tables: OnceCell<TableSet>,
}

impl ArchiveClient {
    /// Client over the production HTTP transport.
    pub fn new(endpoint: TapEndpoint, config: TapConfig) -> Self {
        let transport = Arc::new(TapEnv::new(&config));
        Self::with_transport(endpoint, transport, config)
    }

    /// Client over a caller-supplied transport.
    pub fn with_transport(
        endpoint: TapEndpoint,
        transport: Arc<dyn HttpTransport>,
        config: TapConfig,
    ) -> Self {
        ArchiveClient {
            session: ArchiveSession::new(endpoint, transport, config),
            tables: OnceCell::new(),
        }
    }

    /// Client for the TAP service at `url`, with default configuration.
    ///
    /// Arguments
    /// -----------------
    /// * `url`: TAP root, e.g. `https://gea.esac.esa.int/tap-server/tap`.
    /// * `server_context`: context holding `login`/`logout`, e.g. `tap-server`.
    /// * `upload_context`: upload servlet under the server context, e.g. `Upload`.
    ///
    /// Return
    /// ----------
    /// * The client, or [`TapError::InvalidUrl`] when `url` is not an http(s) URL.
    pub fn from_url(
        url: &str,
        server_context: &str,
        upload_context: &str,
    ) -> Result<Self, TapError> {
        let endpoint = TapEndpoint::from_url(url, server_context, upload_context)?;
        Ok(Self::new(endpoint, TapConfig::default()))
    }

    /// Client for the ESA Gaia archive.
    pub fn gaia() -> Result<Self, TapError> {
        Ok(Self::new(TapEndpoint::gaia()?, TapConfig::default()))
    }

    pub fn session(&self) -> &ArchiveSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut ArchiveSession {
        &mut self.session
    }

    /// Log in and drop the cached table set, which depends on the user's schemas.
    pub fn login(&mut self, credentials: &Credentials) -> Result<(), TapError> {
        self.session.login(credentials)?;
        self.tables.take();
        Ok(())
    }

    pub fn login_with_file(&mut self, path: &Utf8Path) -> Result<(), TapError> {
        self.session.login_with_file(path)?;
        self.tables.take();
        Ok(())
    }

    pub fn logout(&mut self) {
        self.session.logout();
        self.tables.take();
    }

    /// Run `query` and return its result table.
    ///
    /// `query` is either ADQL text or the path of a file holding it (any text without
    /// `select` is read as a path).
    pub fn query(
        &self,
        query: &str,
        asynchronous: bool,
        output_format: OutputFormat,
    ) -> Result<Table, TapError> {
        self.query_with(
            QueryRequest::new(query)
                .asynchronous(asynchronous)
                .output_format(output_format),
        )
    }

    /// Run a fully specified query to completion.
    ///
    /// Asynchronous requests are waited on with the configured poll interval and maximum
    /// wait before their result is fetched.
    ///
    /// Errors
    /// ----------
    /// * [`TapError::Http`] when a synchronous query is rejected with an HTTP error.
    /// * [`TapError::JobFailed`] when the job ends in `ERROR` or `ABORTED`.
    /// * [`TapError::Timeout`] when an asynchronous job outlives the maximum wait.
    pub fn query_with(&self, request: QueryRequest) -> Result<Table, TapError> {
        let mut job = Job::submit(&self.session, request)?;
        if !job.is_terminal() {
            let config = self.session.config();
            job.wait(&self.session, config.poll_interval, config.max_wait)?;
        }

        match job.phase() {
            JobPhase::Completed => job.into_result(&self.session),
            JobPhase::Error => {
                let failure = job.failure().cloned().ok_or(TapError::IllegalState {
                    operation: "query",
                    phase: JobPhase::Error,
                })?;
                Err(match failure.http_status {
                    Some(status) => TapError::Http {
                        status,
                        error: failure.error,
                    },
                    None => TapError::JobFailed {
                        job_id: job.id().to_string(),
                        error: failure.error,
                    },
                })
            }
            JobPhase::Aborted => Err(TapError::JobFailed {
                job_id: job.id().to_string(),
                error: ArchiveError::raw("job was aborted"),
            }),
            phase => Err(TapError::IllegalState {
                operation: "query",
                phase,
            }),
        }
    }

    /// Submit an asynchronous query and return its handle without waiting.
    pub fn submit_async(&self, request: QueryRequest) -> Result<Job, TapError> {
        Job::submit(&self.session, request.asynchronous(true))
    }

    /// Re-attach to an asynchronous job by id.
    pub fn load_job(&self, job_id: &str, output_format: OutputFormat) -> Result<Job, TapError> {
        Job::attach(&self.session, job_id, output_format)
    }

    /// Asynchronous jobs of the logged-in user.
    pub fn list_jobs(&self) -> Result<Vec<JobSummary>, TapError> {
        self.session.require_authenticated("list_jobs")?;
        let url = self.session.endpoint().tap_url("async");
        let response = self.session.request(&url, &[], HttpMethod::Get)?;
        parse_job_list(&response.body)
    }

    /// Delete the job resource `job_id`.
    pub fn delete_job(&self, job_id: &str) -> Result<(), TapError> {
        let url = self.session.endpoint().job_url(job_id);
        self.session
            .request(&url, &[("ACTION", "DELETE")], HttpMethod::Post)?;
        info!(job_id, "job deleted");
        Ok(())
    }

    /// Ids of the non-terminal jobs whose query mentions `table_name`.
    fn jobs_referencing(&self, table_name: &str) -> Result<Vec<String>, TapError> {
        let mut referencing = Vec::new();
        for summary in self.list_jobs()? {
            let active = fold_server_phase(summary.phase).map_or(true, |p| !p.is_terminal());
            if !active {
                continue;
            }
            let url = self.session.endpoint().job_url(&summary.job_id);
            let response = self.session.request(&url, &[], HttpMethod::Get)?;
            let status = parse_job_status(&response.body)?;
            if status
                .query()
                .is_some_and(|q| query_mentions_table(q, table_name))
            {
                referencing.push(summary.job_id);
            }
        }
        Ok(referencing)
    }

    /// Delete the user table `table_name`.
    ///
    /// Unless `force` is set, the deletion is refused while a running job still reads
    /// the table.
    ///
    /// Errors
    /// ----------
    /// * [`TapError::Authentication`] on an anonymous session.
    /// * [`TapError::ConfirmationRequired`] when active jobs reference the table and `force`
    ///   is not set.
    pub fn delete_user_table(&mut self, table_name: &str, force: bool) -> Result<(), TapError> {
        self.session.require_authenticated("delete_user_table")?;
        if !force {
            let jobs = self.jobs_referencing(table_name)?;
            if !jobs.is_empty() {
                return Err(TapError::ConfirmationRequired(format!(
                    "table {table_name} is used by active jobs {}; delete with force to proceed",
                    jobs.join(", ")
                )));
            }
        }

        let url = self.session.endpoint().upload_url();
        let force_flag = if force { "TRUE" } else { "FALSE" };
        self.session.request(
            &url,
            &[
                ("TABLE_NAME", table_name),
                ("DELETE", "TRUE"),
                ("FORCE_REMOVAL", force_flag),
            ],
            HttpMethod::Post,
        )?;
        self.tables.take();
        info!(table = table_name, force, "user table deleted");
        Ok(())
    }

    /// Upload a user table under `table_name`.
    pub fn upload_table(
        &mut self,
        source: UploadSource<'_>,
        table_name: &str,
        description: &str,
    ) -> Result<(), TapError> {
        self.session.require_authenticated("upload_table")?;
        let url = self.session.endpoint().upload_url();

        match source {
            UploadSource::Table(table) => {
                let votable = table_to_votable(table, table_name);
                let form = MultipartForm::new(&self.session.config().multipart_boundary)
                    .text("TASKID", "-1")
                    .text("TABLE_NAME", table_name)
                    .text("TABLE_DESC", description)
                    .text("FORMAT", "votable")
                    .file(
                        "FILE",
                        format!("{table_name}.xml"),
                        "text/xml",
                        votable.into_bytes(),
                    );
                self.session.request_multipart(&url, form)?;
            }
            UploadSource::Url(resource) => {
                self.session.request(
                    &url,
                    &[
                        ("TASKID", "-1"),
                        ("TABLE_NAME", table_name),
                        ("TABLE_DESC", description),
                        ("FORMAT", "votable"),
                        ("URL", resource),
                    ],
                    HttpMethod::Post,
                )?;
            }
        }
        self.tables.take();
        info!(table = table_name, "user table uploaded");
        Ok(())
    }

    /// Tables published by the archive, loaded on first call.
    pub fn tables(&self) -> Result<&TableSet, TapError> {
        self.tables.get_or_try_init(|| {
            let url = self.session.endpoint().tap_url("tables");
            debug!(%url, "loading table set");
            let response = self.session.request(&url, &[], HttpMethod::Get)?;
            parse_tableset(&response.body)
        })
    }

    /// Metadata of one table, fetched directly from the archive.
    ///
    /// Errors
    /// ----------
    /// * [`TapError::TableNotFound`] when the archive does not describe `table_name`.
    pub fn get_table_info(&self, table_name: &str) -> Result<TableMeta, TapError> {
        let url = self.session.endpoint().tap_url("tables");
        let response = self
            .session
            .request(&url, &[("tables", table_name)], HttpMethod::Get)?;
        parse_tableset(&response.body)?
            .get(table_name)
            .cloned()
            .ok_or_else(|| TapError::TableNotFound(table_name.to_string()))
    }
}

/// Whether `query` names `table_name`, bare or schema-qualified. Matching ignores case.
fn query_mentions_table(query: &str, table_name: &str) -> bool {
    let wanted = table_name.to_ascii_lowercase();
    let bare = wanted.rsplit('.').next().unwrap_or(&wanted).to_string();
    query
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '"'))
        .map(|token| token.trim_matches('"').to_ascii_lowercase())
        .any(|token| token == wanted || token == bare || token.ends_with(&format!(".{bare}")))
}
