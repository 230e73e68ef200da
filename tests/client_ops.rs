use std::io::Write;

use astrotap::env_state::HttpMethod::{Get, Post};
use astrotap::env_state::HttpResponse;
use astrotap::table::{Column, DataType, Table, Value};
use astrotap::tap::client::UploadSource;
use astrotap::tap::job::QueryRequest;
use astrotap::tap::response::ErrorEnvelope;
use astrotap::tap::session::Credentials;
use astrotap::tap::upload::multipart_parts;
use astrotap::tap::OutputFormat;
use astrotap::tap_errors::TapError;
use camino::Utf8Path;

mod common;
use common::*;

fn logged_in() -> HttpResponse {
    HttpResponse {
        status: 200,
        set_cookies: vec![
            "JSESSIONID=5D1F; Path=/tap-server; HttpOnly".to_string(),
            "GAIA_TOKEN=t0k3n".to_string(),
        ],
        ..Default::default()
    }
}

fn targets() -> Table {
    Table::new(
        vec![
            Column::new("id", DataType::Int),
            Column::new("ra", DataType::Double).with_unit("deg"),
        ],
        vec![
            vec![Value::Int(1), Value::Float(10.5)],
            vec![Value::Int(2), Value::Null],
        ],
    )
    .unwrap()
}

#[test]
fn test_sync_query() {
    let transport = MockTransport::new();
    transport.on(Post, "/tap/sync", ok("text/xml", &fixture("gaia_sources.vot")));
    let client = client(&transport);

    let table = client
        .query("SELECT TOP 3 * FROM gaiadr2.gaia_source", false, OutputFormat::Votable)
        .unwrap();
    assert_eq!(table.num_rows(), 3);
    assert_eq!(table.row(0).value("source_id"), Some(&Value::Int(4295806720)));
    assert!(table.row(1).value("bp_rp").unwrap().is_null());

    let request = transport.last(Post, "/tap/sync").unwrap();
    assert_eq!(request.param("FORMAT"), Some("votable"));
    assert_eq!(request.param("PHASE"), None);
    assert_eq!(transport.count(Get, ""), 0);
}

#[test]
fn test_sync_csv_query() {
    let transport = MockTransport::new();
    transport.on(
        Post,
        "/tap/sync",
        ok("text/csv", b"source_id,parallax\n1,0.5\n2,\n"),
    );
    let client = client(&transport);
    let table = client
        .query("select source_id, parallax from t", false, OutputFormat::Csv)
        .unwrap();
    assert_eq!(table.columns()[0].datatype, DataType::Long);
    assert_eq!(table.columns()[1].datatype, DataType::Double);
    assert!(table.column_f64("parallax").unwrap()[1].is_nan());
    assert_eq!(
        transport.last(Post, "/tap/sync").unwrap().param("FORMAT"),
        Some("csv")
    );
}

#[test]
fn test_sync_query_failures() {
    let transport = MockTransport::new();
    transport
        .on(Post, "/tap/sync", ok("text/xml", &fixture("query_error.vot")))
        .on(
            Post,
            "/tap/sync",
            status(500, "text/html;charset=UTF-8", &fixture("error_500.html")),
        );
    let client = client(&transport);

    match client.query("SELECT * FROM gaiadr2.nope", false, OutputFormat::Votable) {
        Err(TapError::JobFailed { job_id, error }) => {
            assert!(job_id.starts_with("sync-"));
            assert_eq!(error.message, "Cannot parse query: unknown table gaiadr2.nope");
            assert_eq!(error.envelope, ErrorEnvelope::Votable);
        }
        other => panic!("unexpected {other:?}"),
    }

    match client.query("SELECT * FROM gaiadr2.gaia_source WHERE", false, OutputFormat::Votable) {
        Err(TapError::Http { status, error }) => {
            assert_eq!(status, 500);
            assert_eq!(error.code.as_deref(), Some("500"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_sync_query_with_upload() {
    let transport = MockTransport::new();
    transport.on(Post, "/tap/sync", ok("text/xml", &fixture("gaia_sources.vot")));
    let client = client(&transport);

    client
        .query_with(
            QueryRequest::new("SELECT * FROM tap_upload.my_targets").upload("my_targets", targets()),
        )
        .unwrap();

    let request = transport.last(Post, "/tap/sync").unwrap();
    let parts = multipart_parts(&request.body).unwrap();
    let field = |name: &str| {
        parts
            .iter()
            .find(|(n, _, _)| n == name)
            .map(|(_, filename, data)| (filename.clone(), String::from_utf8_lossy(data).into_owned()))
    };
    assert_eq!(
        field("UPLOAD"),
        Some((None, "my_targets,param:my_targets".to_string()))
    );
    assert_eq!(field("QUERY").unwrap().1, "SELECT * FROM tap_upload.my_targets");
    let (filename, votable) = field("my_targets").unwrap();
    assert_eq!(filename.as_deref(), Some("my_targets.xml"));
    assert!(votable.contains("<TABLE name=\"my_targets\">"));
}

#[test]
fn test_query_read_from_file() {
    let transport = MockTransport::new();
    transport.on(Post, "/tap/sync", ok("text/xml", &fixture("gaia_sources.vot")));
    let client = client(&transport);

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "SELECT TOP 3 * FROM gaiadr2.gaia_source").unwrap();
    let path = file.path().to_str().unwrap();

    client.query(path, false, OutputFormat::Votable).unwrap();
    assert_eq!(
        transport.last(Post, "/tap/sync").unwrap().param("QUERY"),
        Some("SELECT TOP 3 * FROM gaiadr2.gaia_source")
    );
    assert!(matches!(
        client.query("/nonexistent/query.adql", false, OutputFormat::Votable),
        Err(TapError::Io(_))
    ));
}

#[test]
fn test_login_and_logout() {
    let transport = MockTransport::new();
    transport
        .on(Post, "/tap-server/login", logged_in())
        .on(Post, "/tap-server/logout", ok("text/plain", b""))
        .on(Get, "/tap/async", xml_fixture("jobs.xml"));
    let mut client = client(&transport);

    assert!(matches!(client.list_jobs(), Err(TapError::Authentication(_))));
    assert_eq!(transport.count(Get, "/tap/async"), 0);

    client.login(&Credentials::new("jdoe", "secret")).unwrap();
    assert!(client.session().is_authenticated());
    assert_eq!(client.session().user(), Some("jdoe"));
    let login = transport.last(Post, "/login").unwrap();
    assert_eq!(login.param("username"), Some("jdoe"));
    assert_eq!(login.param("password"), Some("secret"));

    let jobs = client.list_jobs().unwrap();
    assert_eq!(jobs.len(), 3);
    assert_eq!(jobs[0].job_id, "1001");
    let listing = transport.last(Get, "/tap/async").unwrap();
    assert_eq!(listing.header("Cookie"), Some("JSESSIONID=5D1F; GAIA_TOKEN=t0k3n"));

    client.logout();
    assert!(!client.session().is_authenticated());
    assert_eq!(transport.count(Post, "/logout"), 1);
    assert!(matches!(client.list_jobs(), Err(TapError::Authentication(_))));

    // logging out twice does not reach the archive
    client.logout();
    assert_eq!(transport.count(Post, "/logout"), 1);
}

#[test]
fn test_rejected_login() {
    let transport = MockTransport::new();
    transport.on(
        Post,
        "/tap-server/login",
        status(401, "text/html", b"<html><head><title>Error 401</title></head></html>"),
    );
    let mut client = client(&transport);
    assert!(matches!(
        client.login(&Credentials::new("jdoe", "wrong")),
        Err(TapError::Authentication(_))
    ));
    assert!(!client.session().is_authenticated());
}

#[test]
fn test_failed_refresh_keeps_login() {
    let transport = MockTransport::new();
    transport
        .on(Post, "/tap-server/login", logged_in())
        .on(
            Post,
            "/tap-server/login",
            status(401, "text/html", b"<html><head><title>Error 401</title></head></html>"),
        )
        .on(Get, "/tap/async", xml_fixture("jobs.xml"));
    let mut client = client(&transport);

    client.login(&Credentials::new("jdoe", "secret")).unwrap();
    assert!(matches!(
        client.login(&Credentials::new("other", "wrong")),
        Err(TapError::Authentication(_))
    ));
    assert_eq!(client.session().user(), Some("jdoe"));
    client.list_jobs().unwrap();
    let listing = transport.last(Get, "/tap/async").unwrap();
    assert_eq!(listing.header("Cookie"), Some("JSESSIONID=5D1F; GAIA_TOKEN=t0k3n"));
}

#[test]
fn test_login_with_file() {
    let transport = MockTransport::new();
    transport.on(Post, "/tap-server/login", logged_in());
    let mut client = client(&transport);

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "jdoe\nsecret").unwrap();
    let path = Utf8Path::from_path(file.path()).unwrap();
    client.login_with_file(path).unwrap();
    assert_eq!(client.session().user(), Some("jdoe"));

    let mut incomplete = tempfile::NamedTempFile::new().unwrap();
    writeln!(incomplete, "jdoe").unwrap();
    let path = Utf8Path::from_path(incomplete.path()).unwrap();
    assert!(matches!(
        client.login_with_file(path),
        Err(TapError::Authentication(_))
    ));
}

fn archive_with_jobs() -> std::sync::Arc<MockTransport> {
    let transport = MockTransport::new();
    transport
        .on(Post, "/tap-server/login", logged_in())
        .on(Get, "/tap/async", xml_fixture("jobs.xml"))
        .on(
            Get,
            "/async/1001",
            job_document("1001", "EXECUTING", "SELECT t.id FROM user_jdoe.my_targets AS t"),
        )
        .on(
            Get,
            "/async/1002",
            job_document("1002", "QUEUED", "SELECT TOP 10 * FROM gaiadr2.gaia_source"),
        )
        .on(Post, "/tap-server/Upload", ok("text/plain", b"OK"));
    transport
}

#[test]
fn test_delete_table_used_by_active_job() {
    let transport = archive_with_jobs();
    let mut client = client(&transport);
    client.login(&Credentials::new("jdoe", "secret")).unwrap();

    match client.delete_user_table("user_jdoe.my_targets", false) {
        Err(TapError::ConfirmationRequired(reason)) => assert!(reason.contains("1001")),
        other => panic!("unexpected {other:?}"),
    }
    // completed jobs are not inspected
    assert_eq!(transport.count(Get, "/async/1003"), 0);
    assert_eq!(transport.count(Post, "/Upload"), 0);

    client.delete_user_table("user_jdoe.my_targets", true).unwrap();
    let delete = transport.last(Post, "/Upload").unwrap();
    assert_eq!(delete.param("TABLE_NAME"), Some("user_jdoe.my_targets"));
    assert_eq!(delete.param("DELETE"), Some("TRUE"));
    assert_eq!(delete.param("FORCE_REMOVAL"), Some("TRUE"));
}

#[test]
fn test_delete_unused_table() {
    let transport = archive_with_jobs();
    let mut client = client(&transport);
    assert!(matches!(
        client.delete_user_table("other_table", false),
        Err(TapError::Authentication(_))
    ));

    client.login(&Credentials::new("jdoe", "secret")).unwrap();
    client.delete_user_table("other_table", false).unwrap();
    let delete = transport.last(Post, "/Upload").unwrap();
    assert_eq!(delete.param("FORCE_REMOVAL"), Some("FALSE"));
}

#[test]
fn test_upload_table() {
    let transport = archive_with_jobs();
    let mut client = client(&transport);
    let table = targets();
    assert!(matches!(
        client.upload_table(UploadSource::Table(&table), "my_targets", "test targets"),
        Err(TapError::Authentication(_))
    ));

    client.login(&Credentials::new("jdoe", "secret")).unwrap();
    client
        .upload_table(UploadSource::Table(&table), "my_targets", "test targets")
        .unwrap();
    let upload = transport.last(Post, "/Upload").unwrap();
    assert!(upload.header("Cookie").is_some());
    let parts = multipart_parts(&upload.body).unwrap();
    let names: Vec<&str> = parts.iter().map(|(n, _, _)| n.as_str()).collect();
    assert_eq!(names, vec!["TASKID", "TABLE_NAME", "TABLE_DESC", "FORMAT", "FILE"]);
    assert_eq!(parts[0].2, b"-1");
    assert_eq!(parts[4].1.as_deref(), Some("my_targets.xml"));

    client
        .upload_table(
            UploadSource::Url("http://example.org/targets.vot"),
            "remote_targets",
            "",
        )
        .unwrap();
    let upload = transport.last(Post, "/Upload").unwrap();
    assert_eq!(upload.param("URL"), Some("http://example.org/targets.vot"));
    assert_eq!(upload.param("TABLE_NAME"), Some("remote_targets"));
}

#[test]
fn test_table_set_is_cached_until_changed() {
    let transport = archive_with_jobs();
    transport.on(Get, "/tap/tables", xml_fixture("tableset.xml"));
    let mut client = client(&transport);

    let tables = client.tables().unwrap();
    assert_eq!(tables.schemas(), vec!["gaiadr2", "user_jdoe"]);
    assert!(tables.get("tap_schema.tables").is_none());
    client.tables().unwrap();
    assert_eq!(transport.count(Get, "/tap/tables"), 1);

    client.login(&Credentials::new("jdoe", "secret")).unwrap();
    client
        .upload_table(UploadSource::Table(&targets()), "my_targets", "")
        .unwrap();
    client.tables().unwrap();
    assert_eq!(transport.count(Get, "/tap/tables"), 2);

    // the visible schemas change with the user
    client.logout();
    client.tables().unwrap();
    client.tables().unwrap();
    assert_eq!(transport.count(Get, "/tap/tables"), 3);
    client.login(&Credentials::new("jdoe", "secret")).unwrap();
    client.tables().unwrap();
    assert_eq!(transport.count(Get, "/tap/tables"), 4);
}

#[test]
fn test_get_table_info() {
    let transport = MockTransport::new();
    transport.on(Get, "/tap/tables", xml_fixture("tableset.xml"));
    let client = client(&transport);

    let info = client.get_table_info("gaiadr2.gaia_source").unwrap();
    assert_eq!(info.qualified_name(), "gaiadr2.gaia_source");
    assert_eq!(info.columns.len(), 3);
    assert_eq!(info.column("parallax").unwrap().unit.as_deref(), Some("mas"));
    let request = transport.last(Get, "/tap/tables").unwrap();
    assert_eq!(request.param("tables"), Some("gaiadr2.gaia_source"));

    assert_eq!(
        client.get_table_info("gaiadr2.nope").err(),
        Some(TapError::TableNotFound("gaiadr2.nope".into()))
    );
}
