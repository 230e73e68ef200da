use astrotap::table::{DataType, Value};
use astrotap::tap::response::{
    parse_error, parse_job_list, parse_job_status, parse_table, parse_tableset, serialize_error,
    ArchiveError, ErrorEnvelope, ServerPhase,
};
use astrotap::tap::upload::table_to_votable;
use astrotap::tap::OutputFormat;
use astrotap::tap_errors::TapError;

mod common;
use common::fixture;

#[test]
fn test_gaia_votable_fixture() {
    let table = parse_table(&fixture("gaia_sources.vot"), OutputFormat::Votable).unwrap();
    assert_eq!(table.num_rows(), 3);
    assert_eq!(table.num_columns(), 22);
    assert_eq!(table.columns()[0].datatype, DataType::Long);
    assert_eq!(table.columns()[3].unit.as_deref(), Some("mas"));
    assert_eq!(
        table.column_f64("parallax").unwrap(),
        vec![1.0, 2.0, -0.5]
    );
    assert_eq!(
        table.row(2).value("astrometric_n_good_obs_al"),
        Some(&Value::Int(5))
    );

    // both VOTable formats accept the TABLEDATA serialization
    let plain = parse_table(&fixture("gaia_sources.vot"), OutputFormat::VotablePlain).unwrap();
    assert_eq!(plain, table);
}

#[test]
fn test_formats_agree() {
    let csv = b"source_id,parallax,designation\n1,0.5,Gaia DR2 1\n2,,\n";
    let json = br#"{"metadata":[
        {"name":"source_id","datatype":"long"},
        {"name":"parallax","datatype":"double","unit":"mas"},
        {"name":"designation","datatype":"char","arraysize":"*"}],
      "data":[[1,0.5,"Gaia DR2 1"],[2,null,null]]}"#;

    let from_csv = parse_table(csv, OutputFormat::Csv).unwrap();
    let from_json = parse_table(json, OutputFormat::Json).unwrap();
    assert_eq!(from_csv.column_names(), from_json.column_names());
    assert_eq!(from_csv.rows(), from_json.rows());
    assert_eq!(from_csv.rows()[1][2], Value::Null);
}

#[test]
fn test_join_with_repeated_names() {
    let csv = b"source_id,ra,source_id,ra\n1,10.5,2,10.6\n";
    let table = parse_table(csv, OutputFormat::Csv).unwrap();
    assert_eq!(
        table.column_names(),
        vec!["source_id", "ra", "source_id_2", "ra_2"]
    );
    assert_eq!(table.column_f64("ra_2").unwrap(), vec![10.6]);

    let json = br#"{"metadata":[{"name":"ra","datatype":"double"},{"name":"ra","datatype":"double"}],
      "data":[[1.0,2.0]]}"#;
    let table = parse_table(json, OutputFormat::Json).unwrap();
    assert_eq!(table.column_names(), vec!["ra", "ra_2"]);
}

#[test]
fn test_uploaded_votable_reads_back() {
    let table = parse_table(&fixture("gaia_sources.vot"), OutputFormat::Votable).unwrap();
    let document = table_to_votable(&table, "sources");
    let back = parse_table(document.as_bytes(), OutputFormat::VotablePlain).unwrap();
    assert_eq!(back.column_names(), table.column_names());
    assert_eq!(back.rows(), table.rows());
}

#[test]
fn test_query_status_error() {
    assert_eq!(
        parse_table(&fixture("query_error.vot"), OutputFormat::Votable),
        Err(TapError::ArchiveReported(ArchiveError::new(
            "Cannot parse query: unknown table gaiadr2.nope",
            None,
            ErrorEnvelope::Votable,
        )))
    );
}

#[test]
fn test_malformed_payloads() {
    assert!(matches!(
        parse_table(b"<VOTABLE><RESOURCE><TABLE><FIELD name=\"a\" datatype=\"int\"/><DATA><TABLEDATA><TR><TD>1</TD><TD>2</TD></TR></TABLEDATA></DATA></TABLE></RESOURCE></VOTABLE>", OutputFormat::Votable),
        Err(TapError::MalformedTable { .. })
    ));
    assert!(matches!(
        parse_table(b"{\"metadata\": 3}", OutputFormat::Json),
        Err(TapError::MalformedTable { .. })
    ));
    assert!(matches!(
        parse_table(b"<html>not fits</html>", OutputFormat::Fits),
        Err(TapError::MalformedTable { .. })
    ));
}

#[test]
fn test_job_documents() {
    let completed = parse_job_status(&fixture("job_completed.xml")).unwrap();
    assert_eq!(completed.phase, ServerPhase::Completed);
    assert_eq!(completed.query(), Some("SELECT TOP 3 * FROM gaiadr2.gaia_source"));
    assert_eq!(completed.parameters.get("format").map(String::as_str), Some("votable"));

    let failed = parse_job_status(&fixture("job_error.xml")).unwrap();
    assert_eq!(failed.phase, ServerPhase::Error);
    assert_eq!(failed.error.unwrap().code.as_deref(), Some("fatal"));

    let jobs = parse_job_list(&fixture("jobs.xml")).unwrap();
    let phases: Vec<ServerPhase> = jobs.iter().map(|j| j.phase).collect();
    assert_eq!(
        phases,
        vec![ServerPhase::Executing, ServerPhase::Queued, ServerPhase::Completed]
    );

    // a job list is not a job document
    assert!(matches!(
        parse_job_status(&fixture("jobs.xml")),
        Err(TapError::MalformedJobStatus { .. })
    ));
}

#[test]
fn test_tableset_fixture() {
    let set = parse_tableset(&fixture("tableset.xml")).unwrap();
    assert_eq!(set.len(), 3);
    let source = set.get("gaia_source").unwrap();
    assert_eq!(source.schema, "gaiadr2");
    assert_eq!(source.column("source_id").unwrap().ucd.as_deref(), Some("meta.id"));

    let listing = source.to_table().unwrap();
    assert_eq!(listing.num_rows(), 3);
    assert_eq!(listing.rows()[2][3], Value::Null);
}

#[test]
fn test_error_documents() {
    let html = parse_error(&fixture("error_500.html"), Some("text/html")).unwrap();
    assert_eq!(html.envelope, ErrorEnvelope::Html);
    assert_eq!(html.code.as_deref(), Some("500"));

    for (kind, content_type) in [
        (ErrorEnvelope::Html, "text/html"),
        (ErrorEnvelope::Uws, "text/xml"),
        (ErrorEnvelope::Votable, "application/x-votable+xml"),
    ] {
        let error = ArchiveError::new("Table <x> & \"y\" not found", Some("404".into()), kind);
        let document = serialize_error(&error, kind);
        let back = parse_error(document.as_bytes(), Some(content_type)).unwrap();
        assert_eq!(back.message, error.message);
        assert_eq!(back.envelope, kind);
    }

    assert_eq!(
        parse_error(b"", Some("text/plain")),
        Err(TapError::EmptyErrorDocument)
    );
}
