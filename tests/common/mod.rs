#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use astrotap::config::TapConfig;
use astrotap::env_state::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};
use astrotap::tap::client::ArchiveClient;
use astrotap::tap::endpoint::TapEndpoint;
use astrotap::tap_errors::TapError;

pub const TAP_URL: &str = "http://localhost:8080/tap-server/tap";

#[derive(Debug)]
struct Route {
    method: HttpMethod,
    suffix: String,
    responses: VecDeque<HttpResponse>,
}

/// Scripted archive.
///
/// A request is answered by the route with the same method whose URL suffix is the longest
/// one matching. Each route replays its responses in order and then keeps repeating the
/// last one. Unrouted requests get a `404`.
#[derive(Debug, Default)]
pub struct MockTransport {
    routes: Mutex<Vec<Route>>,
    log: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, method: HttpMethod, suffix: &str, response: HttpResponse) -> &Self {
        let mut routes = self.routes.lock().unwrap();
        match routes
            .iter_mut()
            .find(|r| r.method == method && r.suffix == suffix)
        {
            Some(route) => route.responses.push_back(response),
            None => routes.push(Route {
                method,
                suffix: suffix.to_string(),
                responses: VecDeque::from([response]),
            }),
        }
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.log.lock().unwrap().clone()
    }

    /// Number of requests sent with `method` to a URL ending in `suffix`.
    pub fn count(&self, method: HttpMethod, suffix: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method && r.url.ends_with(suffix))
            .count()
    }

    pub fn last(&self, method: HttpMethod, suffix: &str) -> Option<HttpRequest> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.method == method && r.url.ends_with(suffix))
            .cloned()
    }
}

impl HttpTransport for MockTransport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TapError> {
        self.log.lock().unwrap().push(request.clone());
        let mut routes = self.routes.lock().unwrap();
        let route = routes
            .iter_mut()
            .filter(|r| r.method == request.method && request.url.ends_with(&r.suffix))
            .max_by_key(|r| r.suffix.len());
        let response = match route {
            Some(route) if route.responses.len() > 1 => route.responses.pop_front(),
            Some(route) => route.responses.front().cloned(),
            None => None,
        };
        Ok(response.unwrap_or_else(|| status(404, "text/plain", b"no such resource")))
    }
}

pub fn fixture(name: &str) -> Vec<u8> {
    std::fs::read(format!("tests/data/{name}")).unwrap()
}

pub fn status(code: u16, content_type: &str, body: &[u8]) -> HttpResponse {
    HttpResponse {
        status: code,
        content_type: Some(content_type.to_string()),
        body: body.to_vec(),
        ..Default::default()
    }
}

pub fn ok(content_type: &str, body: &[u8]) -> HttpResponse {
    status(200, content_type, body)
}

pub fn xml_fixture(name: &str) -> HttpResponse {
    ok("text/xml", &fixture(name))
}

pub fn see_other(location: &str) -> HttpResponse {
    HttpResponse {
        status: 303,
        location: Some(location.to_string()),
        ..Default::default()
    }
}

pub fn job_document(job_id: &str, phase: &str, query: &str) -> HttpResponse {
    let doc = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<uws:job xmlns:uws="http://www.ivoa.net/xml/UWS/v1.0" xmlns:xlink="http://www.w3.org/1999/xlink">
  <uws:jobId>{job_id}</uws:jobId>
  <uws:phase>{phase}</uws:phase>
  <uws:parameters><uws:parameter id="query"><![CDATA[{query}]]></uws:parameter></uws:parameters>
</uws:job>"#
    );
    ok("text/xml", doc.as_bytes())
}

pub fn fast_config() -> TapConfig {
    TapConfig::builder()
        .poll_interval(Duration::from_millis(10))
        .max_wait(Duration::from_secs(5))
        .build()
        .unwrap()
}

pub fn endpoint() -> TapEndpoint {
    TapEndpoint::from_url(TAP_URL, "tap-server", "Upload").unwrap()
}

pub fn client(transport: &Arc<MockTransport>) -> ArchiveClient {
    ArchiveClient::with_transport(endpoint(), transport.clone(), fast_config())
}

/// Enable log output for a test run with `RUST_LOG=astrotap=debug`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
