//! Location of a TAP+ service.
//!
//! A TAP+ deployment exposes two roots:
//!
//! ```text
//! {protocol}://{host}[:{port}]{path}                      TAP root: sync, async, tables
//! {protocol}://{host}[:{port}]/{server_context}           login, logout
//! {protocol}://{host}[:{port}]/{server_context}/{upload}  user table upload/deletion
//! ```
use std::fmt;

use ureq::http::Uri;

use crate::constants::{GAIA_SERVER_CONTEXT, GAIA_TAP_URL, GAIA_UPLOAD_CONTEXT};
use crate::tap_errors::TapError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapEndpoint {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub server_context: String,
    pub upload_context: String,
}

impl TapEndpoint {
    /// Parse `[http|https]://host[:port]/path` into an endpoint.
    ///
    /// The port defaults to 80 for `http` and 443 for `https`; a trailing slash of the path is
    /// dropped.
    ///
    /// Errors
    /// ----------
    /// * [`TapError::InvalidUrl`] when the scheme is missing or not HTTP(S), or the host is empty.
    pub fn from_url(
        url: &str,
        server_context: &str,
        upload_context: &str,
    ) -> Result<Self, TapError> {
        if !url.contains("://") {
            return Err(TapError::InvalidUrl(format!(
                "`{url}` must start with \"scheme://\""
            )));
        }
        let uri: Uri = url
            .parse()
            .map_err(|e| TapError::InvalidUrl(format!("{url}: {e}")))?;

        let protocol = uri
            .scheme_str()
            .ok_or_else(|| TapError::InvalidUrl(url.to_string()))?
            .to_ascii_lowercase();
        let default_port = match protocol.as_str() {
            "http" => 80,
            "https" => 443,
            other => {
                return Err(TapError::InvalidUrl(format!(
                    "unsupported protocol `{other}` in {url}"
                )))
            }
        };
        let host = uri
            .host()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| TapError::InvalidUrl(format!("missing host in {url}")))?
            .to_string();

        Ok(TapEndpoint {
            protocol,
            host,
            port: uri.port_u16().unwrap_or(default_port),
            path: uri.path().trim_end_matches('/').to_string(),
            server_context: server_context.trim_matches('/').to_string(),
            upload_context: upload_context.trim_matches('/').to_string(),
        })
    }

    /// The ESA Gaia archive.
    pub fn gaia() -> Result<Self, TapError> {
        Self::from_url(GAIA_TAP_URL, GAIA_SERVER_CONTEXT, GAIA_UPLOAD_CONTEXT)
    }

    fn origin(&self) -> String {
        let default = matches!(
            (self.protocol.as_str(), self.port),
            ("http", 80) | ("https", 443)
        );
        if default {
            format!("{}://{}", self.protocol, self.host)
        } else {
            format!("{}://{}:{}", self.protocol, self.host, self.port)
        }
    }

    /// TAP root, e.g. `https://gea.esac.esa.int/tap-server/tap`.
    pub fn tap_endpoint(&self) -> String {
        format!("{}{}", self.origin(), self.path)
    }

    /// `sub` appended to the TAP root.
    pub fn tap_url(&self, sub: &str) -> String {
        format!("{}/{}", self.tap_endpoint(), sub.trim_start_matches('/'))
    }

    /// Server context root, e.g. `https://gea.esac.esa.int/tap-server`.
    pub fn base_url(&self) -> String {
        format!("{}/{}", self.origin(), self.server_context)
    }

    /// `sub` appended to the server context root.
    pub fn server_url(&self, sub: &str) -> String {
        format!("{}/{}", self.base_url(), sub.trim_start_matches('/'))
    }

    pub fn upload_url(&self) -> String {
        self.server_url(&self.upload_context)
    }

    /// Job resource URL for `job_id`.
    pub fn job_url(&self, job_id: &str) -> String {
        self.tap_url(&format!("async/{job_id}"))
    }
}

impl fmt::Display for TapEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TapEndpoint(\"{}\", \"{}\", \"{}\", {})",
            self.host, self.path, self.protocol, self.port
        )
    }
}

#[cfg(test)]
mod endpoint_test {
    use super::*;

    #[test]
    fn test_from_url() {
        let tap = TapEndpoint::from_url(
            "http://gea.esac.esa.int:80/tap-server/tap",
            "tap-server",
            "Upload",
        )
        .unwrap();
        assert_eq!(tap.protocol, "http");
        assert_eq!(tap.host, "gea.esac.esa.int");
        assert_eq!(tap.port, 80);
        assert_eq!(tap.path, "/tap-server/tap");
        assert_eq!(tap.tap_endpoint(), "http://gea.esac.esa.int/tap-server/tap");

        let tap = TapEndpoint::from_url(
            "https://gea.esac.esa.int/tap-server/tap",
            "tap-server",
            "Upload",
        )
        .unwrap();
        assert_eq!(tap.protocol, "https");
        assert_eq!(tap.port, 443);
        assert_eq!(tap.upload_url(), "https://gea.esac.esa.int/tap-server/Upload");
        assert_eq!(
            tap.job_url("1550663796751O"),
            "https://gea.esac.esa.int/tap-server/tap/async/1550663796751O"
        );
    }

    #[test]
    fn test_non_default_port_is_kept() {
        let tap = TapEndpoint::from_url("http://localhost:8080/tap/", "srv", "Upload").unwrap();
        assert_eq!(tap.tap_url("/sync"), "http://localhost:8080/tap/sync");
        assert_eq!(tap.server_url("login"), "http://localhost:8080/srv/login");
    }

    #[test]
    fn test_invalid_urls() {
        assert!(matches!(
            TapEndpoint::from_url("gea.esac.esa.int/tap", "a", "b"),
            Err(TapError::InvalidUrl(_))
        ));
        assert!(matches!(
            TapEndpoint::from_url("ftp://gea.esac.esa.int/tap", "a", "b"),
            Err(TapError::InvalidUrl(_))
        ));
    }
}
