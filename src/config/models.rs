//! Configuration data structures for gatehouse.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files. They are
//! intentionally serde-friendly and include defaults so that minimal configs remain concise.
//! A full document looks like:
//!
//! ```toml
//! [http]
//! http_addr = "0.0.0.0:8080"
//!
//! [[virtual_hosts]]
//! patterns = ["example.com/", "/health"]
//!
//! [[virtual_hosts.middlewares]]
//! kind = "static"
//! root = "./public"
//! ```
use std::{collections::HashMap, time::Duration};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

fn default_http_addr() -> String {
    "0.0.0.0:80".to_string()
}

fn default_https_addr() -> String {
    "0.0.0.0:443".to_string()
}

fn default_shutdown_grace() -> String {
    "5s".to_string()
}

fn default_cache_dir() -> String {
    "./acme-cache".to_string()
}

fn default_realm() -> String {
    "restricted".to_string()
}

/// Top-level gateway configuration. Rebuilt from scratch on every reload
/// cycle; nothing in here survives across cycles.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ServerConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub acme: AcmeConfig,
    #[serde(default)]
    pub virtual_hosts: Vec<VirtualHostConfig>,
}

/// Listener bind addresses.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    /// Address for the plain HTTP listener
    pub http_addr: String,
    /// Address for the HTTPS listener (used only when ACME consent is given)
    pub https_addr: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            https_addr: default_https_addr(),
        }
    }
}

/// Timeout settings, expressed as humantime strings (e.g. "30s", "2m").
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Per-request deadline; unset means no request timeout
    pub request: Option<String>,
    /// How long in-flight requests get to finish after a listener is told to stop
    pub shutdown_grace: String,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request: None,
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

impl TimeoutConfig {
    pub fn request_timeout(&self) -> Result<Option<Duration>> {
        self.request
            .as_deref()
            .map(|s| {
                humantime::parse_duration(s)
                    .with_context(|| format!("invalid request timeout: {s:?}"))
            })
            .transpose()
    }

    pub fn shutdown_grace_period(&self) -> Result<Duration> {
        humantime::parse_duration(&self.shutdown_grace)
            .with_context(|| format!("invalid shutdown grace period: {:?}", self.shutdown_grace))
    }
}

/// ACME (e.g. Let's Encrypt) certificate management configuration.
///
/// TLS stays off until the operator explicitly sets `accept_tos`; the gateway
/// never contacts a certificate authority without that consent.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AcmeConfig {
    /// Explicit consent to the certificate authority's terms of service
    pub accept_tos: bool,
    /// Contact email for the ACME account
    pub email: String,
    /// Directory where issued certificates and account keys are cached
    pub cache_dir: String,
    /// Use the CA staging environment (rate-limit friendly)
    pub staging: bool,
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            accept_tos: false,
            email: String::new(),
            cache_dir: default_cache_dir(),
            staging: false,
        }
    }
}

/// One virtual host: an ordered set of route patterns plus an unordered
/// set of middleware entries (at most one per kind).
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct VirtualHostConfig {
    /// Route patterns, each `"host/path-prefix"` or `"/path-prefix"`
    pub patterns: Vec<String>,
    #[serde(default)]
    pub middlewares: Vec<MiddlewareConfig>,
}

/// Middleware definitions (tagged enum). A `kind` outside this closed set is
/// a hard configuration error at decode time.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind")]
#[serde(rename_all = "snake_case")]
pub enum MiddlewareConfig {
    Static {
        root: String,
        #[serde(default)]
        list_directories: bool,
    },
    Proxy {
        upstream: String,
    },
    BasicAuth {
        user: String,
        password: String,
        #[serde(default = "default_realm")]
        realm: String,
    },
    Log {
        path: String,
        #[serde(default)]
        format: Option<String>,
    },
    Errors {
        /// Status code to replacement page path, e.g. `404 = "./pages/404.html"`.
        /// Keys stay strings at this layer; TOML/JSON map keys always decode
        /// as strings and are parsed during validation.
        pages: HashMap<String, String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_middleware_kind_is_rejected() {
        let raw = serde_json::json!({ "kind": "telemetry", "endpoint": "x" });
        let parsed: Result<MiddlewareConfig, _> = serde_json::from_value(raw);
        assert!(parsed.is_err());
    }

    #[test]
    fn middleware_kind_tags_decode() {
        let raw = serde_json::json!({ "kind": "basic_auth", "user": "u", "password": "p" });
        let parsed: MiddlewareConfig = serde_json::from_value(raw).unwrap();
        match parsed {
            MiddlewareConfig::BasicAuth { realm, .. } => assert_eq!(realm, "restricted"),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn timeout_strings_parse() {
        let timeouts = TimeoutConfig {
            request: Some("30s".to_string()),
            shutdown_grace: "5s".to_string(),
        };
        assert_eq!(
            timeouts.request_timeout().unwrap(),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            timeouts.shutdown_grace_period().unwrap(),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn bad_timeout_string_errors() {
        let timeouts = TimeoutConfig {
            request: Some("half an eternity".to_string()),
            shutdown_grace: default_shutdown_grace(),
        };
        assert!(timeouts.request_timeout().is_err());
    }
}
