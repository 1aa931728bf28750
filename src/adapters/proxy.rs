//! Reverse proxy middleware using Hyper with Rustls (HTTP/1.1 + HTTP/2).
//!
//! Requests are rewritten onto the configured upstream: the upstream's
//! scheme, authority and base path replace the incoming ones, hop-by-hop
//! headers are stripped and `X-Forwarded-*` headers are added. Upstream
//! failures become `502 Bad Gateway` responses.
use std::net::SocketAddr;

use async_trait::async_trait;
use axum::body::Body;
use eyre::{Result, WrapErr, ensure, eyre};
use http::{Request, Response, StatusCode, Uri, Version, header, header::HeaderValue};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;
use url::Url;

use crate::ports::handler::RequestHandler;

const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub struct ReverseProxy {
    upstream: Url,
    client: Client<HttpsConnector<HttpConnector>, Body>,
}

impl ReverseProxy {
    pub fn new(upstream: &str) -> Result<Self> {
        let upstream = Url::parse(upstream)
            .wrap_err_with(|| format!("invalid upstream url {upstream:?}"))?;
        ensure!(
            matches!(upstream.scheme(), "http" | "https"),
            "upstream {upstream} must use http or https"
        );
        ensure!(upstream.host_str().is_some(), "upstream {upstream} has no host");

        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();
        for cert in native_certs.certs {
            if root_cert_store.add(cert).is_err() {
                tracing::warn!("failed to add native certificate to root store");
            }
        }
        if !native_certs.errors.is_empty() {
            tracing::warn!(errors = ?native_certs.errors, "some native certificates failed to load");
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();
        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);
        let client = Client::builder(TokioExecutor::new()).build::<_, Body>(https_connector);

        Ok(Self { upstream, client })
    }

    fn authority(&self) -> String {
        match (self.upstream.host_str(), self.upstream.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            _ => String::new(),
        }
    }

    /// Rewrite an incoming request for the upstream connection.
    fn outgoing_request(&self, req: Request<Body>, remote: SocketAddr) -> Result<Request<Body>> {
        let original_host = req
            .headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let path = join_paths(self.upstream.path(), req.uri().path());
        let path_and_query = match req.uri().query() {
            Some(query) => format!("{path}?{query}"),
            None => path,
        };
        let uri = Uri::builder()
            .scheme(self.upstream.scheme())
            .authority(self.authority())
            .path_and_query(path_and_query)
            .build()
            .wrap_err("could not build upstream uri")?;

        let (mut parts, body) = req.into_parts();
        parts.uri = uri;
        // ALPN negotiates the actual protocol version.
        parts.version = Version::HTTP_11;
        for name in HOP_BY_HOP_HEADERS {
            parts.headers.remove(*name);
        }
        parts
            .headers
            .insert(header::HOST, HeaderValue::from_str(&self.authority())?);

        let forwarded_for = match parts.headers.get("x-forwarded-for").and_then(|v| v.to_str().ok())
        {
            Some(existing) => format!("{existing}, {}", remote.ip()),
            None => remote.ip().to_string(),
        };
        parts
            .headers
            .insert("x-forwarded-for", HeaderValue::from_str(&forwarded_for)?);
        if !parts.headers.contains_key("x-forwarded-proto") {
            parts
                .headers
                .insert("x-forwarded-proto", HeaderValue::from_static("http"));
        }
        if let Some(host) = original_host {
            parts.headers.insert(
                "x-forwarded-host",
                HeaderValue::from_str(&host).map_err(|e| eyre!("invalid host header: {e}"))?,
            );
        }

        Ok(Request::from_parts(parts, body))
    }
}

#[async_trait]
impl RequestHandler for ReverseProxy {
    async fn handle(&self, req: Request<Body>, remote: SocketAddr) -> Response<Body> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let outgoing = match self.outgoing_request(req, remote) {
            Ok(outgoing) => outgoing,
            Err(error) => {
                tracing::error!(%error, %method, %path, "could not rewrite request for upstream");
                return bad_gateway();
            }
        };

        match self.client.request(outgoing).await {
            Ok(response) => {
                let (mut parts, body) = response.into_parts();
                // The client already decoded the framing.
                parts.headers.remove(header::TRANSFER_ENCODING);
                Response::from_parts(parts, Body::new(body))
            }
            Err(error) => {
                tracing::error!(%error, upstream = %self.upstream, %method, %path, "upstream request failed");
                bad_gateway()
            }
        }
    }
}

fn bad_gateway() -> Response<Body> {
    let mut response = Response::new(Body::from("502 bad gateway"));
    *response.status_mut() = StatusCode::BAD_GATEWAY;
    response
}

/// Join a base path and a request path with exactly one slash between them.
fn join_paths(base: &str, request: &str) -> String {
    match (base.ends_with('/'), request.starts_with('/')) {
        (true, true) => format!("{base}{}", &request[1..]),
        (false, false) => format!("{base}/{request}"),
        _ => format!("{base}{request}"),
    }
}
