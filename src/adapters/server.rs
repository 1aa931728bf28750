//! Listener setup and the per-cycle serving orchestration.
//!
//! One reload cycle builds everything from configuration (pipelines, route
//! table, listeners), spawns the listeners and background tasks into a
//! [`TaskGroup`] and waits for the group to drain. TLS is served through
//! rustls-acme with TLS-ALPN-01 and only ever when the operator has
//! accepted the certificate authority's terms; in that mode the plain HTTP
//! listener degrades to a permanent redirect.
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use axum::{
    Router,
    body::Body,
    extract::{ConnectInfo, Request},
    response::Response,
    routing::any,
};
use eyre::{Context as _, Result, ensure};
use futures_util::StreamExt;
use http::{StatusCode, header};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto,
};
use rustls_acme::{AcmeConfig as RustlsAcmeConfig, caches::DirCache};
use tokio::{net::TcpListener, task::JoinSet};
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::{
    compat::{FuturesAsyncReadCompatExt, TokioAsyncReadCompatExt},
    sync::CancellationToken,
};
use tower::ServiceExt as _;
use tower_http::{compression::CompressionLayer, timeout::TimeoutLayer};

use crate::{
    adapters::pipeline,
    config::models::{AcmeConfig, ServerConfig},
    core::{
        router::{Route, RouteTable},
        supervisor::TaskGroup,
    },
};

/// Bind the `index`-th listener, preferring a socket inherited through
/// systemd socket activation (fds starting at 3) over a fresh bind.
pub async fn bind_listener(addr: &str, index: usize) -> Result<TcpListener> {
    #[cfg(unix)]
    if let Some(inherited) = activated_socket(index)? {
        tracing::info!(addr, index, "using socket-activated listener");
        return TcpListener::from_std(inherited)
            .wrap_err("could not register inherited socket with the runtime");
    }
    TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("could not bind {addr}"))
}

/// A socket passed by the service manager, if the activation environment
/// names this process and carries enough descriptors.
#[cfg(unix)]
fn activated_socket(index: usize) -> Result<Option<std::net::TcpListener>> {
    let listen_pid = std::env::var("LISTEN_PID").ok().and_then(|v| v.parse::<u32>().ok());
    let listen_fds = std::env::var("LISTEN_FDS").ok().and_then(|v| v.parse::<usize>().ok());
    let (Some(pid), Some(fds)) = (listen_pid, listen_fds) else {
        return Ok(None);
    };
    if pid != std::process::id() || index >= fds {
        return Ok(None);
    }
    // First activated descriptor is always fd 3.
    Ok(Some(adopt_fd(3 + index as i32)?))
}

/// Adopt an inherited descriptor by duplicating it. The original fd stays
/// open and owned by the activation environment, so later reload cycles can
/// adopt it again after this cycle's listener has been dropped.
#[cfg(unix)]
fn adopt_fd(fd: std::os::fd::RawFd) -> Result<std::net::TcpListener> {
    use std::os::fd::BorrowedFd;

    let owned = unsafe { BorrowedFd::borrow_raw(fd) }
        .try_clone_to_owned()
        .wrap_err("could not duplicate inherited socket")?;
    let listener = std::net::TcpListener::from(owned);
    listener
        .set_nonblocking(true)
        .wrap_err("could not set inherited socket non-blocking")?;
    Ok(listener)
}

/// The request multiplexer: every request is matched against the route
/// table and handed to the winning virtual host's pipeline.
pub fn router_app(table: Arc<RouteTable>, request_timeout: Option<Duration>) -> Router {
    let make_route = |table: Arc<RouteTable>| {
        any(
            move |ConnectInfo(remote): ConnectInfo<SocketAddr>, req: Request| {
                let table = table.clone();
                async move { dispatch(&table, req, remote).await }
            },
        )
    };

    let mut app = Router::new()
        .route("/{*path}", make_route(table.clone()))
        .route("/", make_route(table))
        .layer(CompressionLayer::new());
    if let Some(timeout) = request_timeout {
        app = app.layer(TimeoutLayer::new(timeout));
    }
    app
}

async fn dispatch(table: &RouteTable, req: Request, remote: SocketAddr) -> Response<Body> {
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri().authority().map(|a| a.to_string()));
    let path = req.uri().path().to_string();

    match table.lookup(host.as_deref(), &path) {
        Some(handler) => handler.handle(req, remote).await,
        None => {
            let mut response = Response::new(Body::from("404 not found"));
            *response.status_mut() = StatusCode::NOT_FOUND;
            response
        }
    }
}

/// The app served on the plain HTTP port while TLS is active: a permanent
/// redirect to the HTTPS origin, preserving host, path and query.
pub fn redirect_app(https_addr: &str) -> Result<Router> {
    let https_port = https_addr
        .parse::<SocketAddr>()
        .wrap_err_with(|| format!("invalid https address {https_addr:?}"))?
        .port();

    Ok(Router::new().fallback(move |req: Request| async move {
        let Some(host) = req
            .headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(host_without_port)
        else {
            let mut response = Response::new(Body::from("400 bad request"));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return response;
        };
        let authority = if https_port == 443 {
            host.to_string()
        } else {
            format!("{host}:{https_port}")
        };
        let path_and_query = req
            .uri()
            .path_and_query()
            .map_or("/", |pq| pq.as_str());
        let location = format!("https://{authority}{path_and_query}");

        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::PERMANENT_REDIRECT;
        if let Ok(value) = location.parse() {
            response.headers_mut().insert(header::LOCATION, value);
        }
        response
    }))
}

fn host_without_port(host: &str) -> &str {
    if let Some(end) = host.find(']') {
        return &host[..=end];
    }
    host.split(':').next().unwrap_or(host)
}

/// Serve plain HTTP until the token cancels, then give in-flight requests
/// the grace period before dropping them.
pub async fn serve_http(
    listener: TcpListener,
    app: Router,
    token: CancellationToken,
    grace: Duration,
) -> Result<()> {
    let shutdown = token.clone();
    let serve = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await });

    bounded(serve, token, grace).await
}

/// Serve HTTPS with certificates obtained (and renewed) through ACME
/// TLS-ALPN-01, scoped to exactly the route table's hostname set.
pub async fn serve_https(
    listener: TcpListener,
    app: Router,
    hostnames: Vec<String>,
    acme: AcmeConfig,
    token: CancellationToken,
    grace: Duration,
) -> Result<()> {
    ensure!(
        !hostnames.is_empty(),
        "tls requires at least one host-specific route pattern"
    );
    let local_addr = listener.local_addr().wrap_err("could not get local addr")?;
    tracing::info!(%local_addr, ?hostnames, staging = acme.staging, "starting acme-managed tls listener");

    let state = RustlsAcmeConfig::new(hostnames)
        .contact([format!("mailto:{}", acme.email)])
        .cache_option(Some(DirCache::new(acme.cache_dir.clone())))
        .directory_lets_encrypt(!acme.staging)
        .state();
    let incoming = state.incoming(
        TcpListenerStream::new(listener).map(|res| res.map(|s| s.compat())),
        vec![],
    );
    let mut accepted = incoming
        .filter_map(|res| async {
            match res {
                Ok(stream) => {
                    let stream = stream.compat();
                    let addr = stream
                        .get_ref()
                        .get_ref()
                        .0
                        .get_ref()
                        .peer_addr()
                        .unwrap_or(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0));
                    Some((stream, addr))
                }
                Err(e) => {
                    tracing::debug!("tls accept error: {}", e);
                    None
                }
            }
        })
        .boxed();

    // axum's serve loop only attaches connect info to its own TcpListener,
    // so accepted TLS connections are served through hyper directly, with
    // the peer address injected as a request extension.
    let mut connections = JoinSet::new();
    loop {
        let (stream, remote) = tokio::select! {
            () = token.cancelled() => break,
            conn = accepted.next() => match conn {
                Some(conn) => conn,
                None => break,
            },
            Some(_) = connections.join_next() => continue,
        };

        let app = app.clone();
        connections.spawn(async move {
            let service =
                hyper::service::service_fn(move |mut req: Request<hyper::body::Incoming>| {
                    req.extensions_mut().insert(ConnectInfo(remote));
                    app.clone().oneshot(req.map(Body::new))
                });
            if let Err(error) = auto::Builder::new(TokioExecutor::new())
                .serve_connection_with_upgrades(TokioIo::new(stream), service)
                .await
            {
                tracing::debug!("connection error: {}", error);
            }
        });
    }

    let drained = tokio::time::timeout(grace, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        tracing::warn!("shutdown grace period elapsed, dropping remaining connections");
        connections.abort_all();
    }
    Ok(())
}

async fn bounded<F>(serve: F, token: CancellationToken, grace: Duration) -> Result<()>
where
    F: IntoFuture<Output = std::io::Result<()>>,
{
    let serve = serve.into_future();
    tokio::select! {
        result = serve => result.wrap_err("server error"),
        _ = async { token.cancelled().await; tokio::time::sleep(grace).await; } => {
            tracing::warn!("shutdown grace period elapsed, dropping remaining connections");
            Ok(())
        }
    }
}

/// One complete serving cycle: build everything from `config`, run until a
/// task fails or `parent` cancels, and return only after every spawned task
/// has drained.
pub async fn run_cycle(config: &ServerConfig, parent: &CancellationToken) -> Result<()> {
    let mut group = TaskGroup::new(parent);

    let mut routes = Vec::new();
    for vhost in &config.virtual_hosts {
        let built = pipeline::build(&vhost.middlewares)
            .wrap_err_with(|| format!("virtual host {:?}", vhost.patterns))?;
        for background in built.backgrounds {
            group.spawn(background);
        }
        routes.push(Route {
            patterns: vhost.patterns.clone(),
            handler: built.handler,
        });
    }
    let table = Arc::new(RouteTable::compile(routes)?);

    let request_timeout = config.timeouts.request_timeout()?;
    let grace = config.timeouts.shutdown_grace_period()?;

    let http_listener = bind_listener(&config.http.http_addr, 0).await?;
    tracing::info!(
        addr = %http_listener.local_addr().map(|a| a.to_string()).unwrap_or_default(),
        tls = config.acme.accept_tos,
        "http listener bound"
    );

    if config.acme.accept_tos {
        let https_listener = bind_listener(&config.http.https_addr, 1).await?;
        let app = router_app(table.clone(), request_timeout);
        let hostnames = table.hostnames().to_vec();
        let acme = config.acme.clone();
        group.spawn(move |token| serve_https(https_listener, app, hostnames, acme, token, grace));

        let redirect = redirect_app(&config.http.https_addr)?;
        group.spawn(move |token| serve_http(http_listener, redirect, token, grace));
    } else {
        let app = router_app(table, request_timeout);
        group.spawn(move |token| serve_http(http_listener, app, token, grace));
    }

    group.wait().await
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::ports::handler::BoxHandler;

    fn tagged(tag: &'static str) -> BoxHandler {
        Arc::new(move |_req: http::Request<Body>, _remote: SocketAddr| async move {
            Response::new(Body::from(tag))
        })
    }

    fn table() -> Arc<RouteTable> {
        Arc::new(
            RouteTable::compile(vec![
                Route {
                    patterns: vec!["example.com/".to_string()],
                    handler: tagged("example"),
                },
                Route {
                    patterns: vec!["/api".to_string()],
                    handler: tagged("api"),
                },
            ])
            .unwrap(),
        )
    }

    fn with_remote(mut req: http::Request<Body>) -> http::Request<Body> {
        req.extensions_mut()
            .insert(ConnectInfo::<SocketAddr>("127.0.0.1:9000".parse().unwrap()));
        req
    }

    async fn send(app: Router, req: http::Request<Body>) -> (StatusCode, String) {
        let response = app.oneshot(with_remote(req)).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    #[tokio::test]
    async fn routes_by_host_header() {
        let app = router_app(table(), None);
        let req = http::Request::builder()
            .uri("/index.html")
            .header(header::HOST, "example.com")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "example");
    }

    #[tokio::test]
    async fn falls_back_to_any_host_routes() {
        let app = router_app(table(), None);
        let req = http::Request::builder()
            .uri("/api/users")
            .header(header::HOST, "other.com")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "api");
    }

    #[tokio::test]
    async fn unmatched_requests_get_404() {
        let app = router_app(table(), None);
        let req = http::Request::builder()
            .uri("/nope")
            .header(header::HOST, "other.com")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(app, req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn redirect_preserves_host_path_and_query() {
        let app = redirect_app("0.0.0.0:443").unwrap();
        let req = http::Request::builder()
            .uri("/a/b?x=1")
            .header(header::HOST, "example.com:8080")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(with_remote(req)).await.unwrap();
        assert_eq!(response.status(), StatusCode::PERMANENT_REDIRECT);
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://example.com/a/b?x=1"
        );
    }

    #[tokio::test]
    async fn redirect_keeps_non_default_https_port() {
        let app = redirect_app("0.0.0.0:8443").unwrap();
        let req = http::Request::builder()
            .uri("/")
            .header(header::HOST, "example.com")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(with_remote(req)).await.unwrap();
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://example.com:8443/"
        );
    }

    #[tokio::test]
    async fn bind_listener_falls_back_to_plain_bind() {
        let listener = bind_listener("127.0.0.1:0", 0).await.unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn inherited_fd_can_be_adopted_by_successive_cycles() {
        use std::os::fd::AsRawFd;

        let origin = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = origin.local_addr().unwrap();
        let fd = origin.as_raw_fd();

        // One cycle adopts the descriptor and drops its listener on drain.
        let first = adopt_fd(fd).unwrap();
        drop(first);

        // The inherited descriptor is still open, so the next cycle can
        // adopt it too and accept connections on it.
        let second = TcpListener::from_std(adopt_fd(fd).unwrap()).unwrap();
        let client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (_conn, peer) = second.accept().await.unwrap();
        assert_eq!(peer, client.local_addr().unwrap());
    }
}
