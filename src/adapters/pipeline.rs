//! Builds a virtual host's handler chain from its middleware configuration.
//!
//! Construction is two-phase: the pure planning step orders the entries and
//! rejects invalid combinations, then each planned entry is instantiated and
//! composed inside-out. The content producer sits innermost, `basic_auth`
//! wraps it, `log` wraps that and `errors` is outermost, so a request flows
//! errors -> log -> basic_auth -> static/proxy regardless of configuration
//! file order. Setup failures (unreadable static root, malformed upstream)
//! abort the whole run; they never become per-request errors.
use std::{collections::HashMap, net::SocketAddr, path::PathBuf, sync::Arc};

use axum::body::Body;
use eyre::{Result, WrapErr};
use futures_util::FutureExt;
use http::{Request, Response, StatusCode};
use tokio_util::sync::CancellationToken;

use crate::{
    adapters::{
        access_log::AccessLog, basic_auth::BasicAuth, error_pages::ErrorPages,
        log_writer::RotatingLogWriter, proxy::ReverseProxy, static_files::StaticFiles,
    },
    config::models::MiddlewareConfig,
    core::{log_format::LogTemplate, middleware},
    ports::handler::BoxHandler,
};

/// A long-running task owned by a pipeline, handed the run's cancellation
/// scope when spawned (currently only the access log rotation loop).
pub type Background =
    Box<dyn FnOnce(CancellationToken) -> futures_util::future::BoxFuture<'static, Result<()>> + Send>;

pub struct Pipeline {
    pub handler: BoxHandler,
    pub backgrounds: Vec<Background>,
}

/// Instantiate the middleware chain for one virtual host.
pub fn build(middlewares: &[MiddlewareConfig]) -> Result<Pipeline> {
    let planned = middleware::plan(middlewares)?;

    let mut handler = not_found_terminal();
    let mut backgrounds: Vec<Background> = Vec::new();

    for config in planned {
        handler = match config {
            MiddlewareConfig::Static { root, list_directories } => {
                Arc::new(StaticFiles::new(root.as_str(), *list_directories)?)
            }
            MiddlewareConfig::Proxy { upstream } => Arc::new(ReverseProxy::new(upstream)?),
            MiddlewareConfig::BasicAuth { user, password, realm } => {
                Arc::new(BasicAuth::new(user, password, realm, handler))
            }
            MiddlewareConfig::Log { path, format } => {
                let writer = RotatingLogWriter::open(path)?;
                let template = LogTemplate::parse(format.as_deref())?;
                let rotator = writer.clone();
                backgrounds
                    .push(Box::new(move |token: CancellationToken| rotator.run(token).boxed()));
                Arc::new(AccessLog::new(writer, template, handler))
            }
            MiddlewareConfig::Errors { pages } => {
                let pages = pages
                    .iter()
                    .map(|(status, path)| {
                        let status = status
                            .parse::<u16>()
                            .wrap_err_with(|| format!("invalid error page status {status:?}"))?;
                        Ok((status, PathBuf::from(path)))
                    })
                    .collect::<Result<HashMap<u16, PathBuf>>>()?;
                Arc::new(ErrorPages::new(pages, handler))
            }
        };
    }

    Ok(Pipeline { handler, backgrounds })
}

/// The innermost handler when no content-producing middleware is configured.
fn not_found_terminal() -> BoxHandler {
    Arc::new(|_req: Request<Body>, _remote: SocketAddr| async {
        let mut response = Response::new(Body::from("404 not found"));
        *response.status_mut() = StatusCode::NOT_FOUND;
        response
    })
}
