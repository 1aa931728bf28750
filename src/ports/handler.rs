use std::{future::Future, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use axum::body::Body;
use hyper::{Request, Response};

/// RequestHandler defines the port (interface) for one stage of a virtual
/// host's middleware chain. The fully composed pipeline is itself a
/// `RequestHandler` and is shared read-only between request tasks.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Handle an incoming HTTP request.
    ///
    /// # Arguments
    /// * `req` - The HTTP request to handle
    /// * `remote` - Peer address of the client connection
    ///
    /// Per-request failures must be turned into error responses here;
    /// they never escalate past the handler.
    async fn handle(&self, req: Request<Body>, remote: SocketAddr) -> Response<Body>;
}

/// Shared, immutable handler reference; cheap to clone into request tasks.
pub type BoxHandler = Arc<dyn RequestHandler>;

#[async_trait]
impl<F, Fut> RequestHandler for F
where
    F: Fn(Request<Body>, SocketAddr) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response<Body>> + Send + 'static,
{
    async fn handle(&self, req: Request<Body>, remote: SocketAddr) -> Response<Body> {
        self(req, remote).await
    }
}
