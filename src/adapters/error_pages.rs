//! Custom error page middleware.
//!
//! Responses with a mapped error status get their body replaced by the
//! configured HTML file. An unreadable page file is logged and the original
//! response is passed through untouched.
use std::{collections::HashMap, net::SocketAddr, path::PathBuf};

use async_trait::async_trait;
use axum::body::Body;
use http::{Request, Response, header};

use crate::ports::handler::{BoxHandler, RequestHandler};

pub struct ErrorPages {
    pages: HashMap<u16, PathBuf>,
    next: BoxHandler,
}

impl ErrorPages {
    pub fn new(pages: HashMap<u16, PathBuf>, next: BoxHandler) -> Self {
        Self { pages, next }
    }
}

#[async_trait]
impl RequestHandler for ErrorPages {
    async fn handle(&self, req: Request<Body>, remote: SocketAddr) -> Response<Body> {
        let response = self.next.handle(req, remote).await;
        let status = response.status();
        if !status.is_client_error() && !status.is_server_error() {
            return response;
        }
        let Some(page) = self.pages.get(&status.as_u16()) else {
            return response;
        };
        match tokio::fs::read(page).await {
            Ok(content) => {
                let mut replacement = Response::new(Body::from(content));
                *replacement.status_mut() = status;
                replacement.headers_mut().insert(
                    header::CONTENT_TYPE,
                    header::HeaderValue::from_static("text/html; charset=utf-8"),
                );
                replacement
            }
            Err(error) => {
                tracing::error!(%error, page = %page.display(), %status, "could not read error page");
                response
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use http::StatusCode;
    use http_body_util::BodyExt;
    use tempfile::TempDir;

    use super::*;

    fn terminal(status: u16) -> BoxHandler {
        Arc::new(move |_req: Request<Body>, _remote: SocketAddr| async move {
            Response::builder()
                .status(status)
                .body(Body::from("original body"))
                .unwrap()
        })
    }

    async fn send(pages: &ErrorPages) -> Response<Body> {
        pages
            .handle(
                Request::builder().uri("/").body(Body::empty()).unwrap(),
                "127.0.0.1:9000".parse().unwrap(),
            )
            .await
    }

    async fn body_string(response: Response<Body>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn mapped_status_gets_the_page_body() {
        let dir = TempDir::new().unwrap();
        let page = dir.path().join("404.html");
        std::fs::write(&page, "<h1>not here</h1>").unwrap();

        let pages = ErrorPages::new(HashMap::from([(404, page)]), terminal(404));
        let response = send(&pages).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/html; charset=utf-8"
        );
        assert_eq!(body_string(response).await, "<h1>not here</h1>");
    }

    #[tokio::test]
    async fn success_and_unmapped_statuses_pass_through() {
        let dir = TempDir::new().unwrap();
        let page = dir.path().join("404.html");
        std::fs::write(&page, "<h1>not here</h1>").unwrap();
        let mapping = HashMap::from([(404, page)]);

        for status in [200, 500] {
            let pages = ErrorPages::new(mapping.clone(), terminal(status));
            let response = send(&pages).await;
            assert_eq!(response.status().as_u16(), status);
            assert_eq!(body_string(response).await, "original body");
        }
    }

    #[tokio::test]
    async fn unreadable_page_passes_the_original_through() {
        let pages = ErrorPages::new(
            HashMap::from([(404, PathBuf::from("/does/not/exist.html"))]),
            terminal(404),
        );
        let response = send(&pages).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_string(response).await, "original body");
    }
}
