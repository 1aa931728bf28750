//! Static file serving, backed by `tower_http::services::ServeDir`.
//!
//! Adds what `ServeDir` does not cover: optional directory listings when no
//! index file exists, and an explicit reject of path traversal segments.
use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use axum::body::Body;
use eyre::{Result, ensure};
use http::{Request, Response, StatusCode, header};
use tower::ServiceExt;
use tower_http::services::ServeDir;

use crate::ports::handler::RequestHandler;

pub struct StaticFiles {
    root: PathBuf,
    list_directories: bool,
    serve: ServeDir,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>, list_directories: bool) -> Result<Self> {
        let root = root.into();
        ensure!(root.is_dir(), "static root {} is not a directory", root.display());
        let serve = ServeDir::new(&root).append_index_html_on_directories(true);
        Ok(Self { root, list_directories, serve })
    }

    fn local_path(&self, request_path: &str) -> PathBuf {
        let mut path = self.root.clone();
        for segment in request_path.split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path
    }

    async fn render_listing(&self, request_path: &str, dir: &Path) -> Response<Body> {
        let mut entries = Vec::new();
        if self.list_directories {
            let mut reader = match tokio::fs::read_dir(dir).await {
                Ok(reader) => reader,
                Err(error) => {
                    tracing::error!(%error, dir = %dir.display(), "could not list directory");
                    return status_response(StatusCode::INTERNAL_SERVER_ERROR);
                }
            };
            while let Ok(Some(entry)) = reader.next_entry().await {
                let mut name = entry.file_name().to_string_lossy().into_owned();
                if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                    name.push('/');
                }
                entries.push(name);
            }
            entries.sort();
        }

        let mut html = format!(
            "<!DOCTYPE html>\n<html><head><title>Index of {request_path}</title></head><body>\n<h1>Index of {request_path}</h1>\n<ul>\n"
        );
        for name in &entries {
            html.push_str(&format!("<li><a href=\"{name}\">{name}</a></li>\n"));
        }
        html.push_str("</ul>\n</body></html>\n");

        let mut response = Response::new(Body::from(html));
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("text/html; charset=utf-8"),
        );
        response
    }
}

#[async_trait]
impl RequestHandler for StaticFiles {
    async fn handle(&self, req: Request<Body>, _remote: SocketAddr) -> Response<Body> {
        let request_path = req.uri().path().to_string();
        if request_path.split('/').any(|segment| segment == "..") {
            return status_response(StatusCode::BAD_REQUEST);
        }

        let local = self.local_path(&request_path);
        if local.is_dir() {
            if !request_path.ends_with('/') {
                return redirect(&format!("{request_path}/"));
            }
            if !local.join("index.html").is_file() {
                return self.render_listing(&request_path, &local).await;
            }
        }

        match self.serve.clone().oneshot(req).await {
            Ok(response) => response.map(Body::new),
            Err(infallible) => match infallible {},
        }
    }
}

fn status_response(status: StatusCode) -> Response<Body> {
    let text = format!(
        "{} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("error")
    );
    let mut response = Response::new(Body::from(text));
    *response.status_mut() = status;
    response
}

fn redirect(location: &str) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::MOVED_PERMANENTLY;
    if let Ok(value) = location.parse() {
        response.headers_mut().insert(header::LOCATION, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;
    use tempfile::TempDir;

    use super::*;

    fn site() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("page.html"), "<p>page</p>").unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/a.txt"), "alpha").unwrap();
        std::fs::write(dir.path().join("docs/b.txt"), "beta").unwrap();
        std::fs::create_dir(dir.path().join("app")).unwrap();
        std::fs::write(dir.path().join("app/index.html"), "<p>app index</p>").unwrap();
        dir
    }

    async fn get(files: &StaticFiles, path: &str) -> (StatusCode, String) {
        let response = files
            .handle(
                Request::builder().uri(path).body(Body::empty()).unwrap(),
                "127.0.0.1:9000".parse().unwrap(),
            )
            .await;
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    #[tokio::test]
    async fn serves_existing_files() {
        let dir = site();
        let files = StaticFiles::new(dir.path(), false).unwrap();
        let (status, body) = get(&files, "/page.html").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "<p>page</p>");
    }

    #[tokio::test]
    async fn serves_index_for_directories() {
        let dir = site();
        let files = StaticFiles::new(dir.path(), false).unwrap();
        let (status, body) = get(&files, "/app/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "<p>app index</p>");
    }

    #[tokio::test]
    async fn directory_without_trailing_slash_redirects() {
        let dir = site();
        let files = StaticFiles::new(dir.path(), true).unwrap();
        let response = files
            .handle(
                Request::builder().uri("/docs").body(Body::empty()).unwrap(),
                "127.0.0.1:9000".parse().unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers()[header::LOCATION], "/docs/");
    }

    #[tokio::test]
    async fn lists_directories_when_enabled() {
        let dir = site();
        let files = StaticFiles::new(dir.path(), true).unwrap();
        let (status, body) = get(&files, "/docs/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(r#"<a href="a.txt">a.txt</a>"#));
        assert!(body.contains(r#"<a href="b.txt">b.txt</a>"#));
    }

    #[tokio::test]
    async fn hides_entries_when_listing_disabled() {
        let dir = site();
        let files = StaticFiles::new(dir.path(), false).unwrap();
        let (status, body) = get(&files, "/docs/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(!body.contains("a.txt"));
        assert!(!body.contains("b.txt"));
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let dir = site();
        let files = StaticFiles::new(dir.path(), true).unwrap();
        let (status, _) = get(&files, "/../etc/passwd").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = site();
        let files = StaticFiles::new(dir.path(), false).unwrap();
        let (status, _) = get(&files, "/nope.html").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn root_must_be_a_directory() {
        assert!(StaticFiles::new("/does/not/exist", false).is_err());
    }
}
