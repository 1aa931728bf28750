// Integration tests for virtual-host routing from configuration to response
#[cfg(test)]
mod tests {
    use std::{net::SocketAddr, sync::Arc};

    use axum::{body::Body, extract::ConnectInfo};
    use gatehouse::{
        adapters::{pipeline, server::router_app},
        config::models::{MiddlewareConfig, VirtualHostConfig},
        core::{Route, RouteTable},
    };
    use http::{Request, StatusCode, header};
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn site(dir: &TempDir, name: &str, index: &str) -> String {
        let root = dir.path().join(name);
        std::fs::create_dir(&root).unwrap();
        std::fs::write(root.join("index.html"), index).unwrap();
        root.to_string_lossy().into_owned()
    }

    fn static_vhost(patterns: &[&str], root: String) -> VirtualHostConfig {
        VirtualHostConfig {
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            middlewares: vec![MiddlewareConfig::Static {
                root,
                list_directories: false,
            }],
        }
    }

    fn compile(vhosts: &[VirtualHostConfig]) -> Arc<RouteTable> {
        let routes = vhosts
            .iter()
            .map(|vhost| {
                let built = pipeline::build(&vhost.middlewares).unwrap();
                Route {
                    patterns: vhost.patterns.clone(),
                    handler: built.handler,
                }
            })
            .collect();
        Arc::new(RouteTable::compile(routes).unwrap())
    }

    async fn get(table: Arc<RouteTable>, host: &str, path: &str) -> (StatusCode, String) {
        let mut req = Request::builder()
            .uri(path)
            .header(header::HOST, host)
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo::<SocketAddr>("127.0.0.1:9000".parse().unwrap()));

        let response = router_app(table, None).oneshot(req).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn host_specific_patterns_beat_any_host_patterns() {
        let dir = TempDir::new().unwrap();
        let vhosts = [
            static_vhost(&["/"], site(&dir, "fallback", "fallback site")),
            static_vhost(&["example.com/"], site(&dir, "example", "example site")),
        ];
        let table = compile(&vhosts);

        let (status, body) = get(table.clone(), "example.com", "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "example site");

        let (_, body) = get(table, "other.com", "/").await;
        assert_eq!(body, "fallback site");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn longest_prefix_wins_within_a_host() {
        let dir = TempDir::new().unwrap();
        // the request path is resolved under the winning root as-is, so the
        // docs vhost needs its index at <root>/docs/index.html
        let docs_root = dir.path().join("docs_site");
        std::fs::create_dir_all(docs_root.join("docs")).unwrap();
        std::fs::write(docs_root.join("docs/index.html"), "docs site").unwrap();
        let vhosts = [
            static_vhost(&["example.com/"], site(&dir, "root", "root site")),
            static_vhost(
                &["example.com/docs/"],
                docs_root.to_string_lossy().into_owned(),
            ),
        ];
        let table = compile(&vhosts);

        let (_, body) = get(table.clone(), "example.com", "/docs/").await;
        assert_eq!(body, "docs site");

        let (_, body) = get(table, "example.com", "/").await;
        assert_eq!(body, "root site");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn host_matching_ignores_case_and_port() {
        let dir = TempDir::new().unwrap();
        let vhosts = [static_vhost(&["example.com/"], site(&dir, "s", "served"))];
        let table = compile(&vhosts);

        let (status, body) = get(table.clone(), "EXAMPLE.com:8080", "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "served");

        let (status, _) = get(table, "unknown.com", "/").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn prefixes_match_whole_segments_only() {
        let dir = TempDir::new().unwrap();
        // the request path is resolved under the root as-is, so the root
        // needs a matching api/ subdirectory
        std::fs::create_dir(dir.path().join("api")).unwrap();
        std::fs::write(dir.path().join("api/index.html"), "api site").unwrap();
        let vhosts = [static_vhost(
            &["/api"],
            dir.path().to_string_lossy().into_owned(),
        )];
        let table = compile(&vhosts);

        let (status, _) = get(table.clone(), "any.com", "/apifoo").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = get(table, "any.com", "/api/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "api site");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn certificate_hostnames_come_from_patterns() {
        let dir = TempDir::new().unwrap();
        let vhosts = [
            static_vhost(
                &["b.example.com/", "a.example.com/"],
                site(&dir, "one", "one"),
            ),
            static_vhost(&["a.example.com/api", "/health"], site(&dir, "two", "two")),
        ];
        let table = compile(&vhosts);

        // sorted, deduplicated, any-host patterns contribute nothing
        assert_eq!(table.hostnames(), ["a.example.com", "b.example.com"]);
    }
}
