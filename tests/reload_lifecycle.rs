// Integration tests for the serving cycle lifecycle: a cycle drains
// completely on cancellation and releases its listeners, so the next cycle
// can bind the same address.
#[cfg(test)]
mod tests {
    use std::{net::SocketAddr, sync::Arc, time::Duration};

    use axum::body::Body;
    use gatehouse::{
        adapters::server::{router_app, serve_http},
        core::{Route, RouteTable, TaskGroup},
        ports::handler::BoxHandler,
    };
    use http::{Request, Response};
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
    };
    use tokio_util::sync::CancellationToken;

    fn tagged(tag: &'static str) -> BoxHandler {
        Arc::new(move |_req: Request<Body>, _remote: SocketAddr| async move {
            Response::new(Body::from(tag))
        })
    }

    fn app_for(tag: &'static str) -> axum::Router {
        let table = RouteTable::compile(vec![Route {
            patterns: vec!["/".to_string()],
            handler: tagged(tag),
        }])
        .unwrap();
        router_app(Arc::new(table), None)
    }

    async fn http_get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    async fn run_one_cycle(addr: SocketAddr, tag: &'static str) -> SocketAddr {
        let parent = CancellationToken::new();
        let mut group = TaskGroup::new(&parent);

        let listener = TcpListener::bind(addr).await.unwrap();
        let bound = listener.local_addr().unwrap();
        group.spawn(|token| serve_http(listener, app_for(tag), token, Duration::from_millis(500)));

        let response = http_get(bound, "/").await;
        assert!(response.contains("200 OK"), "unexpected response: {response}");
        assert!(response.contains(tag), "unexpected response: {response}");

        parent.cancel();
        group.wait().await.unwrap();
        bound
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn a_drained_cycle_releases_its_listener_for_the_next_one() {
        let first = run_one_cycle("127.0.0.1:0".parse().unwrap(), "cycle-1").await;
        // The previous cycle fully drained, so its exact port is free again.
        let second = run_one_cycle(first, "cycle-2").await;
        assert_eq!(first, second);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn a_failing_sibling_tears_the_server_down() {
        let parent = CancellationToken::new();
        let mut group = TaskGroup::new(&parent);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let bound = listener.local_addr().unwrap();
        group.spawn(|token| {
            serve_http(listener, app_for("doomed"), token, Duration::from_millis(500))
        });
        group.spawn(|_token| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err(eyre::eyre!("rotation failed"))
        });

        let outcome = group.wait().await;
        assert!(outcome.is_err());
        assert!(outcome.unwrap_err().to_string().contains("rotation failed"));

        // The listener went down with the group.
        assert!(TcpStream::connect(bound).await.is_err());

        // The failure stays inside the group's scope.
        assert!(!parent.is_cancelled());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancelling_the_parent_stops_an_idle_server_cleanly() {
        let parent = CancellationToken::new();
        let mut group = TaskGroup::new(&parent);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        group.spawn(|token| serve_http(listener, app_for("idle"), token, Duration::from_secs(5)));

        parent.cancel();
        group.wait().await.unwrap();
    }
}
