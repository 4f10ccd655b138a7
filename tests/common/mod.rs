//! Shared utilities for integration tests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use api_aggregator::config::{AggregatorConfig, UpstreamConfig};
use api_aggregator::upstream::ShapeRule;

/// Programmable responses keyed by request path; unknown paths answer 404.
#[derive(Clone, Default)]
pub struct MockRoutes {
    responses: Arc<Mutex<HashMap<String, (u16, String)>>>,
    hits: Arc<Mutex<HashMap<String, u32>>>,
}

#[allow(dead_code)]
impl MockRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, path: &str, status: u16, body: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(path.to_string(), (status, body.to_string()));
    }

    pub fn hits(&self, path: &str) -> u32 {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    fn respond(&self, path: &str) -> (u16, String) {
        *self.hits.lock().unwrap().entry(path.to_string()).or_default() += 1;
        self.responses
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or((404, r#"{"error":"not found"}"#.to_string()))
    }
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "200 OK",
        404 => "404 Not Found",
        429 => "429 Too Many Requests",
        500 => "500 Internal Server Error",
        502 => "502 Bad Gateway",
        503 => "503 Service Unavailable",
        _ => "200 OK",
    }
}

async fn read_path(socket: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let head = String::from_utf8_lossy(&buf);
    let request_line = head.lines().next()?;
    request_line.split_whitespace().nth(1).map(str::to_string)
}

/// Start a mock upstream API on an ephemeral port.
pub async fn start_mock_api(routes: MockRoutes) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let routes = routes.clone();
                    tokio::spawn(async move {
                        let Some(path) = read_path(&mut socket).await else {
                            return;
                        };
                        let (status, body) = routes.respond(&path);
                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text(status),
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Ten upstreams `svc0-api`..`svc9-api` on `/api/0`..`/api/9`; the paths in
/// `failing` are left unset and answer 404.
#[allow(dead_code)]
pub async fn ten_upstreams(failing: &[usize]) -> (AggregatorConfig, MockRoutes) {
    let routes = MockRoutes::new();
    for i in 0..10 {
        if !failing.contains(&i) {
            routes.set(&format!("/api/{i}"), 200, &format!(r#"{{"id":{i},"items":[1,2,3]}}"#));
        }
    }
    let addr = start_mock_api(routes.clone()).await;

    let mut config = AggregatorConfig::default();
    config.upstreams.0 = (0..10)
        .map(|i| UpstreamConfig {
            name: format!("svc{i}-api"),
            url: format!("http://{addr}/api/{i}"),
            shape: ShapeRule::Identity,
            cache_ttl_ms: None,
        })
        .collect();
    config.retries.max_retries = 1;
    config.retries.base_delay_ms = 10;
    config.retries.max_delay_ms = 20;
    config.aggregation.offload_enabled = false;
    config.cache.sweep_interval_ms = 1000;
    (config, routes)
}
