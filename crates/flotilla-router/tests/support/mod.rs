#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use axum::{http::StatusCode, routing::post, Json, Router};
use flotilla_common::NodeInfo;
use flotilla_router::{DispatchChunk, DispatchStream, FailureMode, LoadBalanceMethod, RouterConfig};
use futures_util::StreamExt;

pub async fn spawn_worker(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Worker whose `/generate` answers with a fixed tag.
pub async fn tagged_worker(tag: &'static str) -> SocketAddr {
    spawn_worker(Router::new().route("/generate", post(move || async move { tag }))).await
}

pub async fn failing_worker() -> SocketAddr {
    spawn_worker(Router::new().route(
        "/generate",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    ))
    .await
}

pub async fn echo_worker() -> SocketAddr {
    spawn_worker(Router::new().route(
        "/v1/completions",
        post(|Json(body): Json<serde_json::Value>| async move { Json(body) }),
    ))
    .await
}

/// Port that nothing listens on.
pub fn closed_tcp_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub fn free_udp_port() -> u16 {
    free_udp_ports(1)[0]
}

/// Distinct unbound UDP ports. All the sockets are held until every port is
/// picked so the OS cannot hand the same one out twice.
pub fn free_udp_ports(n: usize) -> Vec<u16> {
    let sockets: Vec<std::net::UdpSocket> = (0..n)
        .map(|_| std::net::UdpSocket::bind("127.0.0.1:0").unwrap())
        .collect();
    sockets
        .iter()
        .map(|s| s.local_addr().unwrap().port())
        .collect()
}

pub fn node(port: u16, telemetry_port: Option<u16>) -> NodeInfo {
    NodeInfo {
        ip: "127.0.0.1".to_string(),
        port,
        model_path: "/models/test".to_string(),
        is_generation: true,
        telemetry_port,
    }
}

pub fn config(policy: LoadBalanceMethod, failure_mode: FailureMode) -> RouterConfig {
    RouterConfig {
        upstream_timeout: Duration::from_secs(10),
        telemetry_bind_host: "127.0.0.1".to_string(),
        telemetry_recv_timeout: Duration::from_millis(50),
        random_seed: Some(17),
        ..RouterConfig::default()
    }
    .with_policy(policy)
    .with_failure_mode(failure_mode)
}

pub fn requests(n: usize) -> Vec<serde_json::Value> {
    (0..n)
        .map(|i| serde_json::json!({ "text": format!("prompt {i}") }))
        .collect()
}

pub async fn collect(stream: DispatchStream) -> Vec<DispatchChunk> {
    tokio::time::timeout(Duration::from_secs(10), stream.collect::<Vec<_>>())
        .await
        .expect("dispatch stream did not finish")
}

pub fn concat_data(chunks: &[DispatchChunk]) -> String {
    let mut out = Vec::new();
    for chunk in chunks {
        if let DispatchChunk::Data(b) = chunk {
            out.extend_from_slice(b);
        }
    }
    String::from_utf8(out).unwrap()
}

pub fn empty_data_chunks(chunks: &[DispatchChunk]) -> usize {
    chunks
        .iter()
        .filter(|c| matches!(c, DispatchChunk::Data(b) if b.is_empty()))
        .count()
}

pub async fn wait_for<F: Fn() -> bool>(cond: F) {
    for _ in 0..300 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
