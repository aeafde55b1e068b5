mod support;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{body::Body, routing::post, Router};
use bytes::Bytes;
use flotilla_router::{
    ConfigError, Controller, DispatchChunk, FailureKind, FailureMode, LoadBalanceMethod,
    RouterConfig,
};
use futures_util::StreamExt;

use support::*;

#[tokio::test]
async fn round_robin_cycles_in_registration_order() {
    let a = tagged_worker("[A]").await;
    let b = tagged_worker("[B]").await;
    let controller =
        Controller::new(config(LoadBalanceMethod::RoundRobin, FailureMode::Lenient)).unwrap();
    controller.register(node(a.port(), None)).await.unwrap();
    controller.register(node(b.port(), None)).await.unwrap();

    let chunks = collect(controller.dispatch(requests(3), "generate")).await;
    assert_eq!(concat_data(&chunks), "[A][B][A]");

    // The counter carries over between dispatch calls.
    let chunks = collect(controller.dispatch(requests(3), "generate")).await;
    assert_eq!(concat_data(&chunks), "[B][A][B]");
    assert_eq!(controller.counters().requests_dispatched_total(), 6);
}

#[tokio::test]
async fn concurrent_round_robin_stays_fair() {
    let a = tagged_worker("A").await;
    let b = tagged_worker("B").await;
    let c = tagged_worker("C").await;
    let controller = std::sync::Arc::new(
        Controller::new(config(LoadBalanceMethod::RoundRobin, FailureMode::Lenient)).unwrap(),
    );
    for addr in [a, b, c] {
        controller.register(node(addr.port(), None)).await.unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..30 {
        let controller = controller.clone();
        handles.push(tokio::spawn(async move {
            concat_data(&collect(controller.dispatch(requests(1), "generate")).await)
        }));
    }

    let mut counts = std::collections::HashMap::new();
    for h in handles {
        *counts.entry(h.await.unwrap()).or_insert(0usize) += 1;
    }
    assert_eq!(counts.get("A"), Some(&10));
    assert_eq!(counts.get("B"), Some(&10));
    assert_eq!(counts.get("C"), Some(&10));
}

#[tokio::test]
async fn payload_is_forwarded_verbatim() {
    let echo = echo_worker().await;
    let controller =
        Controller::new(config(LoadBalanceMethod::RoundRobin, FailureMode::Lenient)).unwrap();
    controller.register(node(echo.port(), None)).await.unwrap();

    let payload = serde_json::json!({
        "prompt": "hello",
        "max_tokens": 16,
        "stream": true,
        "stop": ["\n"],
    });
    let chunks = collect(controller.dispatch(vec![payload.clone()], "/v1/completions")).await;
    let echoed: serde_json::Value = serde_json::from_str(&concat_data(&chunks)).unwrap();
    assert_eq!(echoed, payload);
}

#[tokio::test]
async fn chunks_keep_upstream_order() {
    let addr = spawn_worker(Router::new().route(
        "/generate",
        post(|| async {
            let parts = futures_util::stream::iter(["data: 1\n\n", "data: 2\n\n", "data: 3\n\n"])
                .then(|part| async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok::<_, std::io::Error>(part)
                });
            Body::from_stream(parts)
        }),
    ))
    .await;

    let controller =
        Controller::new(config(LoadBalanceMethod::RoundRobin, FailureMode::Lenient)).unwrap();
    controller.register(node(addr.port(), None)).await.unwrap();

    let chunks = collect(controller.dispatch(requests(1), "generate")).await;
    assert!(chunks.iter().all(|c| !c.is_failure()));
    assert_eq!(concat_data(&chunks), "data: 1\n\ndata: 2\n\ndata: 3\n\n");
}

#[tokio::test]
async fn lenient_failure_yields_one_empty_chunk() {
    let ok = tagged_worker("[A]").await;
    let bad = failing_worker().await;
    let controller =
        Controller::new(config(LoadBalanceMethod::RoundRobin, FailureMode::Lenient)).unwrap();
    controller.register(node(ok.port(), None)).await.unwrap();
    controller.register(node(bad.port(), None)).await.unwrap();

    let chunks = collect(controller.dispatch(requests(3), "generate")).await;
    assert_eq!(empty_data_chunks(&chunks), 1);
    assert!(chunks.iter().all(|c| !c.is_failure()));
    assert_eq!(concat_data(&chunks), "[A][A]");
    assert_eq!(controller.counters().upstream_failures_total(), 1);
}

#[tokio::test]
async fn tagged_failure_is_distinguishable() {
    let ok = tagged_worker("[A]").await;
    let bad = failing_worker().await;
    let controller =
        Controller::new(config(LoadBalanceMethod::RoundRobin, FailureMode::Tagged)).unwrap();
    controller.register(node(bad.port(), None)).await.unwrap();
    controller.register(node(ok.port(), None)).await.unwrap();

    let chunks = collect(controller.dispatch(requests(2), "generate")).await;
    assert_eq!(empty_data_chunks(&chunks), 0);

    let failures: Vec<_> = chunks
        .iter()
        .filter_map(|c| match c {
            DispatchChunk::UpstreamFailure(f) => Some(f.clone()),
            DispatchChunk::Data(_) => None,
        })
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, FailureKind::Status(500));
    assert_eq!(failures[0].node, format!("127.0.0.1:{}", bad.port()));
    // The failure comes first, then the sibling's body.
    assert!(chunks[0].is_failure());
    assert_eq!(concat_data(&chunks), "[A]");
}

#[tokio::test]
async fn unreachable_node_is_a_connect_failure() {
    let controller =
        Controller::new(config(LoadBalanceMethod::RoundRobin, FailureMode::Tagged)).unwrap();
    controller.register(node(closed_tcp_port(), None)).await.unwrap();

    let chunks = collect(controller.dispatch(requests(1), "generate")).await;
    assert_eq!(chunks.len(), 1);
    match &chunks[0] {
        DispatchChunk::UpstreamFailure(f) => assert_eq!(f.kind, FailureKind::Connect),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_fleet_yields_nothing() {
    let controller =
        Controller::new(config(LoadBalanceMethod::RoundRobin, FailureMode::Lenient)).unwrap();
    assert!(collect(controller.dispatch(requests(3), "generate")).await.is_empty());

    // Registered but never reported: invisible to telemetry-driven policies.
    let a = tagged_worker("[A]").await;
    for policy in [
        LoadBalanceMethod::PowerOfTwoChoices,
        LoadBalanceMethod::ResourcesAware,
    ] {
        let controller = Controller::new(config(policy, FailureMode::Lenient)).unwrap();
        controller.register(node(a.port(), None)).await.unwrap();
        assert!(collect(controller.dispatch(requests(2), "generate")).await.is_empty());
        assert_eq!(controller.counters().no_eligible_node_total(), 2);
        assert_eq!(controller.counters().requests_dispatched_total(), 0);
    }
}

#[tokio::test]
async fn empty_batch_yields_nothing() {
    let a = tagged_worker("[A]").await;
    let controller =
        Controller::new(config(LoadBalanceMethod::RoundRobin, FailureMode::Lenient)).unwrap();
    controller.register(node(a.port(), None)).await.unwrap();
    assert!(collect(controller.dispatch(Vec::new(), "generate")).await.is_empty());
}

#[tokio::test]
async fn shutdown_ends_in_flight_dispatch() {
    let slow = spawn_worker(Router::new().route(
        "/generate",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            "late"
        }),
    ))
    .await;
    let controller =
        Controller::new(config(LoadBalanceMethod::RoundRobin, FailureMode::Tagged)).unwrap();
    controller.register(node(slow.port(), None)).await.unwrap();

    let mut stream = controller.dispatch(requests(1), "generate");
    tokio::time::sleep(Duration::from_millis(100)).await;
    controller.shutdown().await;

    let next = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("stream did not end after shutdown");
    assert_eq!(next, None);
}

/// Sets its flag when dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn dropping_stream_aborts_upstream_call() {
    let released = Arc::new(AtomicBool::new(false));
    let flag = released.clone();
    let endless = spawn_worker(Router::new().route(
        "/generate",
        post(move || {
            let guard = DropFlag(flag.clone());
            async move {
                // Ticks forever; the guard lives as long as the response body.
                let ticks = futures_util::stream::unfold(guard, |guard| async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Some((Ok::<_, std::io::Error>(Bytes::from_static(b"tick")), guard))
                });
                Body::from_stream(ticks)
            }
        }),
    ))
    .await;

    let controller =
        Controller::new(config(LoadBalanceMethod::RoundRobin, FailureMode::Tagged)).unwrap();
    controller.register(node(endless.port(), None)).await.unwrap();

    let mut stream = controller.dispatch(requests(1), "generate");
    let first = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("no data from upstream");
    match first {
        Some(DispatchChunk::Data(b)) => assert!(b.starts_with(b"tick")),
        other => panic!("expected data, got {other:?}"),
    }
    assert!(!released.load(Ordering::SeqCst));

    drop(stream);
    wait_for(|| released.load(Ordering::SeqCst)).await;
    assert_eq!(controller.counters().upstream_failures_total(), 0);
}

#[tokio::test]
async fn request_logging_keeps_output() {
    let a = tagged_worker("[A]").await;
    let controller = Controller::new(RouterConfig {
        log_requests: true,
        ..config(LoadBalanceMethod::RoundRobin, FailureMode::Lenient)
    })
    .unwrap();
    controller.register(node(a.port(), None)).await.unwrap();

    let chunks = collect(controller.dispatch(requests(2), "generate")).await;
    assert_eq!(concat_data(&chunks), "[A][A]");
}

#[test]
fn unknown_policy_fails_construction() {
    let err = Controller::with_policy_name("fastest_first", RouterConfig::default()).unwrap_err();
    assert!(matches!(err, ConfigError::UnknownPolicy(_)));

    let err = Controller::with_policy_name("pre_radix", RouterConfig::default()).unwrap_err();
    assert!(matches!(err, ConfigError::UnimplementedPolicy(_)));
}

#[tokio::test]
async fn policy_name_selects_variant() {
    let controller =
        Controller::with_policy_name("power_of_2_choice", RouterConfig::default()).unwrap();
    assert_eq!(controller.policy(), LoadBalanceMethod::PowerOfTwoChoices);
}
