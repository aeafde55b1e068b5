use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use flotilla_router::Controller;

use crate::state::AppState;

/// Counters for the router's own HTTP surface; engine counters live on the
/// controller and are rendered alongside.
#[derive(Debug, Default)]
pub struct Metrics {
    requests_total: AtomicU64,
    requests_inflight: AtomicU64,
    responses_2xx: AtomicU64,
    responses_4xx: AtomicU64,
    responses_5xx: AtomicU64,
}

impl Metrics {
    fn record_response(&self, status: StatusCode) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        let bucket = match status.as_u16() {
            200..=299 => &self.responses_2xx,
            400..=499 => &self.responses_4xx,
            500..=599 => &self.responses_5xx,
            _ => return,
        };
        bucket.fetch_add(1, Ordering::Relaxed);
    }

    /// Text exposition, one `name value` line per series.
    pub fn render(&self, controller: &Controller) -> String {
        let engine = controller.counters();
        let series = [
            ("requests_total", self.requests_total.load(Ordering::Relaxed)),
            ("requests_inflight", self.requests_inflight.load(Ordering::Relaxed)),
            ("responses_2xx", self.responses_2xx.load(Ordering::Relaxed)),
            ("responses_4xx", self.responses_4xx.load(Ordering::Relaxed)),
            ("responses_5xx", self.responses_5xx.load(Ordering::Relaxed)),
            ("nodes", controller.nodes().len() as u64),
            ("reporting_nodes", controller.health_snapshot().len() as u64),
            ("telemetry_listeners", controller.listener_count() as u64),
            ("dispatched_total", engine.requests_dispatched_total()),
            ("no_eligible_node_total", engine.no_eligible_node_total()),
            ("upstream_failures_total", engine.upstream_failures_total()),
            ("telemetry_samples_total", engine.telemetry_samples_total()),
            ("telemetry_malformed_total", engine.telemetry_malformed_total()),
        ];

        let mut out = String::new();
        for (name, value) in series {
            let _ = writeln!(out, "flotilla_router_{name} {value}");
        }
        out
    }
}

pub async fn metrics_handler(State(st): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, st.metrics.render(&st.controller))
}

pub async fn track_requests(
    State(st): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    st.metrics.requests_inflight.fetch_add(1, Ordering::Relaxed);
    let resp = next.run(req).await;
    st.metrics.requests_inflight.fetch_sub(1, Ordering::Relaxed);
    st.metrics.record_response(resp.status());
    resp
}
