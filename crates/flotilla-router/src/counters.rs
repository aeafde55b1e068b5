use std::sync::atomic::{AtomicU64, Ordering};

/// Engine-side counters, shared by dispatch tasks and telemetry listeners.
#[derive(Debug, Default)]
pub struct EngineCounters {
    requests_dispatched_total: AtomicU64,
    no_eligible_node_total: AtomicU64,
    upstream_failures_total: AtomicU64,
    telemetry_samples_total: AtomicU64,
    telemetry_malformed_total: AtomicU64,
}

impl EngineCounters {
    pub fn inc_requests_dispatched(&self) {
        self.requests_dispatched_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_no_eligible_node(&self) {
        self.no_eligible_node_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_upstream_failures(&self) {
        self.upstream_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_telemetry_samples(&self) {
        self.telemetry_samples_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_telemetry_malformed(&self) {
        self.telemetry_malformed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_dispatched_total(&self) -> u64 {
        self.requests_dispatched_total.load(Ordering::Relaxed)
    }

    pub fn no_eligible_node_total(&self) -> u64 {
        self.no_eligible_node_total.load(Ordering::Relaxed)
    }

    pub fn upstream_failures_total(&self) -> u64 {
        self.upstream_failures_total.load(Ordering::Relaxed)
    }

    pub fn telemetry_samples_total(&self) -> u64 {
        self.telemetry_samples_total.load(Ordering::Relaxed)
    }

    pub fn telemetry_malformed_total(&self) -> u64 {
        self.telemetry_malformed_total.load(Ordering::Relaxed)
    }
}
