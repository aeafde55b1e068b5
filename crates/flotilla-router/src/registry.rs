use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use dashmap::DashMap;
use flotilla_common::{HealthReport, NodeInfo};

/// Append-only list of registered nodes. Registration order is significant for
/// round-robin, and duplicates are kept as separate entries.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: RwLock<Vec<NodeInfo>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, info: NodeInfo) {
        self.nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(info);
    }

    /// Snapshot of the current nodes, in registration order.
    pub fn list(&self) -> Vec<NodeInfo> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
struct HealthEntry {
    /// Order in which the key first reported.
    seq: u64,
    report: HealthReport,
}

/// Latest report per `ip:port`. A key exists only after its first sample and is
/// never removed.
#[derive(Debug, Default)]
pub struct HealthTable {
    reports: DashMap<String, HealthEntry>,
    next_seq: AtomicU64,
}

impl HealthTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, report: HealthReport) {
        let key = report.key();
        let mut entry = self.reports.entry(key).or_insert_with(|| HealthEntry {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            report: report.clone(),
        });
        entry.report = report;
    }

    pub fn get(&self, key: &str) -> Option<HealthReport> {
        self.reports.get(key).map(|e| e.value().report.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.reports.contains_key(key)
    }

    /// All reports, ordered by when each node first reported.
    pub fn snapshot(&self) -> Vec<HealthReport> {
        let mut entries: Vec<(u64, HealthReport)> = self
            .reports
            .iter()
            .map(|e| (e.value().seq, e.value().report.clone()))
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, report)| report).collect()
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }
}
