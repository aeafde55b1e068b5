use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use flotilla_common::HealthReport;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::ConfigError;

/// Load balancing policy, fixed for the lifetime of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadBalanceMethod {
    /// Cycle through registered nodes in registration order. Ignores telemetry.
    RoundRobin,
    /// Sample two reporting nodes, keep the less loaded one.
    PowerOfTwoChoices,
    /// Inspect every reporting node and pick by queue state and free memory.
    ResourcesAware,
}

impl LoadBalanceMethod {
    pub fn name(&self) -> &'static str {
        match self {
            LoadBalanceMethod::RoundRobin => "round_robin",
            LoadBalanceMethod::PowerOfTwoChoices => "power_of_two_choices",
            LoadBalanceMethod::ResourcesAware => "resources_aware",
        }
    }

    /// Whether selection reads the health table rather than the registry.
    pub fn uses_health(&self) -> bool {
        !matches!(self, LoadBalanceMethod::RoundRobin)
    }
}

impl fmt::Display for LoadBalanceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LoadBalanceMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "round_robin" => Ok(LoadBalanceMethod::RoundRobin),
            "power_of_two_choices" | "power_of_2_choice" => {
                Ok(LoadBalanceMethod::PowerOfTwoChoices)
            }
            "resources_aware" | "resource_aware" => Ok(LoadBalanceMethod::ResourcesAware),
            "shortest_queue" | "pre_radix" | "multi_turn" | "bucket" => {
                Err(ConfigError::UnimplementedPolicy(s.to_string()))
            }
            _ => Err(ConfigError::UnknownPolicy(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// RoundRobin
// ---------------------------------------------------------------------------

/// Claim the next slot of a shared round-robin counter over `len` nodes.
///
/// The counter is advanced atomically, so concurrent callers never share or skip a slot.
pub fn round_robin_index(counter: &AtomicUsize, len: usize) -> Option<usize> {
    if len == 0 {
        return None;
    }
    Some(counter.fetch_add(1, AtomicOrdering::Relaxed) % len)
}

// ---------------------------------------------------------------------------
// PowerOfTwoChoices
// ---------------------------------------------------------------------------

/// Order two reports by load: `Less` means `a` is the better target.
///
/// Fewer waiting requests first, then fewer running, then more free memory.
pub fn compare_load(a: &HealthReport, b: &HealthReport) -> Ordering {
    a.num_waiting
        .cmp(&b.num_waiting)
        .then(a.num_running.cmp(&b.num_running))
        .then(b.available_memory.cmp(&a.available_memory))
}

/// Pick between two sampled candidates. A full tie goes to `first`.
pub fn pick_less_loaded(reports: &[HealthReport], first: usize, second: usize) -> usize {
    if compare_load(&reports[second], &reports[first]) == Ordering::Less {
        second
    } else {
        first
    }
}

pub fn power_of_two_choices<R: Rng + ?Sized>(
    reports: &[HealthReport],
    rng: &mut R,
) -> Option<usize> {
    match reports.len() {
        0 => None,
        1 => Some(0),
        len => {
            let sampled = rand::seq::index::sample(rng, len, 2);
            Some(pick_less_loaded(reports, sampled.index(0), sampled.index(1)))
        }
    }
}

// ---------------------------------------------------------------------------
// ResourcesAware
// ---------------------------------------------------------------------------

pub fn resources_aware<R: Rng + ?Sized>(reports: &[HealthReport], rng: &mut R) -> Option<usize> {
    match reports.len() {
        0 => return None,
        1 => return Some(0),
        _ => {}
    }

    let all_busy = reports.iter().all(|r| r.num_waiting > 0);
    if all_busy {
        busiest_draining(reports, rng)
    } else {
        most_memory_idle(reports)
    }
}

/// Every node has a backlog: favour the highest running-to-waiting ratio.
/// Ties are broken uniformly at random.
fn busiest_draining<R: Rng + ?Sized>(reports: &[HealthReport], rng: &mut R) -> Option<usize> {
    let ratios: Vec<f64> = reports
        .iter()
        .map(|r| r.num_running as f64 / r.num_waiting as f64)
        .collect();
    let best = ratios.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let maximizers: Vec<usize> = ratios
        .iter()
        .enumerate()
        .filter(|(_, ratio)| **ratio == best)
        .map(|(i, _)| i)
        .collect();

    maximizers.choose(rng).copied()
}

/// Among nodes with an empty queue, the one with the most free memory.
/// The earliest node wins a tie.
fn most_memory_idle(reports: &[HealthReport]) -> Option<usize> {
    let mut best_idx: Option<usize> = None;
    let mut best_memory = i64::MIN;

    for (i, r) in reports.iter().enumerate() {
        if r.num_waiting != 0 {
            continue;
        }
        if best_idx.is_none() || r.available_memory > best_memory {
            best_memory = r.available_memory;
            best_idx = Some(i);
        }
    }

    best_idx
}
