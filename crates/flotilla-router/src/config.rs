use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::strategy::LoadBalanceMethod;

/// Upstream calls may legitimately stream for hours (long generations).
const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(6 * 60 * 60);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_TELEMETRY_RECV_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_STREAM_BUFFER: usize = 64;

/// How a failed upstream call shows up in a dispatch stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureMode {
    /// One empty data chunk, indistinguishable from an empty body.
    #[default]
    Lenient,
    /// A `DispatchChunk::UpstreamFailure` item carrying the cause.
    Tagged,
}

impl FailureMode {
    pub fn name(&self) -> &'static str {
        match self {
            FailureMode::Lenient => "lenient",
            FailureMode::Tagged => "tagged",
        }
    }
}

impl FromStr for FailureMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lenient" => Ok(FailureMode::Lenient),
            "tagged" => Ok(FailureMode::Tagged),
            _ => Err(ConfigError::UnknownFailureMode(s.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub policy: LoadBalanceMethod,
    /// Whole-request timeout for a forwarded call, body streaming included.
    pub upstream_timeout: Duration,
    pub connect_timeout: Duration,
    pub failure_mode: FailureMode,
    /// Host the per-node telemetry sockets bind on.
    pub telemetry_bind_host: String,
    /// Upper bound on a single telemetry receive before the listener re-checks cancellation.
    pub telemetry_recv_timeout: Duration,
    /// Seed for the policy RNG; `None` seeds from entropy.
    pub random_seed: Option<u64>,
    /// Chunks buffered between the upstream reader and the dispatch consumer.
    pub stream_buffer: usize,
    /// Log every forwarded payload and the size of its relayed response at info.
    pub log_requests: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            policy: LoadBalanceMethod::RoundRobin,
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            failure_mode: FailureMode::Lenient,
            telemetry_bind_host: "0.0.0.0".to_string(),
            telemetry_recv_timeout: DEFAULT_TELEMETRY_RECV_TIMEOUT,
            random_seed: None,
            stream_buffer: DEFAULT_STREAM_BUFFER,
            log_requests: false,
        }
    }
}

impl RouterConfig {
    pub fn with_policy(mut self, policy: LoadBalanceMethod) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_failure_mode(mut self, failure_mode: FailureMode) -> Self {
        self.failure_mode = failure_mode;
        self
    }
}
