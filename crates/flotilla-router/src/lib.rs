use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use flotilla_common::{HealthReport, NodeInfo};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub mod config;
pub mod counters;
pub mod error;
pub mod monitor;
pub mod proxy;
pub mod registry;
pub mod strategy;

pub use config::{FailureMode, RouterConfig};
pub use counters::EngineCounters;
pub use error::{ConfigError, RegisterError};
pub use proxy::{DispatchChunk, DispatchStream, FailureKind, Target, UpstreamFailure};
pub use registry::{HealthTable, NodeRegistry};
pub use strategy::LoadBalanceMethod;

use proxy::{Flow, Forwarder};

/// State shared between the controller and its dispatch tasks.
struct Engine {
    config: RouterConfig,
    http: reqwest::Client,
    registry: NodeRegistry,
    health: Arc<HealthTable>,
    counters: Arc<EngineCounters>,
    round_robin_counter: AtomicUsize,
    rng: Mutex<StdRng>,
}

impl Engine {
    /// Choose the node for the next request under the configured policy.
    fn select_target(&self) -> Option<Target> {
        match self.config.policy {
            LoadBalanceMethod::RoundRobin => {
                let nodes = self.registry.list();
                let idx = strategy::round_robin_index(&self.round_robin_counter, nodes.len())?;
                Some(Target::from(&nodes[idx]))
            }
            LoadBalanceMethod::PowerOfTwoChoices => {
                let reports = self.health.snapshot();
                let idx = {
                    let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
                    strategy::power_of_two_choices(&reports, &mut *rng)
                }?;
                Some(Target::from(&reports[idx]))
            }
            LoadBalanceMethod::ResourcesAware => {
                let reports = self.health.snapshot();
                let idx = {
                    let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
                    strategy::resources_aware(&reports, &mut *rng)
                }?;
                Some(Target::from(&reports[idx]))
            }
        }
    }

    async fn run_batch(
        &self,
        requests: Vec<serde_json::Value>,
        route: &str,
        tx: &mpsc::Sender<DispatchChunk>,
    ) {
        let forwarder = Forwarder {
            http: &self.http,
            failure_mode: self.config.failure_mode,
            counters: &self.counters,
            tx,
            log_requests: self.config.log_requests,
        };

        for payload in &requests {
            let Some(target) = self.select_target() else {
                self.counters.inc_no_eligible_node();
                tracing::debug!(
                    policy=%self.config.policy,
                    health_driven=self.config.policy.uses_health(),
                    %route,
                    "no eligible node, skipping request"
                );
                continue;
            };

            self.counters.inc_requests_dispatched();
            tracing::debug!(policy=%self.config.policy, node=%target.key(), %route, "dispatching request");

            if forwarder.forward(&target, route, payload).await == Flow::Closed {
                tracing::debug!(%route, "dispatch consumer went away");
                return;
            }
        }
    }
}

/// Front door of the dispatch engine: node registration, telemetry listeners and
/// request dispatch under one load-balancing policy.
pub struct Controller {
    engine: Arc<Engine>,
    cancel: CancellationToken,
    listeners: TaskTracker,
    /// Telemetry ports with a running listener, mapped to the node that claimed it.
    telemetry_ports: DashMap<u16, String>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("policy", &self.engine.config.policy.name())
            .field("nodes", &self.engine.registry.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl Controller {
    pub fn new(config: RouterConfig) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.upstream_timeout)
            .build()
            .map_err(ConfigError::HttpClient)?;

        let rng = match config.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        tracing::info!(
            policy = config.policy.name(),
            failure_mode = config.failure_mode.name(),
            "controller initialized"
        );

        Ok(Self {
            engine: Arc::new(Engine {
                config,
                http,
                registry: NodeRegistry::new(),
                health: Arc::new(HealthTable::new()),
                counters: Arc::new(EngineCounters::default()),
                round_robin_counter: AtomicUsize::new(0),
                rng: Mutex::new(rng),
            }),
            cancel: CancellationToken::new(),
            listeners: TaskTracker::new(),
            telemetry_ports: DashMap::new(),
        })
    }

    /// Parse `policy` and build a controller around it.
    pub fn with_policy_name(policy: &str, config: RouterConfig) -> Result<Self, ConfigError> {
        let policy = policy.parse::<LoadBalanceMethod>()?;
        Self::new(config.with_policy(policy))
    }

    pub fn policy(&self) -> LoadBalanceMethod {
        self.engine.config.policy
    }

    pub fn config(&self) -> &RouterConfig {
        &self.engine.config
    }

    pub fn counters(&self) -> &EngineCounters {
        &self.engine.counters
    }

    /// Add a node. When it names a telemetry port nobody has claimed yet, a
    /// listener is started on it first; if that socket cannot be bound the node
    /// is not registered. Nodes sharing a port share its listener.
    pub async fn register(&self, info: NodeInfo) -> Result<(), RegisterError> {
        let key = info.key();

        if let Some(port) = info.telemetry_port {
            self.claim_telemetry_port(port, &key)?;
        }

        tracing::info!(
            node=%key,
            model_path=%info.model_path,
            is_generation=info.is_generation,
            telemetry_port=?info.telemetry_port,
            "node registered"
        );
        self.engine.registry.register(info);
        Ok(())
    }

    fn claim_telemetry_port(&self, port: u16, key: &str) -> Result<(), RegisterError> {
        match self.telemetry_ports.entry(port) {
            Entry::Occupied(claimed) => {
                tracing::debug!(node=%key, port, owner=%claimed.get(), "reusing telemetry listener");
            }
            Entry::Vacant(slot) => {
                let socket =
                    monitor::bind_telemetry_socket(&self.engine.config.telemetry_bind_host, port)?;
                self.listeners.spawn(monitor::telemetry_listener(
                    socket,
                    self.engine.health.clone(),
                    self.engine.counters.clone(),
                    self.engine.config.telemetry_recv_timeout,
                    self.cancel.child_token(),
                ));
                slot.insert(key.to_string());
            }
        }
        Ok(())
    }

    /// Forward every request to a node picked by the policy and stream back the
    /// concatenated response chunks.
    ///
    /// Requests are sent one after another, so chunks follow request order. A
    /// request with no eligible node produces no output. Dropping the stream
    /// aborts the in-flight upstream call.
    pub fn dispatch(&self, requests: Vec<serde_json::Value>, route: &str) -> DispatchStream {
        let (tx, rx) = mpsc::channel(self.engine.config.stream_buffer.max(1));
        let engine = self.engine.clone();
        let cancel = self.cancel.clone();
        let route = route.to_string();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(%route, "dispatch cancelled by shutdown");
                }
                _ = tx.closed() => {}
                _ = engine.run_batch(requests, &route, &tx) => {}
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }

    pub fn nodes(&self) -> Vec<NodeInfo> {
        self.engine.registry.list()
    }

    /// Latest report per node, in first-report order.
    pub fn health_snapshot(&self) -> Vec<HealthReport> {
        self.engine.health.snapshot()
    }

    /// Number of telemetry listeners still running.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Stop every telemetry listener and in-flight dispatch, then wait for the
    /// listeners to exit.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.listeners.close();
        self.listeners.wait().await;
        tracing::info!("controller shut down");
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
