use std::fmt;
use std::pin::Pin;

use bytes::Bytes;
use flotilla_common::{HealthReport, NodeInfo};
use futures_core::Stream;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::config::FailureMode;
use crate::counters::EngineCounters;

/// One item of a dispatch stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchChunk {
    /// Response bytes from the chosen node, in arrival order.
    Data(Bytes),
    /// The call to the chosen node failed. Ends that request's output.
    UpstreamFailure(UpstreamFailure),
}

impl DispatchChunk {
    pub fn is_failure(&self) -> bool {
        matches!(self, DispatchChunk::UpstreamFailure(_))
    }

    /// Response bytes; a failure marker collapses to an empty chunk.
    pub fn into_bytes(self) -> Bytes {
        match self {
            DispatchChunk::Data(b) => b,
            DispatchChunk::UpstreamFailure(_) => Bytes::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The node answered with a status other than 200.
    Status(u16),
    Connect,
    Timeout,
    /// The response body broke off mid-stream.
    Body,
    Other,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Status(code) => write!(f, "status {code}"),
            FailureKind::Connect => f.write_str("connect"),
            FailureKind::Timeout => f.write_str("timeout"),
            FailureKind::Body => f.write_str("body"),
            FailureKind::Other => f.write_str("other"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamFailure {
    /// `ip:port` of the node that failed.
    pub node: String,
    pub url: String,
    pub kind: FailureKind,
}

impl fmt::Display for UpstreamFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "upstream {} failed ({})", self.url, self.kind)
    }
}

/// Finite, single-consumption sequence of response chunks for one dispatch batch.
pub type DispatchStream = Pin<Box<dyn Stream<Item = DispatchChunk> + Send>>;

/// Address a request is forwarded to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub ip: String,
    pub port: u16,
}

impl Target {
    pub fn key(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    pub fn url(&self, route: &str) -> String {
        format!(
            "http://{}:{}/{}",
            self.ip,
            self.port,
            route.trim_start_matches('/')
        )
    }
}

impl From<&NodeInfo> for Target {
    fn from(info: &NodeInfo) -> Self {
        Self {
            ip: info.ip.clone(),
            port: info.port,
        }
    }
}

impl From<&HealthReport> for Target {
    fn from(report: &HealthReport) -> Self {
        Self {
            ip: report.ip.clone(),
            port: report.port,
        }
    }
}

fn classify_reqwest_error(error: &reqwest::Error) -> FailureKind {
    if error.is_timeout() {
        return FailureKind::Timeout;
    }
    if error.is_connect() {
        return FailureKind::Connect;
    }
    FailureKind::Other
}

/// Whether the consumer is still listening after a request was forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Closed,
}

pub(crate) struct Forwarder<'a> {
    pub http: &'a reqwest::Client,
    pub failure_mode: FailureMode,
    pub counters: &'a EngineCounters,
    pub tx: &'a mpsc::Sender<DispatchChunk>,
    pub log_requests: bool,
}

impl Forwarder<'_> {
    async fn emit(&self, chunk: DispatchChunk) -> Flow {
        match self.tx.send(chunk).await {
            Ok(()) => Flow::Continue,
            Err(_) => Flow::Closed,
        }
    }

    async fn fail(&self, failure: UpstreamFailure) -> Flow {
        self.counters.inc_upstream_failures();
        let chunk = match self.failure_mode {
            FailureMode::Lenient => DispatchChunk::Data(Bytes::new()),
            FailureMode::Tagged => DispatchChunk::UpstreamFailure(failure),
        };
        self.emit(chunk).await
    }

    /// POST `payload` to `target` and relay the response body chunk by chunk.
    pub(crate) async fn forward(
        &self,
        target: &Target,
        route: &str,
        payload: &serde_json::Value,
    ) -> Flow {
        let url = target.url(route);
        let node = target.key();
        if self.log_requests {
            tracing::info!(%node, %url, %payload, "forwarding request");
        }

        let resp = match self.http.post(&url).json(payload).send().await {
            Ok(resp) => resp,
            Err(e) => {
                let kind = classify_reqwest_error(&e);
                tracing::warn!(%node, %url, error=%e, %kind, "upstream request failed");
                return self.fail(UpstreamFailure { node, url, kind }).await;
            }
        };

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            tracing::warn!(%node, %url, status=status.as_u16(), "upstream returned non-success status");
            let kind = FailureKind::Status(status.as_u16());
            return self.fail(UpstreamFailure { node, url, kind }).await;
        }

        let mut relayed = 0usize;
        let mut body = resp.bytes_stream();
        while let Some(item) = body.next().await {
            match item {
                Ok(chunk) => {
                    relayed += chunk.len();
                    if self.emit(DispatchChunk::Data(chunk)).await == Flow::Closed {
                        return Flow::Closed;
                    }
                }
                Err(e) => {
                    let kind = if e.is_timeout() {
                        FailureKind::Timeout
                    } else {
                        FailureKind::Body
                    };
                    tracing::warn!(%node, %url, error=%e, %kind, "upstream body stream broke off");
                    return self.fail(UpstreamFailure { node, url, kind }).await;
                }
            }
        }

        if self.log_requests {
            tracing::info!(%node, %url, bytes = relayed, "response relayed");
        }
        Flow::Continue
    }
}
