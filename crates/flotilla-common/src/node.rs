use serde::{Deserialize, Serialize};

/// A registered worker node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeInfo {
    pub ip: String,
    /// Port the worker serves inference requests on.
    pub port: u16,

    pub model_path: String,
    pub is_generation: bool,

    /// UDP port the router listens on for this node's load reports.
    /// `None` means the node never reports health.
    #[serde(default, alias = "controller_info_port")]
    pub telemetry_port: Option<u16>,
}

impl NodeInfo {
    /// `ip:port`, the key used by the health table.
    pub fn key(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}
