pub mod health;
pub mod node;

pub use health::{parse_telemetry, parse_telemetry_datagram, HealthReport, TelemetryParseError};
pub use node::NodeInfo;

pub mod telemetry;
