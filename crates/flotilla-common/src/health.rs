use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Latest load sample reported by a node.
///
/// Wire form is one ASCII record per datagram:
/// `ip,port,available_memory,num_running,num_waiting`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthReport {
    pub ip: String,
    pub port: u16,

    pub available_memory: i64,
    pub num_running: u64,
    pub num_waiting: u64,

    /// Receipt time. Informational only, nothing expires on it.
    #[serde(default)]
    pub last_updated_ms: u64,
}

impl HealthReport {
    pub fn key(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// Render the record a node would send for this sample.
    pub fn to_record(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.ip, self.port, self.available_memory, self.num_running, self.num_waiting
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TelemetryParseError {
    #[error("empty telemetry record")]
    Empty,
    #[error("telemetry record is not valid utf-8")]
    NotUtf8,
    #[error("expected 5 fields, got {0}")]
    FieldCount(usize),
    #[error("telemetry record has an empty ip")]
    MissingIp,
    #[error("invalid {field} '{value}'")]
    InvalidField { field: &'static str, value: String },
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn parse_field<T: std::str::FromStr>(
    field: &'static str,
    value: &str,
) -> Result<T, TelemetryParseError> {
    value.parse::<T>().map_err(|_| TelemetryParseError::InvalidField {
        field,
        value: value.to_string(),
    })
}

/// Parse one telemetry record. Surrounding whitespace and NUL padding are ignored.
pub fn parse_telemetry(raw: &str) -> Result<HealthReport, TelemetryParseError> {
    let line = raw.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    if line.is_empty() {
        return Err(TelemetryParseError::Empty);
    }

    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let [ip, port, available_memory, num_running, num_waiting] = fields.as_slice() else {
        return Err(TelemetryParseError::FieldCount(fields.len()));
    };

    if ip.is_empty() {
        return Err(TelemetryParseError::MissingIp);
    }

    Ok(HealthReport {
        ip: ip.to_string(),
        port: parse_field("port", port)?,
        available_memory: parse_field("available_memory", available_memory)?,
        num_running: parse_field("num_running", num_running)?,
        num_waiting: parse_field("num_waiting", num_waiting)?,
        last_updated_ms: now_ms(),
    })
}

pub fn parse_telemetry_datagram(bytes: &[u8]) -> Result<HealthReport, TelemetryParseError> {
    let raw = std::str::from_utf8(bytes).map_err(|_| TelemetryParseError::NotUtf8)?;
    parse_telemetry(raw)
}
