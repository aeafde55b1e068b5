#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "unknown load balance method '{0}', available: round_robin, power_of_two_choices, resources_aware"
    )]
    UnknownPolicy(String),
    #[error("load balance method '{0}' is recognised but not implemented")]
    UnimplementedPolicy(String),
    #[error("unknown failure mode '{0}', available: lenient, tagged")]
    UnknownFailureMode(String),
    #[error("failed to build upstream http client")]
    HttpClient(#[source] reqwest::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error("failed to bind telemetry socket {addr}")]
    TelemetryBind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}
