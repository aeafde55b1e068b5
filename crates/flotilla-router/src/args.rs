use clap::Parser;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    #[arg(long, env = "FLOTILLA_LISTEN_ADDR", default_value = "127.0.0.1:8080")]
    pub listen_addr: String,

    /// round_robin, power_of_two_choices or resources_aware.
    #[arg(long, env = "FLOTILLA_LOAD_BALANCE_METHOD", default_value = "round_robin")]
    pub load_balance_method: String,

    /// Whole-request timeout for a forwarded call, body streaming included.
    #[arg(long, env = "FLOTILLA_UPSTREAM_TIMEOUT_SECS", default_value_t = 6 * 60 * 60)]
    pub upstream_timeout_secs: u64,

    #[arg(long, env = "FLOTILLA_CONNECT_TIMEOUT_SECS", default_value_t = 3)]
    pub connect_timeout_secs: u64,

    /// How a failed upstream call reaches the client: `lenient` sends an empty
    /// chunk, `tagged` aborts the response body.
    #[arg(long, env = "FLOTILLA_FAILURE_MODE", default_value = "lenient")]
    pub failure_mode: String,

    #[arg(long, env = "FLOTILLA_TELEMETRY_BIND_HOST", default_value = "0.0.0.0")]
    pub telemetry_bind_host: String,

    /// Log every forwarded payload and the size of its response.
    #[arg(long, env = "FLOTILLA_LOG_REQUESTS")]
    pub log_requests: bool,

    #[arg(long, env = "FLOTILLA_RANDOM_SEED")]
    pub random_seed: Option<u64>,

    /// `text` or `json`.
    #[arg(long, env = "FLOTILLA_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// OTLP endpoint for exporting traces.
    #[arg(long, env = "OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    /// Bearer token for the OTLP endpoint.
    #[arg(long, env = "OTLP_TOKEN")]
    pub otlp_token: Option<String>,
}
