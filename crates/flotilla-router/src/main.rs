mod args;
mod handlers;
mod metrics;
mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use clap::Parser;

use flotilla_router::{Controller, FailureMode, LoadBalanceMethod, RouterConfig};

use crate::args::Args;
use crate::handlers::{health_table, healthz, list_nodes, proxy_dispatch, register_nodes};
use crate::metrics::{metrics_handler, track_requests};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let otel_guard = flotilla_common::telemetry::init_tracing(
        "flotilla-router",
        args.otlp_endpoint.as_deref(),
        args.otlp_token.as_deref(),
        &args.log_format,
    );

    let config = RouterConfig {
        policy: args.load_balance_method.parse::<LoadBalanceMethod>()?,
        upstream_timeout: Duration::from_secs(args.upstream_timeout_secs),
        connect_timeout: Duration::from_secs(args.connect_timeout_secs),
        failure_mode: args.failure_mode.parse::<FailureMode>()?,
        telemetry_bind_host: args.telemetry_bind_host.clone(),
        random_seed: args.random_seed,
        log_requests: args.log_requests,
        ..RouterConfig::default()
    };
    let controller = Arc::new(Controller::new(config)?);

    let st = AppState {
        controller: controller.clone(),
        metrics: Arc::new(metrics::Metrics::default()),
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/health", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/register_nodes", post(register_nodes))
        .route("/nodes", get(list_nodes))
        .route("/health_table", get(health_table))
        .route("/generate", post(proxy_dispatch))
        .route("/v1/completions", post(proxy_dispatch))
        .route("/v1/chat/completions", post(proxy_dispatch))
        .layer(middleware::from_fn_with_state(st.clone(), track_requests))
        .with_state(st);

    let listener = tokio::net::TcpListener::bind(&args.listen_addr).await?;
    tracing::info!(listen_addr=%args.listen_addr, policy=%controller.policy(), "router listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error=%e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    controller.shutdown().await;
    if let Some(provider) = otel_guard {
        if let Err(e) = provider.shutdown() {
            eprintln!("failed to flush traces: {e}");
        }
    }
    Ok(())
}
