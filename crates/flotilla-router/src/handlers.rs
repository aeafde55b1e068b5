use axum::{
    body::Body,
    extract::State,
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use futures_util::StreamExt;

use flotilla_common::NodeInfo;
use flotilla_router::DispatchChunk;

use crate::state::AppState;

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn register_nodes(State(st): State<AppState>, Json(info): Json<NodeInfo>) -> Response {
    let node = info.key();
    match st.controller.register(info).await {
        Ok(()) => Json(serde_json::json!({
            "message": "Register nodes SUCCESS to the controller."
        }))
        .into_response(),
        Err(e) => {
            let source = std::error::Error::source(&e)
                .map(|s| s.to_string())
                .unwrap_or_default();
            tracing::error!(%node, error=%e, %source, "node registration failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "message": format!("{e}: {source}") })),
            )
                .into_response()
        }
    }
}

pub async fn list_nodes(State(st): State<AppState>) -> impl IntoResponse {
    Json(st.controller.nodes())
}

pub async fn health_table(State(st): State<AppState>) -> impl IntoResponse {
    Json(st.controller.health_snapshot())
}

/// A body is either one request object or an array of them.
fn split_batch(body: &[u8]) -> Result<Vec<serde_json::Value>, serde_json::Error> {
    match serde_json::from_slice::<serde_json::Value>(body)? {
        serde_json::Value::Array(items) => Ok(items),
        single => Ok(vec![single]),
    }
}

/// Forward the request body to the fleet under the path it arrived on.
///
/// An upstream failure in tagged mode aborts the response body, so the client
/// sees a broken transfer rather than a clean end of stream.
pub async fn proxy_dispatch(State(st): State<AppState>, uri: Uri, body: Bytes) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4());
    let route = uri.path().trim_start_matches('/').to_string();

    let requests = match split_batch(&body) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(%request_id, %route, error=%e, "rejecting non-json request body");
            return (StatusCode::BAD_REQUEST, "request body must be json").into_response();
        }
    };

    tracing::info!(
        %request_id,
        %route,
        batch = requests.len(),
        policy = %st.controller.policy(),
        "dispatching"
    );

    let stream = st
        .controller
        .dispatch(requests, &route)
        .map(move |chunk| match chunk {
            DispatchChunk::Data(b) => Ok(b),
            DispatchChunk::UpstreamFailure(failure) => {
                tracing::warn!(%request_id, node=%failure.node, kind=%failure.kind, "aborting response after upstream failure");
                Err(std::io::Error::other(failure.to_string()))
            }
        });

    Response::builder()
        .status(StatusCode::OK)
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}
