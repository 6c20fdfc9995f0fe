//! Local HTTP surface consumed by whatever renders the sign.
//!
//! Reads come from the engine's snapshot watch channel; writes go through the
//! engine's command sender and are therefore subject to the same optimistic
//! apply / reconcile / rollback semantics as any other command source.

use std::net::SocketAddr;

use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::routing::put;
use serde::Deserialize;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::engine::CommandSender;
use crate::engine::EngineSnapshot;
use crate::engine::SwitchState;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Request body for PUT /v1/switches/{id}
#[derive(Deserialize)]
struct SetSwitchRequest {
    state: SwitchState,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Shared application state
#[derive(Clone)]
pub struct ApiContext {
    pub snapshot_rx: watch::Receiver<EngineSnapshot>,
    pub commands: CommandSender,
}

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/state: the latest full snapshot (switch states,
/// connectivity, reconciliation sequence).
#[tracing::instrument(skip(ctx))]
async fn state(State(ctx): State<ApiContext>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/state request");
    let snapshot = ctx.snapshot_rx.borrow().clone();
    (StatusCode::OK, Json(snapshot))
}

/// Handler for PUT /v1/switches/{id}: issue a command.
///
/// Returns 202 Accepted; the write settles asynchronously and the outcome is
/// observable through /v1/state and the engine's events.
#[tracing::instrument(skip(ctx, request))]
async fn set_switch(
    State(ctx): State<ApiContext>,
    Path(switch_id): Path<String>,
    Json(request): Json<SetSwitchRequest>,
) -> impl IntoResponse {
    if !ctx.snapshot_rx.borrow().switches.contains_key(&switch_id) {
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("unknown switch: {switch_id}"),
            }),
        )
            .into_response();
    }

    ctx.commands.issue(switch_id, request.state).await;
    StatusCode::ACCEPTED.into_response()
}

/// Create the API router with all endpoints
fn create_router(ctx: ApiContext) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/state", get(state))
        .route("/v1/switches/:id", put(set_switch))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Start the HTTP API server
///
/// Binds to the configured address and serves until the shutdown signal is
/// triggered.
pub async fn serve(
    bind: String,
    ctx: ApiContext,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = create_router(ctx);

    let addr: SocketAddr = bind.parse()?;
    tracing::info!("Starting HTTP API server on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}
