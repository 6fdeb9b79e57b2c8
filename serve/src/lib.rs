//! HTTP server for the HITL approval gate (axum).
//!
//! | Route | Operation |
//! |-------|-----------|
//! | `POST /turns` | `submit_turn` |
//! | `POST /approvals/:token` | `resolve_approval` (`{"decision": "approved" \| "rejected"}`) |
//! | `GET /conversations/:id/approval` | `pending_approval` (204 when none) |
//! | `DELETE /conversations/:id/approval` | `cancel_approval` (204 when none) |
//! | `PUT /conversations/:id/automation-level` | `set_automation_level` |
//! | `GET /conversations/:id/reasoning?after=N` | `stream_reasoning` as SSE |
//! | `GET /conversations/:id/reasoning/history?after=N&limit=M` | `reasoning_history` |
//!
//! **Public API**: [`run_serve`], [`run_serve_on_listener`], [`router`].

mod app;
mod error;
mod handlers;
mod sse;

use std::sync::Arc;

use hitl::HitlService;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use app::{router, serve_config_from_env, AppState, ServeConfig};
pub use error::ApiError;

/// Serves `service` on an existing listener until `shutdown` fires. Used by tests (bind to
/// 127.0.0.1:0 then pass the listener).
pub async fn run_serve_on_listener(
    listener: TcpListener,
    service: Arc<HitlService>,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = listener.local_addr()?;
    info!("hitl server listening on http://{}", addr);
    let app = router(AppState { service });
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("hitl server stopped");
    Ok(())
}

/// Builds the gate from the environment, recovers persisted suspensions, starts the expiry
/// sweeper, and serves on `addr` (default from [`ServeConfig`]) until `shutdown` fires.
pub async fn run_serve(
    addr: Option<&str>,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let serve_config = serve_config_from_env();
    let gate_config = hitl::GateConfig::from_env()?;
    let sweep_interval = gate_config.sweep_interval;
    let service = Arc::new(HitlService::from_config(gate_config)?);

    let report = service.recover().await?;
    info!(
        resumable = report.resumable.len(),
        discarded = report.discarded.len(),
        "recovered suspended turns"
    );
    let sweeper = service.spawn_expiry_sweeper(sweep_interval, shutdown.child_token());

    let listener = TcpListener::bind(addr.unwrap_or(&serve_config.addr)).await?;
    let served = run_serve_on_listener(listener, service, shutdown.clone()).await;
    shutdown.cancel();
    let _ = sweeper.await;
    served
}
