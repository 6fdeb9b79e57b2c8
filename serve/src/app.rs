//! Axum app: state, router, and server configuration.

use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use hitl::HitlService;

use crate::{handlers, sse};

const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// Server-side configuration; the gate itself reads [`hitl::GateConfig`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServeConfig {
    /// Listen address.
    pub addr: String,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
        }
    }
}

/// Builds ServeConfig from environment variables, falling back to [`Default`] for unset or
/// empty values.
///
/// - `HITL_SERVE_ADDR` (default 127.0.0.1:8080)
pub fn serve_config_from_env() -> ServeConfig {
    let default = ServeConfig::default();
    ServeConfig {
        addr: std::env::var("HITL_SERVE_ADDR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(default.addr),
    }
}

/// Shared state: one gate service for all requests.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<HitlService>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/turns", post(handlers::submit_turn))
        .route("/approvals/:token", post(handlers::resolve_approval))
        .route(
            "/conversations/:id/approval",
            get(handlers::pending_approval).delete(handlers::cancel_approval),
        )
        .route(
            "/conversations/:id/automation-level",
            put(handlers::set_automation_level),
        )
        .route("/conversations/:id/reasoning", get(sse::reasoning_stream))
        .route(
            "/conversations/:id/reasoning/history",
            get(handlers::reasoning_history),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_config_falls_back_to_default() {
        std::env::remove_var("HITL_SERVE_ADDR");
        assert_eq!(serve_config_from_env(), ServeConfig::default());
    }
}
