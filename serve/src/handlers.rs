//! JSON route handlers over [`HitlService`](hitl::HitlService).

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use hitl::{ConversationSession, Decision, ReasoningEvent, TurnRequest, TurnResponse};
use serde::Deserialize;

use crate::app::AppState;
use crate::error::ApiError;

pub(crate) async fn health() -> &'static str {
    "ok"
}

pub(crate) async fn submit_turn(
    State(state): State<AppState>,
    Json(request): Json<TurnRequest>,
) -> Result<Json<TurnResponse>, ApiError> {
    Ok(Json(state.service.submit_turn(request).await?))
}

#[derive(Debug, Deserialize)]
pub(crate) struct DecisionBody {
    decision: String,
}

pub(crate) async fn resolve_approval(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(body): Json<DecisionBody>,
) -> Result<Json<TurnResponse>, ApiError> {
    let decision: Decision = body.decision.trim().to_ascii_lowercase().parse()?;
    Ok(Json(state.service.resolve_approval(&token, decision).await?))
}

pub(crate) async fn pending_approval(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<Response, ApiError> {
    Ok(match state.service.pending_approval(&conversation_id).await? {
        Some(pending) => Json(pending).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

pub(crate) async fn cancel_approval(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<Response, ApiError> {
    Ok(match state.service.cancel_approval(&conversation_id).await? {
        Some(response) => Json(response).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

#[derive(Debug, Deserialize)]
pub(crate) struct LevelBody {
    automation_level: u8,
}

pub(crate) async fn set_automation_level(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Json(body): Json<LevelBody>,
) -> Result<Json<ConversationSession>, ApiError> {
    Ok(Json(
        state
            .service
            .set_automation_level(&conversation_id, body.automation_level)
            .await?,
    ))
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct HistoryQuery {
    after: Option<u64>,
    limit: Option<usize>,
}

pub(crate) async fn reasoning_history(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ReasoningEvent>>, ApiError> {
    Ok(Json(
        state
            .service
            .reasoning_history(&conversation_id, query.after, query.limit)
            .await?,
    ))
}
