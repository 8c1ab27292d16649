//! HTTP request handlers

use super::types::{
    ChatData, ChatRequest, ClearRequest, ClearResponse, ErrorResponse, HistoryData, HistoryEntry,
    HistoryQuery, RespondersData, Success,
};
use super::AppState;
use crate::error::{TurnError, TurnErrorKind};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/api/chat/history", get(get_history))
        .route("/api/chat/clear", post(clear_history))
        .route("/api/responders", get(list_responders))
        .route("/version", get(get_version))
        .fallback(not_found)
        .with_state(state)
}

// ============================================================
// Chat
// ============================================================

async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<Success<ChatData>>, AppError> {
    let Json(request) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let query = match request.query {
        None => return Err(AppError::BadRequest("No query provided".to_string())),
        Some(q) if q.trim().is_empty() => {
            return Err(AppError::BadRequest("Query cannot be empty".to_string()))
        }
        Some(q) => q,
    };
    let session_id = request
        .session_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(generate_session_id);

    tracing::info!(session_id = %session_id, "Received chat request");

    let outcome = match request.context.filter(|c| !c.is_empty()) {
        Some(context) => {
            state
                .orchestrator
                .process_query_with_context(&query, &context, &session_id)
                .await?
        }
        None => state.orchestrator.process_query(&query, &session_id).await?,
    };

    Ok(Json(Success::new(outcome.into())))
}

// ============================================================
// History
// ============================================================

async fn get_history(
    State(state): State<AppState>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<Success<HistoryData>>, AppError> {
    let Query(query) = query.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let session_id = require_session_id(query.session_id)?;
    let history = state.orchestrator.get_history(&session_id).await?;

    Ok(Json(Success::new(HistoryData {
        session_id,
        history: history.into_iter().map(HistoryEntry::from).collect(),
    })))
}

async fn clear_history(
    State(state): State<AppState>,
    payload: Result<Json<ClearRequest>, JsonRejection>,
) -> Result<Json<ClearResponse>, AppError> {
    let session_id = match payload {
        Ok(Json(request)) => require_session_id(request.session_id)?,
        Err(_) => return Err(AppError::BadRequest("No session_id provided".to_string())),
    };
    state.orchestrator.clear_history(&session_id).await?;

    Ok(Json(ClearResponse {
        status: "success",
        message: format!("History cleared for session {session_id}"),
    }))
}

fn require_session_id(session_id: Option<String>) -> Result<String, AppError> {
    session_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("No session_id provided".to_string()))
}

// ============================================================
// Registry Info
// ============================================================

async fn list_responders(State(state): State<AppState>) -> Json<Success<RespondersData>> {
    Json(Success::new(RespondersData {
        responders: state.orchestrator.registry().descriptors(),
    }))
}

async fn get_version() -> &'static str {
    concat!("concierge ", env!("CARGO_PKG_VERSION"))
}

async fn not_found() -> AppError {
    AppError::NotFound("Resource not found".to_string())
}

fn generate_session_id() -> String {
    let now = Utc::now();
    format!("session_{}.{:06}", now.timestamp(), now.timestamp_subsec_micros())
}

// ============================================================
// Error Handling
// ============================================================

enum AppError {
    BadRequest(String),
    NotFound(String),
    Turn(TurnError),
}

impl From<TurnError> for AppError {
    fn from(e: TurnError) -> Self {
        AppError::Turn(e)
    }
}

fn turn_status(error: &TurnError) -> StatusCode {
    if error.is_timeout() {
        return StatusCode::GATEWAY_TIMEOUT;
    }
    match error.kind() {
        TurnErrorKind::OracleCall
        | TurnErrorKind::ResponderInvocation
        | TurnErrorKind::InvalidRoutingDecision => StatusCode::BAD_GATEWAY,
        TurnErrorKind::UnknownResponderReference
        | TurnErrorKind::MaxIterationsExceeded
        | TurnErrorKind::EmptyState
        | TurnErrorKind::Store
        | TurnErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new(msg, Some("bad_request".to_string())),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, ErrorResponse::new(msg, None)),
            AppError::Turn(error) => {
                let status = turn_status(&error);
                let kind = serde_json::to_value(error.kind())
                    .ok()
                    .and_then(|v| v.as_str().map(String::from));
                (status, ErrorResponse::new(error.to_string(), kind))
            }
        };

        (status, Json(body)).into_response()
    }
}
