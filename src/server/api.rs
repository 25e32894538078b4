//! Read-only JSON endpoints.

use crate::error::ConvoError;
use crate::server::AppState;
use crate::session::SessionInfo;
use crate::store::{ConversationDetail, ConversationMaster};
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::error;

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Internal(message) => {
                error!(error = %message, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<ConvoError> for ApiError {
    fn from(e: ConvoError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

#[derive(Debug, Deserialize)]
pub struct ReportsQuery {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct ReportDetail {
    pub master: ConversationMaster,
    pub details: Vec<ConversationDetail>,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": crate::version_string(),
        "sessions": state.ctx.registry.len(),
    }))
}

/// GET /api/v1/sessions
pub async fn sessions(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    Json(state.ctx.registry.list())
}

/// GET /api/v1/reports?user_id=... (newest first)
pub async fn list_reports(
    State(state): State<AppState>,
    Query(query): Query<ReportsQuery>,
) -> Result<Json<Vec<ConversationMaster>>, ApiError> {
    let store = state.ctx.store.clone();
    let user_id = query.user_id;
    let masters = tokio::task::spawn_blocking(move || -> Result<_, ApiError> {
        let uid = store
            .resolve_user_uid(&user_id)?
            .ok_or_else(|| ApiError::NotFound(format!("unknown user: {}", user_id)))?;
        Ok(store.list_masters(uid)?)
    })
    .await??;
    Ok(Json(masters))
}

/// GET /api/v1/reports/{master_id}
pub async fn show_report(
    State(state): State<AppState>,
    Path(master_id): Path<i64>,
) -> Result<Json<ReportDetail>, ApiError> {
    let store = state.ctx.store.clone();
    let report = tokio::task::spawn_blocking(move || -> Result<_, ApiError> {
        let master = store
            .get_master(master_id)?
            .ok_or_else(|| ApiError::NotFound(format!("no conversation {}", master_id)))?;
        let details = store.list_details(master_id)?;
        Ok(ReportDetail { master, details })
    })
    .await??;
    Ok(Json(report))
}
