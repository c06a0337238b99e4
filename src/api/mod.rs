// ── Companion-client HTTP API ──────────────────────────────────────────────
// REST surface for the web client. Every route authenticates via the
// transport-signed token (auth.rs) and scopes strictly by the
// authenticated user id.

pub mod auth;
pub mod items;
pub mod projects;
pub mod search;
pub mod tasks;
pub mod user;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;

use crate::atoms::error::EngineError;
use crate::engine::state::EngineState;

/// Error wrapper mapping engine failures onto HTTP statuses.
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::Validation(_) | EngineError::InputRejected(_) => StatusCode::BAD_REQUEST,
            EngineError::Auth(_) => StatusCode::UNAUTHORIZED,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::ConfirmationExpired(_) => StatusCode::GONE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "detail": self.0.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Assemble the full route table.
pub fn build_router(state: Arc<EngineState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/items", get(items::list_items))
        .route(
            "/api/items/{id}",
            get(items::get_item).patch(items::update_item).delete(items::delete_item),
        )
        .route("/api/items/{id}/complete", patch(items::complete_item))
        .route("/api/items/{id}/move", patch(items::move_item))
        .route("/api/items/{id}/related", get(items::related_items))
        .route("/api/tasks", get(tasks::list_tasks))
        .route("/api/tasks/calendar", get(tasks::calendar))
        .route("/api/projects", get(projects::list_projects).post(projects::create_project))
        .route(
            "/api/projects/{id}",
            patch(projects::update_project).delete(projects::delete_project),
        )
        .route("/api/search", get(search::search))
        .route("/api/user/settings", get(user::get_settings).patch(user::update_settings))
        .route("/api/user/onboarding/complete", post(user::complete_onboarding))
        .with_state(state)
}
