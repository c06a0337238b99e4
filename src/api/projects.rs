// ── Projects API ───────────────────────────────────────────────────────────

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::auth::AuthUser;
use super::{ApiError, ApiResult};
use crate::atoms::error::EngineError;
use crate::engine::state::EngineState;

pub async fn list_projects(
    State(state): State<Arc<EngineState>>,
    user: AuthUser,
) -> ApiResult<Json<Value>> {
    state.store.get_or_create_user(user.id)?;
    let projects = state.store.list_projects(user.id)?;
    let with_counts: Vec<Value> = projects
        .into_iter()
        .map(|p| {
            let items_count = state.store.project_items_count(p.id, user.id).unwrap_or(0);
            json!({
                "id": p.id,
                "name": p.name,
                "color": p.color,
                "emoji": p.emoji,
                "created_at": p.created_at,
                "items_count": items_count,
            })
        })
        .collect();
    Ok(Json(json!({ "projects": with_counts })))
}

#[derive(Debug, Deserialize)]
pub struct CreateProject {
    pub name: String,
    pub color: Option<String>,
    pub emoji: Option<String>,
}

pub async fn create_project(
    State(state): State<Arc<EngineState>>,
    user: AuthUser,
    Json(body): Json<CreateProject>,
) -> ApiResult<Json<Value>> {
    state.store.get_or_create_user(user.id)?;
    let project = state.store.create_project(
        user.id,
        &body.name,
        body.color.as_deref(),
        body.emoji.as_deref(),
    )?;
    Ok(Json(json!(project)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateProject {
    pub name: Option<String>,
    pub color: Option<String>,
    pub emoji: Option<String>,
}

pub async fn update_project(
    State(state): State<Arc<EngineState>>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(body): Json<UpdateProject>,
) -> ApiResult<Json<Value>> {
    if body.name.is_none() && body.color.is_none() && body.emoji.is_none() {
        return Err(ApiError(EngineError::Validation("No fields to update".into())));
    }
    let project = state
        .store
        .update_project(id, user.id, body.name.as_deref(), body.color.as_deref(), body.emoji.as_deref())?
        .ok_or(ApiError(EngineError::NotFound("project not found".into())))?;
    Ok(Json(json!(project)))
}

/// Deleting a project first nulls the project reference on all its items.
pub async fn delete_project(
    State(state): State<Arc<EngineState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    if !state.store.delete_project(id, user.id)? {
        return Err(ApiError(EngineError::NotFound("project not found".into())));
    }
    Ok(Json(json!({ "success": true, "message": "Project deleted" })))
}
