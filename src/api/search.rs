// ── Search API ─────────────────────────────────────────────────────────────
// Thin wrapper over the hybrid engine. An empty query is an empty list,
// not an error.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::auth::AuthUser;
use super::{ApiError, ApiResult};
use crate::atoms::error::EngineError;
use crate::atoms::types::{ItemStatus, ItemType};
use crate::engine::search::hybrid_search;
use crate::engine::state::EngineState;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    #[serde(rename = "type")]
    pub type_filter: Option<String>,
    #[serde(rename = "status")]
    pub status_filter: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    10
}

pub async fn search(
    State(state): State<Arc<EngineState>>,
    user: AuthUser,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Value>> {
    if query.limit < 1 || query.limit > 100 {
        return Err(ApiError(EngineError::Validation("limit must be in [1, 100]".into())));
    }
    let type_filter = match query.type_filter.as_deref() {
        None | Some("") => None,
        Some(s) => Some(
            ItemType::parse(s)
                .ok_or_else(|| ApiError(EngineError::Validation(format!("invalid type: {s}"))))?,
        ),
    };
    let status_filter = match query.status_filter.as_deref() {
        None | Some("") => None,
        Some(s) => Some(
            ItemStatus::parse(s)
                .ok_or_else(|| ApiError(EngineError::Validation(format!("invalid status: {s}"))))?,
        ),
    };

    let results = hybrid_search(
        &state.store,
        state.embedder.as_deref(),
        user.id,
        &query.q,
        query.limit,
        type_filter,
        status_filter,
        None,
    )
    .await;

    Ok(Json(json!({ "results": results, "query": query.q })))
}
