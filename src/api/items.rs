// ── Items API ──────────────────────────────────────────────────────────────
// CRUD + complete/move/related. Unknown PATCH fields are ignored; invalid
// enum values and out-of-range pagination are 400s; ids invisible to the
// caller are uniform 404s.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::auth::AuthUser;
use super::{ApiError, ApiResult};
use crate::atoms::error::EngineError;
use crate::atoms::types::{Item, ItemPatch, ItemStatus, ItemType, Priority, RecurrenceRule};
use crate::engine::search;
use crate::engine::state::EngineState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(rename = "type")]
    pub type_csv: Option<String>,
    #[serde(rename = "status")]
    pub status_csv: Option<String>,
    pub project_id: Option<i64>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    20
}

fn parse_types(csv: Option<&str>) -> ApiResult<Vec<ItemType>> {
    csv.map(|s| {
        s.split(',')
            .filter(|t| !t.trim().is_empty())
            .map(|t| {
                ItemType::parse(t.trim())
                    .ok_or_else(|| ApiError(EngineError::Validation(format!("invalid type: {t}"))))
            })
            .collect()
    })
    .unwrap_or_else(|| Ok(Vec::new()))
}

fn parse_statuses(csv: Option<&str>) -> ApiResult<Vec<ItemStatus>> {
    csv.map(|s| {
        s.split(',')
            .filter(|t| !t.trim().is_empty())
            .map(|t| {
                ItemStatus::parse(t.trim())
                    .ok_or_else(|| ApiError(EngineError::Validation(format!("invalid status: {t}"))))
            })
            .collect()
    })
    .unwrap_or_else(|| Ok(Vec::new()))
}

pub async fn list_items(
    State(state): State<Arc<EngineState>>,
    user: AuthUser,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    if query.limit < 1 || query.limit > 100 {
        return Err(ApiError(EngineError::Validation("limit must be in [1, 100]".into())));
    }
    let types = parse_types(query.type_csv.as_deref())?;
    let statuses = parse_statuses(query.status_csv.as_deref())?;

    let (items, total) = state.store.list_items(
        user.id,
        &types,
        &statuses,
        query.project_id,
        query.limit,
        query.offset,
    )?;
    let has_more = query.offset + items.len() < total as usize;
    Ok(Json(json!({
        "items": items,
        "total": total,
        "limit": query.limit,
        "offset": query.offset,
        "has_more": has_more,
    })))
}

fn found(item: Option<Item>) -> ApiResult<Item> {
    item.ok_or(ApiError(EngineError::NotFound("item not found".into())))
}

pub async fn get_item(
    State(state): State<Arc<EngineState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Item>> {
    Ok(Json(found(state.store.get_item(id, user.id)?)?))
}

/// Build an ItemPatch from a loose JSON body. Unknown keys are ignored;
/// known keys with invalid values are 400s. `remind_at` must be in the
/// future when set by a client (the scheduler's sentinel is the only past
/// value the system itself writes).
fn patch_from_json(body: &Value) -> ApiResult<ItemPatch> {
    let mut patch = ItemPatch::default();
    let Some(object) = body.as_object() else {
        return Err(ApiError(EngineError::Validation("body must be an object".into())));
    };

    for (key, value) in object {
        match key.as_str() {
            "type" => {
                let s = value.as_str().unwrap_or_default();
                patch.item_type = Some(
                    ItemType::parse(s)
                        .ok_or_else(|| ApiError(EngineError::Validation(format!("invalid type: {s}"))))?,
                );
            }
            "status" => {
                let s = value.as_str().unwrap_or_default();
                patch.status = Some(
                    ItemStatus::parse(s)
                        .ok_or_else(|| ApiError(EngineError::Validation(format!("invalid status: {s}"))))?,
                );
            }
            "title" => patch.title = value.as_str().map(str::to_string),
            "content" => patch.content = Some(value.as_str().map(str::to_string)),
            "due_at" => patch.due_at = Some(parse_instant(value)?),
            "due_at_raw" => patch.due_at_raw = Some(value.as_str().map(str::to_string)),
            "remind_at" => {
                let instant = parse_instant(value)?;
                if let Some(t) = instant {
                    if t <= Utc::now() {
                        return Err(ApiError(EngineError::Validation(
                            "remind_at must be in the future".into(),
                        )));
                    }
                }
                patch.remind_at = Some(instant);
            }
            "priority" => {
                patch.priority = Some(match value.as_str() {
                    None => None,
                    Some(s) => Some(Priority::parse(s).ok_or_else(|| {
                        ApiError(EngineError::Validation(format!("invalid priority: {s}")))
                    })?),
                });
            }
            "project_id" => patch.project_id = Some(value.as_i64()),
            "tags" => {
                let tags = value
                    .as_array()
                    .map(|a| a.iter().filter_map(|t| t.as_str()).map(str::to_string).collect())
                    .unwrap_or_default();
                patch.tags = Some(tags);
            }
            "entities" => patch.entities = Some(value.clone()),
            "recurrence" => {
                patch.recurrence = Some(match value {
                    Value::Null => None,
                    other => Some(serde_json::from_value::<RecurrenceRule>(other.clone()).map_err(
                        |e| ApiError(EngineError::Validation(format!("invalid recurrence: {e}"))),
                    )?),
                });
            }
            // Unknown fields (and original_input) are ignored, not errors.
            _ => {}
        }
    }
    Ok(patch)
}

fn parse_instant(value: &Value) -> ApiResult<Option<DateTime<Utc>>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|d| Some(d.with_timezone(&Utc)))
            .map_err(|e| ApiError(EngineError::Validation(format!("invalid timestamp: {e}")))),
        _ => Err(ApiError(EngineError::Validation("timestamp must be a string or null".into()))),
    }
}

pub async fn update_item(
    State(state): State<Arc<EngineState>>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Item>> {
    let patch = patch_from_json(&body)?;
    if patch.is_empty() {
        return Err(ApiError(EngineError::Validation("No fields to update".into())));
    }
    Ok(Json(found(state.store.update_item(id, user.id, &patch)?)?))
}

pub async fn delete_item(
    State(state): State<Arc<EngineState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    if !state.store.delete_item(id, user.id)? {
        return Err(ApiError(EngineError::NotFound("item not found".into())));
    }
    Ok(Json(json!({ "success": true, "message": "Item deleted" })))
}

pub async fn complete_item(
    State(state): State<Arc<EngineState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let Some((item, next)) = state.store.complete_item(id, user.id)? else {
        return Err(ApiError(EngineError::NotFound("item not found".into())));
    };
    Ok(Json(json!({ "item": item, "next_occurrence": next })))
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub project_id: Option<i64>,
}

pub async fn move_item(
    State(state): State<Arc<EngineState>>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(body): Json<MoveRequest>,
) -> ApiResult<Json<Item>> {
    if let Some(project_id) = body.project_id {
        if state.store.get_project(project_id, user.id)?.is_none() {
            return Err(ApiError(EngineError::NotFound("project not found".into())));
        }
    }
    let patch = ItemPatch { project_id: Some(body.project_id), ..ItemPatch::default() };
    Ok(Json(found(state.store.update_item(id, user.id, &patch)?)?))
}

/// Related items: semantic neighbours plus explicit links with reasons.
pub async fn related_items(
    State(state): State<Arc<EngineState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    found(state.store.get_item(id, user.id)?)?;

    let auto = search::find_similar(&state.store, id, user.id, 5, 0.7);
    let linked: Vec<Value> = state
        .store
        .links_for_item(id, user.id)?
        .into_iter()
        .map(|(link, item)| {
            json!({
                "id": item.id,
                "title": item.title,
                "type": item.item_type,
                "reason": link.reason,
            })
        })
        .collect();

    Ok(Json(json!({ "auto": auto, "linked": linked })))
}
