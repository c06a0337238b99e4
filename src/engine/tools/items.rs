// ── Item tools ─────────────────────────────────────────────────────────────
// search_items, get_item_details, save_item, and the two batch tools with
// two-phase confirmation. Batch execution always applies to the id set
// frozen at preview time, never to a re-resolved filter.

use chrono::{DateTime, Utc};
use log::info;
use serde_json::{json, Value};

use super::{parse_filter, verify_token};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{
    FunctionDefinition, ItemPatch, ItemSource, ItemStatus, ItemType, NewItem, Priority,
    ToolDefinition,
};
use crate::engine::confirmations::{generate_token, PendingAction, PendingOperation};
use crate::engine::state::EngineState;

pub fn definitions() -> Vec<ToolDefinition> {
    let filter_properties = json!({
        "query": { "type": "string" },
        "type": { "type": "string", "enum": ["task", "idea", "note", "resource", "contact", "event"] },
        "status": { "type": "string", "enum": ["inbox", "active", "done", "archived"] },
        "date_field": { "type": "string", "enum": ["due_at", "created_at"] },
        "date_from": { "type": "string" },
        "date_to": { "type": "string" },
        "project": { "type": ["string", "integer"] },
        "priority": { "type": "string", "enum": ["high", "medium", "low"] },
        "tags": { "type": "array", "items": { "type": "string" } }
    });

    vec![
        ToolDefinition {
            tool_type: "function".into(),
            function: FunctionDefinition {
                name: "search_items".into(),
                description: "Search items by text and filters. Use to find item IDs for further operations.".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string", "description": "Text search query (searches in title, content, original_input)" },
                        "type": { "type": "string", "enum": ["task", "idea", "note", "resource", "contact", "event"], "description": "Filter by item type" },
                        "status": { "type": "string", "enum": ["inbox", "active", "done", "archived"], "description": "Filter by status" },
                        "date_field": { "type": "string", "enum": ["due_at", "created_at"], "description": "Which date field to filter by" },
                        "date_from": { "type": "string", "description": "Start of date range (ISO format)" },
                        "date_to": { "type": "string", "description": "End of date range (ISO format)" },
                        "project": { "type": ["string", "integer"], "description": "Project name or ID" },
                        "priority": { "type": "string", "enum": ["high", "medium", "low"], "description": "Filter by priority" },
                        "tags": { "type": "array", "items": { "type": "string" }, "description": "Filter by tags (items must have ALL specified tags)" },
                        "limit": { "type": "integer", "default": 10, "description": "Maximum results to return" }
                    },
                    "required": []
                }),
            },
        },
        ToolDefinition {
            tool_type: "function".into(),
            function: FunctionDefinition {
                name: "get_item_details".into(),
                description: "Get full details of an item by ID.".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "item_id": { "type": "integer", "description": "ID of the item to retrieve" }
                    },
                    "required": ["item_id"]
                }),
            },
        },
        ToolDefinition {
            tool_type: "function".into(),
            function: FunctionDefinition {
                name: "batch_update_items".into(),
                description: "Batch update items matching filters. Requires confirmation for execution.".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "filter": { "type": "object", "description": "Filters to select items (same as search_items)", "properties": filter_properties.clone() },
                        "updates": {
                            "type": "object",
                            "description": "Fields to update",
                            "properties": {
                                "due_at": { "type": "string", "description": "New due date (ISO format)" },
                                "due_at_raw": { "type": "string", "description": "Original text for due date" },
                                "status": { "type": "string", "enum": ["inbox", "active", "done", "archived"] },
                                "priority": { "type": "string", "enum": ["high", "medium", "low"] },
                                "project_id": { "type": "integer", "description": "New project ID" },
                                "tags": { "type": "array", "items": { "type": "string" } }
                            }
                        },
                        "confirmed": { "type": "boolean", "default": false, "description": "Set to true after user confirmation" },
                        "confirmation_token": { "type": "string", "description": "Token from preview response" }
                    },
                    "required": ["filter", "updates"]
                }),
            },
        },
        ToolDefinition {
            tool_type: "function".into(),
            function: FunctionDefinition {
                name: "batch_delete_items".into(),
                description: "Batch delete items matching filters. Requires confirmation for execution.".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "filter": { "type": "object", "description": "Filters to select items (same as search_items)", "properties": filter_properties },
                        "confirmed": { "type": "boolean", "default": false, "description": "Set to true after user confirmation" },
                        "confirmation_token": { "type": "string", "description": "Token from preview response" }
                    },
                    "required": ["filter"]
                }),
            },
        },
        ToolDefinition {
            tool_type: "function".into(),
            function: FunctionDefinition {
                name: "save_item".into(),
                description: "Create a new item (task, idea, note, resource, contact, event). Use when user asks to ADD or CREATE a new record.".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "title": { "type": "string", "description": "Item title/name" },
                        "content": { "type": "string", "description": "Full content (optional)" },
                        "type": { "type": "string", "enum": ["task", "idea", "note", "resource", "contact", "event"], "description": "Item type" },
                        "due_at": { "type": "string", "description": "Due date in ISO format (optional)" },
                        "due_at_raw": { "type": "string", "description": "Original due date text like 'завтра в 15:00' (optional)" },
                        "priority": { "type": "string", "enum": ["high", "medium", "low"], "description": "Priority level (optional)" },
                        "project_id": { "type": "integer", "description": "Project ID to add item to (optional)" },
                        "tags": { "type": "array", "items": { "type": "string" }, "description": "Tags list (optional)" }
                    },
                    "required": ["title", "type"]
                }),
            },
        },
    ]
}

pub async fn execute(
    state: &EngineState,
    user_id: i64,
    name: &str,
    args: &Value,
) -> Option<EngineResult<Value>> {
    Some(match name {
        "search_items" => search_items(state, user_id, args),
        "get_item_details" => get_item_details(state, user_id, args),
        "batch_update_items" => batch_update_items(state, user_id, args),
        "batch_delete_items" => batch_delete_items(state, user_id, args),
        "save_item" => save_item(state, user_id, args).await,
        _ => return None,
    })
}

fn search_items(state: &EngineState, user_id: i64, args: &Value) -> EngineResult<Value> {
    let mut filter = parse_filter(state, user_id, args);
    if args["limit"].is_null() {
        filter.limit = 10;
    }
    let items = state.store.search_advanced(user_id, &filter)?;
    let results: Vec<Value> = items
        .iter()
        .map(|i| {
            json!({
                "id": i.id,
                "title": i.title,
                "type": i.item_type,
                "status": i.status,
                "due_at": i.due_at.map(|d| d.to_rfc3339()),
                "priority": i.priority,
            })
        })
        .collect();
    Ok(json!({ "results": results, "total_count": results.len() }))
}

fn get_item_details(state: &EngineState, user_id: i64, args: &Value) -> EngineResult<Value> {
    let item_id = args["item_id"]
        .as_i64()
        .ok_or(EngineError::Validation("item_id is required".into()))?;
    let Some(item) = state.store.get_item(item_id, user_id)? else {
        return Ok(json!({ "error": format!("Item {item_id} not found") }));
    };
    Ok(json!({
        "id": item.id,
        "title": item.title,
        "content": item.content,
        "type": item.item_type,
        "status": item.status,
        "due_at": item.due_at.map(|d| d.to_rfc3339()),
        "due_at_raw": item.due_at_raw,
        "priority": item.priority,
        "tags": item.tags,
        "entities": item.entities,
        "project_id": item.project_id,
        "created_at": item.created_at.to_rfc3339(),
    }))
}

/// Build an ItemPatch from the `updates` object of batch_update_items.
fn parse_updates(updates: &Value) -> ItemPatch {
    let mut patch = ItemPatch::default();
    if let Some(s) = updates["status"].as_str().and_then(ItemStatus::parse) {
        patch.status = Some(s);
    }
    if let Some(p) = updates["priority"].as_str().and_then(Priority::parse) {
        patch.priority = Some(Some(p));
    }
    if let Some(pid) = updates["project_id"].as_i64() {
        patch.project_id = Some(Some(pid));
    }
    if let Some(tags) = updates["tags"].as_array() {
        patch.tags = Some(tags.iter().filter_map(|t| t.as_str()).map(str::to_string).collect());
    }
    if let Some(due) = updates["due_at"].as_str() {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(due) {
            patch.due_at = Some(Some(parsed.with_timezone(&Utc)));
        }
    }
    if let Some(raw) = updates["due_at_raw"].as_str() {
        patch.due_at_raw = Some(Some(raw.to_string()));
    }
    patch
}

fn batch_update_items(state: &EngineState, user_id: i64, args: &Value) -> EngineResult<Value> {
    let updates = &args["updates"];
    if !updates.is_object() || updates.as_object().is_some_and(|o| o.is_empty()) {
        return Ok(json!({ "error": "updates is required" }));
    }

    // Phase B: confirmed execution against the frozen id set.
    if args["confirmed"].as_bool().unwrap_or(false) {
        let token = args["confirmation_token"]
            .as_str()
            .ok_or(EngineError::ConfirmationExpired("confirmation_token missing".into()))?;
        let pending = verify_token(state, user_id, token)?;
        let patch = pending
            .updates
            .as_ref()
            .map(|u| parse_updates(u))
            .unwrap_or_else(|| parse_updates(updates));
        let count = state.store.batch_update(&pending.matched_ids, user_id, &patch)?;
        state.confirmations.discard(token);
        info!("[tools] batch_update confirmed: {count} items for user {user_id}");
        return Ok(json!({ "success": true, "updated_count": count }));
    }

    // Phase A: preview.
    let filter = parse_filter(state, user_id, &args["filter"]);
    let items = state.store.search_advanced(user_id, &filter)?;
    if items.is_empty() {
        return Ok(json!({ "matched_count": 0, "items_preview": [], "needs_confirmation": false }));
    }
    let token = generate_token("upd");
    state.confirmations.store(PendingOperation {
        token: token.clone(),
        action: PendingAction::BatchUpdate,
        user_id,
        filter: Some(filter),
        updates: Some(updates.clone()),
        matched_ids: items.iter().map(|i| i.id).collect(),
        created_at: Utc::now(),
    });
    let preview: Vec<Value> = items.iter().take(5).map(|i| json!({ "id": i.id, "title": i.title })).collect();
    Ok(json!({
        "action": "update",
        "matched_count": items.len(),
        "items_preview": preview,
        "needs_confirmation": true,
        "confirmation_token": token,
    }))
}

fn batch_delete_items(state: &EngineState, user_id: i64, args: &Value) -> EngineResult<Value> {
    if args["confirmed"].as_bool().unwrap_or(false) {
        let token = args["confirmation_token"]
            .as_str()
            .ok_or(EngineError::ConfirmationExpired("confirmation_token missing".into()))?;
        let pending = verify_token(state, user_id, token)?;
        let count = state.store.batch_delete(&pending.matched_ids, user_id)?;
        state.confirmations.discard(token);
        info!("[tools] batch_delete confirmed: {count} items for user {user_id}");
        return Ok(json!({ "success": true, "deleted_count": count }));
    }

    let filter = parse_filter(state, user_id, &args["filter"]);
    let items = state.store.search_advanced(user_id, &filter)?;
    if items.is_empty() {
        return Ok(json!({ "matched_count": 0, "items_preview": [], "needs_confirmation": false }));
    }
    let token = generate_token("del");
    state.confirmations.store(PendingOperation {
        token: token.clone(),
        action: PendingAction::BatchDelete,
        user_id,
        filter: Some(filter),
        updates: None,
        matched_ids: items.iter().map(|i| i.id).collect(),
        created_at: Utc::now(),
    });
    let preview: Vec<Value> = items.iter().take(5).map(|i| json!({ "id": i.id, "title": i.title })).collect();
    Ok(json!({
        "action": "delete",
        "matched_count": items.len(),
        "items_preview": preview,
        "needs_confirmation": true,
        "confirmation_token": token,
    }))
}

async fn save_item(state: &EngineState, user_id: i64, args: &Value) -> EngineResult<Value> {
    let Some(title) = args["title"].as_str().filter(|t| !t.trim().is_empty()) else {
        return Ok(json!({ "error": "title is required" }));
    };
    let Some(item_type) = args["type"].as_str().and_then(ItemType::parse) else {
        return Ok(json!({ "error": "type is required" }));
    };

    state.store.get_or_create_user(user_id)?;
    let due_at = args["due_at"]
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc));
    let tags = args["tags"]
        .as_array()
        .map(|a| a.iter().filter_map(|t| t.as_str()).map(str::to_string).collect())
        .unwrap_or_default();

    let item = state.store.create_item(
        user_id,
        &NewItem {
            item_type,
            status: ItemStatus::Inbox,
            source: Some(ItemSource::Text),
            title: Some(title.to_string()),
            content: args["content"].as_str().map(str::to_string),
            original_input: Some(title.to_string()),
            due_at,
            due_at_raw: args["due_at_raw"].as_str().map(str::to_string),
            remind_at: due_at,
            priority: args["priority"].as_str().and_then(Priority::parse),
            project_id: args["project_id"].as_i64(),
            tags,
            ..NewItem::default()
        },
    )?;

    // Best-effort embedding so the new item is semantically searchable.
    if let Some(embedder) = state.embedder.as_deref() {
        let text = format!("{title} {}", args["content"].as_str().unwrap_or(""));
        if let Ok(vectors) = embedder.embed(&[text]).await {
            if let Some(vector) = vectors.first().filter(|v| !v.is_empty()) {
                state.store.set_embedding(item.id, user_id, vector).ok();
            }
        }
    }

    Ok(json!({
        "success": true,
        "item": { "id": item.id, "title": item.title, "type": item.item_type, "project_id": item.project_id }
    }))
}
