// ── Tool Registry & Dispatcher ─────────────────────────────────────────────
// Each tool group is a self-contained module with definitions + executor.
// The executor returns Some(result) when it owns the tool name; the first
// Some wins. Errors are folded into `{"error": …}` objects so the model can
// read and react to them.

pub mod items;
pub mod projects;

use chrono::DateTime;
use log::info;
use serde_json::{json, Value};

use crate::atoms::types::{DateField, ItemStatus, ItemType, Priority, SearchFilter, ToolDefinition};
use crate::engine::state::EngineState;

/// The complete set of tools the management agent sees.
pub fn definitions() -> Vec<ToolDefinition> {
    let mut tools = Vec::new();
    tools.extend(items::definitions());
    tools.extend(projects::definitions());
    tools
}

/// Execute a single tool call. Unknown names come back as error objects.
pub async fn execute_tool(state: &EngineState, user_id: i64, name: &str, args: &Value) -> Value {
    let preview: String = args.to_string().chars().take(200).collect();
    info!("[tools] Executing {name} user={user_id} args={preview}");

    let result = match items::execute(state, user_id, name, args).await {
        Some(r) => Some(r),
        None => projects::execute(state, user_id, name, args).await,
    };

    match result {
        Some(Ok(value)) => value,
        Some(Err(e)) => json!({ "error": e.to_string() }),
        None => json!({ "error": format!("Unknown tool: {name}") }),
    }
}

/// Verify a confirmation token for execution: exists, unexpired, and owned
/// by the caller. Consumption happens after the operation applies, so a
/// rejected attempt leaves the rightful owner's token intact.
pub(crate) fn verify_token(
    state: &EngineState,
    user_id: i64,
    token: &str,
) -> crate::atoms::error::EngineResult<crate::engine::confirmations::PendingOperation> {
    use crate::atoms::error::EngineError;
    let pending = state
        .confirmations
        .peek(token)
        .ok_or_else(|| EngineError::ConfirmationExpired("token expired or invalid".into()))?;
    if pending.user_id != user_id {
        return Err(EngineError::Auth("confirmation token belongs to another user".into()));
    }
    Ok(pending)
}

/// Parse the shared filter object of search_items / batch tools.
/// Project may be a name or an id; both resolve against the caller's user.
pub(crate) fn parse_filter(state: &EngineState, user_id: i64, value: &Value) -> SearchFilter {
    let mut filter = SearchFilter {
        query: value["query"].as_str().map(str::to_string),
        item_type: value["type"].as_str().and_then(ItemType::parse),
        status: value["status"].as_str().and_then(ItemStatus::parse),
        priority: value["priority"].as_str().and_then(Priority::parse),
        ..SearchFilter::default()
    };

    filter.date_field = match value["date_field"].as_str() {
        Some("due_at") => Some(DateField::DueAt),
        Some("created_at") => Some(DateField::CreatedAt),
        _ => None,
    };
    filter.date_from = value["date_from"]
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&chrono::Utc));
    filter.date_to = value["date_to"]
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&chrono::Utc));

    if let Some(tags) = value["tags"].as_array() {
        filter.tags = tags
            .iter()
            .filter_map(|t| t.as_str())
            .map(str::to_string)
            .collect();
    }

    match &value["project"] {
        Value::Number(n) => filter.project_id = n.as_i64(),
        Value::String(s) => {
            filter.project_id = if let Ok(id) = s.parse::<i64>() {
                Some(id)
            } else {
                state
                    .store
                    .get_project_by_name(s, user_id)
                    .ok()
                    .flatten()
                    .map(|p| p.id)
            };
        }
        _ => {}
    }

    if let Some(limit) = value["limit"].as_u64() {
        filter.limit = limit as usize;
    }
    filter
}
