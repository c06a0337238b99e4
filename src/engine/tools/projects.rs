// ── Project tools ──────────────────────────────────────────────────────────
// manage_projects with subactions. delete and move_items are destructive
// and go through the same two-phase confirmation as the batch item tools.

use chrono::Utc;
use log::info;
use serde_json::{json, Value};

use super::verify_token;
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{FunctionDefinition, ToolDefinition};
use crate::engine::confirmations::{generate_token, PendingAction, PendingOperation};
use crate::engine::state::EngineState;

pub fn definitions() -> Vec<ToolDefinition> {
    vec![ToolDefinition {
        tool_type: "function".into(),
        function: FunctionDefinition {
            name: "manage_projects".into(),
            description: "Manage projects: create, list, get, rename, update, delete, move items.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "action": { "type": "string", "enum": ["create", "list", "get", "rename", "update", "delete", "move_items"], "description": "Action to perform" },
                    "name": { "type": "string", "description": "Project name (for create/rename)" },
                    "color": { "type": "string", "description": "Project color (#HEX format)" },
                    "emoji": { "type": "string", "description": "Project emoji" },
                    "project_id": { "type": "integer", "description": "Project ID (for get/rename/update/delete/move_items)" },
                    "target_project_id": { "type": ["integer", "null"], "description": "Target project ID for move_items (null to remove from project)" },
                    "confirmed": { "type": "boolean", "default": false, "description": "Confirmation for delete/move_items" },
                    "confirmation_token": { "type": "string", "description": "Token from preview response" }
                },
                "required": ["action"]
            }),
        },
    }]
}

pub async fn execute(
    state: &EngineState,
    user_id: i64,
    name: &str,
    args: &Value,
) -> Option<EngineResult<Value>> {
    if name != "manage_projects" {
        return None;
    }
    Some(manage_projects(state, user_id, args))
}

fn manage_projects(state: &EngineState, user_id: i64, args: &Value) -> EngineResult<Value> {
    let Some(action) = args["action"].as_str() else {
        return Ok(json!({ "error": "action is required" }));
    };
    state.store.get_or_create_user(user_id)?;

    match action {
        "create" => {
            let Some(name) = args["name"].as_str() else {
                return Ok(json!({ "error": "name is required for create" }));
            };
            let project = state.store.create_project(
                user_id,
                name,
                args["color"].as_str(),
                args["emoji"].as_str(),
            )?;
            Ok(json!({
                "success": true,
                "project": { "id": project.id, "name": project.name, "color": project.color, "emoji": project.emoji }
            }))
        }

        "list" => {
            let projects = state.store.list_projects(user_id)?;
            Ok(json!({
                "projects": projects
                    .iter()
                    .map(|p| json!({ "id": p.id, "name": p.name, "color": p.color, "emoji": p.emoji }))
                    .collect::<Vec<_>>()
            }))
        }

        "get" => {
            let Some(project_id) = args["project_id"].as_i64() else {
                return Ok(json!({ "error": "project_id is required for get" }));
            };
            let Some(project) = state.store.get_project(project_id, user_id)? else {
                return Ok(json!({ "error": format!("Project {project_id} not found") }));
            };
            let items_count = state.store.project_items_count(project_id, user_id)?;
            Ok(json!({
                "id": project.id, "name": project.name, "color": project.color,
                "emoji": project.emoji, "items_count": items_count
            }))
        }

        "rename" | "update" => {
            let Some(project_id) = args["project_id"].as_i64() else {
                return Ok(json!({ "error": "project_id is required" }));
            };
            let name = args["name"].as_str();
            if action == "rename" && name.is_none() {
                return Ok(json!({ "error": "name is required for rename" }));
            }
            if name.is_none() && args["color"].is_null() && args["emoji"].is_null() {
                return Ok(json!({ "error": "No fields to update" }));
            }
            let Some(project) = state.store.update_project(
                project_id,
                user_id,
                name,
                args["color"].as_str(),
                args["emoji"].as_str(),
            )?
            else {
                return Ok(json!({ "error": format!("Project {project_id} not found") }));
            };
            Ok(json!({
                "success": true,
                "project": { "id": project.id, "name": project.name, "color": project.color, "emoji": project.emoji }
            }))
        }

        "delete" => {
            let Some(project_id) = args["project_id"].as_i64() else {
                return Ok(json!({ "error": "project_id is required for delete" }));
            };

            if args["confirmed"].as_bool().unwrap_or(false) {
                let token = args["confirmation_token"]
                    .as_str()
                    .ok_or(EngineError::ConfirmationExpired("confirmation_token missing".into()))?;
                let pending = verify_token(state, user_id, token)?;
                let target = pending.matched_ids.first().copied().unwrap_or(project_id);
                let deleted = state.store.delete_project(target, user_id)?;
                state.confirmations.discard(token);
                info!("[tools] project {target} delete confirmed for user {user_id}");
                return Ok(json!({ "success": deleted, "deleted": deleted }));
            }

            let Some(project) = state.store.get_project(project_id, user_id)? else {
                return Ok(json!({ "error": format!("Project {project_id} not found") }));
            };
            let items_count = state.store.project_items_count(project_id, user_id)?;
            let token = generate_token("delp");
            state.confirmations.store(PendingOperation {
                token: token.clone(),
                action: PendingAction::DeleteProject,
                user_id,
                filter: None,
                updates: None,
                matched_ids: vec![project_id],
                created_at: Utc::now(),
            });
            Ok(json!({
                "action": "delete_project",
                "project": { "id": project.id, "name": project.name },
                "items_count": items_count,
                "needs_confirmation": true,
                "confirmation_token": token,
            }))
        }

        "move_items" => {
            let Some(project_id) = args["project_id"].as_i64() else {
                return Ok(json!({ "error": "project_id is required for move_items" }));
            };
            let target_project_id = args["target_project_id"].as_i64();

            if args["confirmed"].as_bool().unwrap_or(false) {
                let token = args["confirmation_token"]
                    .as_str()
                    .ok_or(EngineError::ConfirmationExpired("confirmation_token missing".into()))?;
                let pending = verify_token(state, user_id, token)?;
                let (source, target) = match pending.action {
                    PendingAction::MoveItems { source_project_id, target_project_id } => {
                        (source_project_id, target_project_id)
                    }
                    _ => (project_id, target_project_id),
                };
                let count = state.store.move_project_items(source, target, user_id)?;
                state.confirmations.discard(token);
                return Ok(json!({ "success": true, "moved_count": count }));
            }

            let items_count = state.store.project_items_count(project_id, user_id)?;
            if items_count == 0 {
                return Ok(json!({ "matched_count": 0, "needs_confirmation": false }));
            }

            let source_project = state.store.get_project(project_id, user_id)?;
            let target_project = match target_project_id {
                Some(id) => state.store.get_project(id, user_id)?,
                None => None,
            };
            let token = generate_token("mov");
            state.confirmations.store(PendingOperation {
                token: token.clone(),
                action: PendingAction::MoveItems { source_project_id: project_id, target_project_id },
                user_id,
                filter: None,
                updates: None,
                matched_ids: Vec::new(),
                created_at: Utc::now(),
            });
            Ok(json!({
                "action": "move_items",
                "source_project": source_project.map(|p| json!({ "id": p.id, "name": p.name })),
                "target_project": target_project.map(|p| json!({ "id": p.id, "name": p.name })),
                "items_count": items_count,
                "needs_confirmation": true,
                "confirmation_token": token,
            }))
        }

        other => Ok(json!({ "error": format!("Unknown action: {other}") })),
    }
}

#[cfg(test)]
mod tests {
    use super::super::execute_tool;
    use super::super::test_support::plain_state;
    use crate::atoms::types::NewItem;
    use serde_json::json;

    #[tokio::test]
    async fn crud_actions_round_trip() {
        let state = plain_state();

        let created = execute_tool(
            &state,
            1,
            "manage_projects",
            &json!({ "action": "create", "name": "Ремонт", "emoji": "🔨" }),
        )
        .await;
        assert_eq!(created["success"], true);
        let id = created["project"]["id"].as_i64().unwrap();

        let listed = execute_tool(&state, 1, "manage_projects", &json!({ "action": "list" })).await;
        assert_eq!(listed["projects"].as_array().unwrap().len(), 1);

        let renamed = execute_tool(
            &state,
            1,
            "manage_projects",
            &json!({ "action": "rename", "project_id": id, "name": "Стройка" }),
        )
        .await;
        assert_eq!(renamed["project"]["name"], "Стройка");

        let fetched = execute_tool(
            &state,
            1,
            "manage_projects",
            &json!({ "action": "get", "project_id": id }),
        )
        .await;
        assert_eq!(fetched["items_count"], 0);
    }

    #[tokio::test]
    async fn delete_requires_confirmation_and_nulls_items() {
        let state = plain_state();
        state.store.get_or_create_user(1).unwrap();
        let project = state.store.create_project(1, "Сад", None, None).unwrap();
        let item = state
            .store
            .create_item(1, &NewItem { project_id: Some(project.id), ..NewItem::default() })
            .unwrap();

        let preview = execute_tool(
            &state,
            1,
            "manage_projects",
            &json!({ "action": "delete", "project_id": project.id }),
        )
        .await;
        assert_eq!(preview["needs_confirmation"], true);
        assert_eq!(preview["items_count"], 1);
        let token = preview["confirmation_token"].as_str().unwrap().to_string();
        assert!(token.starts_with("delp_"));

        let executed = execute_tool(
            &state,
            1,
            "manage_projects",
            &json!({ "action": "delete", "project_id": project.id, "confirmed": true, "confirmation_token": token }),
        )
        .await;
        assert_eq!(executed["success"], true);
        assert!(state.store.get_project(project.id, 1).unwrap().is_none());
        assert_eq!(state.store.get_item(item.id, 1).unwrap().unwrap().project_id, None);
    }

    #[tokio::test]
    async fn move_items_two_phase() {
        let state = plain_state();
        state.store.get_or_create_user(1).unwrap();
        let a = state.store.create_project(1, "A", None, None).unwrap();
        let b = state.store.create_project(1, "B", None, None).unwrap();
        for _ in 0..2 {
            state
                .store
                .create_item(1, &NewItem { project_id: Some(a.id), ..NewItem::default() })
                .unwrap();
        }

        let preview = execute_tool(
            &state,
            1,
            "manage_projects",
            &json!({ "action": "move_items", "project_id": a.id, "target_project_id": b.id }),
        )
        .await;
        assert_eq!(preview["items_count"], 2);
        let token = preview["confirmation_token"].as_str().unwrap().to_string();

        let executed = execute_tool(
            &state,
            1,
            "manage_projects",
            &json!({ "action": "move_items", "project_id": a.id, "target_project_id": b.id, "confirmed": true, "confirmation_token": token }),
        )
        .await;
        assert_eq!(executed["moved_count"], 2);
        assert_eq!(state.store.project_items_count(b.id, 1).unwrap(), 2);
    }
}
