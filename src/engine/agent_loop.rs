// ── Management Agent Loop ──────────────────────────────────────────────────
// Multi-turn tool loop for management intents: send conversation + tool
// schemas to the model, execute returned tool calls, repeat (≤ 5 rounds).
//
// Destructive tools return needs_confirmation; the loop then serialises
// PendingAgentState and hands control back to the caller with a readable
// confirmation prompt. User approval re-hydrates the state, executes the
// stored call with confirmed=true, and continues where the loop stopped.
// No coroutine suspension — the whole flow is (state, event) → (state', out).

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde_json::{json, Value};

use crate::atoms::constants::MAX_AGENT_ITERATIONS;
use crate::atoms::types::ChatMessage;
use crate::engine::state::EngineState;
use crate::engine::tools;

const AGENT_SYSTEM_PROMPT: &str = r#"Ты — AI-агент для управления задачами, заметками, идеями и проектами пользователя.

## Твои возможности (tools):
1. **search_items** — поиск записей по тексту, типу, статусу, дате, проекту, тегам
2. **get_item_details** — получить полную информацию о записи по ID
3. **batch_update_items** — массовое обновление записей (статус, приоритет, дата, проект, теги)
4. **batch_delete_items** — массовое удаление записей
5. **manage_projects** — создание, список, переименование, удаление проектов, перемещение записей
6. **save_item** — создать новую запись

## Как работать:
1. **Сначала найди** — перед изменением/удалением используй search_items, чтобы понять что затронешь
2. **Уточняй при неясности** — если запрос размытый, лучше спросить пользователя
3. **Опасные операции требуют подтверждения** — batch_update, batch_delete, delete project вернут needs_confirmation=true. Ты получишь результат после подтверждения пользователем.

## Формат ответов:
- Отвечай кратко и по делу
- При успешной операции: "Готово: [что сделано]"
- При ошибке: "Ошибка: [что пошло не так]"

## Текущая дата: {current_date}"#;

/// Result of one agent turn.
#[derive(Debug, Clone)]
pub struct AgentResult {
    pub success: bool,
    pub response: String,
    pub needs_confirmation: bool,
    pub confirmation_token: Option<String>,
}

impl AgentResult {
    fn done(response: impl Into<String>) -> Self {
        AgentResult {
            success: true,
            response: response.into(),
            needs_confirmation: false,
            confirmation_token: None,
        }
    }

    fn failed(response: impl Into<String>) -> Self {
        AgentResult {
            success: false,
            response: response.into(),
            needs_confirmation: false,
            confirmation_token: None,
        }
    }
}

/// The stored tool call that a confirmation will re-invoke verbatim, with
/// confirmed=true and the original token merged in.
#[derive(Debug, Clone)]
pub struct PendingToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// An interrupted agent turn, waiting for the user's yes/no.
#[derive(Debug, Clone)]
pub struct PendingAgentState {
    pub user_id: i64,
    pub messages: Vec<ChatMessage>,
    pub confirmation_token: String,
    pub pending_tool_call: PendingToolCall,
    pub iteration: u32,
    pub created_at: DateTime<Utc>,
}

fn system_prompt() -> String {
    AGENT_SYSTEM_PROMPT.replace("{current_date}", &Utc::now().format("%Y-%m-%d").to_string())
}

/// Human-readable confirmation prompt built from a preview result.
pub fn format_confirmation_request(result: &Value) -> String {
    let action = result["action"].as_str().unwrap_or("operation");
    let count = result["matched_count"].as_i64().unwrap_or(0);
    let mut lines: Vec<String> = Vec::new();

    match action {
        "delete" => lines.push(format!("Удалить {count} записей?")),
        "update" => lines.push(format!("Обновить {count} записей?")),
        "delete_project" => {
            let name = result["project"]["name"].as_str().unwrap_or("?");
            lines.push(format!("Удалить проект «{name}»?"));
            let items = result["items_count"].as_i64().unwrap_or(0);
            if items > 0 {
                lines.push(format!("   (содержит {items} записей)"));
            }
        }
        "move_items" => {
            let source = result["source_project"]["name"].as_str().unwrap_or("?");
            let target = result["target_project"]["name"].as_str().unwrap_or("без проекта");
            let items = result["items_count"].as_i64().unwrap_or(0);
            lines.push(format!("Переместить {items} записей из «{source}» → «{target}»?"));
        }
        _ => lines.push("Подтвердить операцию?".into()),
    }

    if let Some(preview) = result["items_preview"].as_array() {
        if !preview.is_empty() {
            lines.push("\nПревью:".into());
            for item in preview.iter().take(5) {
                let title = item["title"].as_str().unwrap_or("");
                lines.push(format!("  - {title}"));
            }
            if count > 5 {
                lines.push(format!("  ... и ещё {}", count - 5));
            }
        }
    }
    lines.join("\n")
}

/// Run a fresh agent turn for a management intent.
pub async fn run_agent(
    state: &EngineState,
    user_id: i64,
    user_message: &str,
    context: Option<&str>,
) -> AgentResult {
    let user_content = match context {
        Some(ctx) => format!("Контекст:\n{ctx}\n\nЗапрос:\n{user_message}"),
        None => user_message.to_string(),
    };
    let messages = vec![ChatMessage::system(system_prompt()), ChatMessage::user(user_content)];
    drive(state, user_id, messages, 0).await
}

/// Continue an interrupted turn after the user's confirmation decision.
pub async fn continue_agent(state: &EngineState, user_id: i64, approved: bool) -> AgentResult {
    // Load-and-clear: pending state is single-use.
    let Some(pending) = state.take_pending_agent(user_id) else {
        return AgentResult::failed("Нет активной операции для подтверждения.");
    };

    if !approved {
        state.confirmations.discard(&pending.confirmation_token);
        return AgentResult::done("Операция отменена.");
    }

    // Execute the stored tool call with confirmed=true.
    let call = &pending.pending_tool_call;
    let result = tools::execute_tool(state, user_id, &call.name, &call.arguments).await;

    let mut messages = pending.messages;
    messages.push(ChatMessage::tool_result(
        call.id.clone(),
        serde_json::to_string(&result).unwrap_or_else(|_| "{}".into()),
    ));

    drive(state, user_id, messages, pending.iteration).await
}

/// The loop body shared by fresh and resumed turns.
async fn drive(
    state: &EngineState,
    user_id: i64,
    mut messages: Vec<ChatMessage>,
    start_iteration: u32,
) -> AgentResult {
    let definitions = tools::definitions();
    let mut iteration = start_iteration;

    while iteration < MAX_AGENT_ITERATIONS {
        iteration += 1;
        info!("[agent] user={user_id} iteration {iteration}/{MAX_AGENT_ITERATIONS}");

        let reply = match state
            .chat
            .complete(crate::engine::providers::ChatRequest {
                model: &state.config.smart_model,
                messages: &messages,
                tools: &definitions,
                temperature: None,
                max_tokens: None,
                json_object: false,
            })
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!("[agent] provider error: {e}");
                return AgentResult::failed(format!("Ошибка при выполнении: {e}"));
            }
        };

        messages.push(ChatMessage {
            role: crate::atoms::types::Role::Assistant,
            content: reply.content.clone(),
            tool_calls: reply.tool_calls.clone(),
            tool_call_id: None,
        });

        // No tool calls: the agent is done talking.
        if reply.tool_calls.is_empty() {
            let text = reply.content.unwrap_or_default();
            return AgentResult::done(if text.is_empty() { "Готово.".into() } else { text });
        }

        for tool_call in &reply.tool_calls {
            let args: Value = match serde_json::from_str(&tool_call.function.arguments) {
                Ok(v) => v,
                Err(e) => {
                    warn!("[agent] malformed tool args for {}: {e}", tool_call.function.name);
                    json!({})
                }
            };

            let result = tools::execute_tool(state, user_id, &tool_call.function.name, &args).await;

            // Interrupt: a destructive preview wants a human decision.
            if result["needs_confirmation"].as_bool().unwrap_or(false) {
                let token = result["confirmation_token"].as_str().unwrap_or_default().to_string();
                let mut confirmed_args = args.clone();
                confirmed_args["confirmed"] = json!(true);
                confirmed_args["confirmation_token"] = json!(token.clone());

                state.save_pending_agent(PendingAgentState {
                    user_id,
                    messages: messages.clone(),
                    confirmation_token: token.clone(),
                    pending_tool_call: PendingToolCall {
                        id: tool_call.id.clone(),
                        name: tool_call.function.name.clone(),
                        arguments: confirmed_args,
                    },
                    iteration,
                    created_at: Utc::now(),
                });

                return AgentResult {
                    success: true,
                    response: format_confirmation_request(&result),
                    needs_confirmation: true,
                    confirmation_token: Some(token),
                };
            }

            messages.push(ChatMessage::tool_result(
                tool_call.id.clone(),
                serde_json::to_string(&result).unwrap_or_else(|_| "{}".into()),
            ));
        }
    }

    AgentResult::failed(format!(
        "Не удалось выполнить запрос за {MAX_AGENT_ITERATIONS} шагов. Попробуй переформулировать."
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::{FunctionCall, ItemStatus, ItemType, NewItem, ToolCall};
    use crate::engine::providers::ChatReply;
    use crate::engine::tools::test_support::state_with_provider;

    fn tool_call(id: &str, name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: id.into(),
            call_type: "function".into(),
            function: FunctionCall { name: name.into(), arguments: args.to_string() },
        }
    }

    fn seed_done_tasks(state: &EngineState, n: usize) {
        state.store.get_or_create_user(1).unwrap();
        for i in 0..n {
            state
                .store
                .create_item(
                    1,
                    &NewItem {
                        item_type: ItemType::Task,
                        status: ItemStatus::Done,
                        title: Some(format!("done {i}")),
                        ..NewItem::default()
                    },
                )
                .unwrap();
        }
    }

    #[tokio::test]
    async fn plain_text_reply_ends_the_turn() {
        let state = state_with_provider(vec![ChatReply {
            content: Some("Ничего делать не нужно.".into()),
            tool_calls: vec![],
        }]);
        let result = run_agent(&state, 1, "привет", None).await;
        assert!(result.success);
        assert!(!result.needs_confirmation);
        assert_eq!(result.response, "Ничего делать не нужно.");
    }

    #[tokio::test]
    async fn destructive_tool_interrupts_with_pending_state() {
        let state = state_with_provider(vec![ChatReply {
            content: None,
            tool_calls: vec![tool_call(
                "call_1",
                "batch_delete_items",
                json!({ "filter": { "status": "done", "type": "task" } }),
            )],
        }]);
        seed_done_tasks(&state, 5);

        let result = run_agent(&state, 1, "удали все выполненные задачи", None).await;
        assert!(result.needs_confirmation);
        assert!(result.response.contains("Удалить 5 записей?"));
        assert!(state.has_pending_agent(1));
        let token = result.confirmation_token.unwrap();
        assert!(state.confirmations.peek(&token).is_some());
    }

    #[tokio::test]
    async fn approval_executes_and_continues_the_loop() {
        let state = state_with_provider(vec![
            // Turn 1: agent asks to delete.
            ChatReply {
                content: None,
                tool_calls: vec![tool_call(
                    "call_1",
                    "batch_delete_items",
                    json!({ "filter": { "status": "done" } }),
                )],
            },
            // After confirmation: agent summarises.
            ChatReply { content: Some("Готово: удалено 5 задач".into()), tool_calls: vec![] },
        ]);
        seed_done_tasks(&state, 5);

        let interrupted = run_agent(&state, 1, "удали выполненные", None).await;
        assert!(interrupted.needs_confirmation);

        let resumed = continue_agent(&state, 1, true).await;
        assert!(resumed.success);
        assert_eq!(resumed.response, "Готово: удалено 5 задач");
        assert_eq!(state.store.list_items(1, &[], &[], None, 50, 0).unwrap().1, 0);
        assert!(!state.has_pending_agent(1));
    }

    #[tokio::test]
    async fn rejection_cancels_and_invalidates_the_token() {
        let state = state_with_provider(vec![ChatReply {
            content: None,
            tool_calls: vec![tool_call(
                "call_1",
                "batch_delete_items",
                json!({ "filter": { "status": "done" } }),
            )],
        }]);
        seed_done_tasks(&state, 3);

        let interrupted = run_agent(&state, 1, "удали выполненные", None).await;
        let token = interrupted.confirmation_token.unwrap();

        let declined = continue_agent(&state, 1, false).await;
        assert_eq!(declined.response, "Операция отменена.");
        assert!(state.confirmations.peek(&token).is_none());
        // Nothing was deleted.
        assert_eq!(state.store.list_items(1, &[], &[], None, 50, 0).unwrap().1, 3);
    }

    #[tokio::test]
    async fn confirmation_without_pending_state_is_an_error() {
        let state = state_with_provider(vec![]);
        let result = continue_agent(&state, 1, true).await;
        assert!(!result.success);
        assert!(result.response.contains("Нет активной операции"));
    }

    #[tokio::test]
    async fn iteration_limit_stops_runaway_loops() {
        // The model keeps calling search_items forever.
        let looped: Vec<ChatReply> = (0..MAX_AGENT_ITERATIONS)
            .map(|i| ChatReply {
                content: None,
                tool_calls: vec![tool_call(
                    &format!("call_{i}"),
                    "search_items",
                    json!({ "query": "молоко" }),
                )],
            })
            .collect();
        let state = state_with_provider(looped);
        state.store.get_or_create_user(1).unwrap();

        let result = run_agent(&state, 1, "найди и удали", None).await;
        assert!(!result.success);
        assert!(result.response.contains("шагов"));
    }
}
