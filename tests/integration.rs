// End-to-end scenarios against the full engine with scripted providers:
// capture, multi-intent linking, batch-delete confirmation, recurring
// completion, reminder delivery, and search degradation.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

use neural_inbox::atoms::constants::EMBEDDING_DIM;
use neural_inbox::atoms::error::{EngineError, EngineResult};
use neural_inbox::atoms::types::{
    FunctionCall, InboundKind, InboundMessage, ItemStatus, ItemType, NewItem, OutboundReply,
    RecurrenceKind, RecurrenceRule, ToolCall,
};
use neural_inbox::engine::agent_loop;
use neural_inbox::engine::config::Config;
use neural_inbox::engine::embedding::Embedder;
use neural_inbox::engine::extract::DocumentExtractor;
use neural_inbox::engine::providers::{AnyProvider, ChatCompletion, ChatReply, ChatRequest};
use neural_inbox::engine::router;
use neural_inbox::engine::scheduler;
use neural_inbox::engine::search;
use neural_inbox::engine::state::{EngineState, Notifier};
use neural_inbox::engine::store::Store;

// ── Test doubles ───────────────────────────────────────────────────────────

struct ScriptedProvider {
    replies: Mutex<Vec<ChatReply>>,
}

impl ScriptedProvider {
    fn new(mut replies: Vec<ChatReply>) -> Self {
        replies.reverse();
        ScriptedProvider { replies: Mutex::new(replies) }
    }
}

#[async_trait]
impl ChatCompletion for ScriptedProvider {
    async fn complete(&self, _req: ChatRequest<'_>) -> EngineResult<ChatReply> {
        self.replies
            .lock()
            .pop()
            .ok_or_else(|| EngineError::provider("chat", "script exhausted"))
    }
}

/// Embedder that counts calls and returns a fixed unit vector.
struct CountingEmbedder {
    calls: Mutex<usize>,
    axis: usize,
}

impl CountingEmbedder {
    fn new(axis: usize) -> Self {
        CountingEmbedder { calls: Mutex::new(0), axis }
    }

    fn vector(&self) -> Vec<f32> {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[self.axis] = 1.0;
        v
    }
}

#[async_trait]
impl Embedder for CountingEmbedder {
    async fn embed(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        *self.calls.lock() += 1;
        Ok(texts.iter().map(|_| self.vector()).collect())
    }
}

struct BrokenEmbedder;

#[async_trait]
impl Embedder for BrokenEmbedder {
    async fn embed(&self, _texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        Err(EngineError::provider("embed", "service unavailable"))
    }
}

struct CollectingNotifier {
    sent: Mutex<Vec<(i64, OutboundReply)>>,
}

#[async_trait]
impl Notifier for CollectingNotifier {
    async fn send(&self, user_id: i64, reply: OutboundReply) -> EngineResult<()> {
        self.sent.lock().push((user_id, reply));
        Ok(())
    }
}

fn build_state(
    replies: Vec<ChatReply>,
    embedder: Option<Arc<dyn Embedder>>,
) -> (Arc<EngineState>, Arc<CollectingNotifier>) {
    let notifier = Arc::new(CollectingNotifier { sent: Mutex::new(Vec::new()) });
    let state = EngineState::new(
        Config::for_tests(),
        Store::open_in_memory().unwrap(),
        AnyProvider::from_impl(Box::new(ScriptedProvider::new(replies))),
        embedder,
        None,
        None,
        DocumentExtractor::new(None),
        notifier.clone(),
    );
    (Arc::new(state), notifier)
}

fn text_reply(content: serde_json::Value) -> ChatReply {
    ChatReply { content: Some(content.to_string()), tool_calls: vec![] }
}

fn text_message(user_id: i64, text: &str) -> InboundMessage {
    InboundMessage {
        user_id,
        kind: InboundKind::Text,
        text: Some(text.to_string()),
        caption: None,
        attachment: None,
    }
}

// ── Scenario 1: single-task capture ────────────────────────────────────────

#[tokio::test]
async fn single_task_capture() {
    let embedder = Arc::new(CountingEmbedder::new(0));
    let extraction = json!({
        "items": [{
            "type": "task",
            "title": "Купить молоко",
            "due_at_iso": "2025-11-15T18:00",
            "due_at_raw": "завтра",
            "tags": []
        }],
        "chat_response": null,
        "suggested_links": []
    });
    let (state, _) = build_state(vec![text_reply(extraction)], Some(embedder.clone()));

    let input = "Купить молоко завтра";
    let reply = router::handle_message(&state, text_message(7, input), None).await;
    assert!(reply.text.contains("Задача: Купить молоко"));

    let (items, total) = state.store.list_items(7, &[], &[], None, 10, 0).unwrap();
    assert_eq!(total, 1);
    let item = &items[0];
    assert_eq!(item.item_type, ItemType::Task);
    assert_eq!(item.status, ItemStatus::Inbox);
    assert_eq!(item.original_input.as_deref(), Some(input));
    assert_eq!(item.due_at_raw.as_deref(), Some("завтра"));
    // 18:00 naive, stamped with the default Asia/Almaty zone (UTC+5).
    assert_eq!(item.due_at, Some(Utc.with_ymd_and_hms(2025, 11, 15, 13, 0, 0).unwrap()));
    assert_eq!(item.remind_at, item.due_at);
    assert!(item.has_embedding);

    // Exactly one embedding call (the stage-4 batch; the empty corpus
    // skips the similar-item query embed).
    assert_eq!(*embedder.calls.lock(), 1);
    assert!(state.store.links_for_item(item.id, 7).unwrap().is_empty());
}

// ── Scenario 2: multi-intent capture with a link ───────────────────────────

#[tokio::test]
async fn multi_intent_capture_with_link() {
    // Seed the store first so the scripted extraction can reference a real id.
    let store = Store::open_in_memory().unwrap();
    store.get_or_create_user(7).unwrap();
    let mom = store
        .create_item(
            7,
            &NewItem {
                item_type: ItemType::Contact,
                title: Some("Мама".into()),
                ..NewItem::default()
            },
        )
        .unwrap();

    let extraction = json!({
        "items": [
            { "type": "task", "title": "Купить молоко" },
            { "type": "task", "title": "Позвонить маме", "due_at_raw": "в 15:00" }
        ],
        "chat_response": null,
        "suggested_links": [
            { "new_item_index": 1, "existing_item_id": mom.id, "reason": "контакт мамы" },
            { "new_item_index": 5, "existing_item_id": mom.id, "reason": "мимо индекса" },
            { "new_item_index": 0, "existing_item_id": 999_999, "reason": "нет такой записи" }
        ],
    });

    let notifier = Arc::new(CollectingNotifier { sent: Mutex::new(Vec::new()) });
    let state = Arc::new(EngineState::new(
        Config::for_tests(),
        store,
        AnyProvider::from_impl(Box::new(ScriptedProvider::new(vec![text_reply(extraction)]))),
        Some(Arc::new(CountingEmbedder::new(1))),
        None,
        None,
        DocumentExtractor::new(None),
        notifier,
    ));

    let reply =
        router::handle_message(&state, text_message(7, "Купить молоко и позвонить маме в 15:00"), None)
            .await;
    assert!(reply.text.contains("Купить молоко"));
    assert!(reply.text.contains("Позвонить маме"));

    let (items, total) = state.store.list_items(7, &[ItemType::Task], &[], None, 10, 0).unwrap();
    assert_eq!(total, 2);

    let call_mom = items.iter().find(|i| i.title.as_deref() == Some("Позвонить маме")).unwrap();
    let links = state.store.links_for_item(call_mom.id, 7).unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].1.id, mom.id);
    assert_eq!(links[0].0.reason.as_deref(), Some("контакт мамы"));

    // Invalid suggestions were skipped silently.
    let milk = items.iter().find(|i| i.title.as_deref() == Some("Купить молоко")).unwrap();
    assert!(state.store.links_for_item(milk.id, 7).unwrap().is_empty());
}

// ── Scenario 3: batch delete with confirmation through the agent ───────────

#[tokio::test]
async fn batch_delete_with_confirmation() {
    let tool_call = ToolCall {
        id: "call_1".into(),
        call_type: "function".into(),
        function: FunctionCall {
            name: "batch_delete_items".into(),
            arguments: json!({ "filter": { "status": "done", "type": "task" } }).to_string(),
        },
    };
    let (state, _) = build_state(
        vec![
            ChatReply { content: None, tool_calls: vec![tool_call] },
            ChatReply { content: Some("Готово: удалено 5 задач".into()), tool_calls: vec![] },
        ],
        None,
    );

    state.store.get_or_create_user(7).unwrap();
    for i in 0..5 {
        state
            .store
            .create_item(
                7,
                &NewItem {
                    item_type: ItemType::Task,
                    status: ItemStatus::Done,
                    title: Some(format!("задача {i}")),
                    ..NewItem::default()
                },
            )
            .unwrap();
    }

    let interrupted = agent_loop::run_agent(&state, 7, "удали все выполненные задачи", None).await;
    assert!(interrupted.needs_confirmation);
    assert!(interrupted.response.contains("Удалить 5 записей?"));
    let token = interrupted.confirmation_token.clone().unwrap();

    let resumed = agent_loop::continue_agent(&state, 7, true).await;
    assert!(resumed.success);
    assert_eq!(state.store.list_items(7, &[], &[], None, 50, 0).unwrap().1, 0);

    // The same token cannot execute twice.
    let replay = neural_inbox::engine::tools::execute_tool(
        &state,
        7,
        "batch_delete_items",
        &json!({ "filter": {}, "confirmed": true, "confirmation_token": token }),
    )
    .await;
    assert!(replay["error"].as_str().unwrap().contains("expired"));
}

// ── Scenario 4: recurring task completion ──────────────────────────────────

#[tokio::test]
async fn recurring_completion_materialises_next() {
    let (state, _) = build_state(Vec::new(), None);
    state.store.get_or_create_user(7).unwrap();
    let due = Utc.with_ymd_and_hms(2025, 11, 14, 9, 0, 0).unwrap();
    let item = state
        .store
        .create_item(
            7,
            &NewItem {
                item_type: ItemType::Task,
                title: Some("Зарядка".into()),
                due_at: Some(due),
                remind_at: Some(due),
                tags: vec!["здоровье".into()],
                recurrence: Some(RecurrenceRule {
                    kind: RecurrenceKind::Daily,
                    interval: 2,
                    days: vec![],
                    end_date: None,
                }),
                ..NewItem::default()
            },
        )
        .unwrap();

    let (done, next) = state.store.complete_item(item.id, 7).unwrap().unwrap();
    let next = next.unwrap();
    assert_eq!(done.status, ItemStatus::Done);
    assert_eq!(next.due_at, Some(Utc.with_ymd_and_hms(2025, 11, 16, 9, 0, 0).unwrap()));
    assert_eq!(next.status, ItemStatus::Inbox);
    assert_eq!(next.title.as_deref(), Some("Зарядка"));
    assert_eq!(next.tags, vec!["здоровье"]);
    assert_ne!(next.id, done.id);
}

// ── Scenario 5: reminder fires at most once ────────────────────────────────

#[tokio::test]
async fn reminder_fires_at_most_once() {
    let (state, notifier) = build_state(Vec::new(), None);
    state.store.get_or_create_user(7).unwrap();
    let now = Utc::now();
    state
        .store
        .create_item(
            7,
            &NewItem {
                item_type: ItemType::Task,
                status: ItemStatus::Inbox,
                title: Some("Сдать отчёт".into()),
                due_at: Some(now),
                remind_at: Some(now),
                ..NewItem::default()
            },
        )
        .unwrap();

    assert_eq!(scheduler::tick(&state).await.unwrap(), 1);
    assert_eq!(notifier.sent.lock().len(), 1);

    // The next tick (simulating +60 s) selects nothing.
    assert_eq!(scheduler::tick(&state).await.unwrap(), 0);
    assert_eq!(notifier.sent.lock().len(), 1);
}

// ── Scenario 6: search degrades to FTS when embeddings are down ────────────

#[tokio::test]
async fn search_degrades_to_fts_only() {
    let (state, _) = build_state(Vec::new(), Some(Arc::new(BrokenEmbedder)));
    state.store.get_or_create_user(7).unwrap();
    for (title, content) in [
        ("молоко купить", "утром"),
        ("позвонить маме", "вечером"),
        ("прочитать статью", "про поиск"),
    ] {
        state
            .store
            .create_item(
                7,
                &NewItem {
                    title: Some(title.into()),
                    content: Some(content.into()),
                    original_input: Some(format!("{title} {content}")),
                    ..NewItem::default()
                },
            )
            .unwrap();
    }

    let degraded = search::hybrid_search(
        &state.store,
        state.embedder.as_deref(),
        7,
        "молоко",
        10,
        None,
        None,
        None,
    )
    .await;
    let pure_fts = search::fts_search(&state.store, 7, "молоко", 10, None, None);

    assert!(!degraded.is_empty());
    assert_eq!(
        degraded.iter().map(|r| r.id).collect::<Vec<_>>(),
        pure_fts.iter().map(|r| r.id).collect::<Vec<_>>()
    );
    assert!(degraded.iter().all(|r| r.vector_score == 0.0));
}

// ── Fallback persist: the input is never lost ──────────────────────────────

#[tokio::test]
async fn pipeline_failure_still_persists_verbatim_input() {
    // Script is empty: the extraction call fails outright.
    let (state, _) = build_state(Vec::new(), None);
    let input = "важная мысль, которую нельзя терять";
    let reply = router::handle_message(&state, text_message(7, input), None).await;
    assert!(reply.text.contains("Сохранено"));

    let (items, total) = state.store.list_items(7, &[], &[], None, 10, 0).unwrap();
    assert_eq!(total, 1);
    assert_eq!(items[0].item_type, ItemType::Note);
    assert_eq!(items[0].original_input.as_deref(), Some(input));
}
