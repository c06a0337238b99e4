// ── Message Router ─────────────────────────────────────────────────────────
// The ingest front-end, "black-hole" policy: everything gets captured.
// Explicit search verbs are redirected to the companion client; explicit
// management verbs go to the agent loop; every other message runs the
// ingestion pipeline. Whatever fails after the message was accepted, the
// verbatim input is still persisted by the fallback path — the user's text
// is never lost silently.

use log::{info, warn};

use crate::atoms::constants::MAX_VOICE_DURATION_SECS;
use crate::atoms::error::EngineError;
use crate::atoms::types::{
    Attachment, InboundKind, InboundMessage, ItemPatch, ItemSource, ItemType, OutboundReply,
    ReplyButton,
};
use crate::engine::agent_loop;
use crate::engine::extract::DocumentKind;
use crate::engine::pipeline::{self, PipelineResult};
use crate::engine::state::EngineState;
use crate::engine::web;

/// Raw media bytes the transport downloaded for this message.
pub struct MediaPayload {
    pub bytes: Vec<u8>,
    pub duration_secs: Option<u32>,
}

/// Search verbs that redirect to the companion client.
const SEARCH_MARKERS: &[&str] = &[
    "найди", "найти", "покажи", "поиск", "что у меня", "какие", "список", "где", "показать",
    "все мои", "мои задачи", "мои заметки",
];

/// Management verbs that go to the agent loop instead of capture.
const MANAGEMENT_MARKERS: &[&str] = &[
    "удали", "удалить", "перенеси", "переименуй", "отметь выполнен", "заверши задачу",
    "создай проект", "добавь в проект", "очисти",
];

pub fn is_search_query(text: &str) -> bool {
    let lower = text.to_lowercase();
    SEARCH_MARKERS.iter().any(|m| lower.contains(m))
}

pub fn is_management_request(text: &str) -> bool {
    let lower = text.to_lowercase();
    MANAGEMENT_MARKERS.iter().any(|m| lower.contains(m))
}

/// Handle one inbound envelope. Always returns something to show the user.
pub async fn handle_message(
    state: &EngineState,
    msg: InboundMessage,
    payload: Option<MediaPayload>,
) -> OutboundReply {
    match msg.kind {
        InboundKind::Text | InboundKind::Forward => handle_text(state, &msg).await,
        InboundKind::Voice => handle_voice(state, &msg, payload).await,
        InboundKind::Photo => handle_photo(state, &msg, payload).await,
        InboundKind::Document => handle_document(state, &msg, payload).await,
    }
}

async fn handle_text(state: &EngineState, msg: &InboundMessage) -> OutboundReply {
    let text = msg
        .text
        .clone()
        .or_else(|| msg.caption.clone())
        .unwrap_or_default()
        .trim()
        .to_string();
    if text.is_empty() {
        return OutboundReply::text("Не удалось извлечь текст из сообщения.");
    }

    let source = if msg.kind == InboundKind::Forward { ItemSource::Forward } else { ItemSource::Text };

    // Search queries live in the companion client.
    if source == ItemSource::Text && is_search_query(&text) {
        return OutboundReply::text(
            "Я сохраняю всё, что ты отправляешь 📥\nДля поиска и управления открой приложение.",
        );
    }

    // Management verbs go to the agent loop, with recent chat as context.
    if source == ItemSource::Text && is_management_request(&text) {
        let context = state.history.context_string(msg.user_id, 5);
        state.history.add(msg.user_id, "user", &text, None);
        let result = agent_loop::run_agent(state, msg.user_id, &text, context.as_deref()).await;
        state.history.add(msg.user_id, "assistant", &result.response, None);
        let buttons = if result.needs_confirmation {
            vec![
                ReplyButton { label: "✅ Да".into(), callback_id: "confirm:yes".into() },
                ReplyButton { label: "❌ Нет".into(), callback_id: "confirm:no".into() },
            ]
        } else {
            Vec::new()
        };
        return OutboundReply { text: result.response, buttons };
    }

    // URL enrichment: the first link's content is appended to the input.
    let mut enriched = text.clone();
    let mut source = source;
    if let Some(url) = web::extract_first_url(&text) {
        source = ItemSource::Link;
        match web::fetch_url(&url).await {
            Ok(content) if !content.text.is_empty() => {
                enriched = format!("{text}\n\n--- Содержимое ссылки ---\n{}", content.text);
            }
            Ok(_) => {}
            Err(e) => {
                // Enrichment is best-effort; the original text is kept.
                warn!("[router] URL enrichment skipped: {e}");
            }
        }
    }

    capture(state, msg.user_id, &enriched, &text, source, msg.attachment.as_ref()).await
}

async fn handle_voice(
    state: &EngineState,
    msg: &InboundMessage,
    payload: Option<MediaPayload>,
) -> OutboundReply {
    let Some(payload) = payload else {
        return OutboundReply::text("Не удалось загрузить голосовое сообщение.");
    };
    let duration = payload.duration_secs.unwrap_or(0);
    if duration > MAX_VOICE_DURATION_SECS {
        return OutboundReply::text(format!(
            "Голосовое сообщение слишком длинное ({duration} сек). Максимум: {} минут",
            MAX_VOICE_DURATION_SECS / 60
        ));
    }
    let Some(transcriber) = state.transcriber.as_deref() else {
        return OutboundReply::text("Распознавание голоса не настроено.");
    };

    let user = match state.store.get_or_create_user(msg.user_id) {
        Ok(u) => u,
        Err(e) => return OutboundReply::text(format!("Ошибка: {e}")),
    };
    let text = match transcriber.transcribe(payload.bytes, &user.language, duration).await {
        Ok(t) if !t.is_empty() => t,
        Ok(_) => return OutboundReply::text("Не удалось распознать голосовое сообщение."),
        Err(e) => {
            warn!("[router] Transcription failed: {e}");
            return OutboundReply::text("Не удалось распознать голосовое сообщение.");
        }
    };

    let preview: String = text.chars().take(200).collect();
    let mut reply =
        capture(state, msg.user_id, &text, &text, ItemSource::Voice, msg.attachment.as_ref()).await;
    reply.text = format!("🎤 {preview}\n\n{}", reply.text);
    reply
}

async fn handle_photo(
    state: &EngineState,
    msg: &InboundMessage,
    payload: Option<MediaPayload>,
) -> OutboundReply {
    let Some(payload) = payload else {
        return OutboundReply::text("Не удалось загрузить фото.");
    };
    if payload.bytes.len() as u64 > crate::atoms::constants::MAX_IMAGE_SIZE_BYTES {
        return OutboundReply::text(format!(
            "Изображение слишком большое. Максимум: {}MB",
            crate::atoms::constants::MAX_IMAGE_SIZE_BYTES / 1024 / 1024
        ));
    }
    let Some(vision) = state.vision.as_deref() else {
        return OutboundReply::text("Анализ изображений не настроен.");
    };
    let described = match vision.describe(payload.bytes, msg.caption.as_deref()).await {
        Ok(t) => t,
        Err(e) => {
            warn!("[router] Vision failed: {e}");
            // The caption alone is still worth keeping.
            match msg.caption.clone() {
                Some(c) if !c.trim().is_empty() => c,
                _ => return OutboundReply::text("Не удалось обработать фото."),
            }
        }
    };
    capture(state, msg.user_id, &described, &described, ItemSource::Photo, msg.attachment.as_ref())
        .await
}

async fn handle_document(
    state: &EngineState,
    msg: &InboundMessage,
    payload: Option<MediaPayload>,
) -> OutboundReply {
    let Some(payload) = payload else {
        return OutboundReply::text("Не удалось загрузить файл.");
    };
    let filename = msg
        .attachment
        .as_ref()
        .and_then(|a| a.filename.clone())
        .unwrap_or_else(|| "document".into());
    let Some(kind) = DocumentKind::from_filename(&filename) else {
        return OutboundReply::text(format!("Формат файла «{filename}» пока не поддерживается."));
    };

    let extracted = match state.extractor.extract(kind, &payload.bytes, &filename).await {
        Ok(content) => content,
        Err(EngineError::InputRejected(m)) | Err(EngineError::ExtractionFailed(m)) => {
            return OutboundReply::text(m);
        }
        Err(e) => {
            warn!("[router] Document extraction failed: {e}");
            return OutboundReply::text("Не удалось обработать документ.");
        }
    };

    let mut reply = capture(
        state,
        msg.user_id,
        &extracted.text,
        &extracted.text,
        ItemSource::Pdf,
        msg.attachment.as_ref(),
    )
    .await;
    if let Some(title) = extracted.title {
        reply.text = format!("📄 {title}\n{}", reply.text);
    }
    reply
}

/// Run the pipeline; on any post-acceptance failure, fall back to the
/// verbatim note and tell the user in one line.
async fn capture(
    state: &EngineState,
    user_id: i64,
    text: &str,
    original: &str,
    source: ItemSource,
    attachment: Option<&Attachment>,
) -> OutboundReply {
    state.history.add(user_id, "user", original, None);

    let reply = match pipeline::ingest(state, user_id, text, source, attachment).await {
        Ok(result) => format_capture_reply(&result),
        Err(e) => {
            warn!("[router] Pipeline failed ({e}), falling back to verbatim note");
            match pipeline::fallback_persist(state, user_id, original, source, attachment) {
                Ok(_) => OutboundReply::text("📝 Сохранено (не удалось классифицировать)"),
                Err(persist_err) => {
                    // Nothing could be persisted; the user must know.
                    warn!("[router] Fallback persist failed: {persist_err}");
                    OutboundReply::text("Ошибка: сообщение не удалось сохранить. Попробуй ещё раз.")
                }
            }
        }
    };

    state.history.add(user_id, "assistant", &reply.text, None);
    reply
}

fn type_label(item_type: ItemType) -> (&'static str, &'static str) {
    match item_type {
        ItemType::Task => ("✅", "Задача"),
        ItemType::Idea => ("💡", "Идея"),
        ItemType::Note => ("📝", "Заметка"),
        ItemType::Resource => ("🔗", "Ресурс"),
        ItemType::Contact => ("👤", "Контакт"),
        ItemType::Event => ("📅", "Событие"),
    }
}

fn format_capture_reply(result: &PipelineResult) -> OutboundReply {
    // Pure conversational turn.
    if result.created_items.is_empty() {
        if let Some(chat) = &result.chat_response {
            return OutboundReply::text(chat.clone());
        }
        return OutboundReply::text("📝 Сохранено");
    }

    let mut lines: Vec<String> = Vec::new();
    for item in &result.created_items {
        let (emoji, label) = type_label(item.item_type);
        let title = item.title.clone().unwrap_or_default();
        let mut line = format!("{emoji} {label}: {title}");
        if let Some(raw) = &item.due_at_raw {
            line.push_str(&format!("\n📅 Срок: {raw}"));
            if let Some(due) = item.due_at {
                line.push_str(&format!(" ({})", due.format("%d.%m.%Y %H:%M")));
            }
        }
        if !item.tags.is_empty() {
            line.push_str(&format!("\n🏷️ {}", item.tags.join(" ")));
        }
        lines.push(line);
    }
    if !result.created_links.is_empty() {
        lines.push(format!("🔗 Связано с {} записями", result.created_links.len()));
    }

    let buttons = result
        .created_items
        .first()
        .map(|item| vec![ReplyButton { label: "🗑 Удалить".into(), callback_id: format!("delete:{}", item.id) }])
        .unwrap_or_default();

    OutboundReply { text: lines.join("\n\n"), buttons }
}

/// Handle a button press from the transport.
pub async fn handle_callback(state: &EngineState, user_id: i64, callback_id: &str) -> OutboundReply {
    match callback_id.split_once(':') {
        Some(("confirm", decision)) => {
            let result = agent_loop::continue_agent(state, user_id, decision == "yes").await;
            OutboundReply::text(result.response)
        }
        Some(("complete", id)) => {
            let Ok(item_id) = id.parse::<i64>() else {
                return OutboundReply::text("Ошибка: неверный идентификатор.");
            };
            match state.store.complete_item(item_id, user_id) {
                Ok(Some((done, next))) => {
                    let title = done.title.unwrap_or_default();
                    let mut text = format!("✅ Выполнено: {title}");
                    if let Some(next) = next {
                        if let Some(due) = next.due_at {
                            text.push_str(&format!(
                                "\n🔁 Следующее повторение: {}",
                                due.format("%d.%m.%Y %H:%M")
                            ));
                        }
                    }
                    OutboundReply::text(text)
                }
                Ok(None) => OutboundReply::text("Запись не найдена."),
                Err(e) => OutboundReply::text(format!("Ошибка: {e}")),
            }
        }
        Some(("snooze", id)) => {
            let Ok(item_id) = id.parse::<i64>() else {
                return OutboundReply::text("Ошибка: неверный идентификатор.");
            };
            let patch = ItemPatch {
                remind_at: Some(Some(chrono::Utc::now() + chrono::Duration::hours(1))),
                ..ItemPatch::default()
            };
            match state.store.update_item(item_id, user_id, &patch) {
                Ok(Some(_)) => OutboundReply::text("⏰ Напомню через час."),
                Ok(None) => OutboundReply::text("Запись не найдена."),
                Err(e) => OutboundReply::text(format!("Ошибка: {e}")),
            }
        }
        Some(("delete", id)) => {
            let Ok(item_id) = id.parse::<i64>() else {
                return OutboundReply::text("Ошибка: неверный идентификатор.");
            };
            match state.store.delete_item(item_id, user_id) {
                Ok(true) => OutboundReply::text("🗑 Удалено."),
                Ok(false) => OutboundReply::text("Запись не найдена."),
                Err(e) => OutboundReply::text(format!("Ошибка: {e}")),
            }
        }
        _ => {
            info!("[router] Unknown callback: {callback_id}");
            OutboundReply::text("Неизвестное действие.")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::{ItemStatus, NewItem};
    use crate::engine::providers::ChatReply;
    use crate::engine::tools::test_support::{plain_state, state_with_provider};

    fn text_msg(text: &str) -> InboundMessage {
        InboundMessage {
            user_id: 1,
            kind: InboundKind::Text,
            text: Some(text.to_string()),
            caption: None,
            attachment: None,
        }
    }

    #[test]
    fn marker_classification() {
        assert!(is_search_query("найди заметку про отпуск"));
        assert!(is_search_query("что у меня на завтра"));
        assert!(!is_search_query("купить молоко завтра"));

        assert!(is_management_request("удали все выполненные задачи"));
        assert!(is_management_request("создай проект Ремонт"));
        assert!(!is_management_request("записать мысль про проект"));
    }

    #[tokio::test]
    async fn search_verbs_redirect_to_companion_client() {
        let state = plain_state();
        let reply = handle_message(&state, text_msg("покажи мои задачи"), None).await;
        assert!(reply.text.contains("открой приложение"));
        // Nothing was persisted.
        assert_eq!(state.store.list_items(1, &[], &[], None, 50, 0).unwrap().1, 0);
    }

    #[tokio::test]
    async fn provider_failure_triggers_fallback_persist() {
        // The scripted provider is empty: stage 2 fails immediately.
        let state = plain_state();
        let reply = handle_message(&state, text_msg("купить молоко завтра"), None).await;
        assert!(reply.text.contains("Сохранено"));

        let (items, total) = state.store.list_items(1, &[], &[], None, 50, 0).unwrap();
        assert_eq!(total, 1);
        let fallback = &items[0];
        assert_eq!(fallback.item_type, crate::atoms::types::ItemType::Note);
        assert_eq!(fallback.status, ItemStatus::Inbox);
        assert_eq!(fallback.original_input.as_deref(), Some("купить молоко завтра"));
    }

    #[tokio::test]
    async fn successful_extraction_formats_typed_reply() {
        let extraction = serde_json::json!({
            "items": [{
                "type": "task",
                "title": "Купить молоко",
                "tags": ["быт"],
                "due_at_raw": "завтра",
                "due_at_iso": "2025-11-15T18:00:00+05:00"
            }],
            "chat_response": null,
            "suggested_links": []
        });
        let state = state_with_provider(vec![ChatReply {
            content: Some(extraction.to_string()),
            tool_calls: vec![],
        }]);

        let reply = handle_message(&state, text_msg("Купить молоко завтра"), None).await;
        assert!(reply.text.contains("✅ Задача: Купить молоко"));
        assert!(reply.text.contains("завтра"));
        assert!(reply.text.contains("быт"));
        assert!(reply.buttons.iter().any(|b| b.callback_id.starts_with("delete:")));
    }

    #[tokio::test]
    async fn chat_only_turn_persists_nothing() {
        let extraction = serde_json::json!({
            "items": [],
            "chat_response": "Всегда рад помочь!",
            "suggested_links": []
        });
        let state = state_with_provider(vec![ChatReply {
            content: Some(extraction.to_string()),
            tool_calls: vec![],
        }]);

        let reply = handle_message(&state, text_msg("спасибо"), None).await;
        assert_eq!(reply.text, "Всегда рад помочь!");
        assert_eq!(state.store.list_items(1, &[], &[], None, 50, 0).unwrap().1, 0);
    }

    #[tokio::test]
    async fn oversized_voice_is_rejected_verbatim() {
        let state = plain_state();
        let msg = InboundMessage {
            user_id: 1,
            kind: InboundKind::Voice,
            text: None,
            caption: None,
            attachment: None,
        };
        let reply = handle_message(
            &state,
            msg,
            Some(MediaPayload { bytes: vec![0u8; 10], duration_secs: Some(MAX_VOICE_DURATION_SECS + 1) }),
        )
        .await;
        assert!(reply.text.contains("слишком длинное"));
        assert_eq!(state.store.list_items(1, &[], &[], None, 50, 0).unwrap().1, 0);
    }

    #[tokio::test]
    async fn callbacks_complete_snooze_and_delete() {
        let state = plain_state();
        state.store.get_or_create_user(1).unwrap();
        let item = state
            .store
            .create_item(
                1,
                &NewItem {
                    item_type: crate::atoms::types::ItemType::Task,
                    title: Some("Отчёт".into()),
                    ..NewItem::default()
                },
            )
            .unwrap();

        let done = handle_callback(&state, 1, &format!("complete:{}", item.id)).await;
        assert!(done.text.contains("Выполнено: Отчёт"));
        assert_eq!(state.store.get_item(item.id, 1).unwrap().unwrap().status, ItemStatus::Done);

        let other = state.store.create_item(1, &NewItem::default()).unwrap();
        let snoozed = handle_callback(&state, 1, &format!("snooze:{}", other.id)).await;
        assert!(snoozed.text.contains("через час"));
        assert!(state.store.get_item(other.id, 1).unwrap().unwrap().remind_at.is_some());

        let deleted = handle_callback(&state, 1, &format!("delete:{}", other.id)).await;
        assert!(deleted.text.contains("Удалено"));
        assert!(state.store.get_item(other.id, 1).unwrap().is_none());

        // Cross-user callback cannot touch the item.
        let foreign = handle_callback(&state, 2, &format!("delete:{}", item.id)).await;
        assert!(foreign.text.contains("не найдена"));
    }
}
