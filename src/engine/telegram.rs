// ── Telegram Bridge ────────────────────────────────────────────────────────
// Connects the engine to Telegram via the Bot API using long-polling
// (getUpdates). No public URL, no webhooks — the process pulls messages
// directly from Telegram's servers, maps them onto the router's envelopes,
// and echoes replies (with inline keyboards) back.

use async_trait::async_trait;
use log::{debug, error, info, warn};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::atoms::constants::MAX_FILE_SIZE_BYTES;
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{Attachment, InboundKind, InboundMessage, OutboundReply};
use crate::engine::router::{self, MediaPayload};
use crate::engine::state::{EngineState, Notifier};

// ── Telegram API types ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TgResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgUpdate {
    update_id: i64,
    message: Option<TgMessage>,
    callback_query: Option<TgCallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    from: Option<TgUser>,
    chat: TgChat,
    text: Option<String>,
    caption: Option<String>,
    voice: Option<TgVoice>,
    photo: Option<Vec<TgPhotoSize>>,
    document: Option<TgDocument>,
    forward_date: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TgUser {
    id: i64,
    is_bot: bool,
}

#[derive(Debug, Deserialize)]
struct TgChat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TgVoice {
    file_id: String,
    duration: u32,
}

#[derive(Debug, Deserialize)]
struct TgPhotoSize {
    file_id: String,
    width: u32,
}

#[derive(Debug, Deserialize)]
struct TgDocument {
    file_id: String,
    file_name: Option<String>,
    file_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TgCallbackQuery {
    id: String,
    from: TgUser,
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgFile {
    file_path: Option<String>,
}

// ── Bridge ─────────────────────────────────────────────────────────────────

pub struct TelegramBridge {
    client: Client,
    token: String,
}

impl TelegramBridge {
    pub fn new(token: impl Into<String>) -> Self {
        TelegramBridge { client: Client::new(), token: token.into() }
    }

    fn api(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{method}", self.token)
    }

    /// Long-polling loop. Runs until the process exits.
    pub async fn run(self: Arc<Self>, state: Arc<EngineState>) {
        info!("[telegram] Bridge started (long polling)");
        let mut offset: i64 = 0;
        loop {
            match self.get_updates(offset).await {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        let bridge = self.clone();
                        let state = state.clone();
                        tokio::spawn(async move {
                            bridge.dispatch(&state, update).await;
                        });
                    }
                }
                Err(e) => {
                    warn!("[telegram] getUpdates failed: {e}");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }

    async fn get_updates(&self, offset: i64) -> EngineResult<Vec<TgUpdate>> {
        let resp = self
            .client
            .get(self.api("getUpdates"))
            .query(&[("offset", offset.to_string()), ("timeout", "30".into())])
            .timeout(Duration::from_secs(40))
            .send()
            .await?;
        let body: TgResponse<Vec<TgUpdate>> = resp.json().await?;
        if !body.ok {
            return Err(EngineError::provider(
                "telegram",
                body.description.unwrap_or_else(|| "getUpdates not ok".into()),
            ));
        }
        Ok(body.result.unwrap_or_default())
    }

    async fn dispatch(&self, state: &EngineState, update: TgUpdate) {
        if let Some(query) = update.callback_query {
            if query.from.is_bot {
                return;
            }
            let callback_id = query.data.unwrap_or_default();
            let reply = router::handle_callback(state, query.from.id, &callback_id).await;
            self.answer_callback(&query.id).await;
            if let Err(e) = self.deliver(query.from.id, &reply).await {
                warn!("[telegram] Callback reply failed: {e}");
            }
            return;
        }

        let Some(message) = update.message else { return };
        let Some(from) = &message.from else { return };
        if from.is_bot {
            return;
        }
        let chat_id = message.chat.id;
        let user_id = from.id;

        let (envelope, payload) = match self.to_envelope(user_id, &message).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!("[telegram] Dropping update: {e}");
                let _ = self.deliver(chat_id, &OutboundReply::text(e.to_string())).await;
                return;
            }
        };

        let reply = router::handle_message(state, envelope, payload).await;
        if let Err(e) = self.deliver(chat_id, &reply).await {
            error!("[telegram] Reply delivery failed: {e}");
        }
    }

    /// Map a Telegram message onto the router's envelope, downloading media
    /// where the modality needs it.
    async fn to_envelope(
        &self,
        user_id: i64,
        message: &TgMessage,
    ) -> EngineResult<(InboundMessage, Option<MediaPayload>)> {
        if let Some(voice) = &message.voice {
            let bytes = self.download(&voice.file_id).await?;
            let envelope = InboundMessage {
                user_id,
                kind: InboundKind::Voice,
                text: None,
                caption: message.caption.clone(),
                attachment: Some(Attachment {
                    file_id: voice.file_id.clone(),
                    kind: "voice".into(),
                    filename: None,
                }),
            };
            return Ok((envelope, Some(MediaPayload { bytes, duration_secs: Some(voice.duration) })));
        }

        if let Some(photos) = &message.photo {
            // Telegram sends several sizes; take the largest.
            let Some(best) = photos.iter().max_by_key(|p| p.width) else {
                return Err(EngineError::InputRejected("Пустое фото.".into()));
            };
            let bytes = self.download(&best.file_id).await?;
            let envelope = InboundMessage {
                user_id,
                kind: InboundKind::Photo,
                text: None,
                caption: message.caption.clone(),
                attachment: Some(Attachment {
                    file_id: best.file_id.clone(),
                    kind: "photo".into(),
                    filename: None,
                }),
            };
            return Ok((envelope, Some(MediaPayload { bytes, duration_secs: None })));
        }

        if let Some(doc) = &message.document {
            if doc.file_size.unwrap_or(0) > MAX_FILE_SIZE_BYTES {
                return Err(EngineError::InputRejected(format!(
                    "Файл слишком большой. Максимум: {}MB",
                    MAX_FILE_SIZE_BYTES / 1024 / 1024
                )));
            }
            let bytes = self.download(&doc.file_id).await?;
            let envelope = InboundMessage {
                user_id,
                kind: InboundKind::Document,
                text: None,
                caption: message.caption.clone(),
                attachment: Some(Attachment {
                    file_id: doc.file_id.clone(),
                    kind: "document".into(),
                    filename: doc.file_name.clone(),
                }),
            };
            return Ok((envelope, Some(MediaPayload { bytes, duration_secs: None })));
        }

        let kind = if message.forward_date.is_some() { InboundKind::Forward } else { InboundKind::Text };
        let envelope = InboundMessage {
            user_id,
            kind,
            text: message.text.clone(),
            caption: message.caption.clone(),
            attachment: None,
        };
        Ok((envelope, None))
    }

    async fn download(&self, file_id: &str) -> EngineResult<Vec<u8>> {
        let resp = self
            .client
            .get(self.api("getFile"))
            .query(&[("file_id", file_id)])
            .timeout(Duration::from_secs(30))
            .send()
            .await?;
        let body: TgResponse<TgFile> = resp.json().await?;
        let path = body
            .result
            .and_then(|f| f.file_path)
            .ok_or_else(|| EngineError::provider("telegram", "getFile returned no path"))?;

        let url = format!("https://api.telegram.org/file/bot{}/{path}", self.token);
        let bytes = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(120))
            .send()
            .await?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }

    async fn deliver(&self, chat_id: i64, reply: &OutboundReply) -> EngineResult<()> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": reply.text,
        });
        if !reply.buttons.is_empty() {
            let keyboard: Vec<Vec<serde_json::Value>> = reply
                .buttons
                .iter()
                .map(|b| vec![json!({ "text": b.label, "callback_data": b.callback_id })])
                .collect();
            body["reply_markup"] = json!({ "inline_keyboard": keyboard });
        }

        let resp = self
            .client
            .post(self.api("sendMessage"))
            .json(&body)
            .timeout(Duration::from_secs(15))
            .send()
            .await?;
        let out: TgResponse<serde_json::Value> = resp.json().await?;
        if !out.ok {
            return Err(EngineError::provider(
                "telegram",
                out.description.unwrap_or_else(|| "sendMessage not ok".into()),
            ));
        }
        Ok(())
    }

    async fn answer_callback(&self, callback_query_id: &str) {
        let body = json!({ "callback_query_id": callback_query_id });
        if let Err(e) = self
            .client
            .post(self.api("answerCallbackQuery"))
            .json(&body)
            .timeout(Duration::from_secs(10))
            .send()
            .await
        {
            debug!("[telegram] answerCallbackQuery failed: {e}");
        }
    }
}

/// The bridge doubles as the engine's outbound notifier (reminders).
#[async_trait]
impl Notifier for TelegramBridge {
    async fn send(&self, user_id: i64, reply: OutboundReply) -> EngineResult<()> {
        self.deliver(user_id, &reply).await
    }
}
