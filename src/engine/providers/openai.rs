// ── OpenAI-compatible Chat Provider ────────────────────────────────────────
// Non-streaming chat completions against any /v1/chat/completions endpoint.
// Retries transient statuses with backoff; 4xx responses fail immediately.

use async_trait::async_trait;
use log::{info, warn};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::{ChatCompletion, ChatReply, ChatRequest};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{FunctionCall, ToolCall};
use crate::engine::http::{is_retryable_status, retry_delay, MAX_RETRIES};

pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        OpenAiProvider {
            client: Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn build_body(req: &ChatRequest<'_>) -> Value {
        let mut body = json!({
            "model": req.model,
            "messages": req.messages,
        });
        if let Some(t) = req.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(m) = req.max_tokens {
            body["max_tokens"] = json!(m);
        }
        if !req.tools.is_empty() {
            body["tools"] = json!(req.tools);
            body["tool_choice"] = json!("auto");
        }
        if req.json_object {
            body["response_format"] = json!({ "type": "json_object" });
        }
        body
    }

    fn parse_reply(v: &Value) -> EngineResult<ChatReply> {
        let message = &v["choices"][0]["message"];
        if message.is_null() {
            return Err(EngineError::provider("chat", "no choices in response"));
        }
        let content = message["content"].as_str().map(str::to_string);
        let mut tool_calls = Vec::new();
        if let Some(calls) = message["tool_calls"].as_array() {
            for call in calls {
                let id = call["id"].as_str().unwrap_or_default().to_string();
                let name = call["function"]["name"].as_str().unwrap_or_default().to_string();
                let arguments = call["function"]["arguments"].as_str().unwrap_or("{}").to_string();
                if name.is_empty() {
                    warn!("[provider] Dropping tool call with empty name");
                    continue;
                }
                tool_calls.push(ToolCall {
                    id,
                    call_type: "function".into(),
                    function: FunctionCall { name, arguments },
                });
            }
        }
        Ok(ChatReply { content, tool_calls })
    }
}

#[async_trait]
impl ChatCompletion for OpenAiProvider {
    async fn complete(&self, req: ChatRequest<'_>) -> EngineResult<ChatReply> {
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let body = Self::build_body(&req);

        let mut attempt = 0u32;
        loop {
            let result = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .timeout(Duration::from_secs(120))
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    let v: Value = resp.json().await?;
                    return Self::parse_reply(&v);
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let text = resp.text().await.unwrap_or_default();
                    if is_retryable_status(status) && attempt < MAX_RETRIES {
                        let delay = retry_delay(attempt).await;
                        attempt += 1;
                        info!(
                            "[provider] chat {} — retry {}/{} after {:?}",
                            status, attempt, MAX_RETRIES, delay
                        );
                        continue;
                    }
                    return Err(EngineError::provider(
                        "chat",
                        format!("{status} — {}", text.chars().take(300).collect::<String>()),
                    ));
                }
                Err(e) => {
                    if attempt < MAX_RETRIES {
                        let delay = retry_delay(attempt).await;
                        attempt += 1;
                        info!(
                            "[provider] network error {e} — retry {}/{} after {:?}",
                            attempt, MAX_RETRIES, delay
                        );
                        continue;
                    }
                    return Err(e.into());
                }
            }
        }
    }
}
