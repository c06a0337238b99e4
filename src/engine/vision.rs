// ── Vision Port ────────────────────────────────────────────────────────────
// Describes a photo (plus optional caption) as text the ingestion pipeline
// can classify. Uses an OpenAI-compatible chat endpoint with an inline
// base64 image block.

use async_trait::async_trait;
use base64::Engine as _;
use log::info;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use crate::atoms::error::{EngineError, EngineResult};

const VISION_PROMPT: &str = "Опиши, что на изображении, и перепиши весь видимый текст дословно. \
Если это скриншот, документ или чек — текст важнее описания. Отвечай на русском.";

#[async_trait]
pub trait Vision: Send + Sync {
    async fn describe(&self, image: Vec<u8>, caption: Option<&str>) -> EngineResult<String>;
}

pub struct VisionClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl VisionClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        VisionClient {
            client: Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl Vision for VisionClient {
    async fn describe(&self, image: Vec<u8>, caption: Option<&str>) -> EngineResult<String> {
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let data_url = format!(
            "data:image/jpeg;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&image)
        );

        let user_text = match caption {
            Some(c) if !c.trim().is_empty() => format!("{VISION_PROMPT}\n\nПодпись пользователя: {c}"),
            _ => VISION_PROMPT.to_string(),
        };

        let body = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": user_text },
                    { "type": "image_url", "image_url": { "url": data_url } }
                ]
            }],
            "max_tokens": 800,
            "temperature": 0.2,
        });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(Duration::from_secs(60))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(EngineError::provider(
                "vision",
                format!("{status} — {}", text.chars().take(300).collect::<String>()),
            ));
        }

        let v: Value = resp.json().await?;
        let text = v["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .trim()
            .to_string();
        if text.is_empty() {
            return Err(EngineError::provider("vision", "empty description"));
        }
        info!("[vision] Image described, {} chars", text.len());
        Ok(text)
    }
}
