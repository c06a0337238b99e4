// ── Transcription Port ─────────────────────────────────────────────────────
// Narrow port to a Whisper-compatible /v1/audio/transcriptions endpoint.
// The router enforces the duration limit before any bytes are uploaded.

use async_trait::async_trait;
use log::info;
use reqwest::multipart;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use crate::atoms::error::{EngineError, EngineResult};

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: Vec<u8>, language: &str, duration_secs: u32) -> EngineResult<String>;
}

pub struct WhisperClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl WhisperClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        WhisperClient {
            client: Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl Transcriber for WhisperClient {
    async fn transcribe(&self, audio: Vec<u8>, language: &str, duration_secs: u32) -> EngineResult<String> {
        let url = format!("{}/v1/audio/transcriptions", self.base_url.trim_end_matches('/'));

        let part = multipart::Part::bytes(audio)
            .file_name("voice.ogg")
            .mime_str("audio/ogg")
            .map_err(|e| EngineError::provider("transcribe", e.to_string()))?;
        let form = multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language", language.to_string())
            .text("response_format", "json");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .timeout(Duration::from_secs(60 + duration_secs as u64))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(EngineError::provider(
                "transcribe",
                format!("{status} — {}", text.chars().take(300).collect::<String>()),
            ));
        }

        let v: Value = resp.json().await?;
        let text = v["text"].as_str().unwrap_or_default().trim().to_string();
        info!("[transcribe] {}s of audio → {} chars", duration_secs, text.len());
        Ok(text)
    }
}
