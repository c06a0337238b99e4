// ── Embedding Client ───────────────────────────────────────────────────────
// Calls an OpenAI-compatible embeddings API to produce the 1536-dim vectors
// the item store and hybrid search work with.
//
// Port contract: one vector per input, same order; a failed or empty input
// maps to an empty vector rather than failing the whole batch.

use async_trait::async_trait;
use log::warn;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use crate::atoms::constants::MAX_EMBED_CHARS;
use crate::atoms::error::{EngineError, EngineResult};

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Batch-embed `texts`. The result has exactly `texts.len()` entries.
    async fn embed(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>>;
}

pub struct EmbeddingClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl EmbeddingClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        EmbeddingClient {
            client: Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    /// POST /v1/embeddings { model, input: [...] } → { data: [{embedding}] }
    async fn embed(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        // Skip blank inputs but keep their slots; remember original indices.
        let mut prepared: Vec<String> = Vec::new();
        let mut indices: Vec<usize> = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                continue;
            }
            let mut t = trimmed.to_string();
            if t.len() > MAX_EMBED_CHARS {
                warn!("[embedding] Input {} truncated to {} chars", i, MAX_EMBED_CHARS);
                t = t.chars().take(MAX_EMBED_CHARS).collect();
            }
            prepared.push(t);
            indices.push(i);
        }
        if prepared.is_empty() {
            return Ok(vec![Vec::new(); texts.len()]);
        }

        let url = format!("{}/v1/embeddings", self.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "input": prepared,
        });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(Duration::from_secs(30))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(EngineError::provider(
                "embeddings",
                format!("{status} — {}", text.chars().take(300).collect::<String>()),
            ));
        }

        let v: Value = resp.json().await?;
        let data = v["data"]
            .as_array()
            .ok_or_else(|| EngineError::provider("embeddings", "no 'data' array in response"))?;

        let mut results = vec![Vec::new(); texts.len()];
        for (j, entry) in data.iter().enumerate() {
            let Some(slot) = indices.get(j).copied() else { break };
            if let Some(arr) = entry["embedding"].as_array() {
                results[slot] = arr
                    .iter()
                    .filter_map(|x| x.as_f64().map(|f| f as f32))
                    .collect();
            }
        }
        Ok(results)
    }
}
