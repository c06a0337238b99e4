// ── AI Provider Port ───────────────────────────────────────────────────────
// AnyProvider wraps Box<dyn ChatCompletion> so callers never know which
// concrete backend is in use. Everything OpenAI-compatible (the reference
// deployment, plus the usual self-hosted gateways) goes through the single
// adapter in openai.rs; a provider with a unique wire format would add a
// module here and a match arm in from_config.

pub mod openai;

pub use openai::OpenAiProvider;

use async_trait::async_trait;

use crate::atoms::error::EngineResult;
use crate::atoms::types::{ChatMessage, ToolCall, ToolDefinition};

/// One chat completion request.
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub tools: &'a [ToolDefinition],
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    /// Ask the provider for a strict-JSON response body.
    pub json_object: bool,
}

/// What came back: assistant text and/or tool calls.
#[derive(Debug, Clone, Default)]
pub struct ChatReply {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(&self, req: ChatRequest<'_>) -> EngineResult<ChatReply>;
}

/// Type-erased provider handle.
pub struct AnyProvider(Box<dyn ChatCompletion>);

impl AnyProvider {
    pub fn openai_compatible(base_url: &str, api_key: &str) -> Self {
        AnyProvider(Box::new(OpenAiProvider::new(base_url, api_key)))
    }

    pub fn from_impl(inner: Box<dyn ChatCompletion>) -> Self {
        AnyProvider(inner)
    }

    pub async fn complete(&self, req: ChatRequest<'_>) -> EngineResult<ChatReply> {
        self.0.complete(req).await
    }

    /// Plain system+user call returning the assistant text. Used by the
    /// extraction pipeline and the vision port.
    pub async fn complete_text(
        &self,
        model: &str,
        system: &str,
        user: &str,
        temperature: f64,
        max_tokens: u32,
        json_object: bool,
    ) -> EngineResult<String> {
        let messages = [ChatMessage::system(system), ChatMessage::user(user)];
        let reply = self
            .complete(ChatRequest {
                model,
                messages: &messages,
                tools: &[],
                temperature: Some(temperature),
                max_tokens: Some(max_tokens),
                json_object,
            })
            .await?;
        Ok(reply.content.unwrap_or_default())
    }
}
