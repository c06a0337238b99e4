// ── Configuration ──────────────────────────────────────────────────────────
// Everything flows from CLI flags with environment-variable fallbacks.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "neural-inbox", about = "Second-brain capture service")]
pub struct Config {
    /// SQLite database file.
    #[arg(long, env = "DATABASE_PATH", default_value = "neural-inbox.db")]
    pub database_path: PathBuf,

    /// Telegram bot token. Empty disables the chat bridge.
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", default_value = "", hide_env_values = true)]
    pub bot_token: String,

    /// API key for the model provider.
    #[arg(long, env = "OPENAI_API_KEY", default_value = "", hide_env_values = true)]
    pub api_key: String,

    /// Base URL of the OpenAI-compatible API.
    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com")]
    pub api_base_url: String,

    /// Model for routine extractions.
    #[arg(long, env = "FAST_MODEL", default_value = "gpt-4o-mini")]
    pub fast_model: String,

    /// Model for long / multi-intent inputs and the management agent.
    #[arg(long, env = "SMART_MODEL", default_value = "gpt-4o")]
    pub smart_model: String,

    /// Embedding model (1536-dim output expected).
    #[arg(long, env = "EMBEDDING_MODEL", default_value = "text-embedding-3-small")]
    pub embedding_model: String,

    /// Speech-to-text model.
    #[arg(long, env = "TRANSCRIBE_MODEL", default_value = "whisper-1")]
    pub transcribe_model: String,

    /// Vision model for photo ingestion.
    #[arg(long, env = "VISION_MODEL", default_value = "gpt-4o")]
    pub vision_model: String,

    /// Bind address of the companion-client HTTP API.
    #[arg(long, env = "HTTP_BIND", default_value = "127.0.0.1:8000")]
    pub http_bind: String,
}

impl Config {
    /// Test/offline configuration with providers disabled.
    pub fn for_tests() -> Self {
        Config {
            database_path: PathBuf::from(":memory:"),
            bot_token: String::new(),
            api_key: String::new(),
            api_base_url: "http://127.0.0.1:0".into(),
            fast_model: "fast-model".into(),
            smart_model: "smart-model".into(),
            embedding_model: "embed-model".into(),
            transcribe_model: "asr-model".into(),
            vision_model: "vision-model".into(),
            http_bind: "127.0.0.1:0".into(),
        }
    }
}
