// Neural Inbox service entry point: config → store → engine state →
// chat bridge + reminder scheduler + HTTP API.

use clap::Parser;
use log::{info, warn};
use std::sync::Arc;

use neural_inbox::api;
use neural_inbox::engine::config::Config;
use neural_inbox::engine::embedding::EmbeddingClient;
use neural_inbox::engine::extract::DocumentExtractor;
use neural_inbox::engine::providers::AnyProvider;
use neural_inbox::engine::scheduler;
use neural_inbox::engine::state::{EngineState, Notifier, NullNotifier};
use neural_inbox::engine::store::Store;
use neural_inbox::engine::telegram::TelegramBridge;
use neural_inbox::engine::transcribe::WhisperClient;
use neural_inbox::engine::vision::VisionClient;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let config = Config::parse();

    let store = Store::open(&config.database_path)?;
    let chat = AnyProvider::openai_compatible(&config.api_base_url, &config.api_key);

    let embedder = (!config.api_key.is_empty()).then(|| {
        Arc::new(EmbeddingClient::new(
            &config.api_base_url,
            &config.api_key,
            &config.embedding_model,
        )) as Arc<dyn neural_inbox::engine::embedding::Embedder>
    });
    let transcriber = (!config.api_key.is_empty()).then(|| {
        Arc::new(WhisperClient::new(
            &config.api_base_url,
            &config.api_key,
            &config.transcribe_model,
        )) as Arc<dyn neural_inbox::engine::transcribe::Transcriber>
    });
    let vision = (!config.api_key.is_empty()).then(|| {
        Arc::new(VisionClient::new(
            &config.api_base_url,
            &config.api_key,
            &config.vision_model,
        )) as Arc<dyn neural_inbox::engine::vision::Vision>
    });

    let bridge = (!config.bot_token.is_empty()).then(|| Arc::new(TelegramBridge::new(&config.bot_token)));
    let notifier: Arc<dyn Notifier> = match &bridge {
        Some(bridge) => bridge.clone(),
        None => {
            warn!("[main] No bot token configured — reminders will only be logged");
            Arc::new(NullNotifier)
        }
    };

    let state = Arc::new(EngineState::new(
        config.clone(),
        store,
        chat,
        embedder,
        transcriber,
        vision,
        DocumentExtractor::new(None),
        notifier,
    ));

    // Reminder scheduler: one process-wide periodic task.
    scheduler::spawn(state.clone());

    // Chat bridge, when configured.
    if let Some(bridge) = bridge {
        let bridge_state = state.clone();
        tokio::spawn(async move { bridge.run(bridge_state).await });
    }

    // Companion-client HTTP API.
    let app = api::build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.http_bind).await?;
    info!("[main] HTTP API listening on {}", config.http_bind);
    axum::serve(listener, app).await?;
    Ok(())
}
