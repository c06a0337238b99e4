// ── Engine State ───────────────────────────────────────────────────────────
// Everything a request handler needs, bundled behind one Arc: the store,
// the provider ports, the two process-local maps (confirmations, pending
// agent turns), the history buffer and the outbound notifier.

use async_trait::async_trait;
use log::info;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::atoms::error::EngineResult;
use crate::atoms::types::OutboundReply;
use crate::engine::agent_loop::PendingAgentState;
use crate::engine::config::Config;
use crate::engine::confirmations::ConfirmationStore;
use crate::engine::embedding::Embedder;
use crate::engine::extract::DocumentExtractor;
use crate::engine::history::MessageHistory;
use crate::engine::providers::AnyProvider;
use crate::engine::store::Store;
use crate::engine::transcribe::Transcriber;
use crate::engine::vision::Vision;

/// Outbound leg of the transport: how the engine pushes a message to a
/// user outside a request/response exchange (reminders, confirmations).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, user_id: i64, reply: OutboundReply) -> EngineResult<()>;
}

/// Notifier for deployments without a chat bridge: logs and drops.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn send(&self, user_id: i64, reply: OutboundReply) -> EngineResult<()> {
        info!("[notify] (no transport) user={user_id}: {}", reply.text);
        Ok(())
    }
}

pub struct EngineState {
    pub config: Config,
    pub store: Store,
    pub chat: AnyProvider,
    pub embedder: Option<Arc<dyn Embedder>>,
    pub transcriber: Option<Arc<dyn Transcriber>>,
    pub vision: Option<Arc<dyn Vision>>,
    pub extractor: DocumentExtractor,
    pub confirmations: ConfirmationStore,
    /// At most one pending agent turn per user; newer entries overwrite.
    pub pending_agents: Mutex<HashMap<i64, PendingAgentState>>,
    pub history: MessageHistory,
    pub notifier: Arc<dyn Notifier>,
}

impl EngineState {
    pub fn new(
        config: Config,
        store: Store,
        chat: AnyProvider,
        embedder: Option<Arc<dyn Embedder>>,
        transcriber: Option<Arc<dyn Transcriber>>,
        vision: Option<Arc<dyn Vision>>,
        extractor: DocumentExtractor,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        EngineState {
            config,
            store,
            chat,
            embedder,
            transcriber,
            vision,
            extractor,
            confirmations: ConfirmationStore::new(),
            pending_agents: Mutex::new(HashMap::new()),
            history: MessageHistory::new(),
            notifier,
        }
    }

    /// Stash a pending agent turn, replacing any previous one for the user.
    pub fn save_pending_agent(&self, state: PendingAgentState) {
        self.pending_agents.lock().insert(state.user_id, state);
    }

    /// Take (and thereby clear) the pending agent turn for a user.
    pub fn take_pending_agent(&self, user_id: i64) -> Option<PendingAgentState> {
        self.pending_agents.lock().remove(&user_id)
    }

    pub fn has_pending_agent(&self, user_id: i64) -> bool {
        self.pending_agents.lock().contains_key(&user_id)
    }
}
