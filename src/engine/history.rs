// ── Conversation History ───────────────────────────────────────────────────
// Per-user bounded FIFO of the last few chat turns. In-memory only; loss on
// restart is acceptable.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

use crate::atoms::constants::HISTORY_LIMIT;

#[derive(Debug, Clone)]
pub struct HistoryMessage {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Default)]
pub struct MessageHistory {
    storage: Mutex<HashMap<i64, VecDeque<HistoryMessage>>>,
}

impl MessageHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, user_id: i64, role: &str, content: &str, metadata: Option<serde_json::Value>) {
        let mut storage = self.storage.lock();
        let queue = storage.entry(user_id).or_default();
        if queue.len() == HISTORY_LIMIT {
            queue.pop_front();
        }
        queue.push_back(HistoryMessage {
            role: role.to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
            metadata,
        });
    }

    pub fn get(&self, user_id: i64, limit: Option<usize>) -> Vec<HistoryMessage> {
        let storage = self.storage.lock();
        let Some(queue) = storage.get(&user_id) else {
            return Vec::new();
        };
        let messages: Vec<HistoryMessage> = queue.iter().cloned().collect();
        match limit {
            Some(n) if n < messages.len() => messages[messages.len() - n..].to_vec(),
            _ => messages,
        }
    }

    /// Formatted context block for the LLM, or None when empty.
    pub fn context_string(&self, user_id: i64, limit: usize) -> Option<String> {
        let messages = self.get(user_id, Some(limit));
        if messages.is_empty() {
            return None;
        }
        let lines: Vec<String> = messages
            .iter()
            .map(|m| {
                let prefix = if m.role == "user" { "User" } else { "Bot" };
                format!("{prefix}: {}", m.content)
            })
            .collect();
        Some(lines.join("\n"))
    }

    pub fn clear(&self, user_id: i64) {
        self.storage.lock().remove(&user_id);
    }
}
