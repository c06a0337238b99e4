// ── Atoms: Pure Data Types ─────────────────────────────────────────────────
// All plain struct/enum definitions with no logic beyond parsing/formatting.
//
// The wire representation of every closed enum is its lowercase string tag;
// validators reject unknown tags at the boundary (`parse` returns None).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Closed taxonomies ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Task,
    Idea,
    Note,
    Resource,
    Contact,
    Event,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Task => "task",
            ItemType::Idea => "idea",
            ItemType::Note => "note",
            ItemType::Resource => "resource",
            ItemType::Contact => "contact",
            ItemType::Event => "event",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "task" => Some(ItemType::Task),
            "idea" => Some(ItemType::Idea),
            "note" => Some(ItemType::Note),
            "resource" => Some(ItemType::Resource),
            "contact" => Some(ItemType::Contact),
            "event" => Some(ItemType::Event),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Processing,
    Inbox,
    Active,
    Done,
    Archived,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Processing => "processing",
            ItemStatus::Inbox => "inbox",
            ItemStatus::Active => "active",
            ItemStatus::Done => "done",
            ItemStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(ItemStatus::Processing),
            "inbox" => Some(ItemStatus::Inbox),
            "active" => Some(ItemStatus::Active),
            "done" => Some(ItemStatus::Done),
            "archived" => Some(ItemStatus::Archived),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemSource {
    Text,
    Voice,
    Photo,
    Pdf,
    Forward,
    Link,
}

impl ItemSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemSource::Text => "text",
            ItemSource::Voice => "voice",
            ItemSource::Photo => "photo",
            ItemSource::Pdf => "pdf",
            ItemSource::Forward => "forward",
            ItemSource::Link => "link",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(ItemSource::Text),
            "voice" => Some(ItemSource::Voice),
            "photo" => Some(ItemSource::Photo),
            "pdf" => Some(ItemSource::Pdf),
            "forward" => Some(ItemSource::Forward),
            "link" => Some(ItemSource::Link),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "high" => Some(Priority::High),
            "medium" => Some(Priority::Medium),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }
}

// ── Recurrence ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecurrenceKind {
    Daily,
    Weekly,
    Monthly,
}

/// Recurrence rule attached to an item. Only meaningful when `due_at` is set.
/// `days` are weekday indices, Monday = 0 … Sunday = 6.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    #[serde(rename = "type")]
    pub kind: RecurrenceKind,
    #[serde(default = "default_interval")]
    pub interval: u32,
    #[serde(default)]
    pub days: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
}

fn default_interval() -> u32 {
    1
}

// ── Entities ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: i64,
    pub timezone: String,
    pub language: String,
    pub settings: serde_json::Value,
    pub onboarding_done: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Attachment triple — opaque to the core, persisted verbatim so the
/// transport can echo it back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub file_id: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub user_id: i64,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub status: ItemStatus,
    pub title: Option<String>,
    pub content: Option<String>,
    pub original_input: Option<String>,
    pub source: Option<ItemSource>,
    pub due_at: Option<DateTime<Utc>>,
    pub due_at_raw: Option<String>,
    pub remind_at: Option<DateTime<Utc>>,
    pub priority: Option<Priority>,
    pub project_id: Option<i64>,
    pub tags: Vec<String>,
    pub entities: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<RecurrenceRule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    pub has_embedding: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemLink {
    pub id: i64,
    pub item_id: i64,
    pub related_item_id: i64,
    pub link_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub confirmed: bool,
    pub created_at: DateTime<Utc>,
}

// ── Repository inputs ──────────────────────────────────────────────────────

/// Fields accepted by `create_item`. Server-generated fields (id,
/// timestamps) are filled by the store.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub item_type: ItemType,
    pub status: ItemStatus,
    pub source: Option<ItemSource>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub original_input: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub due_at_raw: Option<String>,
    pub remind_at: Option<DateTime<Utc>>,
    pub priority: Option<Priority>,
    pub project_id: Option<i64>,
    pub tags: Vec<String>,
    pub entities: serde_json::Value,
    pub recurrence: Option<RecurrenceRule>,
    pub attachment: Option<Attachment>,
}

impl Default for NewItem {
    fn default() -> Self {
        NewItem {
            item_type: ItemType::Note,
            status: ItemStatus::Inbox,
            source: None,
            title: None,
            content: None,
            original_input: None,
            due_at: None,
            due_at_raw: None,
            remind_at: None,
            priority: None,
            project_id: None,
            tags: Vec::new(),
            entities: serde_json::Value::Null,
            recurrence: None,
            attachment: None,
        }
    }
}

/// Partial update. Outer `Option` = "touch this field at all";
/// inner `Option` = the new value for nullable columns.
/// `original_input` is deliberately absent — it is never overwritten.
#[derive(Debug, Clone, Default)]
pub struct ItemPatch {
    pub item_type: Option<ItemType>,
    pub status: Option<ItemStatus>,
    pub title: Option<String>,
    pub content: Option<Option<String>>,
    pub due_at: Option<Option<DateTime<Utc>>>,
    pub due_at_raw: Option<Option<String>>,
    pub remind_at: Option<Option<DateTime<Utc>>>,
    pub priority: Option<Option<Priority>>,
    pub project_id: Option<Option<i64>>,
    pub tags: Option<Vec<String>>,
    pub entities: Option<serde_json::Value>,
    pub recurrence: Option<Option<RecurrenceRule>>,
}

impl ItemPatch {
    pub fn is_empty(&self) -> bool {
        self.item_type.is_none()
            && self.status.is_none()
            && self.title.is_none()
            && self.content.is_none()
            && self.due_at.is_none()
            && self.due_at_raw.is_none()
            && self.remind_at.is_none()
            && self.priority.is_none()
            && self.project_id.is_none()
            && self.tags.is_none()
            && self.entities.is_none()
            && self.recurrence.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateField {
    DueAt,
    CreatedAt,
}

/// Multi-criteria filter shared by `search_advanced` and the batch tools.
#[derive(Debug, Clone)]
pub struct SearchFilter {
    pub query: Option<String>,
    pub item_type: Option<ItemType>,
    pub status: Option<ItemStatus>,
    pub date_field: Option<DateField>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub project_id: Option<i64>,
    pub priority: Option<Priority>,
    pub tags: Vec<String>,
    pub limit: usize,
}

impl Default for SearchFilter {
    fn default() -> Self {
        SearchFilter {
            query: None,
            item_type: None,
            status: None,
            date_field: None,
            date_from: None,
            date_to: None,
            project_id: None,
            priority: None,
            tags: Vec::new(),
            limit: 100,
        }
    }
}

// ── Search output ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub id: i64,
    pub title: String,
    pub content: Option<String>,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub score: f64,
    pub fts_score: f64,
    pub vector_score: f64,
}

// ── Transport envelopes ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InboundKind {
    Text,
    Voice,
    Photo,
    Document,
    Forward,
}

/// What the transport adapter hands to the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub user_id: i64,
    pub kind: InboundKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyButton {
    pub label: String,
    pub callback_id: String,
}

/// What the router hands back to the transport adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundReply {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<ReplyButton>,
}

impl OutboundReply {
    pub fn text(text: impl Into<String>) -> Self {
        OutboundReply { text: text.into(), buttons: Vec::new() }
    }
}

// ── LLM wire types ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage { role: Role::System, content: Some(content.into()), tool_calls: Vec::new(), tool_call_id: None }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage { role: Role::User, content: Some(content.into()), tool_calls: Vec::new(), tool_call_id: None }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        ChatMessage {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_call_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

fn function_call_type() -> String {
    "function".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object, exactly as the model produced it.
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

// ── Extraction output (ingestion stage 2) ──────────────────────────────────

/// One item as proposed by the extraction model.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedItem {
    #[serde(rename = "type", default)]
    pub item_type: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub project_id: Option<i64>,
    #[serde(default)]
    pub due_at_raw: Option<String>,
    #[serde(default)]
    pub due_at_iso: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuggestedLink {
    pub new_item_index: i64,
    pub existing_item_id: i64,
    #[serde(default)]
    pub reason: String,
}

/// The full JSON object the extraction model must return.
#[derive(Debug, Clone, Deserialize)]
pub struct Extraction {
    #[serde(default)]
    pub items: Vec<ExtractedItem>,
    #[serde(default)]
    pub chat_response: Option<String>,
    #[serde(default)]
    pub suggested_links: Vec<SuggestedLink>,
}

// ── Extracted content (input ports) ────────────────────────────────────────

/// Unified result of the voice / image / document / URL input ports.
#[derive(Debug, Clone, Default)]
pub struct ExtractedContent {
    pub text: String,
    pub title: Option<String>,
    pub source_type: String,
    pub metadata: serde_json::Value,
}
