// ── Atoms: Engine Constants ────────────────────────────────────────────────
// Hard limits and timing windows shared across the engine.

/// Longest voice message we accept for transcription (seconds).
pub const MAX_VOICE_DURATION_SECS: u32 = 300;

/// Largest document we download for extraction (bytes).
pub const MAX_FILE_SIZE_BYTES: u64 = 25 * 1024 * 1024;

/// Largest image we send to the vision provider (bytes).
pub const MAX_IMAGE_SIZE_BYTES: u64 = 20 * 1024 * 1024;

/// Page cap for PDF / DOCX extraction.
pub const MAX_DOCUMENT_PAGES: u32 = 50;

/// Per-request timeout for URL fetches (seconds).
pub const URL_FETCH_TIMEOUT_SECS: u64 = 10;

/// Wall-clock deadline around ingestion stages 2–5 (seconds).
pub const PIPELINE_DEADLINE_SECS: u64 = 30;

/// TTL of a pending confirmation token (seconds).
pub const CONFIRMATION_TTL_SECS: i64 = 5 * 60;

/// Reminder scheduler tick period (seconds).
pub const REMINDER_TICK_SECS: u64 = 60;

/// Reminder selection window reaches this far back to recover from short
/// outages without duplicating (seconds).
pub const REMINDER_LOOKBACK_SECS: i64 = 5 * 60;

/// Forward-looking part of the reminder window, absorbs tick jitter (seconds).
pub const REMINDER_LOOKAHEAD_SECS: i64 = 60;

/// Maximum tool-call iterations per management-agent turn.
pub const MAX_AGENT_ITERATIONS: u32 = 5;

/// Per-user conversation history depth (messages).
pub const HISTORY_LIMIT: usize = 6;

/// Fixed dimensionality of stored embeddings.
pub const EMBEDDING_DIM: usize = 1536;

/// Character cap before text is truncated for embedding.
pub const MAX_EMBED_CHARS: usize = 30_000;

/// Link reason field cap (characters).
pub const LINK_REASON_MAX_CHARS: usize = 200;

/// Fallback title length when the model returns none (characters).
pub const TITLE_FALLBACK_CHARS: usize = 100;

/// Signed auth tokens older than this are rejected (hours).
pub const AUTH_MAX_AGE_HOURS: i64 = 24;

/// Timezone assigned to users who never set one.
pub const DEFAULT_TIMEZONE: &str = "Asia/Almaty";

/// Language assigned to users who never set one.
pub const DEFAULT_LANGUAGE: &str = "ru";
