// ── Atoms: Error Types ─────────────────────────────────────────────────────
// Single canonical error enum for the engine, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by failure kind (I/O, DB, Provider,
//     Validation…), not by call site.
//   • The `#[from]` attribute wires std/external error conversions.
//   • `EngineError` → `String` conversion is provided via `Display` so the
//     transport and HTTP boundaries can surface a one-line message.
//   • No variant carries secret material (API keys, bot tokens).

use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// SQLite / rusqlite database failure.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Model/embedding/ASR/vision provider failure (non-secret detail only).
    #[error("Provider error: {provider}: {message}")]
    Provider { provider: String, message: String },

    /// The extraction model returned unparseable or ill-shaped output.
    #[error("Agent error: {0}")]
    Agent(String),

    /// A request-wide deadline expired.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Inbound content refused before any persistence (too large, too long,
    /// unsupported format). Reported to the user verbatim.
    #[error("{0}")]
    InputRejected(String),

    /// An extractor port returned a structured failure.
    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    /// Invalid enum value, out-of-range pagination, bad timezone and the
    /// like. Surfaced as a 4xx on the HTTP surface.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The requested id is not visible to the calling user. No distinction
    /// between "missing" and "not yours".
    #[error("Not found: {0}")]
    NotFound(String),

    /// Confirmation token unknown, consumed, or older than its TTL.
    #[error("Confirmation expired: {0}")]
    ConfirmationExpired(String),

    /// Authentication / authorization failure.
    #[error("Auth error: {0}")]
    Auth(String),

    /// Engine configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Catch-all for errors that do not yet have a dedicated variant.
    /// Prefer adding a specific variant over using this in new code.
    #[error("{0}")]
    Other(String),
}

// ── Convenience constructors ───────────────────────────────────────────────

impl EngineError {
    /// Create a provider error with name and message.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider { provider: provider.into(), message: message.into() }
    }
}

// ── Migration bridge: String → EngineError ─────────────────────────────────
// Allows `?` on helpers that produce ad-hoc string errors.

impl From<String> for EngineError {
    fn from(s: String) -> Self {
        EngineError::Other(s)
    }
}

impl From<&str> for EngineError {
    fn from(s: &str) -> Self {
        EngineError::Other(s.to_string())
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All engine operations should return this type.
pub type EngineResult<T> = Result<T, EngineError>;

// ── Conversion: EngineError → String ───────────────────────────────────────
// Lets boundary code call `.map_err(EngineError::into)` directly.

impl From<EngineError> for String {
    fn from(e: EngineError) -> Self {
        e.to_string()
    }
}
