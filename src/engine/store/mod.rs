// ── Store: SQLite repository ───────────────────────────────────────────────
// All persistent state lives in one SQLite database behind a single mutexed
// connection. Every public method locks the connection for its whole
// duration, which gives the single-writer-per-request discipline the rest
// of the engine relies on: no two statements of one repository call can
// interleave with another call.
//
// Module layout:
//   mod.rs      — open/DDL, timestamp + vector helpers
//   users.rs    — upsert-on-read users, settings
//   projects.rs — project CRUD, move_items
//   items.rs    — item CRUD, batch ops, recurrence expansion, due window,
//                 FTS/vector search primitives
//   links.rs    — item links

pub mod items;
pub mod links;
pub mod projects;
pub mod users;

use chrono::{DateTime, SecondsFormat, Utc};
use log::info;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;

use crate::atoms::error::EngineResult;

/// Thread-safe database wrapper.
pub struct Store {
    pub(crate) conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database at `path` and initialize tables.
    pub fn open(path: &Path) -> EngineResult<Self> {
        info!("[store] Opening database at {:?}", path);
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open a fresh in-memory database. Used by tests.
    pub fn open_in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> EngineResult<Self> {
        // WAL for concurrent readers; FK enforcement is opt-in in SQLite.
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                user_id INTEGER PRIMARY KEY,
                timezone TEXT NOT NULL DEFAULT 'Asia/Almaty',
                language TEXT NOT NULL DEFAULT 'ru',
                settings TEXT NOT NULL DEFAULT '{}',
                onboarding_done INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS projects (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                color TEXT,
                emoji TEXT,
                created_at TEXT NOT NULL,
                UNIQUE (user_id, name)
            );

            CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
                type TEXT NOT NULL
                    CHECK (type IN ('task','idea','note','resource','contact','event')),
                status TEXT NOT NULL DEFAULT 'inbox'
                    CHECK (status IN ('processing','inbox','active','done','archived')),
                title TEXT,
                content TEXT,
                original_input TEXT,
                source TEXT,
                due_at TEXT,
                due_at_raw TEXT,
                remind_at TEXT,
                priority TEXT
                    CHECK (priority IS NULL OR priority IN ('high','medium','low')),
                project_id INTEGER REFERENCES projects(id) ON DELETE SET NULL,
                tags TEXT NOT NULL DEFAULT '[]',
                entities TEXT NOT NULL DEFAULT '{}',
                recurrence TEXT,
                attachment_file_id TEXT,
                attachment_type TEXT,
                attachment_filename TEXT,
                embedding BLOB,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_items_user_status ON items(user_id, status);
            CREATE INDEX IF NOT EXISTS idx_items_user_type ON items(user_id, type);
            CREATE INDEX IF NOT EXISTS idx_items_remind ON items(remind_at);

            CREATE TABLE IF NOT EXISTS item_links (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                item_id INTEGER NOT NULL REFERENCES items(id) ON DELETE CASCADE,
                related_item_id INTEGER NOT NULL REFERENCES items(id) ON DELETE CASCADE,
                link_type TEXT NOT NULL DEFAULT 'related',
                reason TEXT,
                confidence REAL,
                confirmed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                UNIQUE (item_id, related_item_id)
            );

            CREATE VIRTUAL TABLE IF NOT EXISTS items_fts USING fts5(
                item_id UNINDEXED,
                user_id UNINDEXED,
                title,
                content,
                original_input
            );
            ",
        )?;

        Ok(Store { conn: Mutex::new(conn) })
    }
}

// ── Timestamp helpers ──────────────────────────────────────────────────────
// Timestamps are stored as RFC3339 with fixed microsecond precision so SQL
// string comparison equals instant comparison.

pub(crate) fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

pub(crate) fn parse_ts_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref().and_then(parse_ts)
}

// ── Vector helpers ─────────────────────────────────────────────────────────

/// Embeddings are stored as little-endian f32 BLOBs.
pub fn f32_vec_to_bytes(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub fn bytes_to_f32_vec(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Cosine similarity between two vectors. Returns 0.0 on mismatch or zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-12 {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_round_trip_and_sort_lexicographically() {
        let a = Utc.with_ymd_and_hms(2025, 11, 14, 9, 0, 0).unwrap();
        let b = a + chrono::Duration::microseconds(1);
        let (sa, sb) = (ts(a), ts(b));
        assert!(sa < sb);
        assert_eq!(parse_ts(&sa), Some(a));
        assert_eq!(parse_ts(&sb), Some(b));
    }

    #[test]
    fn f32_blob_round_trip() {
        let v = vec![0.25f32, -1.5, 3.0];
        assert_eq!(bytes_to_f32_vec(&f32_vec_to_bytes(&v)), v);
    }

    #[test]
    fn cosine_basics() {
        let a = [1.0f32, 0.0];
        let b = [1.0f32, 0.0];
        let c = [0.0f32, 1.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&a, &c).abs() < 1e-9);
        assert_eq!(cosine_similarity(&a, &[1.0]), 0.0);
    }
}
