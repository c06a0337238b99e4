// ── Store: Users ───────────────────────────────────────────────────────────
// Users are created on first reference (upsert-on-read); everything else in
// the database hangs off user_id and cascades on deletion.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::{parse_ts, ts, Store};
use crate::atoms::constants::{DEFAULT_LANGUAGE, DEFAULT_TIMEZONE};
use crate::atoms::error::EngineResult;
use crate::atoms::types::User;

pub(crate) fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    let settings: String = row.get(3)?;
    let created_at: String = row.get(5)?;
    Ok(User {
        user_id: row.get(0)?,
        timezone: row.get(1)?,
        language: row.get(2)?,
        settings: serde_json::from_str(&settings).unwrap_or(serde_json::Value::Null),
        onboarding_done: row.get::<_, i64>(4)? != 0,
        created_at: parse_ts(&created_at).unwrap_or_else(Utc::now),
    })
}

pub(crate) const USER_COLUMNS: &str =
    "user_id, timezone, language, settings, onboarding_done, created_at";

impl Store {
    /// Fetch the user, creating it with defaults on first reference.
    pub fn get_or_create_user(&self, user_id: i64) -> EngineResult<User> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO users (user_id, timezone, language, settings, onboarding_done, created_at)
             VALUES (?1, ?2, ?3, '{}', 0, ?4)",
            params![user_id, DEFAULT_TIMEZONE, DEFAULT_LANGUAGE, ts(Utc::now())],
        )?;
        let user = conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1"),
            params![user_id],
            row_to_user,
        )?;
        Ok(user)
    }

    pub fn get_user(&self, user_id: i64) -> EngineResult<Option<User>> {
        let conn = self.conn.lock();
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1"),
                params![user_id],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    /// Partial settings update. `None` fields are left untouched.
    pub fn update_user(
        &self,
        user_id: i64,
        timezone: Option<&str>,
        language: Option<&str>,
        settings: Option<&serde_json::Value>,
    ) -> EngineResult<User> {
        {
            let conn = self.conn.lock();
            if let Some(tz) = timezone {
                conn.execute("UPDATE users SET timezone = ?1 WHERE user_id = ?2", params![tz, user_id])?;
            }
            if let Some(lang) = language {
                conn.execute("UPDATE users SET language = ?1 WHERE user_id = ?2", params![lang, user_id])?;
            }
            if let Some(s) = settings {
                conn.execute(
                    "UPDATE users SET settings = ?1 WHERE user_id = ?2",
                    params![serde_json::to_string(s)?, user_id],
                )?;
            }
        }
        self.get_or_create_user(user_id)
    }

    pub fn complete_onboarding(&self, user_id: i64) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute("UPDATE users SET onboarding_done = 1 WHERE user_id = ?1", params![user_id])?;
        Ok(())
    }
}
