// ── Store: Item Links ──────────────────────────────────────────────────────
// Directed relations between two items of the same user. Unique per
// (source, target); rows cascade with either endpoint.

use chrono::Utc;
use rusqlite::{params, Row};

use super::{parse_ts, ts, Store};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{Item, ItemLink};

const LINK_COLUMNS: &str =
    "id, item_id, related_item_id, link_type, reason, confidence, confirmed, created_at";

fn row_to_link(row: &Row<'_>) -> rusqlite::Result<ItemLink> {
    let created_at: String = row.get(7)?;
    Ok(ItemLink {
        id: row.get(0)?,
        item_id: row.get(1)?,
        related_item_id: row.get(2)?,
        link_type: row.get(3)?,
        reason: row.get(4)?,
        confidence: row.get(5)?,
        confirmed: row.get::<_, i64>(6)? != 0,
        created_at: parse_ts(&created_at).unwrap_or_else(Utc::now),
    })
}

impl Store {
    /// Create a link between two items owned by `user_id`. Both endpoints
    /// are ownership-checked; linking across users is a validation error.
    pub fn create_link(
        &self,
        user_id: i64,
        item_id: i64,
        related_item_id: i64,
        link_type: &str,
        reason: Option<&str>,
        confidence: Option<f64>,
    ) -> EngineResult<ItemLink> {
        let conn = self.conn.lock();
        let owned: i64 = conn.query_row(
            "SELECT COUNT(*) FROM items WHERE user_id = ?1 AND id IN (?2, ?3)",
            params![user_id, item_id, related_item_id],
            |r| r.get(0),
        )?;
        if owned != 2 || item_id == related_item_id {
            return Err(EngineError::Validation(format!(
                "cannot link items {item_id} -> {related_item_id} for user {user_id}"
            )));
        }

        conn.execute(
            "INSERT OR IGNORE INTO item_links
                 (item_id, related_item_id, link_type, reason, confidence, confirmed, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            params![item_id, related_item_id, link_type, reason, confidence, ts(Utc::now())],
        )?;
        let link = conn.query_row(
            &format!(
                "SELECT {LINK_COLUMNS} FROM item_links
                 WHERE item_id = ?1 AND related_item_id = ?2"
            ),
            params![item_id, related_item_id],
            row_to_link,
        )?;
        Ok(link)
    }

    /// Explicit links of an item, with the linked item resolved.
    pub fn links_for_item(&self, item_id: i64, user_id: i64) -> EngineResult<Vec<(ItemLink, Item)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {}, {} FROM item_links l
             JOIN items i ON i.id = l.related_item_id
             WHERE l.item_id = ?1 AND i.user_id = ?2",
            LINK_COLUMNS
                .split(", ")
                .map(|c| format!("l.{c}"))
                .collect::<Vec<_>>()
                .join(", "),
            super::items::item_columns("i"),
        ))?;
        let rows = stmt
            .query_map(params![item_id, user_id], |row| {
                let link = row_to_link(row)?;
                // Item columns start after the 8 link columns.
                let item = super::items::row_to_item_at(row, 8)?;
                Ok((link, item))
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}
