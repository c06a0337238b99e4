// ── Store: Items ───────────────────────────────────────────────────────────
// Typed CRUD, batch operations, recurrence expansion and the search
// primitives (FTS5 / vector / LIKE) that engine::search fuses.
//
// Every query scopes by user_id first; (user_id, id) is the only addressing
// pair. `original_input` is written once at create time and never updated.

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::HashSet;

use super::users::USER_COLUMNS;
use super::{bytes_to_f32_vec, cosine_similarity, f32_vec_to_bytes, parse_ts, parse_ts_opt, ts, Store};
use crate::atoms::constants::EMBEDDING_DIM;
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{
    Attachment, DateField, Item, ItemPatch, ItemSource, ItemStatus, ItemType, NewItem, Priority,
    RecurrenceRule, SearchFilter, User,
};
use crate::engine::recurrence::next_occurrence;

pub(crate) fn item_columns(prefix: &str) -> String {
    let p = if prefix.is_empty() { String::new() } else { format!("{prefix}.") };
    format!(
        "{p}id, {p}user_id, {p}type, {p}status, {p}title, {p}content, {p}original_input, {p}source, \
         {p}due_at, {p}due_at_raw, {p}remind_at, {p}priority, {p}project_id, {p}tags, {p}entities, \
         {p}recurrence, {p}attachment_file_id, {p}attachment_type, {p}attachment_filename, \
         {p}embedding IS NOT NULL, {p}created_at, {p}updated_at, {p}completed_at"
    )
}

pub(crate) fn row_to_item(row: &Row<'_>) -> rusqlite::Result<Item> {
    row_to_item_at(row, 0)
}

/// Map item columns starting at `base`. Joined queries place the item block
/// at a non-zero offset.
pub(crate) fn row_to_item_at(row: &Row<'_>, base: usize) -> rusqlite::Result<Item> {
    let type_s: String = row.get(base + 2)?;
    let status_s: String = row.get(base + 3)?;
    let source_s: Option<String> = row.get(base + 7)?;
    let priority_s: Option<String> = row.get(base + 11)?;
    let tags_s: String = row.get(base + 13)?;
    let entities_s: String = row.get(base + 14)?;
    let recurrence_s: Option<String> = row.get(base + 15)?;
    let attach_id: Option<String> = row.get(base + 16)?;
    let attach_type: Option<String> = row.get(base + 17)?;
    let attach_name: Option<String> = row.get(base + 18)?;
    let created_at: String = row.get(base + 20)?;
    let updated_at: String = row.get(base + 21)?;

    let attachment = attach_id.map(|file_id| Attachment {
        file_id,
        kind: attach_type.unwrap_or_default(),
        filename: attach_name,
    });

    Ok(Item {
        id: row.get(base)?,
        user_id: row.get(base + 1)?,
        item_type: ItemType::parse(&type_s).unwrap_or(ItemType::Note),
        status: ItemStatus::parse(&status_s).unwrap_or(ItemStatus::Inbox),
        title: row.get(base + 4)?,
        content: row.get(base + 5)?,
        original_input: row.get(base + 6)?,
        source: source_s.as_deref().and_then(ItemSource::parse),
        due_at: parse_ts_opt(row.get(base + 8)?),
        due_at_raw: row.get(base + 9)?,
        remind_at: parse_ts_opt(row.get(base + 10)?),
        priority: priority_s.as_deref().and_then(Priority::parse),
        project_id: row.get(base + 12)?,
        tags: serde_json::from_str(&tags_s).unwrap_or_default(),
        entities: serde_json::from_str(&entities_s).unwrap_or(serde_json::Value::Null),
        recurrence: recurrence_s
            .as_deref()
            .and_then(|s| serde_json::from_str::<RecurrenceRule>(s).ok()),
        attachment,
        has_embedding: row.get::<_, i64>(base + 19)? != 0,
        created_at: parse_ts(&created_at).unwrap_or_else(Utc::now),
        updated_at: parse_ts(&updated_at).unwrap_or_else(Utc::now),
        completed_at: parse_ts_opt(row.get(base + 22)?),
    })
}

/// Drop duplicate tags while keeping first-seen order.
fn dedup_tags(tags: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.iter()
        .filter(|t| !t.trim().is_empty() && seen.insert(t.as_str()))
        .cloned()
        .collect()
}

fn get_item_on(conn: &Connection, item_id: i64, user_id: i64) -> rusqlite::Result<Option<Item>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM items WHERE id = ?1 AND user_id = ?2",
            item_columns("")
        ),
        params![item_id, user_id],
        row_to_item,
    )
    .optional()
}

/// Keep the FTS index in step with the row. Best-effort, like the rest of
/// the manual sync: a lost FTS row degrades search, not correctness.
fn sync_fts(conn: &Connection, item_id: i64, user_id: i64) {
    conn.execute("DELETE FROM items_fts WHERE item_id = ?1", params![item_id]).ok();
    conn.execute(
        "INSERT INTO items_fts (item_id, user_id, title, content, original_input)
         SELECT id, user_id, COALESCE(title, ''), COALESCE(content, ''), COALESCE(original_input, '')
         FROM items WHERE id = ?1 AND user_id = ?2",
        params![item_id, user_id],
    )
    .ok();
}

fn insert_item(conn: &Connection, user_id: i64, new: &NewItem, now: DateTime<Utc>) -> EngineResult<i64> {
    let tags = dedup_tags(&new.tags);
    let entities = if new.entities.is_null() {
        "{}".to_string()
    } else {
        serde_json::to_string(&new.entities)?
    };
    conn.execute(
        "INSERT INTO items (
            user_id, type, status, title, content, original_input, source,
            due_at, due_at_raw, remind_at, priority, project_id, tags, entities,
            recurrence, attachment_file_id, attachment_type, attachment_filename,
            created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?19)",
        params![
            user_id,
            new.item_type.as_str(),
            new.status.as_str(),
            new.title,
            new.content,
            new.original_input,
            new.source.map(|s| s.as_str()),
            new.due_at.map(ts),
            new.due_at_raw,
            new.remind_at.map(ts),
            new.priority.map(|p| p.as_str()),
            new.project_id,
            serde_json::to_string(&tags)?,
            entities,
            new.recurrence.as_ref().map(serde_json::to_string).transpose()?,
            new.attachment.as_ref().map(|a| a.file_id.clone()),
            new.attachment.as_ref().map(|a| a.kind.clone()),
            new.attachment.as_ref().and_then(|a| a.filename.clone()),
            ts(now),
        ],
    )?;
    let id = conn.last_insert_rowid();
    sync_fts(conn, id, user_id);
    Ok(id)
}

impl Store {
    /// Create an item, returning it with all server-generated fields.
    pub fn create_item(&self, user_id: i64, new: &NewItem) -> EngineResult<Item> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let id = insert_item(&tx, user_id, new, Utc::now())?;
        let item = get_item_on(&tx, id, user_id)?
            .ok_or_else(|| EngineError::Other("item vanished after insert".into()))?;
        tx.commit()?;
        Ok(item)
    }

    pub fn get_item(&self, item_id: i64, user_id: i64) -> EngineResult<Option<Item>> {
        let conn = self.conn.lock();
        Ok(get_item_on(&conn, item_id, user_id)?)
    }

    pub fn items_by_ids(&self, item_ids: &[i64], user_id: i64) -> EngineResult<Vec<Item>> {
        if item_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock();
        let placeholders = vec!["?"; item_ids.len()].join(",");
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM items WHERE user_id = ? AND id IN ({placeholders})",
            item_columns("")
        ))?;
        let mut values: Vec<SqlValue> = vec![SqlValue::Integer(user_id)];
        values.extend(item_ids.iter().map(|id| SqlValue::Integer(*id)));
        let items = stmt
            .query_map(params_from_iter(values), row_to_item)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(items)
    }

    /// Partial update. `original_input` can never be touched (the patch type
    /// has no such field). Returns the updated item, or None if not visible.
    pub fn update_item(&self, item_id: i64, user_id: i64, patch: &ItemPatch) -> EngineResult<Option<Item>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let Some(existing) = get_item_on(&tx, item_id, user_id)? else {
            return Ok(None);
        };

        let mut sets: Vec<String> = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();
        fn push(sets: &mut Vec<String>, values: &mut Vec<SqlValue>, col: &str, v: SqlValue) {
            sets.push(format!("{col} = ?{}", values.len() + 1));
            values.push(v);
        }

        if let Some(t) = patch.item_type {
            push(&mut sets, &mut values, "type", SqlValue::from(t.as_str().to_string()));
        }
        if let Some(s) = patch.status {
            push(&mut sets, &mut values, "status", SqlValue::from(s.as_str().to_string()));
            // The !done → done transition stamps completed_at; leaving done
            // clears it. Re-asserting done keeps the original stamp.
            if s == ItemStatus::Done && existing.status != ItemStatus::Done {
                push(&mut sets, &mut values, "completed_at", SqlValue::from(ts(Utc::now())));
            } else if s != ItemStatus::Done {
                push(&mut sets, &mut values, "completed_at", SqlValue::Null);
            }
        }
        if let Some(title) = &patch.title {
            push(&mut sets, &mut values, "title", SqlValue::from(title.clone()));
        }
        if let Some(content) = &patch.content {
            push(&mut sets, &mut values, "content", opt_text::<String>(content.clone()));
        }
        if let Some(due) = patch.due_at {
            push(&mut sets, &mut values, "due_at", opt_text::<String>(due.map(ts)));
        }
        if let Some(raw) = &patch.due_at_raw {
            push(&mut sets, &mut values, "due_at_raw", opt_text::<String>(raw.clone()));
        }
        if let Some(remind) = patch.remind_at {
            push(&mut sets, &mut values, "remind_at", opt_text::<String>(remind.map(ts)));
        }
        if let Some(p) = patch.priority {
            push(&mut sets, &mut values, "priority", opt_text::<String>(p.map(|p| p.as_str().to_string())));
        }
        if let Some(proj) = patch.project_id {
            push(
                &mut sets,
                &mut values,
                "project_id",
                proj.map(SqlValue::Integer).unwrap_or(SqlValue::Null),
            );
        }
        if let Some(tags) = &patch.tags {
            push(&mut sets, &mut values, "tags", SqlValue::from(serde_json::to_string(&dedup_tags(tags))?));
        }
        if let Some(entities) = &patch.entities {
            push(&mut sets, &mut values, "entities", SqlValue::from(serde_json::to_string(entities)?));
        }
        if let Some(rec) = &patch.recurrence {
            let encoded = rec.as_ref().map(serde_json::to_string).transpose()?;
            push(&mut sets, &mut values, "recurrence", opt_text::<String>(encoded));
        }

        if !sets.is_empty() {
            push(&mut sets, &mut values, "updated_at", SqlValue::from(ts(Utc::now())));
            values.push(SqlValue::Integer(item_id));
            values.push(SqlValue::Integer(user_id));
            let n = values.len();
            tx.execute(
                &format!(
                    "UPDATE items SET {} WHERE id = ?{} AND user_id = ?{}",
                    sets.join(", "),
                    n - 1,
                    n
                ),
                params_from_iter(values),
            )?;
            if patch.title.is_some() || patch.content.is_some() {
                sync_fts(&tx, item_id, user_id);
            }
        }

        let item = get_item_on(&tx, item_id, user_id)?;
        tx.commit()?;
        Ok(item)
    }

    /// Complete an item. The next occurrence is materialised only on the
    /// !done → done transition; completing an already-done item is a no-op.
    pub fn complete_item(&self, item_id: i64, user_id: i64) -> EngineResult<Option<(Item, Option<Item>)>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let Some(item) = get_item_on(&tx, item_id, user_id)? else {
            return Ok(None);
        };
        if item.status == ItemStatus::Done {
            return Ok(Some((item, None)));
        }

        let now = Utc::now();
        tx.execute(
            "UPDATE items SET status = 'done', completed_at = ?1, updated_at = ?1
             WHERE id = ?2 AND user_id = ?3",
            params![ts(now), item_id, user_id],
        )?;

        let mut next_item = None;
        if let (Some(rule), Some(due)) = (&item.recurrence, item.due_at) {
            if let Some(next_due) = next_occurrence(due, rule) {
                let next = NewItem {
                    item_type: item.item_type,
                    status: ItemStatus::Inbox,
                    source: item.source,
                    title: item.title.clone(),
                    content: item.content.clone(),
                    original_input: None,
                    due_at: Some(next_due),
                    due_at_raw: item.due_at_raw.clone(),
                    remind_at: Some(next_due),
                    priority: item.priority,
                    project_id: item.project_id,
                    tags: item.tags.clone(),
                    entities: serde_json::Value::Null,
                    recurrence: item.recurrence.clone(),
                    attachment: None,
                };
                let next_id = insert_item(&tx, user_id, &next, now)?;
                next_item = get_item_on(&tx, next_id, user_id)?;
            }
        }

        let completed = get_item_on(&tx, item_id, user_id)?;
        tx.commit()?;
        Ok(completed.map(|c| (c, next_item)))
    }

    pub fn delete_item(&self, item_id: i64, user_id: i64) -> EngineResult<bool> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "DELETE FROM items WHERE id = ?1 AND user_id = ?2",
            params![item_id, user_id],
        )?;
        if n > 0 {
            conn.execute("DELETE FROM items_fts WHERE item_id = ?1", params![item_id]).ok();
        }
        Ok(n > 0)
    }

    /// Batch update by explicit id set, in one transaction and one UPDATE.
    /// Returns the number of rows written.
    pub fn batch_update(&self, item_ids: &[i64], user_id: i64, patch: &ItemPatch) -> EngineResult<usize> {
        if item_ids.is_empty() || patch.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = ts(Utc::now());

        let mut sets: Vec<String> = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();
        let set = |sets: &mut Vec<String>, values: &mut Vec<SqlValue>, col: &str, v: SqlValue| {
            values.push(v);
            sets.push(format!("{col} = ?{}", values.len()));
        };
        if let Some(t) = patch.item_type {
            set(&mut sets, &mut values, "type", SqlValue::from(t.as_str().to_string()));
        }
        if let Some(s) = patch.status {
            set(&mut sets, &mut values, "status", SqlValue::from(s.as_str().to_string()));
        }
        if let Some(due) = patch.due_at {
            set(&mut sets, &mut values, "due_at", opt_text::<String>(due.map(ts)));
        }
        if let Some(raw) = &patch.due_at_raw {
            set(&mut sets, &mut values, "due_at_raw", opt_text::<String>(raw.clone()));
        }
        if let Some(remind) = patch.remind_at {
            set(&mut sets, &mut values, "remind_at", opt_text::<String>(remind.map(ts)));
        }
        if let Some(p) = patch.priority {
            set(&mut sets, &mut values, "priority", opt_text::<String>(p.map(|p| p.as_str().to_string())));
        }
        if let Some(proj) = patch.project_id {
            set(&mut sets, &mut values, "project_id", proj.map(SqlValue::Integer).unwrap_or(SqlValue::Null));
        }
        if let Some(tags) = &patch.tags {
            set(&mut sets, &mut values, "tags", SqlValue::from(serde_json::to_string(&dedup_tags(tags))?));
        }
        if sets.is_empty() {
            return Ok(0);
        }
        set(&mut sets, &mut values, "updated_at", SqlValue::from(now.clone()));

        values.push(SqlValue::Integer(user_id));
        let user_pos = values.len();
        let placeholders: Vec<String> =
            (0..item_ids.len()).map(|i| format!("?{}", user_pos + 1 + i)).collect();
        values.extend(item_ids.iter().map(|id| SqlValue::Integer(*id)));

        let n = tx.execute(
            &format!(
                "UPDATE items SET {} WHERE user_id = ?{} AND id IN ({})",
                sets.join(", "),
                user_pos,
                placeholders.join(",")
            ),
            params_from_iter(values),
        )?;

        // Keep the done ⇒ completed_at invariant across batch writes.
        match patch.status {
            Some(ItemStatus::Done) => {
                let mut stamp: Vec<SqlValue> = vec![SqlValue::from(now), SqlValue::Integer(user_id)];
                stamp.extend(item_ids.iter().map(|id| SqlValue::Integer(*id)));
                let in_list: Vec<String> = (0..item_ids.len()).map(|i| format!("?{}", 3 + i)).collect();
                tx.execute(
                    &format!(
                        "UPDATE items SET completed_at = ?1
                         WHERE user_id = ?2 AND completed_at IS NULL AND id IN ({})",
                        in_list.join(",")
                    ),
                    params_from_iter(stamp),
                )?;
            }
            Some(_) => {
                let mut clear: Vec<SqlValue> = vec![SqlValue::Integer(user_id)];
                clear.extend(item_ids.iter().map(|id| SqlValue::Integer(*id)));
                let in_list: Vec<String> = (0..item_ids.len()).map(|i| format!("?{}", 2 + i)).collect();
                tx.execute(
                    &format!(
                        "UPDATE items SET completed_at = NULL WHERE user_id = ?1 AND id IN ({})",
                        in_list.join(",")
                    ),
                    params_from_iter(clear),
                )?;
            }
            None => {}
        }

        tx.commit()?;
        Ok(n)
    }

    pub fn batch_delete(&self, item_ids: &[i64], user_id: i64) -> EngineResult<usize> {
        if item_ids.is_empty() {
            return Ok(0);
        }
        let conn = self.conn.lock();
        let placeholders = vec!["?"; item_ids.len()].join(",");
        let mut values: Vec<SqlValue> = vec![SqlValue::Integer(user_id)];
        values.extend(item_ids.iter().map(|id| SqlValue::Integer(*id)));
        let n = conn.execute(
            &format!("DELETE FROM items WHERE user_id = ? AND id IN ({placeholders})"),
            params_from_iter(values),
        )?;
        for id in item_ids {
            conn.execute("DELETE FROM items_fts WHERE item_id = ?1", params![id]).ok();
        }
        Ok(n)
    }

    /// Paginated listing with optional type/status/project filters.
    pub fn list_items(
        &self,
        user_id: i64,
        types: &[ItemType],
        statuses: &[ItemStatus],
        project_id: Option<i64>,
        limit: usize,
        offset: usize,
    ) -> EngineResult<(Vec<Item>, i64)> {
        let conn = self.conn.lock();

        let mut wheres = vec!["user_id = ?".to_string()];
        let mut values: Vec<SqlValue> = vec![SqlValue::Integer(user_id)];
        if !types.is_empty() {
            wheres.push(format!("type IN ({})", vec!["?"; types.len()].join(",")));
            values.extend(types.iter().map(|t| SqlValue::from(t.as_str().to_string())));
        }
        if !statuses.is_empty() {
            wheres.push(format!("status IN ({})", vec!["?"; statuses.len()].join(",")));
            values.extend(statuses.iter().map(|s| SqlValue::from(s.as_str().to_string())));
        }
        if let Some(p) = project_id {
            wheres.push("project_id = ?".into());
            values.push(SqlValue::Integer(p));
        }
        let where_clause = wheres.join(" AND ");

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM items WHERE {where_clause}"),
            params_from_iter(values.clone()),
            |r| r.get(0),
        )?;

        values.push(SqlValue::Integer(limit as i64));
        values.push(SqlValue::Integer(offset as i64));
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM items WHERE {where_clause} ORDER BY created_at DESC LIMIT ? OFFSET ?",
            item_columns("")
        ))?;
        let items = stmt
            .query_map(params_from_iter(values), row_to_item)?
            .filter_map(|r| r.ok())
            .collect();
        Ok((items, total))
    }

    /// Multi-criteria filter used by the batch tools and the agent.
    /// Tag filtering requires items to carry ALL listed tags.
    pub fn search_advanced(&self, user_id: i64, filter: &SearchFilter) -> EngineResult<Vec<Item>> {
        let conn = self.conn.lock();

        let mut wheres = vec!["user_id = ?".to_string()];
        let mut values: Vec<SqlValue> = vec![SqlValue::Integer(user_id)];
        if let Some(t) = filter.item_type {
            wheres.push("type = ?".into());
            values.push(SqlValue::from(t.as_str().to_string()));
        }
        if let Some(s) = filter.status {
            wheres.push("status = ?".into());
            values.push(SqlValue::from(s.as_str().to_string()));
        }
        if let Some(p) = filter.project_id {
            wheres.push("project_id = ?".into());
            values.push(SqlValue::Integer(p));
        }
        if let Some(p) = filter.priority {
            wheres.push("priority = ?".into());
            values.push(SqlValue::from(p.as_str().to_string()));
        }
        if filter.date_from.is_some() || filter.date_to.is_some() {
            let column = match filter.date_field.unwrap_or(DateField::CreatedAt) {
                DateField::DueAt => "due_at",
                DateField::CreatedAt => "created_at",
            };
            if let Some(from) = filter.date_from {
                wheres.push(format!("{column} >= ?"));
                values.push(SqlValue::from(ts(from)));
            }
            if let Some(to) = filter.date_to {
                wheres.push(format!("{column} <= ?"));
                values.push(SqlValue::from(ts(to)));
            }
        }
        for tag in &filter.tags {
            wheres.push("EXISTS (SELECT 1 FROM json_each(items.tags) WHERE json_each.value = ?)".into());
            values.push(SqlValue::from(tag.clone()));
        }
        if let Some(q) = filter.query.as_deref().filter(|q| !q.trim().is_empty()) {
            let pattern = format!("%{}%", q.to_lowercase());
            wheres.push("(LOWER(COALESCE(title,'')) LIKE ? OR LOWER(COALESCE(content,'')) LIKE ? OR LOWER(COALESCE(original_input,'')) LIKE ?)".into());
            values.push(SqlValue::from(pattern.clone()));
            values.push(SqlValue::from(pattern.clone()));
            values.push(SqlValue::from(pattern));
        }

        values.push(SqlValue::Integer(filter.limit as i64));
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM items WHERE {} ORDER BY created_at DESC LIMIT ?",
            item_columns(""),
            wheres.join(" AND ")
        ))?;
        let items = stmt
            .query_map(params_from_iter(values), row_to_item)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(items)
    }

    /// Tasks with optional due range, due_at ascending, nulls last.
    pub fn get_tasks_with_due_dates(
        &self,
        user_id: i64,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> EngineResult<Vec<Item>> {
        let conn = self.conn.lock();
        let mut wheres = vec!["user_id = ?".to_string(), "type = 'task'".to_string()];
        let mut values: Vec<SqlValue> = vec![SqlValue::Integer(user_id)];
        if let Some(f) = from {
            wheres.push("due_at >= ?".into());
            values.push(SqlValue::from(ts(f)));
        }
        if let Some(t) = to {
            wheres.push("due_at <= ?".into());
            values.push(SqlValue::from(ts(t)));
        }
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM items WHERE {} ORDER BY due_at IS NULL, due_at ASC",
            item_columns(""),
            wheres.join(" AND ")
        ))?;
        let items = stmt
            .query_map(params_from_iter(values), row_to_item)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(items)
    }

    /// All tasks of a user, for the grouped Tasks view.
    pub fn get_all_tasks(&self, user_id: i64) -> EngineResult<Vec<Item>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM items WHERE user_id = ?1 AND type = 'task'
             ORDER BY due_at IS NULL, due_at ASC, created_at DESC",
            item_columns("")
        ))?;
        let items = stmt
            .query_map(params![user_id], row_to_item)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(items)
    }

    /// Most recent items, newest first. Used for agent context.
    pub fn get_recent_items(&self, user_id: i64, limit: usize) -> EngineResult<Vec<Item>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM items WHERE user_id = ?1 ORDER BY created_at DESC LIMIT ?2",
            item_columns("")
        ))?;
        let items = stmt
            .query_map(params![user_id, limit as i64], row_to_item)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(items)
    }

    // ── Reminders ──────────────────────────────────────────────────────────

    /// Items due for a reminder in [from, to], paired with their owners.
    /// `remind_at` wins when present; `due_at` is the fallback.
    pub fn find_due_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> EngineResult<Vec<(Item, User)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {}, {} FROM items i
             JOIN users u ON u.user_id = i.user_id
             WHERE i.status IN ('inbox', 'active')
               AND (
                     (i.remind_at IS NOT NULL AND i.remind_at >= ?1 AND i.remind_at <= ?2)
                  OR (i.remind_at IS NULL AND i.due_at IS NOT NULL AND i.due_at >= ?1 AND i.due_at <= ?2)
               )",
            item_columns("i"),
            USER_COLUMNS
                .split(", ")
                .map(|c| format!("u.{c}"))
                .collect::<Vec<_>>()
                .join(", ")
        ))?;
        let pairs = stmt
            .query_map(params![ts(from), ts(to)], |row| {
                let item = row_to_item(row)?;
                let settings: String = row.get(26)?;
                let created: String = row.get(28)?;
                let user = User {
                    user_id: row.get(23)?,
                    timezone: row.get(24)?,
                    language: row.get(25)?,
                    settings: serde_json::from_str(&settings).unwrap_or(serde_json::Value::Null),
                    onboarding_done: row.get::<_, i64>(27)? != 0,
                    created_at: parse_ts(&created).unwrap_or_else(Utc::now),
                };
                Ok((item, user))
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(pairs)
    }

    /// Scheduler-only write: park `remind_at` on the sentinel so the item is
    /// not selected again until something explicitly re-arms it.
    pub fn mark_reminded(&self, item_id: i64, sentinel: DateTime<Utc>) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE items SET remind_at = ?1 WHERE id = ?2",
            params![ts(sentinel), item_id],
        )?;
        Ok(())
    }

    // ── Embeddings ─────────────────────────────────────────────────────────

    pub fn set_embedding(&self, item_id: i64, user_id: i64, embedding: &[f32]) -> EngineResult<()> {
        if embedding.len() != EMBEDDING_DIM {
            return Err(EngineError::Validation(format!(
                "embedding must have {} dimensions, got {}",
                EMBEDDING_DIM,
                embedding.len()
            )));
        }
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE items SET embedding = ?1 WHERE id = ?2 AND user_id = ?3",
            params![f32_vec_to_bytes(embedding), item_id, user_id],
        )?;
        Ok(())
    }

    /// Whether the user has any embedded items at all. Lets callers skip
    /// the query-embedding round-trip on an empty vector corpus.
    pub fn user_has_embeddings(&self, user_id: i64) -> EngineResult<bool> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM items WHERE user_id = ?1 AND embedding IS NOT NULL",
            params![user_id],
            |r| r.get(0),
        )?;
        Ok(n > 0)
    }

    pub fn get_embedding(&self, item_id: i64, user_id: i64) -> EngineResult<Option<Vec<f32>>> {
        let conn = self.conn.lock();
        let blob: Option<Vec<u8>> = conn
            .query_row(
                "SELECT embedding FROM items WHERE id = ?1 AND user_id = ?2",
                params![item_id, user_id],
                |r| r.get(0),
            )
            .optional()?
            .flatten();
        Ok(blob.map(|b| bytes_to_f32_vec(&b)))
    }

    // ── Search primitives (fused by engine::search) ────────────────────────

    /// Weighted BM25 candidates: (item_id, raw score), best first. Column
    /// weights rank title above content above original_input.
    pub fn fts_candidates(
        &self,
        user_id: i64,
        query: &str,
        type_filter: Option<ItemType>,
        status_filter: Option<ItemStatus>,
        limit: usize,
    ) -> EngineResult<Vec<(i64, f64)>> {
        let conn = self.conn.lock();

        // Each whitespace token is quoted so punctuation cannot break the
        // MATCH grammar, then OR-joined.
        let fts_query = query
            .split_whitespace()
            .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(" OR ");
        if fts_query.is_empty() {
            return Ok(Vec::new());
        }

        let mut wheres = vec!["items_fts MATCH ?".to_string(), "i.user_id = ?".to_string()];
        let mut values: Vec<SqlValue> = vec![SqlValue::from(fts_query), SqlValue::Integer(user_id)];
        if let Some(t) = type_filter {
            wheres.push("i.type = ?".into());
            values.push(SqlValue::from(t.as_str().to_string()));
        }
        if let Some(s) = status_filter {
            wheres.push("i.status = ?".into());
            values.push(SqlValue::from(s.as_str().to_string()));
        }
        values.push(SqlValue::Integer(limit as i64));

        let mut stmt = conn.prepare(&format!(
            "SELECT items_fts.item_id, bm25(items_fts, 0.0, 0.0, 4.0, 2.0, 1.0) AS score
             FROM items_fts
             JOIN items i ON i.id = items_fts.item_id
             WHERE {}
             ORDER BY score
             LIMIT ?",
            wheres.join(" AND ")
        ))?;
        let rows = stmt
            .query_map(params_from_iter(values), |row| {
                let id: i64 = row.get(0)?;
                let rank: f64 = row.get(1)?;
                // FTS5 rank is negative (lower = better); negate for a
                // positive higher-is-better score.
                Ok((id, -rank))
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Cosine-similarity candidates against `query_vec`, best first.
    pub fn vector_candidates(
        &self,
        user_id: i64,
        query_vec: &[f32],
        type_filter: Option<ItemType>,
        status_filter: Option<ItemStatus>,
        limit: usize,
    ) -> EngineResult<Vec<(i64, f64)>> {
        let conn = self.conn.lock();
        let mut wheres = vec!["user_id = ?".to_string(), "embedding IS NOT NULL".to_string()];
        let mut values: Vec<SqlValue> = vec![SqlValue::Integer(user_id)];
        if let Some(t) = type_filter {
            wheres.push("type = ?".into());
            values.push(SqlValue::from(t.as_str().to_string()));
        }
        if let Some(s) = status_filter {
            wheres.push("status = ?".into());
            values.push(SqlValue::from(s.as_str().to_string()));
        }

        let mut stmt = conn.prepare(&format!(
            "SELECT id, embedding FROM items WHERE {}",
            wheres.join(" AND ")
        ))?;
        let mut scored: Vec<(i64, f64)> = stmt
            .query_map(params_from_iter(values), |row| {
                let id: i64 = row.get(0)?;
                let blob: Vec<u8> = row.get(1)?;
                Ok((id, blob))
            })?
            .filter_map(|r| r.ok())
            .map(|(id, blob)| (id, cosine_similarity(query_vec, &bytes_to_f32_vec(&blob))))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    /// Substring fallback for short queries FTS may miss. Title matches
    /// first, then newest.
    pub fn like_search(
        &self,
        user_id: i64,
        query: &str,
        type_filter: Option<ItemType>,
        status_filter: Option<ItemStatus>,
        limit: usize,
    ) -> EngineResult<Vec<Item>> {
        let conn = self.conn.lock();
        let pattern = format!("%{}%", query.to_lowercase());
        let mut wheres = vec![
            "user_id = ?".to_string(),
            "(LOWER(COALESCE(title,'')) LIKE ? OR LOWER(COALESCE(content,'')) LIKE ? OR LOWER(COALESCE(original_input,'')) LIKE ?)".to_string(),
        ];
        let mut values: Vec<SqlValue> = vec![
            SqlValue::Integer(user_id),
            SqlValue::from(pattern.clone()),
            SqlValue::from(pattern.clone()),
            SqlValue::from(pattern.clone()),
        ];
        if let Some(t) = type_filter {
            wheres.push("type = ?".into());
            values.push(SqlValue::from(t.as_str().to_string()));
        }
        if let Some(s) = status_filter {
            wheres.push("status = ?".into());
            values.push(SqlValue::from(s.as_str().to_string()));
        }
        values.push(SqlValue::from(pattern));
        values.push(SqlValue::Integer(limit as i64));

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM items WHERE {}
             ORDER BY CASE WHEN LOWER(COALESCE(title,'')) LIKE ? THEN 0 ELSE 1 END, created_at DESC
             LIMIT ?",
            item_columns(""),
            wheres.join(" AND ")
        ))?;
        let items = stmt
            .query_map(params_from_iter(values), row_to_item)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(items)
    }
}

fn opt_text<T: Into<String>>(v: impl Into<Option<T>>) -> SqlValue {
    match v.into() {
        Some(s) => SqlValue::from(s.into()),
        None => SqlValue::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::{RecurrenceKind, RecurrenceRule};
    use chrono::TimeZone;

    fn store() -> Store {
        let s = Store::open_in_memory().unwrap();
        s.get_or_create_user(1).unwrap();
        s
    }

    fn task_with_due(s: &Store, title: &str, due: Option<DateTime<Utc>>) -> Item {
        s.create_item(
            1,
            &NewItem {
                item_type: ItemType::Task,
                title: Some(title.into()),
                due_at: due,
                remind_at: due,
                ..NewItem::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn create_then_get_round_trips() {
        let s = store();
        let due = Utc.with_ymd_and_hms(2025, 11, 15, 13, 0, 0).unwrap();
        let created = s
            .create_item(
                1,
                &NewItem {
                    item_type: ItemType::Task,
                    status: ItemStatus::Inbox,
                    source: Some(ItemSource::Text),
                    title: Some("Купить молоко".into()),
                    content: Some("Купить молоко завтра".into()),
                    original_input: Some("Купить молоко завтра".into()),
                    due_at: Some(due),
                    due_at_raw: Some("завтра".into()),
                    remind_at: Some(due),
                    priority: Some(Priority::Medium),
                    tags: vec!["быт".into(), "быт".into(), "покупки".into()],
                    attachment: Some(Attachment {
                        file_id: "file123".into(),
                        kind: "photo".into(),
                        filename: None,
                    }),
                    ..NewItem::default()
                },
            )
            .unwrap();

        let fetched = s.get_item(created.id, 1).unwrap().unwrap();
        assert_eq!(fetched.title.as_deref(), Some("Купить молоко"));
        assert_eq!(fetched.due_at, Some(due));
        assert_eq!(fetched.remind_at, Some(due));
        assert_eq!(fetched.priority, Some(Priority::Medium));
        // Duplicate tags are dropped, order kept.
        assert_eq!(fetched.tags, vec!["быт", "покупки"]);
        assert_eq!(fetched.attachment, created.attachment);
        assert_eq!(fetched.created_at, created.created_at);
        assert!(!fetched.has_embedding);
        assert!(fetched.completed_at.is_none());
    }

    #[test]
    fn update_never_touches_original_input() {
        let s = store();
        let item = s
            .create_item(
                1,
                &NewItem {
                    original_input: Some("дословный ввод".into()),
                    title: Some("до".into()),
                    ..NewItem::default()
                },
            )
            .unwrap();

        let patch = ItemPatch {
            title: Some("после".into()),
            content: Some(Some("новый текст".into())),
            ..ItemPatch::default()
        };
        let updated = s.update_item(item.id, 1, &patch).unwrap().unwrap();
        assert_eq!(updated.title.as_deref(), Some("после"));
        assert_eq!(updated.original_input.as_deref(), Some("дословный ввод"));
        assert!(updated.updated_at >= item.updated_at);
    }

    #[test]
    fn done_transition_stamps_completed_at_once() {
        let s = store();
        let item = task_with_due(&s, "отчёт", None);

        let patch = ItemPatch { status: Some(ItemStatus::Done), ..ItemPatch::default() };
        let done = s.update_item(item.id, 1, &patch).unwrap().unwrap();
        let stamp = done.completed_at.unwrap();
        assert!(stamp <= Utc::now());

        // Re-asserting done keeps the original stamp.
        let again = s.update_item(item.id, 1, &patch).unwrap().unwrap();
        assert_eq!(again.completed_at, Some(stamp));

        // Leaving done clears it.
        let reopened = s
            .update_item(item.id, 1, &ItemPatch { status: Some(ItemStatus::Active), ..ItemPatch::default() })
            .unwrap()
            .unwrap();
        assert!(reopened.completed_at.is_none());
    }

    #[test]
    fn complete_recurring_materialises_next_occurrence() {
        let s = store();
        let due = Utc.with_ymd_and_hms(2025, 11, 14, 9, 0, 0).unwrap();
        let project = s.create_project(1, "Дом", None, None).unwrap();
        let item = s
            .create_item(
                1,
                &NewItem {
                    item_type: ItemType::Task,
                    title: Some("Полить цветы".into()),
                    due_at: Some(due),
                    due_at_raw: Some("каждые два дня".into()),
                    remind_at: Some(due),
                    project_id: Some(project.id),
                    tags: vec!["дом".into()],
                    recurrence: Some(RecurrenceRule {
                        kind: RecurrenceKind::Daily,
                        interval: 2,
                        days: vec![],
                        end_date: None,
                    }),
                    ..NewItem::default()
                },
            )
            .unwrap();

        let (done, next) = s.complete_item(item.id, 1).unwrap().unwrap();
        assert_eq!(done.status, ItemStatus::Done);
        assert!(done.completed_at.is_some());

        let next = next.unwrap();
        assert_ne!(next.id, done.id);
        assert_eq!(next.due_at, Some(Utc.with_ymd_and_hms(2025, 11, 16, 9, 0, 0).unwrap()));
        assert_eq!(next.remind_at, next.due_at);
        assert_eq!(next.status, ItemStatus::Inbox);
        assert_eq!(next.title, done.title);
        assert_eq!(next.tags, done.tags);
        assert_eq!(next.project_id, Some(project.id));
        assert_eq!(next.recurrence, done.recurrence);
        assert!(next.completed_at.is_none());
        assert!(!next.has_embedding);
        // Verbatim input is not inherited.
        assert!(next.original_input.is_none());
    }

    #[test]
    fn completing_a_done_item_is_a_no_op() {
        let s = store();
        let due = Utc.with_ymd_and_hms(2025, 11, 14, 9, 0, 0).unwrap();
        let item = s
            .create_item(
                1,
                &NewItem {
                    item_type: ItemType::Task,
                    due_at: Some(due),
                    recurrence: Some(RecurrenceRule {
                        kind: RecurrenceKind::Daily,
                        interval: 1,
                        days: vec![],
                        end_date: None,
                    }),
                    ..NewItem::default()
                },
            )
            .unwrap();

        let (first, next) = s.complete_item(item.id, 1).unwrap().unwrap();
        assert!(next.is_some());
        let stamp = first.completed_at;

        // Second completion: same item back, no extra occurrence.
        let (second, next_again) = s.complete_item(item.id, 1).unwrap().unwrap();
        assert_eq!(second.completed_at, stamp);
        assert!(next_again.is_none());
        // Only the original plus one materialised occurrence exist.
        assert_eq!(s.list_items(1, &[], &[], None, 50, 0).unwrap().1, 2);
    }

    #[test]
    fn complete_missing_item_is_none() {
        let s = store();
        assert!(s.complete_item(9999, 1).unwrap().is_none());
    }

    #[test]
    fn batch_ops_respect_empty_input_and_user_scope() {
        let s = store();
        s.get_or_create_user(2).unwrap();
        let mine = task_with_due(&s, "моя", None);
        let theirs = s
            .create_item(2, &NewItem { item_type: ItemType::Task, ..NewItem::default() })
            .unwrap();

        assert_eq!(s.batch_update(&[], 1, &ItemPatch::default()).unwrap(), 0);
        assert_eq!(s.batch_delete(&[], 1).unwrap(), 0);

        // Foreign ids silently do not count.
        let patch = ItemPatch { status: Some(ItemStatus::Archived), ..ItemPatch::default() };
        assert_eq!(s.batch_update(&[mine.id, theirs.id], 1, &patch).unwrap(), 1);
        assert_eq!(s.get_item(theirs.id, 2).unwrap().unwrap().status, ItemStatus::Inbox);

        assert_eq!(s.batch_delete(&[mine.id, theirs.id], 1).unwrap(), 1);
        assert!(s.get_item(theirs.id, 2).unwrap().is_some());
    }

    #[test]
    fn list_items_paginates_with_total() {
        let s = store();
        for i in 0..7 {
            task_with_due(&s, &format!("t{i}"), None);
        }
        let (page, total) = s.list_items(1, &[ItemType::Task], &[], None, 3, 3).unwrap();
        assert_eq!(total, 7);
        assert_eq!(page.len(), 3);
    }

    #[test]
    fn search_advanced_filters_compose() {
        let s = store();
        let project = s.create_project(1, "Работа", None, None).unwrap();
        s.create_item(
            1,
            &NewItem {
                item_type: ItemType::Task,
                status: ItemStatus::Active,
                title: Some("подготовить отчёт".into()),
                priority: Some(Priority::High),
                project_id: Some(project.id),
                tags: vec!["работа".into(), "срочно".into()],
                ..NewItem::default()
            },
        )
        .unwrap();
        s.create_item(
            1,
            &NewItem {
                item_type: ItemType::Task,
                status: ItemStatus::Active,
                title: Some("подготовить слайды".into()),
                tags: vec!["работа".into()],
                ..NewItem::default()
            },
        )
        .unwrap();

        // Tag containment means ALL listed tags.
        let both_tags = s
            .search_advanced(
                1,
                &SearchFilter { tags: vec!["работа".into(), "срочно".into()], ..SearchFilter::default() },
            )
            .unwrap();
        assert_eq!(both_tags.len(), 1);
        assert_eq!(both_tags[0].priority, Some(Priority::High));

        let by_query = s
            .search_advanced(
                1,
                &SearchFilter { query: Some("слайды".into()), ..SearchFilter::default() },
            )
            .unwrap();
        assert_eq!(by_query.len(), 1);

        let by_project = s
            .search_advanced(
                1,
                &SearchFilter { project_id: Some(project.id), ..SearchFilter::default() },
            )
            .unwrap();
        assert_eq!(by_project.len(), 1);
    }

    #[test]
    fn tasks_with_due_dates_sort_nulls_last() {
        let s = store();
        let later = Utc.with_ymd_and_hms(2025, 12, 1, 9, 0, 0).unwrap();
        let sooner = Utc.with_ymd_and_hms(2025, 11, 20, 9, 0, 0).unwrap();
        task_with_due(&s, "later", Some(later));
        task_with_due(&s, "none", None);
        task_with_due(&s, "sooner", Some(sooner));

        let tasks = s.get_tasks_with_due_dates(1, None, None).unwrap();
        let titles: Vec<_> = tasks.iter().map(|t| t.title.clone().unwrap()).collect();
        assert_eq!(titles, vec!["sooner", "later", "none"]);
    }

    #[test]
    fn embedding_dimension_is_enforced() {
        let s = store();
        let item = task_with_due(&s, "x", None);
        assert!(matches!(
            s.set_embedding(item.id, 1, &[0.5f32; 3]),
            Err(EngineError::Validation(_))
        ));
        s.set_embedding(item.id, 1, &vec![0.5f32; crate::atoms::constants::EMBEDDING_DIM]).unwrap();
        assert!(s.get_item(item.id, 1).unwrap().unwrap().has_embedding);
        assert_eq!(
            s.get_embedding(item.id, 1).unwrap().unwrap().len(),
            crate::atoms::constants::EMBEDDING_DIM
        );
    }

    #[test]
    fn due_window_prefers_remind_at_over_due_at() {
        let s = store();
        let now = Utc::now();
        // remind_at far in the past (sentinel) keeps the item out even
        // though due_at is inside the window.
        s.create_item(
            1,
            &NewItem {
                item_type: ItemType::Task,
                due_at: Some(now),
                remind_at: Some(now - chrono::Duration::days(1)),
                ..NewItem::default()
            },
        )
        .unwrap();
        let hits = s
            .find_due_window(now - chrono::Duration::minutes(5), now + chrono::Duration::minutes(1))
            .unwrap();
        assert!(hits.is_empty());
    }
}
