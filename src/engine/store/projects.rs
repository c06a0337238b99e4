// ── Store: Projects ────────────────────────────────────────────────────────
// Project names are unique per user (1–100 chars). Deleting a project first
// nulls the project reference on all of its items; move_items re-homes them.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::{parse_ts, ts, Store};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::Project;

const PROJECT_COLUMNS: &str = "id, user_id, name, color, emoji, created_at";

fn row_to_project(row: &Row<'_>) -> rusqlite::Result<Project> {
    let created_at: String = row.get(5)?;
    Ok(Project {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        color: row.get(3)?,
        emoji: row.get(4)?,
        created_at: parse_ts(&created_at).unwrap_or_else(Utc::now),
    })
}

fn validate_name(name: &str) -> EngineResult<()> {
    let len = name.chars().count();
    if len == 0 || len > 100 {
        return Err(EngineError::Validation(
            "project name must be 1-100 characters".into(),
        ));
    }
    Ok(())
}

impl Store {
    pub fn create_project(
        &self,
        user_id: i64,
        name: &str,
        color: Option<&str>,
        emoji: Option<&str>,
    ) -> EngineResult<Project> {
        validate_name(name)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO projects (user_id, name, color, emoji, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user_id, name, color, emoji, ts(Utc::now())],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                EngineError::Validation(format!("project '{name}' already exists"))
            }
            other => other.into(),
        })?;
        let id = conn.last_insert_rowid();
        let project = conn.query_row(
            &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1"),
            params![id],
            row_to_project,
        )?;
        Ok(project)
    }

    pub fn get_project(&self, project_id: i64, user_id: i64) -> EngineResult<Option<Project>> {
        let conn = self.conn.lock();
        let project = conn
            .query_row(
                &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1 AND user_id = ?2"),
                params![project_id, user_id],
                row_to_project,
            )
            .optional()?;
        Ok(project)
    }

    pub fn get_project_by_name(&self, name: &str, user_id: i64) -> EngineResult<Option<Project>> {
        let conn = self.conn.lock();
        let project = conn
            .query_row(
                &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE name = ?1 AND user_id = ?2"),
                params![name, user_id],
                row_to_project,
            )
            .optional()?;
        Ok(project)
    }

    pub fn list_projects(&self, user_id: i64) -> EngineResult<Vec<Project>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE user_id = ?1 ORDER BY name"
        ))?;
        let projects = stmt
            .query_map(params![user_id], row_to_project)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(projects)
    }

    pub fn update_project(
        &self,
        project_id: i64,
        user_id: i64,
        name: Option<&str>,
        color: Option<&str>,
        emoji: Option<&str>,
    ) -> EngineResult<Option<Project>> {
        if let Some(n) = name {
            validate_name(n)?;
        }
        {
            let conn = self.conn.lock();
            if let Some(n) = name {
                conn.execute(
                    "UPDATE projects SET name = ?1 WHERE id = ?2 AND user_id = ?3",
                    params![n, project_id, user_id],
                )?;
            }
            if let Some(c) = color {
                conn.execute(
                    "UPDATE projects SET color = ?1 WHERE id = ?2 AND user_id = ?3",
                    params![c, project_id, user_id],
                )?;
            }
            if let Some(e) = emoji {
                conn.execute(
                    "UPDATE projects SET emoji = ?1 WHERE id = ?2 AND user_id = ?3",
                    params![e, project_id, user_id],
                )?;
            }
        }
        self.get_project(project_id, user_id)
    }

    /// Delete a project. Referring items survive with project = null.
    pub fn delete_project(&self, project_id: i64, user_id: i64) -> EngineResult<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE items SET project_id = NULL WHERE project_id = ?1 AND user_id = ?2",
            params![project_id, user_id],
        )?;
        let n = tx.execute(
            "DELETE FROM projects WHERE id = ?1 AND user_id = ?2",
            params![project_id, user_id],
        )?;
        tx.commit()?;
        Ok(n > 0)
    }

    pub fn project_items_count(&self, project_id: i64, user_id: i64) -> EngineResult<i64> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM items WHERE project_id = ?1 AND user_id = ?2",
            params![project_id, user_id],
            |r| r.get(0),
        )?;
        Ok(n)
    }

    /// Move every item of one project to another (or to no project).
    /// Returns the number of items moved.
    pub fn move_project_items(
        &self,
        source_project_id: i64,
        target_project_id: Option<i64>,
        user_id: i64,
    ) -> EngineResult<usize> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE items SET project_id = ?1 WHERE project_id = ?2 AND user_id = ?3",
            params![target_project_id, source_project_id, user_id],
        )?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::NewItem;

    fn store_with_user() -> Store {
        let store = Store::open_in_memory().unwrap();
        store.get_or_create_user(1).unwrap();
        store
    }

    #[test]
    fn duplicate_name_is_rejected_per_user() {
        let store = store_with_user();
        store.get_or_create_user(2).unwrap();
        store.create_project(1, "Работа", None, None).unwrap();
        assert!(matches!(
            store.create_project(1, "Работа", None, None),
            Err(EngineError::Validation(_))
        ));
        // A different user may reuse the name.
        store.create_project(2, "Работа", None, None).unwrap();
    }

    #[test]
    fn name_length_is_validated() {
        let store = store_with_user();
        assert!(store.create_project(1, "", None, None).is_err());
        let long = "x".repeat(101);
        assert!(store.create_project(1, &long, None, None).is_err());
    }

    #[test]
    fn delete_nulls_item_references() {
        let store = store_with_user();
        let project = store.create_project(1, "Ремонт", None, Some("🔨")).unwrap();
        let item = store
            .create_item(
                1,
                &NewItem { project_id: Some(project.id), ..NewItem::default() },
            )
            .unwrap();

        assert!(store.delete_project(project.id, 1).unwrap());
        let survived = store.get_item(item.id, 1).unwrap().unwrap();
        assert_eq!(survived.project_id, None);
    }

    #[test]
    fn move_items_rehomes_everything() {
        let store = store_with_user();
        let a = store.create_project(1, "A", None, None).unwrap();
        let b = store.create_project(1, "B", None, None).unwrap();
        for _ in 0..3 {
            store
                .create_item(1, &NewItem { project_id: Some(a.id), ..NewItem::default() })
                .unwrap();
        }
        let moved = store.move_project_items(a.id, Some(b.id), 1).unwrap();
        assert_eq!(moved, 3);
        assert_eq!(store.project_items_count(b.id, 1).unwrap(), 3);
        assert_eq!(store.project_items_count(a.id, 1).unwrap(), 0);
    }
}
