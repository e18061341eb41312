use crate::errors::{AppError, AppResult};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SCHEMA_SQL: &str = include_str!("schema.sql");

pub const BOOKMARKS_KEY: &str = "leadBookmarks";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetRow {
    pub row_num: i64,
    pub lead_id: String,
    pub values: BTreeMap<String, String>,
}

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    pub fn get_preference(&self, key: &str) -> AppResult<Option<serde_json::Value>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT value_json FROM preferences WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        Ok(raw.and_then(|raw| serde_json::from_str(&raw).ok()))
    }

    pub fn set_preference(&self, key: &str, value: &serde_json::Value) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO preferences (key, value_json, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![key, serde_json::to_string(value)?, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Bookmarked lead ids. A missing or unreadable entry reads as empty.
    pub fn bookmarks(&self) -> AppResult<BTreeSet<String>> {
        Ok(self
            .get_preference(BOOKMARKS_KEY)?
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default())
    }

    /// Flips the bookmark for `lead_id` and returns whether it is now set.
    pub fn toggle_bookmark(&self, lead_id: &str) -> AppResult<bool> {
        let mut bookmarks = self.bookmarks()?;
        let bookmarked = if bookmarks.remove(lead_id) {
            false
        } else {
            bookmarks.insert(lead_id.to_string());
            true
        };
        self.set_preference(BOOKMARKS_KEY, &serde_json::to_value(&bookmarks)?)?;
        Ok(bookmarked)
    }

    pub fn list_sheet_rows(&self) -> AppResult<Vec<SheetRow>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT row_num, lead_id, values_json FROM sheet_rows ORDER BY row_num ASC",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(row_num, lead_id, values_json)| -> AppResult<SheetRow> {
                Ok(SheetRow {
                    row_num,
                    lead_id,
                    values: serde_json::from_str(&values_json)?,
                })
            })
            .collect()
    }

    pub fn insert_sheet_row(&self, lead_id: &str, values: &BTreeMap<String, String>) -> AppResult<i64> {
        let conn = self.lock()?;
        let exists: i64 = conn.query_row(
            "SELECT COUNT(1) FROM sheet_rows WHERE lead_id = ?1",
            params![lead_id],
            |row| row.get(0),
        )?;
        if exists > 0 {
            return Err(AppError::InvalidInput(format!("lead {} already exists", lead_id)));
        }

        conn.execute(
            "INSERT INTO sheet_rows (lead_id, values_json, updated_at) VALUES (?1, ?2, ?3)",
            params![lead_id, serde_json::to_string(values)?, Utc::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn update_sheet_row(&self, lead_id: &str, values: &BTreeMap<String, String>) -> AppResult<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE sheet_rows SET values_json = ?2, updated_at = ?3 WHERE lead_id = ?1",
            params![lead_id, serde_json::to_string(values)?, Utc::now().to_rfc3339()],
        )?;
        if changed == 0 {
            return Err(AppError::NotFound(format!("lead {} does not exist", lead_id)));
        }
        Ok(())
    }

    pub fn delete_sheet_row(&self, lead_id: &str) -> AppResult<()> {
        let conn = self.lock()?;
        let changed = conn.execute("DELETE FROM sheet_rows WHERE lead_id = ?1", params![lead_id])?;
        if changed == 0 {
            return Err(AppError::NotFound(format!("lead {} does not exist", lead_id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Database, BOOKMARKS_KEY};
    use crate::errors::AppError;
    use std::collections::BTreeMap;

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("nested").join("leads.db")).expect("db");
        (dir, db)
    }

    #[test]
    fn bookmarks_toggle_and_persist_as_json() {
        let (_dir, db) = open();
        assert!(db.bookmarks().expect("bookmarks").is_empty());
        assert!(db.toggle_bookmark("lead-1").expect("toggle on"));
        assert!(db.toggle_bookmark("lead-2").expect("toggle on"));
        assert!(!db.toggle_bookmark("lead-1").expect("toggle off"));

        let raw = db.get_preference(BOOKMARKS_KEY).expect("read").expect("present");
        assert_eq!(raw, serde_json::json!(["lead-2"]));
    }

    #[test]
    fn corrupt_bookmarks_read_as_empty() {
        let (_dir, db) = open();
        db.set_preference(BOOKMARKS_KEY, &serde_json::json!({"not": "a list"}))
            .expect("write");
        assert!(db.bookmarks().expect("bookmarks").is_empty());
    }

    #[test]
    fn sheet_rows_keep_insertion_order() {
        let (_dir, db) = open();
        let mut values = BTreeMap::new();
        values.insert("Name".to_string(), "Ada".to_string());
        db.insert_sheet_row("b", &values).expect("insert b");
        db.insert_sheet_row("a", &values).expect("insert a");

        let rows = db.list_sheet_rows().expect("rows");
        let ids = rows.iter().map(|row| row.lead_id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(rows[0].values.get("Name").map(String::as_str), Some("Ada"));

        assert!(matches!(
            db.insert_sheet_row("a", &values),
            Err(AppError::InvalidInput(_))
        ));
        assert!(matches!(
            db.update_sheet_row("zzz", &values),
            Err(AppError::NotFound(_))
        ));
        db.delete_sheet_row("b").expect("delete");
        assert_eq!(db.list_sheet_rows().expect("rows").len(), 1);
    }
}
