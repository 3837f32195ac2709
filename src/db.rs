use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;

/// Resume positions per listing query.
pub struct ProgressStore {
    conn: Connection,
}

impl ProgressStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = ProgressStore { conn };
        store.init_schema()?;
        Ok(store)
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let store = ProgressStore {
            conn: Connection::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS progress (
                query_id   TEXT PRIMARY KEY,
                next_page  INTEGER NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            ",
        )?;
        Ok(())
    }

    /// Page to start `query_id` from; 1 when nothing is saved.
    pub fn next_page(&self, query_id: &str) -> Result<u32> {
        let page: Option<u32> = self
            .conn
            .query_row(
                "SELECT next_page FROM progress WHERE query_id = ?1",
                params![query_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(page.unwrap_or(1).max(1))
    }

    pub fn save(&self, query_id: &str, next_page: u32) -> Result<()> {
        self.conn.execute(
            "INSERT INTO progress (query_id, next_page) VALUES (?1, ?2)
             ON CONFLICT(query_id) DO UPDATE SET next_page = excluded.next_page,
                                                 updated_at = datetime('now')",
            params![query_id, next_page],
        )?;
        Ok(())
    }

    /// Forget a query that ran to completion.
    pub fn clear(&self, query_id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM progress WHERE query_id = ?1", params![query_id])?;
        Ok(())
    }
}
