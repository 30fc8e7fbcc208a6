//! Persisted install-path cache.
//!
//! One row per target descriptor. Entries are only a hint: the locator
//! re-checks that the path still exists before trusting it, and drops the
//! row whenever a launch from that path fails.

use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub struct PathCache {
    db: Mutex<Connection>,
}

impl PathCache {
    /// Open (or create) the cache database at `path`.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS install_paths (
                descriptor_key TEXT PRIMARY KEY,
                path TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            ",
        )?;
        Ok(Self { db: Mutex::new(conn) })
    }

    fn with_db<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&Connection) -> anyhow::Result<T>,
    {
        let guard = self.db.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        f(&guard)
    }

    /// Default location under the user's data dir.
    pub fn default_path() -> PathBuf {
        crate::config::app_data_dir().join("cache.db")
    }

    pub fn get(&self, key: &str) -> anyhow::Result<Option<PathBuf>> {
        self.with_db(|conn| {
            let mut stmt = conn.prepare("SELECT path FROM install_paths WHERE descriptor_key = ?1")?;
            let result = stmt.query_row(params![key], |row| row.get::<_, String>(0));

            match result {
                Ok(path) => Ok(Some(PathBuf::from(path))),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(anyhow::anyhow!("DB error: {}", e)),
            }
        })
    }

    pub fn put(&self, key: &str, path: &Path) -> anyhow::Result<()> {
        self.with_db(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO install_paths (descriptor_key, path, updated_at) VALUES (?1, ?2, ?3)",
                params![key, path.to_string_lossy(), Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
    }

    /// Returns true if a row was removed.
    pub fn invalidate(&self, key: &str) -> anyhow::Result<bool> {
        self.with_db(|conn| {
            let removed = conn.execute("DELETE FROM install_paths WHERE descriptor_key = ?1", params![key])?;
            Ok(removed > 0)
        })
    }
}
