//! SQLite-backed key-value store.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::{KeyValueStore, PersistenceError};

/// Schema for the key-value table.
const KV_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

pub struct SqliteKeyValueStore {
  conn: Mutex<Connection>,
}

impl SqliteKeyValueStore {
  /// Open or create the store at the default location.
  pub fn open_default() -> Result<Self, PersistenceError> {
    Self::open(&Self::default_path()?)
  }

  /// Open or create the store at `path`.
  pub fn open(path: &Path) -> Result<Self, PersistenceError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path)?;
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    debug!(path = %path.display(), "Opened key-value store");

    Ok(store)
  }

  /// `<data_dir>/zoosync/store.db`
  pub fn default_path() -> Result<PathBuf, PersistenceError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or(PersistenceError::NoDataDir)?;

    Ok(data_dir.join("zoosync").join("store.db"))
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>, PersistenceError> {
    self
      .conn
      .lock()
      .map_err(|e| PersistenceError::Poisoned(e.to_string()))
  }

  fn run_migrations(&self) -> Result<(), PersistenceError> {
    self.conn()?.execute_batch(KV_SCHEMA)?;
    Ok(())
  }
}

impl KeyValueStore for SqliteKeyValueStore {
  fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
    let conn = self.conn()?;
    let value = conn
      .query_row(
        "SELECT value FROM kv_store WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()?;
    Ok(value)
  }

  fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
    let conn = self.conn()?;
    conn.execute(
      "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?, ?, datetime('now'))",
      params![key, value],
    )?;
    Ok(())
  }

  fn remove(&self, keys: &[&str]) -> Result<(), PersistenceError> {
    let mut conn = self.conn()?;
    let tx = conn.transaction()?;
    for key in keys {
      tx.execute("DELETE FROM kv_store WHERE key = ?", params![key])?;
    }
    tx.commit()?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn values_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("store.db");

    {
      let store = SqliteKeyValueStore::open(&path).unwrap();
      store.set("auth.accessToken", "abc").unwrap();
      store.set("auth.role", "Customer").unwrap();
      store.set("auth.accessToken", "def").unwrap();
    }

    let store = SqliteKeyValueStore::open(&path).unwrap();
    assert_eq!(store.get("auth.accessToken").unwrap().as_deref(), Some("def"));

    store.remove(&["auth.accessToken", "auth.role"]).unwrap();
    assert_eq!(store.get("auth.accessToken").unwrap(), None);
    assert_eq!(store.get("auth.role").unwrap(), None);
  }
}
