//! Durable key-value storage for the session mirror.
//!
//! The cache itself is memory-only; only the session slice writes here.

mod sqlite;

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;

pub use sqlite::SqliteKeyValueStore;

#[derive(Error, Debug)]
pub enum PersistenceError {
  #[error("Storage error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  #[error("Serialization error: {0}")]
  Serde(#[from] serde_json::Error),

  #[error("Could not determine data directory")]
  NoDataDir,

  #[error("Lock poisoned: {0}")]
  Poisoned(String),
}

/// Host persistence boundary.
pub trait KeyValueStore: Send + Sync {
  fn get(&self, key: &str) -> Result<Option<String>, PersistenceError>;

  fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError>;

  fn remove(&self, keys: &[&str]) -> Result<(), PersistenceError>;
}

/// Store that lives only as long as the process.
#[derive(Default)]
pub struct MemoryKeyValueStore {
  values: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn values(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, PersistenceError> {
    self
      .values
      .lock()
      .map_err(|e| PersistenceError::Poisoned(e.to_string()))
  }
}

impl KeyValueStore for MemoryKeyValueStore {
  fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
    Ok(self.values()?.get(key).cloned())
  }

  fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
    self.values()?.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove(&self, keys: &[&str]) -> Result<(), PersistenceError> {
    let mut values = self.values()?;
    for key in keys {
      values.remove(*key);
    }
    Ok(())
  }
}
