//! Injected collaborators for saving edits and session state
//!
//! The engine never touches ambient storage. Row saves go through a
//! `RowPersister`, session blobs through a `SessionStore`. Both have
//! in-memory implementations for tests and embedding; `JsonFileSessionStore`
//! keeps sessions in one JSON file under the platform data dir.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::data::datatable::{DataValue, RowId};
use crate::error::PersistenceError;
use crate::utils::app_paths::AppPaths;

/// Saves one committed cell value
#[async_trait(?Send)]
pub trait RowPersister {
    async fn save(
        &self,
        row_id: &RowId,
        field: &str,
        value: &DataValue,
    ) -> Result<(), PersistenceError>;
}

/// Key-value store for opaque session blobs
pub trait SessionStore {
    fn get(&self, key: &str) -> Result<Option<JsonValue>, PersistenceError>;
    fn set(&mut self, key: &str, value: JsonValue) -> Result<(), PersistenceError>;
}

/// Accepts every save; for read-only or purely local use
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllPersister;

#[async_trait(?Send)]
impl RowPersister for AcceptAllPersister {
    async fn save(&self, _: &RowId, _: &str, _: &DataValue) -> Result<(), PersistenceError> {
        Ok(())
    }
}

/// Records saves in memory and can be told to reject some of them
#[derive(Debug, Default)]
pub struct MemoryPersister {
    saved: RefCell<Vec<(RowId, String, DataValue)>>,
    rejections: RefCell<HashMap<(RowId, String), String>>,
    failures: RefCell<VecDeque<PersistenceError>>,
}

impl MemoryPersister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every save of this cell fails with `reason` until cleared
    pub fn reject(&self, row_id: impl Into<RowId>, field: impl Into<String>, reason: impl Into<String>) {
        self.rejections
            .borrow_mut()
            .insert((row_id.into(), field.into()), reason.into());
    }

    /// The next save, whatever the cell, fails with `error`
    pub fn fail_next(&self, error: PersistenceError) {
        self.failures.borrow_mut().push_back(error);
    }

    pub fn clear_rejections(&self) {
        self.rejections.borrow_mut().clear();
        self.failures.borrow_mut().clear();
    }

    pub fn saved(&self) -> Vec<(RowId, String, DataValue)> {
        self.saved.borrow().clone()
    }
}

#[async_trait(?Send)]
impl RowPersister for MemoryPersister {
    async fn save(
        &self,
        row_id: &RowId,
        field: &str,
        value: &DataValue,
    ) -> Result<(), PersistenceError> {
        if let Some(error) = self.failures.borrow_mut().pop_front() {
            return Err(error);
        }
        let key = (row_id.clone(), field.to_string());
        if let Some(reason) = self.rejections.borrow().get(&key) {
            return Err(PersistenceError::Rejected {
                row_id: row_id.clone(),
                field: field.to_string(),
                reason: reason.clone(),
            });
        }
        self.saved
            .borrow_mut()
            .push((row_id.clone(), field.to_string(), value.clone()));
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    entries: HashMap<String, JsonValue>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Result<Option<JsonValue>, PersistenceError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: JsonValue) -> Result<(), PersistenceError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}

/// All sessions in one JSON object on disk, keyed by storage key
#[derive(Debug, Clone)]
pub struct JsonFileSessionStore {
    path: PathBuf,
}

impl JsonFileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data_dir>/grid-engine/sessions.json`
    pub fn default_location() -> Result<Self> {
        Ok(Self::new(AppPaths::sessions_file()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Map<String, JsonValue>, PersistenceError> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let contents = fs::read_to_string(&self.path)
            .map_err(|e| PersistenceError::Unavailable(format!("{}: {}", self.path.display(), e)))?;
        if contents.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<JsonValue>(&contents) {
            Ok(JsonValue::Object(map)) => Ok(map),
            Ok(_) => Err(PersistenceError::Corrupt(format!(
                "{} does not hold a JSON object",
                self.path.display()
            ))),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Session file unreadable");
                Err(PersistenceError::Corrupt(e.to_string()))
            }
        }
    }
}

impl SessionStore for JsonFileSessionStore {
    fn get(&self, key: &str) -> Result<Option<JsonValue>, PersistenceError> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&mut self, key: &str, value: JsonValue) -> Result<(), PersistenceError> {
        let mut all = self.read_all()?;
        all.insert(key.to_string(), value);
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| PersistenceError::Unavailable(e.to_string()))?;
        }
        let contents = serde_json::to_string_pretty(&JsonValue::Object(all))
            .map_err(|e| PersistenceError::Corrupt(e.to_string()))?;
        fs::write(&self.path, contents)
            .map_err(|e| PersistenceError::Unavailable(e.to_string()))?;
        debug!(key, path = %self.path.display(), "Session saved");
        Ok(())
    }
}
