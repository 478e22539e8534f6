//! Persistent key/value flags (keypad rotation, selected tokens).

use crate::error::AppError;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Mutex;

pub trait FlagStore: Send + Sync {
    fn get_flag(&self, key: &str) -> Option<Value>;
    fn set_flag(&self, key: &str, value: Value) -> Result<(), AppError>;
}

#[derive(Debug, Default)]
pub struct MemoryFlags {
    values: Mutex<Map<String, Value>>,
}

impl MemoryFlags {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FlagStore for MemoryFlags {
    fn get_flag(&self, key: &str) -> Option<Value> {
        let guard = self.values.lock().ok()?;
        guard.get(key).cloned()
    }

    fn set_flag(&self, key: &str, value: Value) -> Result<(), AppError> {
        let mut guard = self
            .values
            .lock()
            .map_err(|_| AppError::Internal("flag store poisoned".into()))?;
        guard.insert(key.to_string(), value);
        Ok(())
    }
}

/// Flags kept in memory and written through to a JSON object on disk.
#[derive(Debug)]
pub struct JsonFileFlags {
    path: PathBuf,
    values: Mutex<Map<String, Value>>,
}

impl JsonFileFlags {
    /// Load existing flags from `path`. A missing file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(contents) if contents.trim().is_empty() => Map::new(),
            Ok(contents) => match serde_json::from_str::<Value>(&contents)? {
                Value::Object(map) => map,
                _ => {
                    return Err(AppError::Parse(format!(
                        "flag file {} is not a JSON object",
                        path.display()
                    )));
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %path.display(), flags = values.len(), "Opened flag store");
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    fn persist(&self, values: &Map<String, Value>) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let contents = serde_json::to_string_pretty(values)
            .map_err(|e| AppError::Internal(e.to_string()))?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }
}

impl FlagStore for JsonFileFlags {
    fn get_flag(&self, key: &str) -> Option<Value> {
        let guard = self.values.lock().ok()?;
        guard.get(key).cloned()
    }

    fn set_flag(&self, key: &str, value: Value) -> Result<(), AppError> {
        let mut guard = self
            .values
            .lock()
            .map_err(|_| AppError::Internal("flag store poisoned".into()))?;
        if guard.get(key) == Some(&value) {
            return Ok(());
        }
        guard.insert(key.to_string(), value);
        self.persist(&guard)
    }
}
