use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde_json::to_writer_pretty;
use tracing::{debug, warn};

use crate::StateError;

/// Named values shared between steps (`{{otp}}` and friends).
///
/// Backed by a JSON object on disk when a path is given; otherwise purely in memory.
#[derive(Debug, Default)]
pub struct VariableStore {
    path: Option<PathBuf>,
    values: Mutex<BTreeMap<String, String>>,
}

impl VariableStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open a file-backed store. A missing file starts empty; a corrupt one
    /// is logged and replaced on the next write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = match read_values(&path) {
            Ok(values) => values,
            Err(err) => {
                warn!(target: "state-center", path = %path.display(), %err, "ignoring unreadable variables file");
                BTreeMap::new()
            }
        };
        Self {
            path: Some(path),
            values: Mutex::new(values),
        }
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.values.lock().get(name).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.values.lock().clone()
    }

    pub fn set(&self, name: &str, value: impl Into<String>) -> Result<(), StateError> {
        let snapshot = {
            let mut values = self.values.lock();
            values.insert(name.to_string(), value.into());
            values.clone()
        };
        debug!(target: "state-center", name, "variable stored");
        self.persist(&snapshot)
    }

    pub fn remove(&self, name: &str) -> Result<Option<String>, StateError> {
        let (removed, snapshot) = {
            let mut values = self.values.lock();
            let removed = values.remove(name);
            (removed, values.clone())
        };
        self.persist(&snapshot)?;
        Ok(removed)
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> Result<(), StateError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(path)?);
        to_writer_pretty(&mut writer, values)?;
        writer.flush()?;
        Ok(())
    }
}

fn read_values(path: &Path) -> Result<BTreeMap<String, String>, StateError> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let raw = fs::read_to_string(path)?;
    let parsed: BTreeMap<String, serde_json::Value> = serde_json::from_str(&raw)?;
    Ok(parsed
        .into_iter()
        .map(|(key, value)| {
            let text = match value {
                serde_json::Value::String(text) => text,
                other => other.to_string(),
            };
            (key, text)
        })
        .collect())
}
