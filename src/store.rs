use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use log::debug;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::dataset::ProcessKey;
use crate::error::StoreError;
use crate::extractor::MetricsRecord;

/// How a flush treats the file already on disk.
#[derive(Debug, Clone, Copy)]
pub enum FlushMode<'a> {
    /// Overwrite the file with the whole in-memory mapping.
    Aggregate,
    /// Read the file, replace or append one key, write it back. Other keys
    /// in the file are left exactly as they were.
    SingleRecord(&'a ProcessKey),
}

/// Insertion-ordered results of one run, keyed by process.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ResultStore {
    records: IndexMap<ProcessKey, MetricsRecord>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the record for `key`, returning the replaced one.
    /// A replaced key keeps its original position.
    pub fn put(&mut self, key: ProcessKey, record: MetricsRecord) -> Option<MetricsRecord> {
        self.records.insert(key, record)
    }

    pub fn get(&self, key: &ProcessKey) -> Option<&MetricsRecord> {
        self.records.get(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ProcessKey> {
        self.records.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ProcessKey, &MetricsRecord)> {
        self.records.iter()
    }

    pub fn flush(&self, mode: FlushMode<'_>, path: &Path) -> Result<(), StoreError> {
        match mode {
            FlushMode::Aggregate => {
                debug!("Writing {} records to {}", self.len(), path.display());
                write_json_atomically(path, self)
            }
            FlushMode::SingleRecord(key) => {
                let record = self
                    .get(key)
                    .ok_or_else(|| StoreError::UnknownKey(key.clone()))?;
                let mut existing = read_object(path)?.unwrap_or_default();
                let value = serde_json::to_value(record).map_err(|source| StoreError::Json {
                    path: path.to_path_buf(),
                    source,
                })?;
                existing.insert(key.as_str().to_string(), value);
                debug!(
                    "Merged {} into {} ({} keys)",
                    key,
                    path.display(),
                    existing.len()
                );
                write_json_atomically(path, &existing)
            }
        }
    }

    /// Reads an aggregate results file back into a store.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let raw = fs::read_to_string(path).map_err(|source| io_error(path, source))?;
        let records = serde_json::from_str(&raw).map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { records })
    }
}

fn read_object(path: &Path) -> Result<Option<Map<String, Value>>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|source| io_error(path, source))?;
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(map)) => Ok(Some(map)),
        Ok(_) => Err(StoreError::NotAnObject(path.to_path_buf())),
        Err(source) => Err(StoreError::Json {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes pretty-printed JSON next to `path` and renames it into place, so a
/// reader never observes a half-written file.
fn write_json_atomically<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| io_error(parent, source))?;
    }

    let json = serde_json::to_string_pretty(value).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let tmp_path = tmp_path_for(path);
    fs::write(&tmp_path, json).map_err(|source| io_error(&tmp_path, source))?;
    fs::rename(&tmp_path, path).map_err(|source| io_error(path, source))?;
    Ok(())
}

fn io_error(path: &Path, source: io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
