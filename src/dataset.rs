use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::LazyLock;

use log::{debug, info};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::FilterEffError;

static PROCESS_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^TTToHcToWAToMuMu_MHc-\d+_MA-?\d+").expect("process label pattern is valid")
});

/// A dataset path such as `/<process>/<campaign>/<tier>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetId(String);

impl DatasetId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Short label shared by every dataset variant of one physics process,
/// e.g. `TTToHcToWAToMuMu_MHc-100_MA-15`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessKey(String);

impl ProcessKey {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives the process key from the second `/`-separated segment.
///
/// Both `MA-15` and `MA15` spellings are accepted and kept as written.
/// Returns `None` when the identifier has fewer than two segments or the
/// segment does not start with the process label.
pub fn resolve_process_key(dataset: &DatasetId) -> Option<ProcessKey> {
    let segment = dataset.as_str().split('/').nth(1)?;
    PROCESS_LABEL
        .find(segment)
        .map(|m| ProcessKey(m.as_str().to_string()))
}

/// Reads one dataset per line, skipping blank lines and `#` comments.
pub fn read_dataset_list(path: &Path) -> Result<Vec<DatasetId>, FilterEffError> {
    let file = File::open(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => FilterEffError::MissingSampleList(path.to_path_buf()),
        _ => FilterEffError::Read {
            path: path.to_path_buf(),
            source,
        },
    })?;

    let mut datasets = Vec::new();
    for (line_num, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|source| FilterEffError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        debug!("{}:{} -> {}", path.display(), line_num + 1, line);
        datasets.push(DatasetId::new(line));
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    info!("Found {} datasets in {}", datasets.len(), name);
    Ok(datasets)
}
