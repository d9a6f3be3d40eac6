use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::dataset::ProcessKey;

/// Run-level faults. Only these stop an era; per-dataset problems are
/// [`FailureReason`]s.
#[derive(Debug, Error)]
pub enum FilterEffError {
    #[error("sample list not found: {}", .0.display())]
    MissingSampleList(PathBuf),
    #[error("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse run configuration {}: {source}", path.display())]
    Config {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("--jobs must be an integer >= 1 or 'auto', got '{0}'")]
    InvalidJobs(String),
    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised while persisting or reloading results.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error on {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("invalid results JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("{} does not hold a JSON object", .0.display())]
    NotAnObject(PathBuf),
    #[error("no record stored for process '{0}'")]
    UnknownKey(ProcessKey),
}

/// A numeric token matched a pattern but could not be converted.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid {field} value '{token}': {source}")]
    Float {
        field: &'static str,
        token: String,
        source: std::num::ParseFloatError,
    },
    #[error("invalid {field} value '{token}': {source}")]
    Count {
        field: &'static str,
        token: String,
        source: std::num::ParseIntError,
    },
}

/// Faults of a single external invocation. These never leave the runner;
/// they are logged and collapsed into an empty file list or a missing output.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to start '{program}': {source}")]
    Spawn { program: String, source: io::Error },
    #[error("'{program}' did not finish within {secs}s")]
    Timeout { program: String, secs: u64 },
    #[error("failed waiting on '{program}': {source}")]
    Wait { program: String, source: io::Error },
}

/// Why a dataset did not produce a record.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FailureReason {
    #[error("could not extract process name")]
    UnresolvableIdentifier,
    #[error("no files found for {0}")]
    NoFiles(ProcessKey),
    #[error("analyzer failed for {0}")]
    AnalysisUnavailable(ProcessKey),
    #[error("could not parse filter efficiency from output for {0}")]
    UnparseableOutput(ProcessKey),
    #[error("unexpected fault: {0}")]
    UnexpectedFault(String),
}
