//! The self-contained unit of work for one dataset. It reads no shared
//! mutable state, so the serial path and the worker pool run the exact same
//! code.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use log::{debug, warn};

use crate::dataset::{resolve_process_key, DatasetId, ProcessKey};
use crate::error::FailureReason;
use crate::extractor::{self, MetricsRecord};
use crate::runner::{tail, JobRunner, OUTPUT_TAIL_CHARS};

/// What happened to one dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetOutcome {
    pub dataset: DatasetId,
    pub result: Result<(ProcessKey, MetricsRecord), FailureReason>,
}

impl DatasetOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runs resolve → list files → analyze → parse for `dataset`.
///
/// Never panics: a panic in any stage becomes an
/// [`FailureReason::UnexpectedFault`].
pub fn process_dataset(
    dataset: &DatasetId,
    runner: &dyn JobRunner,
    config_script: &Path,
) -> DatasetOutcome {
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        run_stages(dataset, runner, config_script)
    }))
    .unwrap_or_else(|payload| Err(FailureReason::UnexpectedFault(panic_message(payload))));

    DatasetOutcome {
        dataset: dataset.clone(),
        result,
    }
}

fn run_stages(
    dataset: &DatasetId,
    runner: &dyn JobRunner,
    config_script: &Path,
) -> Result<(ProcessKey, MetricsRecord), FailureReason> {
    let key = resolve_process_key(dataset).ok_or(FailureReason::UnresolvableIdentifier)?;
    debug!("{} -> {}", dataset, key);

    let dry_run = runner.is_dry_run();
    let files = runner.list_files(dataset);
    if files.is_empty() && !dry_run {
        return Err(FailureReason::NoFiles(key));
    }

    let output = runner
        .invoke_analyzer(&files, config_script)
        .ok_or_else(|| FailureReason::AnalysisUnavailable(key.clone()))?;

    if dry_run {
        return Ok((key, MetricsRecord::dry_run_placeholder(files.len())));
    }

    let report = extractor::parse(Some(&output))
        .map_err(|e| FailureReason::UnexpectedFault(e.to_string()))?;
    match report.and_then(|report| MetricsRecord::from_report(report, files.len())) {
        Some(record) => Ok((key, record)),
        None => {
            if runner.is_verbose() {
                warn!(
                    "  Could not parse filter efficiency. Output (last {} chars):\n{}",
                    OUTPUT_TAIL_CHARS,
                    tail(&output, OUTPUT_TAIL_CHARS)
                );
            }
            Err(FailureReason::UnparseableOutput(key))
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "worker panicked".to_string()
    }
}
