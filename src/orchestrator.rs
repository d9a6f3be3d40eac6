use std::path::PathBuf;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};

use crate::config::RunConfig;
use crate::dataset::{read_dataset_list, resolve_process_key, DatasetId};
use crate::dispatch::dispatch;
use crate::error::{FailureReason, FilterEffError};
use crate::pipeline::{process_dataset, DatasetOutcome};
use crate::runner::JobRunner;
use crate::store::{FlushMode, ResultStore};

const BANNER: &str = "================================================================================";

/// What a run works on.
#[derive(Debug, Clone, PartialEq)]
pub enum RunMode {
    /// Every dataset listed for an era; results go to one file per era.
    Era(String),
    /// One dataset, accumulated into a per-process file across runs.
    SingleDataset(DatasetId),
}

/// A dataset that did not make it into the store.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureRecord {
    pub dataset: DatasetId,
    pub reason: FailureReason,
}

#[derive(Debug)]
pub struct RunSummary {
    pub total: usize,
    /// Datasets that produced a record. Can exceed `stored_keys` when several
    /// datasets resolve to the same process.
    pub completed: usize,
    pub stored_keys: usize,
    pub failures: Vec<FailureRecord>,
    pub output_path: PathBuf,
    pub elapsed: Duration,
}

/// Owns the results and failures of one run and drives every dataset through
/// the pipeline, serially or on a worker pool.
pub struct Orchestrator {
    config: RunConfig,
    runner: Box<dyn JobRunner>,
    mode: RunMode,
    store: ResultStore,
    succeeded: usize,
    failures: Vec<FailureRecord>,
}

impl Orchestrator {
    pub fn new(config: RunConfig, runner: Box<dyn JobRunner>, mode: RunMode) -> Self {
        Self {
            config,
            runner,
            mode,
            store: ResultStore::new(),
            succeeded: 0,
            failures: Vec::new(),
        }
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    pub fn failures(&self) -> &[FailureRecord] {
        &self.failures
    }

    pub fn aggregate_output_path(&self) -> PathBuf {
        match &self.mode {
            RunMode::Era(era) => self.config.aggregate_output_path(Some(era)),
            RunMode::SingleDataset(_) => self.config.aggregate_output_path(None),
        }
    }

    /// Datasets to process. Fails if an era's sample list is missing.
    pub fn datasets(&self) -> Result<Vec<DatasetId>, FilterEffError> {
        match &self.mode {
            RunMode::Era(era) => read_dataset_list(&self.config.sample_list_path(era)),
            RunMode::SingleDataset(dataset) => Ok(vec![dataset.clone()]),
        }
    }

    /// Processes every dataset, then writes the aggregate file and reports
    /// failures. Single-dataset runs ignore `jobs`.
    pub fn run(&mut self, jobs: usize) -> Result<RunSummary, FilterEffError> {
        let started_at = Instant::now();
        self.log_banner(jobs);

        let datasets = self.datasets()?;
        let parallel = jobs > 1 && matches!(self.mode, RunMode::Era(_));
        if parallel {
            self.run_parallel(&datasets, jobs)?;
        } else {
            self.run_serial(&datasets);
        }

        let output_path = self.aggregate_output_path();
        self.store.flush(FlushMode::Aggregate, &output_path)?;

        let summary = RunSummary {
            total: datasets.len(),
            completed: self.succeeded,
            stored_keys: self.store.len(),
            failures: self.failures.clone(),
            output_path,
            elapsed: started_at.elapsed(),
        };
        self.log_summary(&summary);
        self.report_failures();
        Ok(summary)
    }

    fn run_serial(&mut self, datasets: &[DatasetId]) {
        let config_script = self.config.analyzer_config_path();
        let total = datasets.len();
        for (i, dataset) in datasets.iter().enumerate() {
            if matches!(self.mode, RunMode::Era(_)) {
                info!("[{}/{}] {}", i + 1, total, dataset);
            }
            let started_at = Instant::now();
            let outcome = process_dataset(dataset, self.runner.as_ref(), &config_script);
            info!("  Finished in {}", format_elapsed(started_at.elapsed()));
            self.record(outcome);
        }
    }

    fn run_parallel(&mut self, datasets: &[DatasetId], jobs: usize) -> Result<(), FilterEffError> {
        info!(
            "Processing {} datasets with {} parallel workers...",
            datasets.len(),
            jobs
        );
        let config_script = self.config.analyzer_config_path();

        let progress_bar = ProgressBar::new(datasets.len() as u64);
        progress_bar.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );

        // Split the borrows: workers read the runner, the callback mutates
        // the store and the failure list.
        let Self {
            config,
            runner,
            mode,
            store,
            succeeded,
            failures,
        } = self;
        let mut sink = OutcomeSink {
            config,
            mode,
            store,
            succeeded,
            failures,
        };
        dispatch(datasets, jobs, &**runner, &config_script, |outcome| {
            let message = match &outcome.result {
                Ok((key, _)) => format!("OK: {}", key),
                Err(reason) => format!("FAILED: {}", reason),
            };
            sink.record(outcome);
            progress_bar.set_message(message);
            progress_bar.inc(1);
        })?;

        progress_bar.finish_with_message(format!(
            "{} OK, {} failed",
            *sink.succeeded,
            sink.failures.len()
        ));
        Ok(())
    }

    fn record(&mut self, outcome: DatasetOutcome) {
        OutcomeSink {
            config: &self.config,
            mode: &self.mode,
            store: &mut self.store,
            succeeded: &mut self.succeeded,
            failures: &mut self.failures,
        }
        .record(outcome);
    }

    fn log_banner(&self, jobs: usize) {
        info!("{}", BANNER);
        info!("Filter Efficiency Calculator");
        match &self.mode {
            RunMode::Era(era) => info!("Era: {}", era),
            RunMode::SingleDataset(dataset) => {
                info!("Mode: Single dataset test");
                info!("Dataset: {}", dataset);
            }
        }
        info!("Dry run: {}", self.runner.is_dry_run());
        if jobs > 1 && matches!(self.mode, RunMode::Era(_)) {
            info!("Parallel jobs: {}", jobs);
        }
        info!("{}", BANNER);
    }

    fn log_summary(&self, summary: &RunSummary) {
        info!("{}", BANNER);
        info!("Results saved to: {}", summary.output_path.display());
        info!(
            "Processed {}/{} datasets successfully in {}",
            summary.completed,
            summary.total,
            format_elapsed(summary.elapsed)
        );
        if summary.stored_keys != summary.completed {
            info!("Distinct process keys stored: {}", summary.stored_keys);
        }
        if !summary.failures.is_empty() {
            warn!("Failed: {} datasets", summary.failures.len());
        }
        if let RunMode::SingleDataset(_) = &self.mode {
            for key in self.store.keys() {
                info!(
                    "Saved to: {}",
                    self.config.sample_output_path(key).display()
                );
            }
            if let Ok(json) = serde_json::to_string_pretty(&self.store) {
                info!("Result for single dataset:\n{}", json);
            }
        }
        info!("{}", BANNER);
    }

    fn report_failures(&self) {
        if self.failures.is_empty() {
            return;
        }
        warn!("{}", BANNER);
        warn!("FAILED DATASETS ({}):", self.failures.len());
        warn!("{}", BANNER);
        for failure in &self.failures {
            warn!("  Dataset: {}", failure.dataset);
            if let Some(key) = resolve_process_key(&failure.dataset) {
                warn!("  Process: {}", key);
            }
            warn!("  Error: {}", failure.reason);
        }
        warn!("{}", BANNER);
    }
}

/// The mutable half of an orchestrator: applies outcomes and performs the
/// incremental flushes.
struct OutcomeSink<'a> {
    config: &'a RunConfig,
    mode: &'a RunMode,
    store: &'a mut ResultStore,
    succeeded: &'a mut usize,
    failures: &'a mut Vec<FailureRecord>,
}

impl OutcomeSink<'_> {
    fn record(&mut self, outcome: DatasetOutcome) {
        let DatasetOutcome { dataset, result } = outcome;
        let (key, record) = match result {
            Ok(done) => done,
            Err(reason) => {
                error!("  {}: {}", dataset, reason);
                self.failures.push(FailureRecord { dataset, reason });
                return;
            }
        };

        *self.succeeded += 1;
        info!("  SUCCESS: {}", key);
        if let Some(eff) = record.filter_efficiency {
            info!("    Filter efficiency: {:.6}", eff);
        }
        if let Some(xsec) = record.cross_section.filter(|x| *x != 0.0) {
            info!("    Cross section: {:.6} pb", xsec);
        }
        info!("    Total files: {}", record.total_files);
        match record.total_events {
            Some(events) => info!("    Total events: {}", events),
            None => info!("    Total events: N/A"),
        }

        if self.store.put(key.clone(), record).is_some() {
            warn!("  {} was already stored; keeping the latest record", key);
        }

        let flushed = match self.mode {
            RunMode::Era(era) => self.store.flush(
                FlushMode::Aggregate,
                &self.config.aggregate_output_path(Some(era)),
            ),
            RunMode::SingleDataset(_) => self.store.flush(
                FlushMode::SingleRecord(&key),
                &self.config.sample_output_path(&key),
            ),
        };
        if let Err(e) = flushed {
            error!("  Incremental save after {} failed: {}", key, e);
        }
    }
}

pub fn format_elapsed(elapsed: Duration) -> String {
    let total_secs = elapsed.as_secs();
    let (hours, minutes, seconds) = (total_secs / 3600, (total_secs % 3600) / 60, total_secs % 60);
    match (hours, minutes) {
        (0, 0) => format!("{}.{:03}s", seconds, elapsed.subsec_millis()),
        (0, _) => format!("{}m {}s", minutes, seconds),
        _ => format!("{}h {}m {}s", hours, minutes, seconds),
    }
}
