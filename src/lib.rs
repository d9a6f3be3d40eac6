//! Batch extraction of generator filter efficiencies.
//!
//! For every dataset of an era the file list is resolved with an external
//! query, the analyzer is run over all files, and the filter efficiency and
//! cross section it reports are parsed and saved to JSON after each success.

pub mod config;
pub mod dataset;
pub mod dispatch;
pub mod error;
pub mod extractor;
pub mod orchestrator;
pub mod pipeline;
pub mod runner;
pub mod store;

pub use config::{parse_jobs, RunConfig, KNOWN_ERAS};
pub use dataset::{read_dataset_list, resolve_process_key, DatasetId, ProcessKey};
pub use error::{ExtractError, FailureReason, FilterEffError, RunnerError, StoreError};
pub use extractor::{parse, MetricsRecord, ParsedReport};
pub use orchestrator::{FailureRecord, Orchestrator, RunMode, RunSummary};
pub use pipeline::{process_dataset, DatasetOutcome};
pub use runner::{CommandRunner, DryRunRunner, JobRunner, DRY_RUN_OUTPUT};
pub use store::{FlushMode, ResultStore};
