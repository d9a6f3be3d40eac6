use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::info;
use serde::Deserialize;

use crate::dataset::ProcessKey;
use crate::error::FilterEffError;

/// Eras processed by `--era all`, in order.
pub const KNOWN_ERAS: [&str; 4] = ["2016preVFP", "2016postVFP", "2017", "2018"];

/// Locations and external programs used by a run. Every field has a default,
/// so a YAML file only needs the keys it overrides. Relative paths are taken
/// relative to `base_dir`.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub base_dir: PathBuf,
    pub sample_list_dir: PathBuf,
    pub output_dir: PathBuf,
    pub analyzer_config: PathBuf,
    pub query_program: String,
    pub analyzer_program: String,
    pub query_timeout_secs: u64,
    pub analyzer_timeout_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            sample_list_dir: PathBuf::from("SampleLists"),
            output_dir: PathBuf::from("FilterEff"),
            analyzer_config: PathBuf::from("FilterEff/ana.py"),
            query_program: "dasgoclient".to_string(),
            analyzer_program: "cmsRun".to_string(),
            query_timeout_secs: 300,
            analyzer_timeout_secs: 7200,
        }
    }
}

impl RunConfig {
    pub fn from_yaml_file(path: &Path) -> Result<Self, FilterEffError> {
        info!("Loading run configuration from: {}", path.display());
        let file = File::open(path).map_err(|source| FilterEffError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_reader(file).map_err(|source| FilterEffError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Default layout rooted at `base_dir`.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn sample_list_path(&self, era: &str) -> PathBuf {
        self.resolve(&self.sample_list_dir)
            .join(format!("SignalMC_{}.txt", era))
    }

    pub fn output_dir(&self) -> PathBuf {
        self.resolve(&self.output_dir)
    }

    /// Aggregate results file: per era, or `results_sample.json` for
    /// single-dataset runs.
    pub fn aggregate_output_path(&self, era: Option<&str>) -> PathBuf {
        match era {
            Some(era) => self.output_dir().join(format!("results_{}.json", era)),
            None => self.output_dir().join("results_sample.json"),
        }
    }

    /// Per-process file that single-dataset runs accumulate into.
    pub fn sample_output_path(&self, key: &ProcessKey) -> PathBuf {
        self.output_dir().join(format!("sample_{}.json", key))
    }

    pub fn analyzer_config_path(&self) -> PathBuf {
        self.resolve(&self.analyzer_config)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn analyzer_timeout(&self) -> Duration {
        Duration::from_secs(self.analyzer_timeout_secs)
    }
}

/// Parses a worker count: a positive integer or `auto` for the number of
/// available CPUs.
pub fn parse_jobs(raw: &str) -> Result<usize, FilterEffError> {
    if raw.trim().eq_ignore_ascii_case("auto") {
        return Ok(num_cpus::get().max(1));
    }
    match raw.trim().parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(FilterEffError::InvalidJobs(raw.to_string())),
    }
}
