#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use filter_eff::{DatasetId, JobRunner, RunConfig};

pub const GOOD_OUTPUT: &str = "\
Before matching: total cross section = 1.234e+01 +- 5.000e-02 pb
After filter: final cross section = 1.431e-01 +- 1.870e-02 pb
Filter efficiency (event-level)= (58) / (5000) = 1.160e-02 +- 1.514e-03
Total number of events = 5000
";

pub fn dataset_for(mass_hc: u32, mass_a: u32) -> String {
    format!(
        "/TTToHcToWAToMuMu_MHc-{}_MA-{}_MultiLepFilter_TuneCP5_13TeV-madgraph-pythia8/RunIISummer20UL17MiniAODv2-106X/MINIAODSIM",
        mass_hc, mass_a
    )
}

/// A runner whose answers are fixed per dataset: a file list, and an
/// analyzer output keyed by the first file of that list.
#[derive(Default)]
pub struct ScriptedRunner {
    files: HashMap<String, Vec<String>>,
    outputs: HashMap<String, String>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dataset(mut self, dataset: &str, files: &[&str], output: Option<&str>) -> Self {
        self.files.insert(
            dataset.to_string(),
            files.iter().map(|f| f.to_string()).collect(),
        );
        if let (Some(first), Some(output)) = (files.first(), output) {
            self.outputs.insert(first.to_string(), output.to_string());
        }
        self
    }
}

impl JobRunner for ScriptedRunner {
    fn list_files(&self, dataset: &DatasetId) -> Vec<String> {
        self.files.get(dataset.as_str()).cloned().unwrap_or_default()
    }

    fn invoke_analyzer(&self, files: &[String], _config_script: &Path) -> Option<String> {
        files.first().and_then(|f| self.outputs.get(f)).cloned()
    }
}

/// Lays out SampleLists/ and FilterEff/ana.py under `base_dir`.
pub fn setup_workspace(base_dir: &Path, era: &str, datasets: &[String]) -> RunConfig {
    let config = RunConfig::with_base_dir(base_dir);
    fs::create_dir_all(base_dir.join("SampleLists")).unwrap();
    fs::create_dir_all(base_dir.join("FilterEff")).unwrap();
    fs::write(base_dir.join("FilterEff/ana.py"), "# analyzer configuration\n").unwrap();
    let mut list = String::from("# signal samples\n\n");
    for dataset in datasets {
        list.push_str(dataset);
        list.push('\n');
    }
    fs::write(config.sample_list_path(era), list).unwrap();
    config
}

pub fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

/// Keys currently saved in a results file; empty if it does not exist yet.
pub fn keys_on_disk(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .ok()
        .and_then(|text| serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&text).ok())
        .map(|map| map.keys().cloned().collect())
        .unwrap_or_default()
}
