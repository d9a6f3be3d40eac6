mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use filter_eff::{
    DatasetId, DryRunRunner, FailureReason, FilterEffError, JobRunner, MetricsRecord, Orchestrator,
    ProcessKey, RunConfig, RunMode,
};
use tempfile::TempDir;

use common::{dataset_for, keys_on_disk, read_json, setup_workspace, ScriptedRunner, GOOD_OUTPUT};

#[test]
fn test_serial_era_run_keeps_only_successes() {
    let tmp = TempDir::new().unwrap();
    let good = dataset_for(100, 15);
    let empty = dataset_for(130, 20);
    let unresolvable = "/SomeOtherProcess_13TeV/RunIISummer20UL17/MINIAODSIM".to_string();
    let config = setup_workspace(tmp.path(), "2017", &[good.clone(), empty.clone(), unresolvable.clone()]);

    let runner = ScriptedRunner::new()
        .dataset(&good, &["/store/a.root", "/store/b.root"], Some(GOOD_OUTPUT))
        .dataset(&empty, &[], None);
    let mut orchestrator = Orchestrator::new(config.clone(), Box::new(runner), RunMode::Era("2017".into()));
    let summary = orchestrator.run(1).unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failures.len(), 2);
    assert_eq!(
        summary.failures[0].reason,
        FailureReason::NoFiles(ProcessKey::new("TTToHcToWAToMuMu_MHc-130_MA-20"))
    );
    assert_eq!(summary.failures[1].reason, FailureReason::UnresolvableIdentifier);

    let key = ProcessKey::new("TTToHcToWAToMuMu_MHc-100_MA-15");
    let record = orchestrator.store().get(&key).unwrap();
    assert_eq!(record.filter_efficiency, Some(0.0116));
    assert_eq!(record.cross_section, Some(0.1431));
    assert_eq!(record.total_files, 2);
    assert_eq!(record.total_events, Some(5000));

    let output_path = tmp.path().join("FilterEff/results_2017.json");
    assert_eq!(summary.output_path, output_path);
    let json = read_json(&output_path);
    let object = json.as_object().unwrap();
    assert_eq!(object.len(), 1);
    assert_eq!(json[key.as_str()]["total_files"], 2);
    assert_eq!(json[key.as_str()]["cross_section_error"], 0.0187);
}

#[test]
fn test_unparseable_output_is_a_failure() {
    let tmp = TempDir::new().unwrap();
    let dataset = dataset_for(160, 45);
    let config = setup_workspace(tmp.path(), "2018", &[dataset.clone()]);
    let runner = ScriptedRunner::new().dataset(
        &dataset,
        &["/store/x.root"],
        Some("Begin processing the 1st record\nAfter filter: final cross section = 1.0e+00 +- 1.0e-01 pb"),
    );

    let mut orchestrator = Orchestrator::new(config, Box::new(runner), RunMode::Era("2018".into()));
    let summary = orchestrator.run(1).unwrap();

    assert_eq!(summary.completed, 0);
    assert!(matches!(
        summary.failures[0].reason,
        FailureReason::UnparseableOutput(_)
    ));
    // The aggregate file is written even when nothing succeeded.
    let json = read_json(&tmp.path().join("FilterEff/results_2018.json"));
    assert!(json.as_object().unwrap().is_empty());
}

#[test]
fn test_dry_run_stores_placeholders() {
    let tmp = TempDir::new().unwrap();
    let datasets = vec![dataset_for(100, 15), dataset_for(160, 85)];
    let config = setup_workspace(tmp.path(), "2016preVFP", &datasets);
    fs::remove_file(config.analyzer_config_path()).unwrap();

    let runner = Box::new(DryRunRunner::new(&config));
    let mut orchestrator = Orchestrator::new(config, runner, RunMode::Era("2016preVFP".into()));
    let summary = orchestrator.run(1).unwrap();

    assert_eq!(summary.completed, 2);
    assert!(summary.failures.is_empty());
    for (_, record) in orchestrator.store().iter() {
        assert_eq!(record, &MetricsRecord::dry_run_placeholder(0));
    }
    let json = read_json(&tmp.path().join("FilterEff/results_2016preVFP.json"));
    let record = &json["TTToHcToWAToMuMu_MHc-160_MA-85"];
    assert_eq!(record["filter_efficiency"], 0.0);
    assert!(record["filter_efficiency_error"].is_null());
    assert_eq!(record["total_events"], 0);
}

#[test]
fn test_missing_sample_list_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let config = RunConfig::with_base_dir(tmp.path());
    let runner = Box::new(DryRunRunner::new(&config));
    let mut orchestrator = Orchestrator::new(config, runner, RunMode::Era("2017".into()));

    let err = orchestrator.run(1).unwrap_err();
    assert!(matches!(err, FilterEffError::MissingSampleList(_)));
    assert!(!tmp.path().join("FilterEff/results_2017.json").exists());
}

#[test]
fn test_single_dataset_runs_accumulate_per_process() {
    let tmp = TempDir::new().unwrap();
    let config = setup_workspace(tmp.path(), "2017", &[]);
    let first = dataset_for(100, 15);
    let second = dataset_for(130, 55);
    let runner = || {
        ScriptedRunner::new()
            .dataset(&first, &["/store/1.root"], Some(GOOD_OUTPUT))
            .dataset(&second, &["/store/2.root", "/store/3.root"], Some(GOOD_OUTPUT))
    };

    for dataset in [&first, &second, &first] {
        let mut orchestrator = Orchestrator::new(
            config.clone(),
            Box::new(runner()),
            RunMode::SingleDataset(DatasetId::new(dataset.as_str())),
        );
        let summary = orchestrator.run(4).unwrap();
        assert_eq!(summary.completed, 1);
    }

    let first_key = ProcessKey::new("TTToHcToWAToMuMu_MHc-100_MA-15");
    let second_key = ProcessKey::new("TTToHcToWAToMuMu_MHc-130_MA-55");
    let per_process = read_json(&config.sample_output_path(&first_key));
    assert_eq!(per_process.as_object().unwrap().len(), 1);
    assert_eq!(per_process[first_key.as_str()]["total_files"], 1);

    let per_process = read_json(&config.sample_output_path(&second_key));
    assert_eq!(per_process[second_key.as_str()]["total_files"], 2);

    // The aggregate sample file only reflects the latest run.
    let latest = read_json(&tmp.path().join("FilterEff/results_sample.json"));
    assert_eq!(latest.as_object().unwrap().len(), 1);
    assert!(latest.get(first_key.as_str()).is_some());
}

#[test]
fn test_yaml_config_overrides_layout() {
    let tmp = TempDir::new().unwrap();
    let yaml = tmp.path().join("run.yaml");
    fs::write(
        &yaml,
        format!(
            "base_dir: {}\noutput_dir: out\nanalyzer_timeout_secs: 60\n",
            tmp.path().display()
        ),
    )
    .unwrap();

    let config = RunConfig::from_yaml_file(&yaml).unwrap();
    assert_eq!(config.aggregate_output_path(Some("2017")), tmp.path().join("out/results_2017.json"));
    assert_eq!(config.analyzer_timeout().as_secs(), 60);
    assert_eq!(config.query_program, "dasgoclient");
}

/// Records how many keys the results file holds each time a dataset starts.
struct DiskWatcher {
    inner: ScriptedRunner,
    results: PathBuf,
    seen: Arc<Mutex<Vec<usize>>>,
}

impl JobRunner for DiskWatcher {
    fn list_files(&self, dataset: &DatasetId) -> Vec<String> {
        self.seen.lock().unwrap().push(keys_on_disk(&self.results).len());
        self.inner.list_files(dataset)
    }

    fn invoke_analyzer(&self, files: &[String], config_script: &Path) -> Option<String> {
        self.inner.invoke_analyzer(files, config_script)
    }
}

#[test]
fn test_each_success_is_saved_before_the_next_dataset() {
    let tmp = TempDir::new().unwrap();
    let datasets: Vec<String> = (0..3).map(|i| dataset_for(100 + i * 10, 15)).collect();
    let config = setup_workspace(tmp.path(), "2017", &datasets);
    let inner = datasets.iter().enumerate().fold(ScriptedRunner::new(), |runner, (i, dataset)| {
        runner.dataset(dataset, &[format!("/store/{}.root", i).as_str()], Some(GOOD_OUTPUT))
    });
    let seen = Arc::new(Mutex::new(Vec::new()));
    let runner = DiskWatcher {
        inner,
        results: config.aggregate_output_path(Some("2017")),
        seen: Arc::clone(&seen),
    };

    let mut orchestrator = Orchestrator::new(config, Box::new(runner), RunMode::Era("2017".into()));
    orchestrator.run(1).unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
}

#[test]
fn test_datasets_sharing_a_process_key_both_count_as_completed() {
    let tmp = TempDir::new().unwrap();
    let nominal = dataset_for(100, 15);
    let extension = nominal.replace("-106X/", "-106X_ext1/");
    let config = setup_workspace(tmp.path(), "2017", &[nominal.clone(), extension.clone()]);
    let runner = ScriptedRunner::new()
        .dataset(&nominal, &["/store/nominal.root"], Some(GOOD_OUTPUT))
        .dataset(&extension, &["/store/ext1_a.root", "/store/ext1_b.root"], Some(GOOD_OUTPUT));

    let mut orchestrator = Orchestrator::new(config, Box::new(runner), RunMode::Era("2017".into()));
    let summary = orchestrator.run(1).unwrap();

    assert_eq!(summary.total, 2);
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.stored_keys, 1);
    assert_eq!(summary.completed + summary.failures.len(), summary.total);
    // The later dataset overwrites the earlier record.
    let key = ProcessKey::new("TTToHcToWAToMuMu_MHc-100_MA-15");
    assert_eq!(orchestrator.store().get(&key).unwrap().total_files, 2);
}
