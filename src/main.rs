use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use clap::builder::PossibleValuesParser;
use clap::{ArgGroup, Parser};
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;
use std::path::PathBuf;
use std::time::Instant;
use time::macros::format_description;

use filter_eff::orchestrator::format_elapsed;
use filter_eff::{
    parse_jobs, CommandRunner, DatasetId, DryRunRunner, JobRunner, Orchestrator, RunConfig,
    RunMode, KNOWN_ERAS,
};

#[derive(Parser, Clone)]
#[command(name = "calculate-filter-eff")]
#[command(about = "Calculates filter efficiencies for signal samples by running the generator cross-section analyzer over every file of each dataset.")]
#[command(version)]
#[command(group(ArgGroup::new("selection").required(true).args(["era", "sample"])))]
struct Cli {
    #[arg(long, help = "Era to process", value_parser = PossibleValuesParser::new(["2016preVFP", "2016postVFP", "2017", "2018", "all"]))]
    era: Option<String>,
    #[arg(long, help = "Process a single dataset (for testing/debugging)")]
    sample: Option<String>,
    #[arg(long, help = "Show what would be executed without running any external command")]
    dry_run: bool,
    #[arg(short, long, default_value = "1", value_parser = parse_jobs, help = "Number of parallel workers ('auto' for CPU count)")]
    jobs: usize,
    #[arg(long, help = "Path to a YAML run configuration")]
    config: Option<PathBuf>,
    #[arg(long, help = "Base directory holding SampleLists/ and FilterEff/ (overrides the configuration)")]
    base_dir: Option<PathBuf>,
    #[arg(short, long, default_value = "INFO", help = "Logging level (DEBUG, INFO, WARN, ERROR)")]
    log_level: String,
}

fn build_runner(config: &RunConfig, dry_run: bool, verbose: bool) -> Box<dyn JobRunner> {
    if dry_run {
        Box::new(DryRunRunner::new(config))
    } else {
        Box::new(CommandRunner::new(config).verbose(verbose))
    }
}

/// Accepts any `log` level name, case-insensitively, plus `WARNING`.
fn parse_log_level(raw: &str) -> LevelFilter {
    if raw.eq_ignore_ascii_case("warning") {
        return LevelFilter::Warn;
    }
    raw.parse().unwrap_or_else(|_| {
        eprintln!("Unknown log level '{}', using INFO.", raw);
        LevelFilter::Info
    })
}

fn eras_for(selection: &str) -> Vec<String> {
    if selection == "all" {
        KNOWN_ERAS.iter().map(|e| e.to_string()).collect()
    } else {
        vec![selection.to_string()]
    }
}

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();

    let log_level = parse_log_level(&cli.log_level);
    SimpleLogger::new()
        .with_level(log_level)
        .with_timestamp_format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
        .init()?;

    info!("Starting Filter Efficiency Calculator");
    info!("Run Timestamp: {}", Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));

    let mut config = match &cli.config {
        Some(path) => RunConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load run configuration from {}", path.display()))?,
        None => RunConfig::default(),
    };
    if let Some(base_dir) = &cli.base_dir {
        config.base_dir = base_dir.clone();
    }
    info!("Base directory: {}", config.base_dir.display());

    if let Some(sample) = &cli.sample {
        // Single-dataset runs are always serial.
        let runner = build_runner(&config, cli.dry_run, true);
        let mode = RunMode::SingleDataset(DatasetId::new(sample.as_str()));
        let mut orchestrator = Orchestrator::new(config, runner, mode);
        if let Err(e) = orchestrator.run(1).context("Error processing sample") {
            error!("{:#}", e);
            std::process::exit(1);
        }
    } else if let Some(selection) = &cli.era {
        for era in eras_for(selection) {
            let runner = build_runner(&config, cli.dry_run, false);
            let mut orchestrator =
                Orchestrator::new(config.clone(), runner, RunMode::Era(era.clone()));
            if let Err(e) = orchestrator
                .run(cli.jobs)
                .with_context(|| format!("Error processing era {}", era))
            {
                error!("{:#}", e);
                continue;
            }
        }
    }

    info!("Done! Total execution time: {}", format_elapsed(start_time.elapsed()));
    Ok(())
}
