//! Invocation of the two external tools: the file-listing query and the
//! analyzer. Every fault here is swallowed after logging; callers only ever
//! see an empty file list or a missing report.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use log::{debug, info, warn};

use crate::config::RunConfig;
use crate::dataset::DatasetId;
use crate::error::RunnerError;

/// Returned by [`DryRunRunner`] in place of an analyzer report.
pub const DRY_RUN_OUTPUT: &str = "DRY_RUN_OUTPUT";

const POLL_INTERVAL: Duration = Duration::from_millis(100);
pub(crate) const OUTPUT_TAIL_CHARS: usize = 2000;

pub trait JobRunner: Send + Sync {
    /// Files belonging to `dataset`. Empty on any failure.
    fn list_files(&self, dataset: &DatasetId) -> Vec<String>;

    /// Combined stdout and stderr of a successful analyzer run over `files`.
    fn invoke_analyzer(&self, files: &[String], config_script: &Path) -> Option<String>;

    fn is_dry_run(&self) -> bool {
        false
    }

    /// Whether analyzer output should be echoed in full, as in
    /// single-dataset runs.
    fn is_verbose(&self) -> bool {
        false
    }
}

/// Runs the real external programs as child processes.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    query_program: String,
    analyzer_program: String,
    query_timeout: Duration,
    analyzer_timeout: Duration,
    verbose: bool,
}

impl CommandRunner {
    pub fn new(config: &RunConfig) -> Self {
        Self {
            query_program: config.query_program.clone(),
            analyzer_program: config.analyzer_program.clone(),
            query_timeout: config.query_timeout(),
            analyzer_timeout: config.analyzer_timeout(),
            verbose: false,
        }
    }

    /// Log full analyzer output at debug level. Used for single-dataset runs.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

impl JobRunner for CommandRunner {
    fn list_files(&self, dataset: &DatasetId) -> Vec<String> {
        info!("  Querying file list for {}", dataset);
        let args = vec!["--query".to_string(), format!("file dataset={}", dataset)];
        let output = match run_with_timeout(&self.query_program, &args, self.query_timeout) {
            Ok(output) => output,
            Err(e) => {
                warn!("  File query failed: {}", e);
                return Vec::new();
            }
        };
        if !output.status.success() {
            warn!(
                "  File query exited with {}: {}",
                output.status,
                output.stderr.trim()
            );
            return Vec::new();
        }

        let files: Vec<String> = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        info!("  Found {} files", files.len());
        files
    }

    fn invoke_analyzer(&self, files: &[String], config_script: &Path) -> Option<String> {
        if files.is_empty() {
            warn!("  No files to analyze");
            return None;
        }
        if !config_script.exists() {
            warn!("  Analyzer configuration not found at {}", config_script.display());
            return None;
        }

        let args = vec![
            config_script.display().to_string(),
            format!("inputFiles={}", files.join(",")),
            "maxEvents=-1".to_string(),
        ];
        info!("  Running {} with {} files...", self.analyzer_program, files.len());

        let output = match run_with_timeout(&self.analyzer_program, &args, self.analyzer_timeout) {
            Ok(output) => output,
            Err(e) => {
                warn!("  Analyzer failed: {}", e);
                return None;
            }
        };
        if !output.status.success() {
            warn!("  {} exited with {}", self.analyzer_program, output.status);
            if self.verbose {
                warn!("  Full analyzer stdout:\n{}", output.stdout);
                warn!("  Full analyzer stderr:\n{}", output.stderr);
            } else {
                warn!("  stderr (tail): {}", tail(&output.stderr, OUTPUT_TAIL_CHARS));
            }
            return None;
        }
        if self.verbose {
            info!("  Full analyzer stdout:\n{}", output.stdout);
            info!("  Full analyzer stderr:\n{}", output.stderr);
        }

        // The report is written through the message logger, i.e. to stderr.
        Some(format!("{}\n{}", output.stdout, output.stderr))
    }

    fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Logs what would be executed and never spawns a process.
#[derive(Debug, Clone)]
pub struct DryRunRunner {
    query_program: String,
    analyzer_program: String,
}

impl DryRunRunner {
    pub fn new(config: &RunConfig) -> Self {
        Self {
            query_program: config.query_program.clone(),
            analyzer_program: config.analyzer_program.clone(),
        }
    }
}

impl JobRunner for DryRunRunner {
    fn list_files(&self, dataset: &DatasetId) -> Vec<String> {
        info!(
            "  [DRY RUN] Would execute: {} --query 'file dataset={}'",
            self.query_program, dataset
        );
        Vec::new()
    }

    fn invoke_analyzer(&self, files: &[String], config_script: &Path) -> Option<String> {
        info!(
            "  [DRY RUN] Would execute: {} {} inputFiles=<{} files> maxEvents=-1",
            self.analyzer_program,
            config_script.display(),
            files.len()
        );
        Some(DRY_RUN_OUTPUT.to_string())
    }

    fn is_dry_run(&self) -> bool {
        true
    }
}

#[derive(Debug)]
struct CommandOutput {
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

fn run_with_timeout(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<CommandOutput, RunnerError> {
    debug!("Executing: {} {}", program, args.join(" "));
    let deadline = Instant::now() + timeout;
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| RunnerError::Spawn {
            program: program.to_string(),
            source,
        })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    // The deadline covers both the wait and reading the pipes: a background
    // grandchild can hold them open after the child has exited. Reader
    // threads that miss the deadline are left detached.
    let timed_out = || RunnerError::Timeout {
        program: program.to_string(),
        secs: timeout.as_secs(),
    };
    let status = wait_until(&mut child, program, deadline).ok_or_else(timed_out)??;
    let stdout = collect(stdout, deadline).ok_or_else(timed_out)?;
    let stderr = collect(stderr, deadline).ok_or_else(timed_out)?;

    Ok(CommandOutput {
        status,
        stdout,
        stderr,
    })
}

/// Polls the child until it exits. `None` means the deadline passed and the
/// child was killed.
fn wait_until(
    child: &mut Child,
    program: &str,
    deadline: Instant,
) -> Option<Result<ExitStatus, RunnerError>> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(Ok(status)),
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return None;
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(source) => {
                let _ = child.kill();
                return Some(Err(RunnerError::Wait {
                    program: program.to_string(),
                    source,
                }));
            }
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<Receiver<String>> {
    pipe.map(|mut pipe| {
        let (sender, receiver) = bounded(1);
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            let _ = sender.send(String::from_utf8_lossy(&buf).into_owned());
        });
        receiver
    })
}

/// Text read from one pipe, or `None` if the reader is still blocked at the
/// deadline.
fn collect(receiver: Option<Receiver<String>>, deadline: Instant) -> Option<String> {
    let Some(receiver) = receiver else {
        return Some(String::new());
    };
    match receiver.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(text) => Some(text),
        Err(RecvTimeoutError::Timeout) => None,
        Err(RecvTimeoutError::Disconnected) => Some(String::new()),
    }
}

pub(crate) fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let start = text
        .char_indices()
        .nth(count - max_chars)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &text[start..]
}
