// Test Runner
// Runs process-driven test cases concurrently and feeds results to the pipeline.

use crate::application::constants::{RUN_LOG_FILE, WAIT_FOR_PROCESS_STOP};
use crate::application::{ProcessSupervisor, ResultsPipeline, ShutdownToken};
use crate::domain::{Outcome, ProcessSpec, TestCase, TestResult};
use crate::error::{AppError, Result};
use crate::port::{
    local_now, ManagedProcess, MonitorHandler, ProcessError, ProcessLauncher,
    ProcessMonitorLauncher, RunContext, TimeProvider,
};
use futures::stream::{self, StreamExt};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Builds the handlers for a process monitor writing under the given file path
pub type MonitorHandlerFactory =
    Arc<dyn Fn(&Path) -> std::io::Result<Vec<Box<dyn MonitorHandler>>> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub cycles: u32,
    pub threads: usize,
    pub output_root: PathBuf,
    /// Used when a test does not set its own timeout
    pub default_timeout: Duration,
}

/// Outcome counts for a whole run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub counts: BTreeMap<Outcome, usize>,
    pub not_started: usize,
    pub interrupted: bool,
}

impl RunSummary {
    pub fn count(&self, outcome: Outcome) -> usize {
        self.counts.get(&outcome).copied().unwrap_or(0)
    }

    pub fn failures(&self) -> usize {
        self.counts
            .iter()
            .filter(|(o, _)| o.is_failure())
            .map(|(_, n)| n)
            .sum()
    }

    pub fn is_success(&self) -> bool {
        !self.interrupted && self.failures() == 0
    }
}

struct MonitorSupport {
    launcher: Arc<dyn ProcessMonitorLauncher>,
    handlers: MonitorHandlerFactory,
}

pub struct TestRunner {
    launcher: Arc<dyn ProcessLauncher>,
    pipeline: Arc<ResultsPipeline>,
    shutdown: ShutdownToken,
    time: Arc<dyn TimeProvider>,
    monitor: Option<MonitorSupport>,
}

impl TestRunner {
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        pipeline: Arc<ResultsPipeline>,
        shutdown: ShutdownToken,
        time: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            launcher,
            pipeline,
            shutdown,
            time,
            monitor: None,
        }
    }

    /// Enable process monitoring for tests that set a monitor interval
    pub fn with_monitor(
        mut self,
        launcher: Arc<dyn ProcessMonitorLauncher>,
        handlers: MonitorHandlerFactory,
    ) -> Self {
        self.monitor = Some(MonitorSupport { launcher, handlers });
        self
    }

    /// Run every case for every cycle, at most `threads` at a time
    pub async fn run(
        &self,
        cases: &[TestCase],
        options: &RunOptions,
        ctx: &RunContext,
    ) -> Result<RunSummary> {
        let pipeline = self.pipeline.clone();
        let setup_ctx = ctx.clone();
        blocking(move || pipeline.setup(&setup_ctx)).await?;

        let jobs: Vec<(&TestCase, u32)> = (0..options.cycles.max(1))
            .flat_map(|cycle| cases.iter().map(move |case| (case, cycle)))
            .collect();
        let total = jobs.len();
        info!(tests = cases.len(), cycles = options.cycles, threads = options.threads, "Starting test run");

        let outcomes: Vec<Option<Outcome>> = stream::iter(jobs)
            .map(|(case, cycle)| self.run_one(case, cycle, options))
            .buffer_unordered(options.threads.max(1))
            .collect()
            .await;

        let mut summary = RunSummary::default();
        for outcome in outcomes.iter().flatten() {
            *summary.counts.entry(*outcome).or_default() += 1;
        }
        summary.not_started = total - outcomes.iter().flatten().count();
        summary.interrupted = self.shutdown.is_shutdown();
        if summary.interrupted {
            warn!(not_started = summary.not_started, "Test run terminated early");
        }

        let pipeline = self.pipeline.clone();
        blocking(move || pipeline.cleanup()).await?;

        info!(
            failures = summary.failures(),
            executed = total - summary.not_started,
            "Test run complete"
        );
        Ok(summary)
    }

    /// Run one test; None if it was never started
    async fn run_one(&self, case: &TestCase, cycle: u32, options: &RunOptions) -> Option<Outcome> {
        if self.shutdown.is_shutdown() {
            debug!(test_id = %case.id, "Not starting test after interrupt");
            return None;
        }
        let pipeline = self.pipeline.clone();
        let (id, c) = (case.id.clone(), cycle);
        if let Err(e) = blocking(move || pipeline.test_starting(&id, c)).await {
            warn!(error = %e, "Failed to notify writers of test start");
        }

        let result = self.execute(case, cycle, options).await;
        let outcome = result.outcome;
        info!(test_id = %case.id, cycle = cycle + 1, outcome = %outcome, reason = %result.outcome_reason, "Test finished");

        let pipeline = self.pipeline.clone();
        if let Err(e) = blocking(move || pipeline.process_result(&result)).await {
            warn!(error = %e, "Failed to deliver test result");
        }
        Some(outcome)
    }

    async fn execute(&self, case: &TestCase, cycle: u32, options: &RunOptions) -> TestResult {
        let start_millis = self.time.now_millis();
        let start_time = local_now(self.time.as_ref());
        let output_dir = output_dir_for(&options.output_root, &case.id, cycle, options.cycles);
        let mut log = RunLog::new(self.time.clone());

        log.info(format!("Id   : {}", case.id));
        if !case.title.is_empty() {
            log.info(format!("Title: {}", case.title));
        }
        if options.cycles > 1 {
            log.info(format!("Cycle: {}", cycle + 1));
        }

        let (outcome, reason) = match prepare_output_dir(&output_dir).await {
            Err(e) => (
                Outcome::Blocked,
                format!("Could not create output directory {}: {}", output_dir.display(), e),
            ),
            Ok(()) => match &case.skip {
                Some(reason) => (Outcome::Skipped, reason.clone()),
                None => self.execute_process(case, &output_dir, options, &mut log).await,
            },
        };

        log.info(format!("Test final outcome:  {}", outcome));
        if !reason.is_empty() {
            log.info(format!("Test outcome reason: {}", reason));
        }

        let run_log = log.text();
        if output_dir.is_dir() {
            if let Err(e) = tokio::fs::write(output_dir.join(RUN_LOG_FILE), &run_log).await {
                warn!(test_id = %case.id, error = %e, "Failed to write run log");
            }
        }

        TestResult {
            test_id: case.id.clone(),
            title: case.title.clone(),
            classname: case.classname.clone(),
            outcome,
            outcome_reason: reason,
            cycle,
            start_time,
            duration_secs: (self.time.now_millis() - start_millis).max(0) as f64 / 1000.0,
            test_dir: case.test_dir.clone(),
            test_file: case.test_file.clone(),
            output_dir,
            run_log,
        }
    }

    async fn execute_process(
        &self,
        case: &TestCase,
        output_dir: &Path,
        options: &RunOptions,
        log: &mut RunLog,
    ) -> (Outcome, String) {
        let (condition, environment) = match (case.exit_condition(), case.environment()) {
            (Ok(c), Ok(env)) => (c, env),
            (Err(e), _) | (_, Err(e)) => return (Outcome::Blocked, e.to_string()),
        };
        let timeout = case
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(options.default_timeout);

        let mut spec = ProcessSpec::new(&case.command, case.args.clone(), output_dir)
            .background()
            .with_timeout(timeout)
            .with_expected_exit_status(condition);
        spec.environment = environment;
        if let Some(name) = &case.display_name {
            spec = spec.with_display_name(name);
        }
        let display = spec.display_name.clone();
        let stdout_path = output_dir.join(format!("{}.out", display));
        spec = spec
            .with_stdout(&stdout_path)
            .with_stderr(output_dir.join(format!("{}.err", display)));

        let supervisor = ProcessSupervisor::new(self.launcher.clone(), self.shutdown.clone(), false);
        log.info(format!("Executing {}: {}", display, spec.command_line()));

        let process = match supervisor.start_process(spec).await {
            Ok(p) => p,
            Err(e) => return (Outcome::Blocked, error_reason(e)),
        };

        feed_stdin(process.as_ref(), &case.stdin, log);

        let monitor = match (&self.monitor, case.monitor_interval_secs, process.pid()) {
            (Some(support), Some(secs), Some(pid)) => {
                let file = output_dir.join(format!("monitor-{}.tsv", display));
                match (support.handlers)(&file) {
                    Ok(handlers) => Some(support.launcher.start(
                        pid,
                        Duration::from_secs_f64(secs),
                        handlers,
                    )),
                    Err(e) => {
                        warn!(test_id = %case.id, error = %e, "Could not create process monitor handlers");
                        None
                    }
                }
            }
            _ => None,
        };

        let waited = supervisor.wait_process(process.as_ref(), timeout).await;
        if matches!(waited, Ok(None)) {
            if let Err(e) = process.stop(WAIT_FOR_PROCESS_STOP, true).await {
                warn!(test_id = %case.id, error = %e, "Failed to kill timed out process");
            }
        }
        if let Some(handle) = monitor {
            handle.stop().await;
        }
        supervisor.cleanup().await;

        let exit = match waited {
            Ok(Some(exit)) => exit,
            Ok(None) => {
                let (outcome, reason) = supervisor
                    .outcomes()
                    .into_iter()
                    .next()
                    .unwrap_or((Outcome::TimedOut, format!("{} timed out", display)));
                log.warn(reason.clone());
                return (outcome, reason);
            }
            Err(e) => return (Outcome::Blocked, error_reason(e)),
        };
        log.info(format!("{} exited with status {}", display, exit.status));

        let mut outcomes: Vec<(Outcome, String)> = Vec::new();
        if exit.core_dumped {
            outcomes.push((
                Outcome::DumpedCore,
                format!("{} dumped core (signal {})", display, exit.status),
            ));
        } else if !condition.matches(exit.status) {
            let reason = if condition.expects_success() {
                format!("{} returned non-zero exit code {}", display, exit.status)
            } else {
                format!("{} returned exit code {} (expected {})", display, exit.status, condition)
            };
            outcomes.push((Outcome::Failed, reason));
        }

        match check_stdout(case, &stdout_path).await {
            Ok(mut problems) => outcomes.append(&mut problems),
            Err(e) => outcomes.push((Outcome::Blocked, error_reason(e))),
        }

        for (outcome, reason) in &outcomes {
            log.warn(format!("{}: {}", outcome, reason));
        }
        let overall = Outcome::combine(outcomes.iter().map(|(o, _)| *o));
        if outcomes.is_empty() {
            log.info("All checks passed".to_string());
            return (Outcome::Passed, String::new());
        }
        let reason = outcomes
            .into_iter()
            .find(|(o, _)| *o == overall)
            .map(|(_, r)| r)
            .unwrap_or_default();
        (overall, reason)
    }
}

fn feed_stdin(process: &dyn ManagedProcess, lines: &[String], log: &mut RunLog) {
    let last = lines.len().saturating_sub(1);
    let mut result = Ok(());
    for (i, line) in lines.iter().enumerate() {
        result = process.write_stdin(line.as_bytes(), true, i == last);
        if result.is_err() {
            break;
        }
    }
    if lines.is_empty() {
        result = process.write_stdin(&[], false, true);
    }
    if let Err(e) = result {
        // the process may legitimately exit before reading its input
        if !matches!(e, ProcessError::NotRunning(_)) {
            log.warn(format!("Could not write to stdin of {}: {}", process.display_name(), e));
        }
    }
}

async fn check_stdout(case: &TestCase, stdout: &Path) -> Result<Vec<(Outcome, String)>> {
    if case.expect_stdout.is_empty() && case.expect_stdout_absent.is_empty() {
        return Ok(Vec::new());
    }
    let file_name = stdout
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let bytes = match tokio::fs::read(stdout).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e.into()),
    };
    let text = String::from_utf8_lossy(&bytes);

    let mut problems = Vec::new();
    for pattern in &case.expect_stdout {
        let re = Regex::new(pattern)?;
        if !text.lines().any(|line| re.is_match(line)) {
            problems.push((
                Outcome::Failed,
                format!("Expected pattern not found in {}: {}", file_name, pattern),
            ));
        }
    }
    for pattern in &case.expect_stdout_absent {
        let re = Regex::new(pattern)?;
        if let Some(line) = text.lines().find(|line| re.is_match(line)) {
            problems.push((
                Outcome::Failed,
                format!("Unexpected pattern found in {}: {}", file_name, line.trim()),
            ));
        }
    }
    Ok(problems)
}

fn error_reason(err: AppError) -> String {
    match err {
        AppError::Aborted { reason, .. } => reason,
        AppError::Process(e) => e.to_string(),
        other => other.to_string(),
    }
}

/// `<root>/<id>`, or `<root>/<id>/cycleNNN` for multi-cycle runs
pub fn output_dir_for(root: &Path, test_id: &str, cycle: u32, cycles: u32) -> PathBuf {
    let dir = root.join(test_id);
    if cycles > 1 {
        dir.join(format!("cycle{:03}", cycle + 1))
    } else {
        dir
    }
}

async fn prepare_output_dir(dir: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    tokio::fs::create_dir_all(dir).await
}

async fn blocking<F>(f: F) -> Result<()>
where
    F: FnOnce() + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(format!("results writer task failed: {}", e)))
}

/// Per-test log captured into run.log
struct RunLog {
    time: Arc<dyn TimeProvider>,
    lines: Vec<String>,
}

impl RunLog {
    fn new(time: Arc<dyn TimeProvider>) -> Self {
        Self {
            time,
            lines: Vec::new(),
        }
    }

    fn info(&mut self, msg: String) {
        self.push("INFO ", msg);
    }

    fn warn(&mut self, msg: String) {
        self.push("WARN ", msg);
    }

    fn push(&mut self, level: &str, msg: String) {
        let now = local_now(self.time.as_ref());
        self.lines
            .push(format!("{} {} {}", now.format("%H:%M:%S"), level, msg));
    }

    fn text(&self) -> String {
        let mut text = self.lines.join("\n");
        text.push('\n');
        text
    }
}
