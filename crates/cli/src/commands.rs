// Command implementations: DI wiring for `run` and `exec`

use anyhow::{bail, Context, Result};
use colored::Colorize;
use rigtest_core::application::{
    shutdown_channel, MonitorHandlerFactory, ProcessSupervisor, ResultsPipeline, RunOptions,
    ShutdownSender, TestRunner,
};
use rigtest_core::config::{LoadContext, ProjectConfig};
use rigtest_core::domain::{ExitStatusCondition, RunDetails};
use rigtest_core::port::{MonitorHandler, RunContext, SystemTimeProvider};
use rigtest_core::AppError;
use rigtest_infra_system::{host, OsProcessLauncher, SysinfoProcessMonitor, TextFileMonitorHandler};
use rigtest_infra_writers::build_writers;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::logging;

pub struct RunArgs {
    pub config: PathBuf,
    pub record: bool,
    pub progress: bool,
    pub outdir: Option<String>,
    pub cycles: u32,
    pub threads: usize,
    pub extra_args: Vec<String>,
    pub tests: Vec<String>,
}

/// `KEY=VALUE` pairs from `-X`; a bare `KEY` means `KEY=true`
pub fn parse_extra_args(args: &[String]) -> Result<BTreeMap<String, String>> {
    let mut parsed = BTreeMap::new();
    for arg in args {
        let (key, value) = arg.split_once('=').unwrap_or((arg.as_str(), "true"));
        let key = key.trim();
        if key.is_empty() {
            bail!("invalid -X argument \"{}\": expected KEY=VALUE", arg);
        }
        parsed.insert(key.to_string(), value.to_string());
    }
    Ok(parsed)
}

/// Signal `sender` on the first Ctrl+C
fn handle_ctrl_c(sender: ShutdownSender) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping running tests");
            sender.shutdown();
        }
    });
}

fn monitor_handlers() -> MonitorHandlerFactory {
    Arc::new(|path: &Path| -> std::io::Result<Vec<Box<dyn MonitorHandler>>> {
        let handler: Box<dyn MonitorHandler> = Box::new(TextFileMonitorHandler::new(path));
        Ok(vec![handler])
    })
}

/// Run the selected tests of a project; true when nothing failed
pub async fn run(args: RunArgs) -> Result<bool> {
    let hostname = host::hostname();
    let mut load = LoadContext::new(hostname.clone());
    load.outdir = args.outdir.clone();
    let project = ProjectConfig::load(&args.config, &load)
        .with_context(|| format!("Failed to load project {}", args.config.display()))?;

    let _guard = logging::init(Some(project.output_root.as_path()))?;
    info!(
        project = %project.name,
        version = rigtest_core::VERSION,
        output = %project.output_root.display(),
        "rigtest starting"
    );

    let cases = project.select_tests(&args.tests)?;
    let extra_args = parse_extra_args(&args.extra_args)?;
    let threads = if args.threads == 0 {
        host::cpu_count()
    } else {
        args.threads
    };
    let cycles = args.cycles.max(1);

    let mut run_details = RunDetails::new();
    run_details.insert("outDirName", project.out_dir_name.as_str());
    run_details.insert("hostname", hostname);
    run_details.insert("os", host::os_description());
    run_details.insert("cpuCount", host::cpu_count().to_string());
    run_details.insert("startTime", load.start.format("%Y-%m-%d %H:%M:%S").to_string());
    if !extra_args.is_empty() {
        let xargs: Vec<String> = extra_args.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        run_details.insert("xargs", xargs.join(", "));
    }

    let (sender, shutdown) = shutdown_channel();
    handle_ctrl_c(sender);

    // DI wiring
    let writers = build_writers(&project.writers).context("Invalid writer configuration")?;
    let pipeline = Arc::new(ResultsPipeline::new(
        writers,
        args.record,
        args.progress,
        project.category_include_regex.as_deref(),
    )?);
    let launcher = Arc::new(OsProcessLauncher::new(
        project.env_allowlist.clone(),
        shutdown.clone(),
    ));
    let runner = TestRunner::new(
        launcher,
        pipeline,
        shutdown.clone(),
        Arc::new(SystemTimeProvider),
    )
    .with_monitor(Arc::new(SysinfoProcessMonitor::new()), monitor_handlers());

    let ctx = RunContext {
        num_tests: cases.len(),
        cycles,
        threads,
        test_root: project.test_root.clone(),
        output_root: project.output_root.clone(),
        out_dir_name: project.out_dir_name.clone(),
        run_details,
        extra_args,
        record: args.record,
        properties: project.properties.clone(),
        shutdown,
    };
    let options = RunOptions {
        cycles,
        threads,
        output_root: project.output_root.clone(),
        default_timeout: project.default_timeout,
    };

    let summary = runner.run(&cases, &options, &ctx).await?;
    Ok(summary.is_success())
}

/// Run one process in the foreground; true when its exit status was as expected
pub async fn exec(
    timeout: u64,
    stdout: Option<PathBuf>,
    stderr: Option<PathBuf>,
    expect_exit: &str,
    command: Vec<String>,
) -> Result<bool> {
    let _guard = logging::init(None)?;

    let mut parts = command.into_iter();
    let program = parts.next().context("No command given")?;
    let mut spec = rigtest_core::domain::ProcessSpec::new(
        program,
        parts.collect(),
        std::env::current_dir()?,
    )
    .with_timeout(Duration::from_secs(timeout))
    .with_expected_exit_status(ExitStatusCondition::parse(expect_exit)?);
    if let Some(path) = stdout {
        spec = spec.with_stdout(path);
    }
    if let Some(path) = stderr {
        spec = spec.with_stderr(path);
    }

    let (sender, shutdown) = shutdown_channel();
    handle_ctrl_c(sender);
    let launcher = Arc::new(OsProcessLauncher::new(Vec::new(), shutdown.clone()));
    let supervisor = ProcessSupervisor::new(launcher, shutdown, true);

    let started = supervisor.start_process(spec).await;
    supervisor.cleanup().await;

    match started {
        Ok(process) => {
            let status = process
                .exit_status()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            println!(
                "{} {} exited with status {}",
                "✓".green(),
                process.display_name().bold(),
                status
            );
            Ok(true)
        }
        Err(AppError::Aborted { outcome, reason }) => {
            println!("{}", format!("{}: {}", outcome, reason).red().bold());
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_extra_args() {
        let args = vec!["mode=fast".to_string(), "verbose".to_string(), "url=a=b".to_string()];
        let parsed = parse_extra_args(&args).unwrap();
        assert_eq!(parsed.get("mode").map(String::as_str), Some("fast"));
        assert_eq!(parsed.get("verbose").map(String::as_str), Some("true"));
        assert_eq!(parsed.get("url").map(String::as_str), Some("a=b"));

        assert!(parse_extra_args(&["=x".to_string()]).is_err());
    }
}
