//! rigtest - system-test runner
//! Runs the process-driven tests of a project and writes their results

mod commands;
mod logging;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

const DEFAULT_CONFIG: &str = "rigtest.toml";

#[derive(Parser)]
#[command(name = "rigtest")]
#[command(about = "Process-driven system test runner", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the tests of a project
    Run {
        /// Project file
        #[arg(short, long, env = "RIGTEST_CONFIG", default_value = DEFAULT_CONFIG)]
        config: PathBuf,

        /// Enable record writers (JSON, XML, JUnit, archives, ...)
        #[arg(long)]
        record: bool,

        /// Enable progress writers
        #[arg(long)]
        progress: bool,

        /// Output directory, overriding the project's outdir
        #[arg(long)]
        outdir: Option<String>,

        /// Number of times to run each test
        #[arg(long, default_value = "1")]
        cycles: u32,

        /// Tests to run concurrently (0 = one per CPU)
        #[arg(long, default_value = "1")]
        threads: usize,

        /// Extra key=value arguments passed to writers
        #[arg(short = 'X', value_name = "KEY=VALUE")]
        extra_args: Vec<String>,

        /// Test ids to run (default: all)
        tests: Vec<String>,
    },

    /// Run a single process with a timeout and report its exit status
    Exec {
        /// Timeout in seconds
        #[arg(long, default_value = "600")]
        timeout: u64,

        /// File to write stdout to
        #[arg(long)]
        stdout: Option<PathBuf>,

        /// File to write stderr to
        #[arg(long)]
        stderr: Option<PathBuf>,

        /// Expected exit status condition, e.g. "==0" or "!=0"
        #[arg(long, default_value = "==0")]
        expect_exit: String,

        /// Command and arguments
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let success = match cli.command {
        Commands::Run {
            config,
            record,
            progress,
            outdir,
            cycles,
            threads,
            extra_args,
            tests,
        } => {
            commands::run(commands::RunArgs {
                config,
                record,
                progress,
                outdir,
                cycles,
                threads,
                extra_args,
                tests,
            })
            .await?
        }
        Commands::Exec {
            timeout,
            stdout,
            stderr,
            expect_exit,
            command,
        } => commands::exec(timeout, stdout, stderr, &expect_exit, command).await?,
    };

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
