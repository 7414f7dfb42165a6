// Port Layer - Interfaces for external dependencies

pub mod monitor;
pub mod process;
pub mod results_writer;
pub mod time_provider;

// Re-exports
pub use monitor::{MonitorHandle, MonitorHandler, MonitorSample, ProcessMonitorLauncher};
pub use process::{ManagedProcess, ProcessError, ProcessLauncher};
pub use results_writer::{
    Artifact, Artifacts, ResultsWriter, RunContext, WriterError, WriterKind, WriterResult,
};
pub use time_provider::{local_now, SystemTimeProvider, TimeProvider};
