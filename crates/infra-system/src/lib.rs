// rigtest Infrastructure - System Adapters
// Implements: ProcessLauncher, ProcessMonitorLauncher

pub mod host;
mod platform;
pub mod process;
pub mod process_monitor;

pub use process::{OsProcess, OsProcessLauncher, DEFAULT_ENV_ALLOWLIST};
pub use process_monitor::{
    MonitorColumn, SysinfoProcessMonitor, TextFileMonitorHandler, DEFAULT_MONITOR_COLUMNS,
};
