// Process monitor (Phase 3)
// reason: sysinfo for cross-platform per-process CPU and memory figures
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::{Pid, ProcessStatus, System};
use tokio::time::sleep;
use tracing::{debug, warn};

use rigtest_core::application::shutdown_channel;
use rigtest_core::port::{MonitorHandle, MonitorHandler, MonitorSample, ProcessMonitorLauncher};

use crate::host;

/// Samples a process with sysinfo at a fixed interval
pub struct SysinfoProcessMonitor {
    cpus: usize,
}

impl SysinfoProcessMonitor {
    pub fn new() -> Self {
        Self {
            cpus: host::cpu_count(),
        }
    }
}

impl Default for SysinfoProcessMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Refresh and read one process; None once it has gone
fn read_process(system: &mut System, pid: Pid) -> Option<(f32, u64, u64)> {
    if !system.refresh_process(pid) {
        return None;
    }
    let process = system.process(pid)?;
    if matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
        return None;
    }
    Some((
        process.cpu_usage(),
        process.memory() / 1024,
        process.virtual_memory() / 1024,
    ))
}

impl ProcessMonitorLauncher for SysinfoProcessMonitor {
    fn start(
        &self,
        pid: u32,
        interval: Duration,
        mut handlers: Vec<Box<dyn MonitorHandler>>,
    ) -> MonitorHandle {
        let (stop_tx, mut stop) = shutdown_channel();
        let cpus = self.cpus.max(1) as f32;

        let task = tokio::spawn(async move {
            for handler in handlers.iter_mut() {
                if let Err(e) = handler.setup() {
                    warn!(pid = pid, error = %e, "Process monitor handler setup failed");
                }
            }

            let mut system = System::new();
            let sys_pid = Pid::from_u32(pid);
            // first refresh only primes the CPU counters
            system.refresh_process(sys_pid);

            let mut sample = 0u64;
            loop {
                tokio::select! {
                    _ = stop.wait() => break,
                    _ = sleep(interval) => {}
                }
                let Some((cpu_core_pct, resident_kb, virtual_kb)) =
                    read_process(&mut system, sys_pid)
                else {
                    debug!(pid = pid, "Monitored process has gone; stopping sampling");
                    break;
                };

                sample += 1;
                let data = MonitorSample {
                    sample,
                    time: chrono::Local::now(),
                    cpu_core_pct,
                    cpu_total_pct: cpu_core_pct / cpus,
                    resident_kb,
                    virtual_kb,
                };
                for handler in handlers.iter_mut() {
                    if let Err(e) = handler.handle_sample(&data) {
                        warn!(pid = pid, error = %e, "Process monitor handler failed");
                    }
                }
            }

            for handler in handlers.iter_mut() {
                if let Err(e) = handler.cleanup() {
                    warn!(pid = pid, error = %e, "Process monitor handler cleanup failed");
                }
            }
            debug!(pid = pid, samples = sample, "Process monitor stopped");
        });

        MonitorHandle::new(stop_tx, task)
    }
}

/// A column of the monitor text file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorColumn {
    Time,
    Sample,
    CpuCore,
    CpuTotal,
    ResidentKb,
    VirtualKb,
}

impl MonitorColumn {
    pub fn header(&self) -> &'static str {
        match self {
            MonitorColumn::Time => "Time",
            MonitorColumn::Sample => "Sample",
            MonitorColumn::CpuCore => "CPU core %",
            MonitorColumn::CpuTotal => "CPU total %",
            MonitorColumn::ResidentKb => "Resident memory kB",
            MonitorColumn::VirtualKb => "Virtual memory kB",
        }
    }

    fn value(&self, sample: &MonitorSample) -> String {
        match self {
            MonitorColumn::Time => sample.time.format("%Y-%m-%d %H:%M:%S").to_string(),
            MonitorColumn::Sample => sample.sample.to_string(),
            MonitorColumn::CpuCore => format!("{:.0}", sample.cpu_core_pct),
            MonitorColumn::CpuTotal => format!("{:.0}", sample.cpu_total_pct),
            MonitorColumn::ResidentKb => sample.resident_kb.to_string(),
            MonitorColumn::VirtualKb => sample.virtual_kb.to_string(),
        }
    }
}

pub const DEFAULT_MONITOR_COLUMNS: &[MonitorColumn] = &[
    MonitorColumn::Time,
    MonitorColumn::CpuCore,
    MonitorColumn::ResidentKb,
    MonitorColumn::VirtualKb,
];

/// Writes samples as delimited lines, with a `#`-prefixed header row
pub struct TextFileMonitorHandler {
    path: PathBuf,
    columns: Vec<MonitorColumn>,
    delimiter: String,
    writer: Option<BufWriter<File>>,
}

impl TextFileMonitorHandler {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            columns: DEFAULT_MONITOR_COLUMNS.to_vec(),
            delimiter: "\t".to_string(),
            writer: None,
        }
    }

    pub fn with_columns(mut self, columns: Vec<MonitorColumn>) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }
}

impl MonitorHandler for TextFileMonitorHandler {
    fn setup(&mut self) -> std::io::Result<()> {
        let mut writer = BufWriter::new(File::create(&self.path)?);
        let header: Vec<&str> = self.columns.iter().map(MonitorColumn::header).collect();
        writeln!(writer, "#{}", header.join(&self.delimiter))?;
        writer.flush()?;
        self.writer = Some(writer);
        Ok(())
    }

    fn handle_sample(&mut self, sample: &MonitorSample) -> std::io::Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        let values: Vec<String> = self.columns.iter().map(|c| c.value(sample)).collect();
        writeln!(writer, "{}", values.join(&self.delimiter))?;
        // keep the file readable while the process runs
        writer.flush()
    }

    fn cleanup(&mut self) -> std::io::Result<()> {
        match self.writer.take() {
            Some(mut writer) => writer.flush(),
            None => Ok(()),
        }
    }
}
