// Process Monitor Port
// Periodic resource sampling of a running process

use crate::application::ShutdownSender;
use chrono::{DateTime, Local};
use std::time::Duration;
use tokio::task::JoinHandle;

/// One resource sample of a monitored process
#[derive(Debug, Clone)]
pub struct MonitorSample {
    /// 1-based sample number
    pub sample: u64,
    pub time: DateTime<Local>,
    /// CPU usage where 100 is one full core
    pub cpu_core_pct: f32,
    /// CPU usage as a share of all cores
    pub cpu_total_pct: f32,
    pub resident_kb: u64,
    pub virtual_kb: u64,
}

/// Consumer of monitor samples, e.g. a tab-separated file
pub trait MonitorHandler: Send {
    fn setup(&mut self) -> std::io::Result<()> {
        Ok(())
    }

    fn handle_sample(&mut self, sample: &MonitorSample) -> std::io::Result<()>;

    fn cleanup(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Starts a sampling task for a process
pub trait ProcessMonitorLauncher: Send + Sync {
    fn start(
        &self,
        pid: u32,
        interval: Duration,
        handlers: Vec<Box<dyn MonitorHandler>>,
    ) -> MonitorHandle;
}

/// Handle to a running monitor task
pub struct MonitorHandle {
    stop: ShutdownSender,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn new(stop: ShutdownSender, task: JoinHandle<()>) -> Self {
        Self { stop, task }
    }

    /// Stop sampling and wait for handler cleanup to finish
    pub async fn stop(self) {
        self.stop.shutdown();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Process monitor task failed");
        }
    }
}
