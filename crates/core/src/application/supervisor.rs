// Process Supervisor
// Starts processes for a test, records timeout/exit-status outcomes and
// guarantees background processes are stopped at cleanup.

use crate::application::constants::WAIT_FOR_PROCESS_STOP;
use crate::application::ShutdownToken;
use crate::domain::{ExitInfo, Outcome, ProcessMode, ProcessSpec};
use crate::error::{AppError, Result};
use crate::port::{ManagedProcess, ProcessError, ProcessLauncher};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct ProcessSupervisor {
    launcher: Arc<dyn ProcessLauncher>,
    shutdown: ShutdownToken,
    abort_on_error: bool,
    processes: Mutex<Vec<Arc<dyn ManagedProcess>>>,
    outcomes: Mutex<Vec<(Outcome, String)>>,
}

impl ProcessSupervisor {
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        shutdown: ShutdownToken,
        abort_on_error: bool,
    ) -> Self {
        Self {
            launcher,
            shutdown,
            abort_on_error,
            processes: Mutex::new(Vec::new()),
            outcomes: Mutex::new(Vec::new()),
        }
    }

    /// Start a process and track it until cleanup
    ///
    /// Foreground processes are waited for here so that a timeout or an
    /// unexpected exit status can be recorded against the returned handle.
    pub async fn start_process(&self, spec: ProcessSpec) -> Result<Arc<dyn ManagedProcess>> {
        if self.shutdown.is_shutdown() {
            return Err(ProcessError::Interrupted(format!(
                "starting {}",
                spec.display_name
            ))
            .into());
        }

        let foreground = spec.mode == ProcessMode::Foreground;
        let timeout = spec.timeout;
        let mut launch_spec = spec;
        launch_spec.mode = ProcessMode::Background;

        let process = self.launcher.launch(launch_spec).await?;
        self.lock_processes().push(process.clone());

        if foreground {
            info!(
                process = %process.display_name(),
                pid = ?process.pid(),
                "Executing process in foreground"
            );
            match process.wait(timeout).await {
                Ok(exit) => self.check_exit_status(process.as_ref(), exit)?,
                Err(ProcessError::Timeout { .. }) => {
                    if let Err(e) = process.stop(WAIT_FOR_PROCESS_STOP, true).await {
                        warn!(process = %process.display_name(), error = %e, "Failed to stop timed out process");
                    }
                    self.timed_out(process.as_ref(), timeout)?;
                }
                Err(e) => return Err(e.into()),
            }
        } else {
            info!(
                process = %process.display_name(),
                pid = ?process.pid(),
                "Started background process"
            );
        }
        Ok(process)
    }

    /// Wait for a process to exit, recording TIMED OUT if it overruns
    ///
    /// Returns None on a timeout that did not abort. The process is left running.
    pub async fn wait_process(
        &self,
        process: &dyn ManagedProcess,
        timeout: Duration,
    ) -> Result<Option<ExitInfo>> {
        match process.wait(timeout).await {
            Ok(exit) => {
                debug!(process = %process.display_name(), status = exit.status, "Process exited");
                Ok(Some(exit))
            }
            Err(ProcessError::Timeout { .. }) => {
                self.timed_out(process, timeout)?;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Stop every tracked process that is still running
    ///
    /// Soft stop first, then hard; errors are only logged. Safe to call twice.
    pub async fn cleanup(&self) {
        let processes: Vec<_> = std::mem::take(&mut *self.lock_processes());
        for process in processes.iter().filter(|p| p.running()) {
            info!(process = %process.display_name(), pid = ?process.pid(), "Stopping process during cleanup");
            if let Err(e) = process.stop(WAIT_FOR_PROCESS_STOP, false).await {
                warn!(process = %process.display_name(), error = %e, "Soft stop failed; killing");
                if let Err(e) = process.stop(WAIT_FOR_PROCESS_STOP, true).await {
                    warn!(process = %process.display_name(), error = %e, "Failed to kill process");
                }
            }
        }
    }

    pub fn add_outcome(&self, outcome: Outcome, reason: impl Into<String>) {
        let reason = reason.into();
        if outcome.is_failure() {
            warn!(outcome = %outcome, reason = %reason, "Adding failure outcome");
        } else {
            debug!(outcome = %outcome, reason = %reason, "Adding outcome");
        }
        self.outcomes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((outcome, reason));
    }

    /// Outcomes recorded so far, in order
    pub fn outcomes(&self) -> Vec<(Outcome, String)> {
        self.outcomes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn process_count(&self) -> usize {
        self.lock_processes().len()
    }

    fn lock_processes(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn ManagedProcess>>> {
        self.processes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn timed_out(&self, process: &dyn ManagedProcess, timeout: Duration) -> Result<()> {
        let reason = format!(
            "{} timed out after {} seconds",
            process.display_name(),
            timeout.as_secs()
        );
        self.record(Outcome::TimedOut, reason)
    }

    fn check_exit_status(&self, process: &dyn ManagedProcess, exit: ExitInfo) -> Result<()> {
        let expected = process.spec().expected_exit_status;
        if expected.matches(exit.status) {
            debug!(process = %process.display_name(), status = exit.status, "Process completed");
            return Ok(());
        }
        let reason = if expected.expects_success() {
            format!(
                "{} returned non-zero exit code {}",
                process.display_name(),
                exit.status
            )
        } else {
            format!(
                "{} returned exit code {} (expected {})",
                process.display_name(),
                exit.status,
                expected
            )
        };
        self.record(Outcome::Blocked, reason)
    }

    fn record(&self, outcome: Outcome, reason: String) -> Result<()> {
        self.add_outcome(outcome, reason.clone());
        if self.abort_on_error {
            Err(AppError::Aborted { outcome, reason })
        } else {
            Ok(())
        }
    }
}
