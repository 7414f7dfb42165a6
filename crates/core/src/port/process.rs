// Process Lifecycle Port
// Abstraction over starting, waiting for and stopping external processes

use crate::domain::{ExitInfo, ProcessSpec};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Process errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessError {
    #[error("Working directory does not exist: {0}")]
    InvalidWorkingDir(PathBuf),

    #[error("Could not start {name}: {reason}")]
    SpawnFailed { name: String, reason: String },

    #[error("{name} timed out after {secs} seconds")]
    Timeout { name: String, secs: u64 },

    #[error("Interrupted while {0}")]
    Interrupted(String),

    #[error("{0} is not running")]
    NotRunning(String),

    #[error("Could not signal {name}: {reason}")]
    Signal { name: String, reason: String },

    #[error("{0} did not terminate after being stopped")]
    StopFailed(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ProcessError {
    fn from(err: std::io::Error) -> Self {
        ProcessError::Io(err.to_string())
    }
}

/// A started process
///
/// Implementations guard pid, exit info and stdin behind a single lock and
/// record the exit status from a dedicated monitoring task.
#[async_trait]
pub trait ManagedProcess: Send + Sync {
    /// OS process id, once started
    fn pid(&self) -> Option<u32>;

    fn display_name(&self) -> &str;

    fn spec(&self) -> &ProcessSpec;

    /// Exit details, or None while still running
    fn exit_info(&self) -> Option<ExitInfo>;

    fn exit_status(&self) -> Option<i32> {
        self.exit_info().map(|info| info.status)
    }

    /// True when a pid is known and no exit has been recorded
    fn running(&self) -> bool;

    /// Wait for the process to exit
    ///
    /// # Errors
    /// - ProcessError::Timeout past the deadline (the process is left running)
    /// - ProcessError::Interrupted if shutdown is requested meanwhile
    async fn wait(&self, timeout: Duration) -> Result<ExitInfo, ProcessError>;

    /// Terminate the process and its process group
    ///
    /// A soft stop that does not finish within `timeout` escalates to a hard
    /// kill and returns ProcessError::StopFailed. No-op if already exited.
    async fn stop(&self, timeout: Duration, hard: bool) -> Result<(), ProcessError>;

    /// Send an arbitrary signal (Unix only)
    fn signal(&self, sig: i32) -> Result<(), ProcessError>;

    /// Queue bytes for the process's stdin
    ///
    /// # Errors
    /// - ProcessError::NotRunning once the process has exited
    fn write_stdin(
        &self,
        data: &[u8],
        add_newline: bool,
        close_after: bool,
    ) -> Result<(), ProcessError>;
}

/// Process Launcher trait
///
/// Implementations:
/// - OsProcessLauncher: real OS processes with process-group cleanup
/// - mocks::ScriptedLauncher: canned behaviours for unit tests
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Start a process; foreground specs are also waited for
    ///
    /// # Errors
    /// - ProcessError::InvalidWorkingDir / SpawnFailed if the process cannot start
    /// - ProcessError::Timeout if a foreground process overruns (its tree is stopped first)
    async fn launch(&self, spec: ProcessSpec) -> Result<Arc<dyn ManagedProcess>, ProcessError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::domain::ProcessMode;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Canned behaviour of a mock process
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Exit immediately, writing `stdout` to the ProcessSpec stdout file if any
        Exit { status: i32, stdout: String },
        /// Die from a signal with a core dump
        CoreDump(i32),
        /// Never exit on its own
        Hang,
        /// Fail to start
        SpawnFail(String),
    }

    impl MockBehavior {
        pub fn exit(status: i32) -> Self {
            MockBehavior::Exit {
                status,
                stdout: String::new(),
            }
        }
    }

    #[derive(Debug, Default)]
    struct MockState {
        exit: Option<ExitInfo>,
        stdin: Vec<u8>,
        stdin_closed: bool,
        stops: usize,
    }

    /// Mock process driven by a MockBehavior
    pub struct MockProcess {
        spec: ProcessSpec,
        pid: u32,
        state: Mutex<MockState>,
    }

    impl MockProcess {
        fn new(spec: ProcessSpec, pid: u32, exit: Option<ExitInfo>) -> Self {
            Self {
                spec,
                pid,
                state: Mutex::new(MockState {
                    exit,
                    ..MockState::default()
                }),
            }
        }

        pub fn stdin_written(&self) -> Vec<u8> {
            self.state.lock().unwrap().stdin.clone()
        }

        pub fn stop_count(&self) -> usize {
            self.state.lock().unwrap().stops
        }
    }

    #[async_trait]
    impl ManagedProcess for MockProcess {
        fn pid(&self) -> Option<u32> {
            Some(self.pid)
        }

        fn display_name(&self) -> &str {
            &self.spec.display_name
        }

        fn spec(&self) -> &ProcessSpec {
            &self.spec
        }

        fn exit_info(&self) -> Option<ExitInfo> {
            self.state.lock().unwrap().exit
        }

        fn running(&self) -> bool {
            self.state.lock().unwrap().exit.is_none()
        }

        async fn wait(&self, timeout: Duration) -> Result<ExitInfo, ProcessError> {
            self.exit_info().ok_or_else(|| ProcessError::Timeout {
                name: self.spec.display_name.clone(),
                secs: timeout.as_secs(),
            })
        }

        async fn stop(&self, _timeout: Duration, _hard: bool) -> Result<(), ProcessError> {
            let mut state = self.state.lock().unwrap();
            state.stops += 1;
            if state.exit.is_none() {
                state.exit = Some(ExitInfo {
                    status: 15,
                    core_dumped: false,
                });
            }
            Ok(())
        }

        fn signal(&self, _sig: i32) -> Result<(), ProcessError> {
            Ok(())
        }

        fn write_stdin(
            &self,
            data: &[u8],
            add_newline: bool,
            close_after: bool,
        ) -> Result<(), ProcessError> {
            let mut state = self.state.lock().unwrap();
            if state.stdin_closed {
                return Err(ProcessError::Io(format!(
                    "stdin of {} is closed",
                    self.spec.display_name
                )));
            }
            state.stdin.extend_from_slice(data);
            if add_newline && !data.ends_with(b"\n") {
                state.stdin.push(b'\n');
            }
            state.stdin_closed = close_after;
            Ok(())
        }
    }

    /// Mock launcher returning canned processes keyed by display name
    pub struct ScriptedLauncher {
        default: MockBehavior,
        overrides: HashMap<String, MockBehavior>,
        launched: Mutex<Vec<Arc<MockProcess>>>,
    }

    impl ScriptedLauncher {
        pub fn new(default: MockBehavior) -> Self {
            Self {
                default,
                overrides: HashMap::new(),
                launched: Mutex::new(Vec::new()),
            }
        }

        pub fn with(mut self, display_name: impl Into<String>, behavior: MockBehavior) -> Self {
            self.overrides.insert(display_name.into(), behavior);
            self
        }

        pub fn launched(&self) -> Vec<Arc<MockProcess>> {
            self.launched.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProcessLauncher for ScriptedLauncher {
        async fn launch(&self, spec: ProcessSpec) -> Result<Arc<dyn ManagedProcess>, ProcessError> {
            let behavior = self
                .overrides
                .get(&spec.display_name)
                .unwrap_or(&self.default)
                .clone();

            let exit = match &behavior {
                MockBehavior::SpawnFail(reason) => {
                    return Err(ProcessError::SpawnFailed {
                        name: spec.display_name.clone(),
                        reason: reason.clone(),
                    })
                }
                MockBehavior::Exit { status, stdout } => {
                    if let Some(path) = &spec.stdout {
                        std::fs::write(path, stdout)?;
                    }
                    Some(ExitInfo {
                        status: *status,
                        core_dumped: false,
                    })
                }
                MockBehavior::CoreDump(sig) => Some(ExitInfo {
                    status: *sig,
                    core_dumped: true,
                }),
                MockBehavior::Hang => None,
            };

            let pid = 1000 + self.launched.lock().unwrap().len() as u32;
            let process = Arc::new(MockProcess::new(spec, pid, exit));
            self.launched.lock().unwrap().push(process.clone());

            if process.spec.mode == ProcessMode::Foreground && exit.is_none() {
                process.stop(Duration::ZERO, true).await?;
                return Err(ProcessError::Timeout {
                    name: process.spec.display_name.clone(),
                    secs: process.spec.timeout.as_secs(),
                });
            }
            Ok(process)
        }
    }
}
