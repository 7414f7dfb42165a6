// OS process wrapper
// reason: tokio::process for async child management, nix for process-group signals
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use rigtest_core::application::constants::{
    DISABLE_PROCESS_GROUP_CLEANUP_ENV, LONG_WAIT_LOG_AFTER, PROCESS_POLL_INTERVAL,
    WAIT_FOR_PROCESS_STOP,
};
use rigtest_core::application::ShutdownToken;
use rigtest_core::domain::{ExitInfo, ProcessMode, ProcessSpec};
use rigtest_core::port::{ManagedProcess, ProcessError, ProcessLauncher};

use crate::platform;

/// Parent environment variables every process inherits
pub const DEFAULT_ENV_ALLOWLIST: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LOGNAME",
    "LANG",
    "LC_ALL",
    "TZ",
    "TMPDIR",
    "TEMP",
    "TMP",
    "LD_LIBRARY_PATH",
    "DYLD_LIBRARY_PATH",
    "SYSTEMROOT",
    "SYSTEMDRIVE",
    "WINDIR",
    "COMSPEC",
    "PATHEXT",
    "USERPROFILE",
];

enum StdinMessage {
    Data(Vec<u8>),
    Eof,
}

/// Everything guarded by the per-process lock
struct ProcessState {
    pid: Option<u32>,
    exit: Option<ExitInfo>,
    stdin: Option<mpsc::UnboundedSender<StdinMessage>>,
}

/// Launches real OS processes, each in its own process group
pub struct OsProcessLauncher {
    env_allowlist: Vec<String>,
    shutdown: ShutdownToken,
    group_cleanup: bool,
}

impl OsProcessLauncher {
    /// Create a launcher
    ///
    /// # Arguments
    /// * `extra_allowlist` - Parent environment variables to pass through in
    ///   addition to DEFAULT_ENV_ALLOWLIST
    /// * `shutdown` - Interrupt token; no process starts once it fires
    pub fn new(extra_allowlist: Vec<String>, shutdown: ShutdownToken) -> Self {
        let mut env_allowlist: Vec<String> =
            DEFAULT_ENV_ALLOWLIST.iter().map(|s| s.to_string()).collect();
        env_allowlist.extend(extra_allowlist);

        let group_cleanup = !std::env::var(DISABLE_PROCESS_GROUP_CLEANUP_ENV)
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);

        Self {
            env_allowlist,
            shutdown,
            group_cleanup,
        }
    }

    /// Filter environment variables to allowlist only
    fn filter_env<I>(&self, env: I) -> BTreeMap<String, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        env.into_iter()
            .filter(|(k, _)| {
                self.env_allowlist
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(k))
            })
            .collect()
    }

    /// Allowlisted parent variables, overridden by the ProcessSpec environment
    fn build_env(&self, spec: &ProcessSpec) -> BTreeMap<String, String> {
        let mut env = self.filter_env(std::env::vars());
        env.extend(spec.environment.clone());
        env
    }
}

fn open_output(path: Option<&Path>) -> Result<Stdio, ProcessError> {
    match path {
        None => Ok(Stdio::null()),
        Some(path) => {
            let file = File::create(path).map_err(|e| {
                ProcessError::Io(format!("cannot open {}: {}", path.display(), e))
            })?;
            Ok(Stdio::from(file))
        }
    }
}

fn log_parameters(spec: &ProcessSpec, env: &BTreeMap<String, String>) {
    debug!(process = %spec.display_name, command_line = %spec.command_line(), "Process parameters");
    debug!(process = %spec.display_name, command = %spec.command.display(), "  command");
    for (i, arg) in spec.arguments.iter().enumerate() {
        debug!(process = %spec.display_name, index = i + 1, arg = %arg, "  argument");
    }
    debug!(process = %spec.display_name, working_dir = %spec.working_dir.display(), "  working dir");
    debug!(process = %spec.display_name, stdout = ?spec.stdout, stderr = ?spec.stderr, "  output");

    for (name, value) in env {
        if std::env::var(name).ok().as_deref() == Some(value.as_str()) {
            continue;
        }
        if is_path_like(name, value) {
            for (i, element) in std::env::split_paths(value).enumerate() {
                debug!(process = %spec.display_name, name = %name, index = i + 1, element = %element.display(), "  environment");
            }
        } else {
            debug!(process = %spec.display_name, name = %name, value = %value, "  environment");
        }
    }
}

fn is_path_like(name: &str, value: &str) -> bool {
    let separator = if cfg!(windows) { ';' } else { ':' };
    name.to_ascii_uppercase().ends_with("PATH") && value.contains(separator)
}

#[cfg(unix)]
fn exit_info(status: std::process::ExitStatus) -> ExitInfo {
    use std::os::unix::process::ExitStatusExt;

    ExitInfo {
        status: status.code().or_else(|| status.signal()).unwrap_or(-1),
        core_dumped: status.core_dumped(),
    }
}

#[cfg(not(unix))]
fn exit_info(status: std::process::ExitStatus) -> ExitInfo {
    ExitInfo {
        status: status.code().unwrap_or(-1),
        core_dumped: false,
    }
}

/// Feed queued stdin messages to the child until EOF or the queue closes
fn spawn_stdin_writer(
    name: String,
    stdin: Option<ChildStdin>,
    mut rx: mpsc::UnboundedReceiver<StdinMessage>,
) {
    tokio::spawn(async move {
        let Some(mut stdin) = stdin else { return };
        while let Some(message) = rx.recv().await {
            match message {
                StdinMessage::Data(bytes) => {
                    if let Err(e) = stdin.write_all(&bytes).await {
                        debug!(process = %name, error = %e, "Stdin write failed");
                        break;
                    }
                    if let Err(e) = stdin.flush().await {
                        debug!(process = %name, error = %e, "Stdin flush failed");
                        break;
                    }
                }
                StdinMessage::Eof => break,
            }
        }
        debug!(process = %name, "Closing stdin");
    });
}

#[async_trait]
impl ProcessLauncher for OsProcessLauncher {
    async fn launch(&self, spec: ProcessSpec) -> Result<Arc<dyn ManagedProcess>, ProcessError> {
        if !spec.working_dir.is_dir() {
            return Err(ProcessError::InvalidWorkingDir(spec.working_dir.clone()));
        }
        if self.shutdown.is_shutdown() {
            return Err(ProcessError::Interrupted(format!(
                "starting {}",
                spec.display_name
            )));
        }

        let stdout = open_output(spec.stdout.as_deref())?;
        let stderr = open_output(spec.stderr.as_deref())?;
        let env = self.build_env(&spec);
        log_parameters(&spec, &env);

        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.arguments)
            .current_dir(&spec.working_dir)
            .env_clear()
            .envs(&env)
            .stdin(Stdio::piped())
            .stdout(stdout)
            .stderr(stderr);

        let group = self.group_cleanup && !spec.disable_child_cleanup;
        #[cfg(unix)]
        if group {
            // pgid = pid, so the whole tree can be signalled together
            cmd.process_group(0);
        }
        #[cfg(windows)]
        cmd.creation_flags(platform::CREATE_NEW_PROCESS_GROUP);

        let mut child = cmd.spawn().map_err(|e| ProcessError::SpawnFailed {
            name: spec.display_name.clone(),
            reason: e.to_string(),
        })?;

        let pid = child.id();
        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        spawn_stdin_writer(spec.display_name.clone(), child.stdin.take(), stdin_rx);

        let state = Arc::new(Mutex::new(ProcessState {
            pid,
            exit: None,
            stdin: Some(stdin_tx),
        }));
        let (exit_tx, exit_rx) = watch::channel(false);

        // monitoring task: owns the child and records its exit
        let monitor_state = state.clone();
        let name = spec.display_name.clone();
        tokio::spawn(async move {
            let exit = match child.wait().await {
                Ok(status) => exit_info(status),
                Err(e) => {
                    warn!(process = %name, error = %e, "Failed to wait for process");
                    ExitInfo {
                        status: -1,
                        core_dumped: false,
                    }
                }
            };
            {
                let mut state = monitor_state.lock().unwrap_or_else(|e| e.into_inner());
                state.exit = Some(exit);
                // dropping the sender ends the stdin writer
                state.stdin = None;
            }
            debug!(process = %name, status = exit.status, core_dumped = exit.core_dumped, "Process exited");
            let _ = exit_tx.send(true);
        });

        let process = Arc::new(OsProcess {
            spec,
            state,
            exited: exit_rx,
            shutdown: self.shutdown.clone(),
            group,
        });

        info!(
            process = %process.spec.display_name,
            pid = ?pid,
            mode = %process.spec.mode,
            "Started process"
        );

        if process.spec.mode == ProcessMode::Foreground {
            let timeout = process.spec.timeout;
            match process.wait(timeout).await {
                Ok(_) => {}
                Err(ProcessError::Timeout { name, secs }) => {
                    warn!(process = %name, timeout_secs = secs, "Foreground process timed out; killing process tree");
                    if let Err(e) = process.stop(WAIT_FOR_PROCESS_STOP, true).await {
                        warn!(process = %name, error = %e, "Failed to kill timed out process");
                    }
                    return Err(ProcessError::Timeout { name, secs });
                }
                Err(e) => return Err(e),
            }
        }

        Ok(process)
    }
}

/// A process started by OsProcessLauncher
pub struct OsProcess {
    spec: ProcessSpec,
    state: Arc<Mutex<ProcessState>>,
    exited: watch::Receiver<bool>,
    shutdown: ShutdownToken,
    /// Whether the process leads its own process group
    group: bool,
}

impl OsProcess {
    fn lock(&self) -> MutexGuard<'_, ProcessState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn wait_inner(
        &self,
        timeout: Duration,
        interruptible: bool,
    ) -> Result<ExitInfo, ProcessError> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut exited = self.exited.clone();
        let mut shutdown = self.shutdown.clone();
        let mut logged = false;

        loop {
            if let Some(exit) = self.lock().exit {
                return Ok(exit);
            }
            if interruptible && shutdown.is_shutdown() {
                return Err(ProcessError::Interrupted(format!(
                    "waiting for {}",
                    self.spec.display_name
                )));
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ProcessError::Timeout {
                    name: self.spec.display_name.clone(),
                    secs: timeout.as_secs(),
                });
            }
            if !logged && now - started >= LONG_WAIT_LOG_AFTER {
                info!(process = %self.spec.display_name, timeout_secs = timeout.as_secs(), "Still waiting for process to terminate");
                logged = true;
            }

            let poll = PROCESS_POLL_INTERVAL.min(deadline - now);
            tokio::select! {
                changed = exited.changed() => {
                    if changed.is_err() {
                        sleep(poll).await;
                    }
                }
                _ = sleep(poll) => {}
                _ = shutdown.wait(), if interruptible => {}
            }
        }
    }

    #[cfg(unix)]
    fn send_tree(&self, pid: u32, hard: bool) -> Result<(), ProcessError> {
        use nix::sys::signal::Signal;

        let signal = if hard { Signal::SIGKILL } else { Signal::SIGTERM };
        platform::signal_tree(pid, signal, self.group).map_err(|e| ProcessError::Signal {
            name: self.spec.display_name.clone(),
            reason: e.to_string(),
        })
    }

    #[cfg(windows)]
    fn send_tree(&self, pid: u32, _hard: bool) -> Result<(), ProcessError> {
        platform::taskkill_tree(pid).map_err(|e| ProcessError::Signal {
            name: self.spec.display_name.clone(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl ManagedProcess for OsProcess {
    fn pid(&self) -> Option<u32> {
        self.lock().pid
    }

    fn display_name(&self) -> &str {
        &self.spec.display_name
    }

    fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    fn exit_info(&self) -> Option<ExitInfo> {
        self.lock().exit
    }

    fn running(&self) -> bool {
        let state = self.lock();
        state.pid.is_some() && state.exit.is_none()
    }

    async fn wait(&self, timeout: Duration) -> Result<ExitInfo, ProcessError> {
        self.wait_inner(timeout, true).await
    }

    async fn stop(&self, timeout: Duration, hard: bool) -> Result<(), ProcessError> {
        let pid = {
            let state = self.lock();
            match (state.pid, state.exit) {
                (Some(pid), None) => pid,
                _ => return Ok(()),
            }
        };

        info!(process = %self.spec.display_name, pid = pid, hard = hard, "Stopping process");
        self.send_tree(pid, hard)?;

        if self.wait_inner(timeout, false).await.is_ok() {
            return Ok(());
        }

        if !hard {
            warn!(process = %self.spec.display_name, pid = pid, "Process did not stop after SIGTERM; sending SIGKILL");
            if let Err(e) = self.send_tree(pid, true) {
                warn!(process = %self.spec.display_name, error = %e, "Failed to kill process");
            }
            let _ = self.wait_inner(timeout, false).await;
        }
        Err(ProcessError::StopFailed(self.spec.display_name.clone()))
    }

    #[cfg(unix)]
    fn signal(&self, sig: i32) -> Result<(), ProcessError> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let err = |reason: String| ProcessError::Signal {
            name: self.spec.display_name.clone(),
            reason,
        };
        let pid = match (self.pid(), self.exit_info()) {
            (Some(pid), None) => pid,
            _ => return Err(ProcessError::NotRunning(self.spec.display_name.clone())),
        };
        let signal = Signal::try_from(sig).map_err(|e| err(e.to_string()))?;
        kill(Pid::from_raw(pid as i32), signal).map_err(|e| err(e.to_string()))
    }

    #[cfg(not(unix))]
    fn signal(&self, _sig: i32) -> Result<(), ProcessError> {
        Err(ProcessError::Signal {
            name: self.spec.display_name.clone(),
            reason: "signals are not supported on this platform".to_string(),
        })
    }

    fn write_stdin(
        &self,
        data: &[u8],
        add_newline: bool,
        close_after: bool,
    ) -> Result<(), ProcessError> {
        let mut state = self.lock();
        if state.exit.is_some() {
            return Err(ProcessError::NotRunning(self.spec.display_name.clone()));
        }
        let sender = state.stdin.as_ref().ok_or_else(|| {
            ProcessError::Io(format!("stdin of {} is closed", self.spec.display_name))
        })?;

        let mut bytes = data.to_vec();
        if add_newline && !bytes.ends_with(b"\n") {
            bytes.push(b'\n');
        }
        let closed = || ProcessError::NotRunning(self.spec.display_name.clone());
        if !bytes.is_empty() {
            sender.send(StdinMessage::Data(bytes)).map_err(|_| closed())?;
        }
        if close_after {
            sender.send(StdinMessage::Eof).map_err(|_| closed())?;
            state.stdin = None;
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use rigtest_core::application::shutdown_channel;
    use rigtest_core::domain::ExitStatusCondition;
    use std::collections::HashMap;

    fn launcher() -> OsProcessLauncher {
        OsProcessLauncher::new(vec![], ShutdownToken::never())
    }

    fn sh(script: &str, dir: &Path) -> ProcessSpec {
        ProcessSpec::new("sh", vec!["-c".to_string(), script.to_string()], dir)
            .with_timeout(Duration::from_secs(10))
    }

    /// Zombies count as dead; the reaper may be slow inside containers
    #[cfg(target_os = "linux")]
    fn pid_alive(pid: i32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .map(|rest| !rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    #[tokio::test]
    async fn test_foreground_exit_status_and_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("sh.out");
        let spec = sh("echo hello; exit 3", dir.path())
            .with_stdout(&out)
            .with_expected_exit_status(ExitStatusCondition::parse("==3").unwrap());

        let process = tokio_test::assert_ok!(launcher().launch(spec).await);

        assert_eq!(process.exit_status(), Some(3));
        assert!(!process.running());
        assert_eq!(std::fs::read_to_string(out).unwrap(), "hello\n");
    }

    #[tokio::test]
    async fn test_invalid_working_dir() {
        let spec = sh("true", Path::new("/nonexistent/rigtest-dir"));
        let err = launcher().launch(spec).await.err().unwrap();
        assert!(matches!(err, ProcessError::InvalidWorkingDir(_)));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let dir = tempfile::tempdir().unwrap();
        let spec = ProcessSpec::new("/nonexistent/binary", vec![], dir.path());
        let err = launcher().launch(spec).await.err().unwrap();
        assert!(matches!(err, ProcessError::SpawnFailed { .. }));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_foreground_timeout_kills_tree() {
        let dir = tempfile::tempdir().unwrap();
        let pidfile = dir.path().join("grandchild.pid");
        let script = format!("sleep 30 & echo $! > {}; wait", pidfile.display());
        let spec = sh(&script, dir.path()).with_timeout(Duration::from_millis(500));

        let err = launcher().launch(spec).await.err().unwrap();
        assert!(matches!(err, ProcessError::Timeout { .. }));

        let grandchild: i32 = std::fs::read_to_string(&pidfile)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        // give the kernel a moment to reap
        for _ in 0..40 {
            if !pid_alive(grandchild) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!pid_alive(grandchild));
    }

    #[tokio::test]
    async fn test_wait_timeout_leaves_process_running() {
        let dir = tempfile::tempdir().unwrap();
        let process = launcher()
            .launch(sh("sleep 30", dir.path()).background())
            .await
            .unwrap();

        let err = process.wait(Duration::from_millis(200)).await.unwrap_err();
        assert!(matches!(err, ProcessError::Timeout { .. }));
        assert!(process.running());

        process.stop(Duration::from_secs(5), false).await.unwrap();
        assert!(!process.running());
        assert_eq!(process.exit_status(), Some(15));
    }

    #[tokio::test]
    async fn test_signal_terminates_background_process() {
        let dir = tempfile::tempdir().unwrap();
        let spec = ProcessSpec::new("sleep", vec!["30".to_string()], dir.path())
            .background()
            .with_timeout(Duration::from_secs(10));
        let process = launcher().launch(spec).await.unwrap();
        assert!(process.running());

        tokio_test::assert_ok!(process.signal(15));
        let exit = process.wait(Duration::from_secs(5)).await.unwrap();
        assert_ne!(exit.status, 0);
        assert_eq!(exit.status, 15);
        assert!(!process.running());

        let err = process.signal(15).unwrap_err();
        assert!(matches!(err, ProcessError::NotRunning(_)));
    }

    #[tokio::test]
    async fn test_soft_stop_of_term_ignoring_process_escalates() {
        let dir = tempfile::tempdir().unwrap();
        let ready = dir.path().join("ready");
        let script = format!("trap '' TERM; touch {}; while true; do sleep 0.1; done", ready.display());
        let process = launcher()
            .launch(sh(&script, dir.path()).background())
            .await
            .unwrap();
        for _ in 0..100 {
            if ready.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let err = process.stop(Duration::from_millis(500), false).await.unwrap_err();

        assert!(matches!(err, ProcessError::StopFailed(_)));
        process.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(process.exit_status(), Some(9));
    }

    #[tokio::test]
    async fn test_stdin_round_trip_and_no_write_after_exit() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("cat.out");
        let spec = ProcessSpec::new("cat", vec![], dir.path())
            .background()
            .with_stdout(&out);
        let process = launcher().launch(spec).await.unwrap();

        process.write_stdin(b"first", true, false).unwrap();
        process.write_stdin(b"second\n", true, true).unwrap();
        process.wait(Duration::from_secs(5)).await.unwrap();

        assert_eq!(std::fs::read_to_string(out).unwrap(), "first\nsecond\n");
        assert!(matches!(
            process.write_stdin(b"late", false, false),
            Err(ProcessError::NotRunning(_))
        ));
    }

    #[tokio::test]
    async fn test_interrupt_stops_wait_and_launch() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, token) = shutdown_channel();
        let launcher = OsProcessLauncher::new(vec![], token);
        let process = launcher
            .launch(sh("sleep 30", dir.path()).background())
            .await
            .unwrap();

        tx.shutdown();
        let err = process.wait(Duration::from_secs(10)).await.unwrap_err();
        assert!(matches!(err, ProcessError::Interrupted(_)));

        // stop still works during interrupt cleanup
        process.stop(Duration::from_secs(5), true).await.unwrap();
        assert!(launcher.launch(sh("true", dir.path())).await.is_err());
    }

    #[tokio::test]
    async fn test_environment_is_allowlisted() {
        std::env::set_var("RIGTEST_PROCESS_TEST_SECRET", "hidden");
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("env.out");
        let spec = ProcessSpec::new("/usr/bin/env", vec![], dir.path())
            .with_env("EXPLICIT", "yes")
            .with_stdout(&out);

        launcher().launch(spec).await.unwrap();

        let env = std::fs::read_to_string(out).unwrap();
        assert!(env.contains("EXPLICIT=yes"));
        assert!(!env.contains("RIGTEST_PROCESS_TEST_SECRET"));
    }

    #[test]
    fn test_env_filtering() {
        let launcher = OsProcessLauncher::new(vec!["ALLOWED_VAR".to_string()], ShutdownToken::never());

        let mut env = HashMap::new();
        env.insert("ALLOWED_VAR".to_string(), "value1".to_string());
        env.insert("BLOCKED_VAR".to_string(), "value2".to_string());
        env.insert("PATH".to_string(), "/bin".to_string());

        let filtered = launcher.filter_env(env);

        assert_eq!(filtered.len(), 2);
        assert!(filtered.contains_key("ALLOWED_VAR"));
        assert!(filtered.contains_key("PATH"));
        assert!(!filtered.contains_key("BLOCKED_VAR"));
    }

    #[test]
    fn test_path_like_detection() {
        assert!(is_path_like("PATH", "/bin:/usr/bin"));
        assert!(is_path_like("LD_LIBRARY_PATH", "/a:/b"));
        assert!(!is_path_like("PATH", "/bin"));
        assert!(!is_path_like("HOME", "/a:/b"));
    }
}
