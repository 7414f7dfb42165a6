// Harness constants (no magic values)
use std::time::Duration;

/// Bounded poll interval while waiting for a process to exit (50ms)
pub const PROCESS_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long a wait runs before logging that it is still waiting (4s)
pub const LONG_WAIT_LOG_AFTER: Duration = Duration::from_secs(4);

/// Default timeout for foreground processes and process waits (10 minutes)
pub const WAIT_FOR_PROCESS: Duration = Duration::from_secs(600);

/// Timeout for a soft stop before escalating to a hard kill (10s)
pub const WAIT_FOR_PROCESS_STOP: Duration = Duration::from_secs(10);

/// Default per-test timeout when neither test nor project sets one (10 minutes)
pub const DEFAULT_TEST_TIMEOUT_SECS: u64 = 600;

/// Name of the per-test run log inside each output directory
pub const RUN_LOG_FILE: &str = "run.log";

/// Name of the framework log written into the output root
pub const FRAMEWORK_LOG_FILE: &str = "rigtest.log";

/// Maximum number of failed test ids listed in the run summary
pub const MAX_SUMMARY_FAILURE_IDS: usize = 100;

/// Environment variable that turns off process-group cleanup for every process
pub const DISABLE_PROCESS_GROUP_CLEANUP_ENV: &str = "RIGTEST_DISABLE_PROCESS_GROUP_CLEANUP";
