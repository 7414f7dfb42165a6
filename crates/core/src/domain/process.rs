// Process Launch Domain Model

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::error::{DomainError, Result};

/// Whether `launch` returns immediately or only once the process has exited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessMode {
    Foreground,
    Background,
}

impl std::fmt::Display for ProcessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessMode::Foreground => write!(f, "FOREGROUND"),
            ProcessMode::Background => write!(f, "BACKGROUND"),
        }
    }
}

/// Everything needed to start one external process
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub command: PathBuf,
    pub arguments: Vec<String>,
    /// Explicit environment; merged over the launcher's allowlisted inherited vars
    pub environment: BTreeMap<String, String>,
    pub working_dir: PathBuf,
    pub mode: ProcessMode,
    /// Foreground completion timeout (ignored for background processes)
    pub timeout: Duration,
    /// None means the null device
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
    pub display_name: String,
    pub expected_exit_status: ExitStatusCondition,
    /// Skip process-group creation so children are not killed with the parent
    pub disable_child_cleanup: bool,
}

impl ProcessSpec {
    /// Create a foreground spec with defaults for everything but the command line
    pub fn new(
        command: impl Into<PathBuf>,
        arguments: Vec<String>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        let command = command.into();
        let display_name = command
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| command.to_string_lossy().into_owned());

        Self {
            command,
            arguments,
            environment: BTreeMap::new(),
            working_dir: working_dir.into(),
            mode: ProcessMode::Foreground,
            timeout: crate::application::constants::WAIT_FOR_PROCESS,
            stdout: None,
            stderr: None,
            display_name,
            expected_exit_status: ExitStatusCondition::default(),
            disable_child_cleanup: false,
        }
    }

    pub fn background(mut self) -> Self {
        self.mode = ProcessMode::Background;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_stdout(mut self, path: impl AsRef<Path>) -> Self {
        self.stdout = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_stderr(mut self, path: impl AsRef<Path>) -> Self {
        self.stderr = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_expected_exit_status(mut self, condition: ExitStatusCondition) -> Self {
        self.expected_exit_status = condition;
        self
    }

    /// Shell-style rendering of the full command line, for logs
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.to_string_lossy().into_owned())
            .chain(self.arguments.iter().cloned())
            .map(|arg| quote_arg(&arg))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn quote_arg(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Exit status recorded once a process has terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code, or the signal number if the process was killed by a signal
    pub status: i32,
    pub core_dumped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
}

/// Condition an exit status must satisfy, e.g. `==0` or `!=0`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatusCondition {
    op: Comparison,
    value: i32,
}

impl Default for ExitStatusCondition {
    fn default() -> Self {
        Self {
            op: Comparison::Eq,
            value: 0,
        }
    }
}

impl ExitStatusCondition {
    pub fn parse(input: &str) -> Result<Self> {
        let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
        let invalid = || DomainError::InvalidExitCondition(input.to_string());

        // two-char operators first so ">=" is not read as ">"
        let (op, rest) = [
            ("==", Comparison::Eq),
            ("!=", Comparison::Ne),
            (">=", Comparison::Ge),
            ("<=", Comparison::Le),
            (">", Comparison::Gt),
            ("<", Comparison::Lt),
        ]
        .iter()
        .find_map(|(prefix, op)| compact.strip_prefix(prefix).map(|rest| (*op, rest)))
        .unwrap_or((Comparison::Eq, compact.as_str()));

        let value = rest.parse::<i32>().map_err(|_| invalid())?;
        Ok(Self { op, value })
    }

    pub fn matches(&self, status: i32) -> bool {
        match self.op {
            Comparison::Eq => status == self.value,
            Comparison::Ne => status != self.value,
            Comparison::Ge => status >= self.value,
            Comparison::Le => status <= self.value,
            Comparison::Gt => status > self.value,
            Comparison::Lt => status < self.value,
        }
    }

    /// True for the default `==0` condition
    pub fn expects_success(&self) -> bool {
        *self == Self::default()
    }
}

impl std::fmt::Display for ExitStatusCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self.op {
            Comparison::Eq => "==",
            Comparison::Ne => "!=",
            Comparison::Ge => ">=",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Lt => "<",
        };
        write!(f, "{}{}", op, self.value)
    }
}

impl std::str::FromStr for ExitStatusCondition {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_condition_parsing() {
        let ne = ExitStatusCondition::parse("!= 0").unwrap();
        assert!(ne.matches(3));
        assert!(!ne.matches(0));

        let ge = ExitStatusCondition::parse(">=2").unwrap();
        assert!(ge.matches(2));
        assert!(!ge.matches(1));

        let bare = ExitStatusCondition::parse("4").unwrap();
        assert!(bare.matches(4));
        assert_eq!(bare.to_string(), "==4");

        assert!(ExitStatusCondition::parse(">>1").is_err());
        assert!(ExitStatusCondition::parse("").is_err());
    }

    #[test]
    fn test_default_expects_success() {
        assert!(ExitStatusCondition::default().expects_success());
        assert!(!ExitStatusCondition::parse("!=0").unwrap().expects_success());
    }

    #[test]
    fn test_spec_defaults_display_name_to_basename() {
        let spec = ProcessSpec::new("/usr/bin/my server", vec!["a b".to_string()], "/tmp");
        assert_eq!(spec.display_name, "my server");
        assert_eq!(spec.mode, ProcessMode::Foreground);
        assert_eq!(spec.command_line(), "'/usr/bin/my server' 'a b'");
    }
}
