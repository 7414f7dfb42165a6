// Test Case Domain Model

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::domain::error::{DomainError, Result};
use crate::domain::ExitStatusCondition;

/// A process-driven test as declared in the project file's `[[tests]]` table
#[derive(Debug, Clone, Deserialize)]
pub struct TestCase {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub classname: Option<String>,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Names the process in logs and its `.out`/`.err` files; defaults to the command's file name
    #[serde(default)]
    pub display_name: Option<String>,
    /// `NAME=value` entries; names keep their case
    #[serde(default)]
    pub env: Vec<String>,
    /// Seconds; falls back to the project default when absent
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_exit_status")]
    pub expected_exit_status: String,
    /// Regexes that must each match at least one stdout line
    #[serde(default)]
    pub expect_stdout: Vec<String>,
    /// Regexes that must not match any stdout line
    #[serde(default)]
    pub expect_stdout_absent: Vec<String>,
    #[serde(default)]
    pub skip: Option<String>,
    #[serde(default)]
    pub stdin: Vec<String>,
    #[serde(default)]
    pub monitor_interval_secs: Option<f64>,
    /// Directory the test is defined in; set by the loader
    #[serde(skip)]
    pub test_dir: PathBuf,
    /// Definition file relative to `test_dir`; set by the loader
    #[serde(skip)]
    pub test_file: String,
}

fn default_exit_status() -> String {
    "==0".to_string()
}

impl TestCase {
    pub fn exit_condition(&self) -> Result<ExitStatusCondition> {
        ExitStatusCondition::parse(&self.expected_exit_status)
    }

    /// Parse the `NAME=value` environment entries
    pub fn environment(&self) -> Result<BTreeMap<String, String>> {
        self.env
            .iter()
            .map(|entry| match entry.split_once('=') {
                Some((name, value)) if !name.trim().is_empty() => {
                    Ok((name.trim().to_string(), value.to_string()))
                }
                _ => Err(DomainError::ValidationError(format!(
                    "test \"{}\" has malformed env entry \"{}\" (expected NAME=value)",
                    self.id, entry
                ))),
            })
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(DomainError::ValidationError("test id must not be empty".into()));
        }
        if self
            .id
            .chars()
            .any(|c| c.is_whitespace() || c == '/' || c == '\\')
        {
            return Err(DomainError::ValidationError(format!(
                "test id \"{}\" must not contain whitespace or path separators",
                self.id
            )));
        }
        if self.command.trim().is_empty() {
            return Err(DomainError::ValidationError(format!(
                "test \"{}\" has no command",
                self.id
            )));
        }
        if let Some(interval) = self.monitor_interval_secs {
            if interval.is_nan() || interval <= 0.0 {
                return Err(DomainError::ValidationError(format!(
                    "test \"{}\" monitor interval must be positive",
                    self.id
                )));
            }
        }
        self.exit_condition()?;
        self.environment()?;
        Ok(())
    }

    pub fn display_title(&self) -> &str {
        if self.title.is_empty() {
            &self.id
        } else {
            &self.title
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(id: &str) -> TestCase {
        serde_json::from_value(serde_json::json!({ "id": id, "command": "echo" })).unwrap()
    }

    #[test]
    fn test_defaults() {
        let tc = case("smoke");
        assert_eq!(tc.expected_exit_status, "==0");
        assert!(tc.exit_condition().unwrap().expects_success());
        assert_eq!(tc.display_title(), "smoke");
        assert!(tc.validate().is_ok());
    }

    #[test]
    fn test_environment_entries() {
        let mut tc = case("env");
        tc.env = vec!["MY_VAR=a=b".into(), "EMPTY=".into()];
        let env = tc.environment().unwrap();
        assert_eq!(env["MY_VAR"], "a=b");
        assert_eq!(env["EMPTY"], "");

        tc.env.push("novalue".into());
        assert!(tc.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_ids() {
        assert!(case("").validate().is_err());
        assert!(case("a b").validate().is_err());
        assert!(case("a/b").validate().is_err());

        let mut tc = case("ok");
        tc.expected_exit_status = "~1".into();
        assert!(matches!(
            tc.validate(),
            Err(DomainError::InvalidExitCondition(_))
        ));
    }
}
