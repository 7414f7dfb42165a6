// Test Result Domain Model

use chrono::{DateTime, Local};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::path::{Path, PathBuf};

use crate::domain::Outcome;

/// Flat record of one completed test, as consumed by every results writer
#[derive(Debug, Clone)]
pub struct TestResult {
    pub test_id: String,
    pub title: String,
    pub classname: Option<String>,
    pub outcome: Outcome,
    pub outcome_reason: String,
    /// 0-based cycle number
    pub cycle: u32,
    pub start_time: DateTime<Local>,
    pub duration_secs: f64,
    /// Absolute directory holding the test definition
    pub test_dir: PathBuf,
    /// Test definition file, relative to `test_dir`
    pub test_file: String,
    /// Absolute output directory for this test and cycle
    pub output_dir: PathBuf,
    pub run_log: String,
}

impl TestResult {
    /// `id` for single-cycle runs, `id.cycle` (1-based) otherwise
    pub fn id_and_cycle(&self, cycles: u32) -> String {
        if cycles > 1 {
            format!("{}.{}", self.test_id, self.cycle + 1)
        } else {
            self.test_id.clone()
        }
    }

    /// Path of `test_dir` relative to `root`, with forward slashes
    pub fn relative_test_dir(&self, root: &Path) -> String {
        let rel = self.test_dir.strip_prefix(root).unwrap_or(&self.test_dir);
        to_forward_slashes(rel)
    }

    pub fn run_log_path(&self) -> PathBuf {
        self.output_dir.join(crate::application::constants::RUN_LOG_FILE)
    }
}

pub fn to_forward_slashes(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Ordered key/value details describing the whole run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunDetails {
    entries: Vec<(String, String)>,
}

impl RunDetails {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value; new keys keep insertion order
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for RunDetails {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_details_keep_insertion_order() {
        let mut details = RunDetails::new();
        details.insert("outDirName", "out");
        details.insert("hostname", "box");
        details.insert("outDirName", "other");

        let keys: Vec<_> = details.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["outDirName", "hostname"]);
        assert_eq!(details.get("outDirName"), Some("other"));
        assert_eq!(
            serde_json::to_string(&details).unwrap(),
            r#"{"outDirName":"other","hostname":"box"}"#
        );
    }

    #[test]
    fn test_relative_test_dir_uses_forward_slashes() {
        let result = TestResult {
            test_id: "t1".into(),
            title: String::new(),
            classname: None,
            outcome: Outcome::Passed,
            outcome_reason: String::new(),
            cycle: 2,
            start_time: Local::now(),
            duration_secs: 0.0,
            test_dir: PathBuf::from("/root/tests/group/t1"),
            test_file: "rigtest.toml".into(),
            output_dir: PathBuf::from("/root/tests/out/t1"),
            run_log: String::new(),
        };
        assert_eq!(result.relative_test_dir(Path::new("/root/tests")), "group/t1");
        assert_eq!(result.id_and_cycle(3), "t1.3");
        assert_eq!(result.id_and_cycle(1), "t1");
    }
}
