// Results Writer Port
// Pluggable consumers of test outcome events (files, console, archives)

use crate::application::ShutdownToken;
use crate::domain::{to_forward_slashes, RunDetails, TestResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Which command-line flag enables a writer by default
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterKind {
    /// Enabled by `--record`
    Record,
    /// Enabled by `--progress`
    Progress,
    /// Always enabled; runs after everything else at cleanup
    Summary,
}

/// Writer errors
#[derive(Error, Debug)]
pub enum WriterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid writer configuration: {0}")]
    Config(String),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Archive error: {0}")]
    Archive(String),
}

impl From<crate::domain::DomainError> for WriterError {
    fn from(err: crate::domain::DomainError) -> Self {
        WriterError::Config(err.to_string())
    }
}

impl From<regex::Error> for WriterError {
    fn from(err: regex::Error) -> Self {
        WriterError::Config(format!("invalid regular expression: {}", err))
    }
}

impl From<serde_json::Error> for WriterError {
    fn from(err: serde_json::Error) -> Self {
        WriterError::Format(err.to_string())
    }
}

pub type WriterResult<T> = std::result::Result<T, WriterError>;

/// Run-wide information handed to every writer at setup
#[derive(Debug, Clone)]
pub struct RunContext {
    pub num_tests: usize,
    pub cycles: u32,
    pub threads: usize,
    pub test_root: PathBuf,
    /// Directory the per-test output directories are created in
    pub output_root: PathBuf,
    pub out_dir_name: String,
    pub run_details: RunDetails,
    pub extra_args: BTreeMap<String, String>,
    pub record: bool,
    /// Expanded project properties
    pub properties: BTreeMap<String, String>,
    /// Signalled when the run is interrupted
    pub shutdown: ShutdownToken,
}

impl RunContext {
    /// Default directory for writer output: the parent of the output root
    pub fn default_output_dir(&self) -> PathBuf {
        self.output_root
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.test_root.clone())
    }
}

/// A file produced during the run that other tools may want to pick up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Absolute path with forward slashes
    pub path: String,
    pub category: String,
}

/// Outbound queue of artifacts; drained and fanned out by the pipeline
#[derive(Debug, Default)]
pub struct Artifacts {
    queue: Vec<Artifact>,
}

impl Artifacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&mut self, path: &Path, category: &str) {
        self.queue.push(Artifact {
            path: to_forward_slashes(path),
            category: category.to_string(),
        });
    }

    pub fn drain(&mut self) -> Vec<Artifact> {
        std::mem::take(&mut self.queue)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Results writer lifecycle
///
/// Calls are serialized by the pipeline, so implementations need no locking.
/// Order per run: `setup`, then per test `process_test_starting` /
/// `process_result` (plus `visit_output_file` for visitors), then `cleanup`.
pub trait ResultsWriter: Send {
    fn name(&self) -> &str;

    fn kind(&self) -> WriterKind;

    fn is_enabled(&self, record: bool, progress: bool) -> bool {
        match self.kind() {
            WriterKind::Record => record,
            WriterKind::Progress => progress,
            WriterKind::Summary => true,
        }
    }

    fn setup(&mut self, ctx: &RunContext, artifacts: &mut Artifacts) -> WriterResult<()>;

    fn process_test_starting(&mut self, _test_id: &str, _cycle: u32) -> WriterResult<()> {
        Ok(())
    }

    fn process_result(
        &mut self,
        result: &TestResult,
        artifacts: &mut Artifacts,
    ) -> WriterResult<()>;

    /// Whether `visit_output_file` should be called for each output file
    fn wants_output_files(&self) -> bool {
        false
    }

    /// Offered each non-empty output file; return true to claim it
    fn visit_output_file(&mut self, _result: &TestResult, _path: &Path) -> WriterResult<bool> {
        Ok(false)
    }

    fn is_artifact_publisher(&self) -> bool {
        false
    }

    fn publish_artifact(&mut self, _artifact: &Artifact) -> WriterResult<()> {
        Ok(())
    }

    fn cleanup(&mut self, artifacts: &mut Artifacts) -> WriterResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifacts_use_forward_slashes() {
        let mut artifacts = Artifacts::new();
        artifacts.publish(Path::new(r"C:\out\report.xml"), "Report");
        let drained = artifacts.drain();
        assert_eq!(drained[0].path, "C:/out/report.xml");
        assert!(artifacts.is_empty());
    }
}
