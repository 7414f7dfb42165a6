// Results Writer Pipeline
// Fans test events out to every enabled writer, one call at a time.

use crate::domain::TestResult;
use crate::error::Result;
use crate::port::{Artifact, Artifacts, ResultsWriter, RunContext, WriterKind};
use regex::Regex;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error, warn};
use walkdir::WalkDir;

struct PipelineState {
    writers: Vec<Box<dyn ResultsWriter>>,
    artifacts: Artifacts,
}

pub struct ResultsPipeline {
    state: Mutex<PipelineState>,
    category_filter: Option<Regex>,
}

impl ResultsPipeline {
    /// Keep the enabled writers, with summary writers ordered last
    ///
    /// `category_include_regex` limits which artifact categories reach publishers.
    pub fn new(
        writers: Vec<Box<dyn ResultsWriter>>,
        record: bool,
        progress: bool,
        category_include_regex: Option<&str>,
    ) -> Result<Self> {
        let mut enabled: Vec<_> = writers
            .into_iter()
            .filter(|w| {
                let on = w.is_enabled(record, progress);
                debug!(writer = %w.name(), enabled = on, "Configured results writer");
                on
            })
            .collect();
        enabled.sort_by_key(|w| w.kind() == WriterKind::Summary);

        let category_filter = category_include_regex
            .filter(|r| !r.is_empty())
            .map(|r| Regex::new(&format!("^(?:{})$", r)))
            .transpose()?;

        Ok(Self {
            state: Mutex::new(PipelineState {
                writers: enabled,
                artifacts: Artifacts::new(),
            }),
            category_filter,
        })
    }

    pub fn writer_names(&self) -> Vec<String> {
        self.lock().writers.iter().map(|w| w.name().to_string()).collect()
    }

    /// Set up every writer; one that fails is dropped and the run continues
    pub fn setup(&self, ctx: &RunContext) {
        let mut guard = self.lock();
        let PipelineState { writers, artifacts } = &mut *guard;

        writers.retain_mut(|w| match w.setup(ctx, artifacts) {
            Ok(()) => true,
            Err(e) => {
                error!(writer = %w.name(), error = %e, "Results writer setup failed; disabling it");
                false
            }
        });
        self.fan_out(&mut guard);
    }

    pub fn test_starting(&self, test_id: &str, cycle: u32) {
        let mut guard = self.lock();
        for w in guard.writers.iter_mut() {
            if let Err(e) = w.process_test_starting(test_id, cycle) {
                warn!(writer = %w.name(), test_id = %test_id, error = %e, "Results writer failed on test start");
            }
        }
    }

    /// Deliver one result to all writers, then to output-file visitors,
    /// then fan out any artifacts they queued
    pub fn process_result(&self, result: &TestResult) {
        let mut guard = self.lock();
        let PipelineState { writers, artifacts } = &mut *guard;

        for w in writers.iter_mut() {
            if let Err(e) = w.process_result(result, artifacts) {
                error!(writer = %w.name(), test_id = %result.test_id, error = %e, "Results writer failed to process result");
            }
        }

        if writers.iter().any(|w| w.wants_output_files()) {
            visit_output_files(writers, result);
        }

        self.fan_out(&mut guard);
    }

    /// Publish an artifact produced outside the writers
    pub fn publish_artifact(&self, path: &Path, category: &str) {
        let mut guard = self.lock();
        guard.artifacts.publish(path, category);
        self.fan_out(&mut guard);
    }

    /// Clean up non-publishers, then publishers, then summary writers
    pub fn cleanup(&self) {
        let mut guard = self.lock();
        let mut order: Vec<usize> = (0..guard.writers.len()).collect();
        order.sort_by_key(|&i| {
            let w = &guard.writers[i];
            match (w.kind(), w.is_artifact_publisher()) {
                (WriterKind::Summary, _) => 2,
                (_, true) => 1,
                (_, false) => 0,
            }
        });

        for i in order {
            {
                let PipelineState { writers, artifacts } = &mut *guard;
                let w = &mut writers[i];
                debug!(writer = %w.name(), "Cleaning up results writer");
                if let Err(e) = w.cleanup(artifacts) {
                    warn!(writer = %w.name(), error = %e, "Results writer cleanup failed");
                }
            }
            self.fan_out(&mut guard);
        }
    }

    fn fan_out(&self, state: &mut PipelineState) {
        for artifact in state.artifacts.drain() {
            if !self.category_included(&artifact) {
                debug!(path = %artifact.path, category = %artifact.category, "Artifact category not included");
                continue;
            }
            debug!(path = %artifact.path, category = %artifact.category, "Publishing artifact");
            for w in state.writers.iter_mut().filter(|w| w.is_artifact_publisher()) {
                if let Err(e) = w.publish_artifact(&artifact) {
                    warn!(writer = %w.name(), path = %artifact.path, error = %e, "Failed to publish artifact");
                }
            }
        }
    }

    fn category_included(&self, artifact: &Artifact) -> bool {
        self.category_filter
            .as_ref()
            .map_or(true, |re| re.is_match(&artifact.category))
    }

    fn lock(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Offer each non-empty output file, in name order, to visitors until one claims it
fn visit_output_files(writers: &mut [Box<dyn ResultsWriter>], result: &TestResult) {
    if !result.output_dir.is_dir() {
        return;
    }
    let files = WalkDir::new(&result.output_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "Could not read output directory entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.metadata().map(|m| m.len() > 0).unwrap_or(false));

    for entry in files {
        for w in writers.iter_mut().filter(|w| w.wants_output_files()) {
            match w.visit_output_file(result, entry.path()) {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => {
                    warn!(writer = %w.name(), path = %entry.path().display(), error = %e, "Output file visitor failed")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Outcome, RunDetails};
    use crate::port::{WriterError, WriterResult};
    use chrono::Local;
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::Arc;

    type Log = Arc<Mutex<Vec<String>>>;

    struct RecordingWriter {
        name: String,
        kind: WriterKind,
        publisher: bool,
        visitor: bool,
        fail_setup: bool,
        cleanup_artifact: Option<(&'static str, &'static str)>,
        log: Log,
    }

    impl RecordingWriter {
        fn new(name: &str, kind: WriterKind, log: &Log) -> Self {
            Self {
                name: name.to_string(),
                kind,
                publisher: false,
                visitor: false,
                fail_setup: false,
                cleanup_artifact: None,
                log: log.clone(),
            }
        }

        fn push(&self, event: String) {
            self.log.lock().unwrap().push(event);
        }
    }

    impl ResultsWriter for RecordingWriter {
        fn name(&self) -> &str {
            &self.name
        }
        fn kind(&self) -> WriterKind {
            self.kind
        }
        fn setup(&mut self, _ctx: &RunContext, _a: &mut Artifacts) -> WriterResult<()> {
            if self.fail_setup {
                return Err(WriterError::Config("boom".into()));
            }
            self.push(format!("{}:setup", self.name));
            Ok(())
        }
        fn process_result(&mut self, r: &TestResult, _a: &mut Artifacts) -> WriterResult<()> {
            self.push(format!("{}:result:{}", self.name, r.test_id));
            Ok(())
        }
        fn wants_output_files(&self) -> bool {
            self.visitor
        }
        fn visit_output_file(&mut self, _r: &TestResult, path: &Path) -> WriterResult<bool> {
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            self.push(format!("{}:visit:{}", self.name, name));
            Ok(true)
        }
        fn is_artifact_publisher(&self) -> bool {
            self.publisher
        }
        fn publish_artifact(&mut self, a: &Artifact) -> WriterResult<()> {
            self.push(format!("{}:artifact:{}", self.name, a.category));
            Ok(())
        }
        fn cleanup(&mut self, artifacts: &mut Artifacts) -> WriterResult<()> {
            if let Some((path, category)) = self.cleanup_artifact {
                artifacts.publish(Path::new(path), category);
            }
            self.push(format!("{}:cleanup", self.name));
            Ok(())
        }
    }

    fn ctx() -> RunContext {
        RunContext {
            num_tests: 1,
            cycles: 1,
            threads: 1,
            test_root: PathBuf::from("/tests"),
            output_root: PathBuf::from("/tests/out"),
            out_dir_name: "out".into(),
            run_details: RunDetails::new(),
            extra_args: BTreeMap::new(),
            record: true,
            properties: BTreeMap::new(),
            shutdown: crate::application::ShutdownToken::never(),
        }
    }

    fn result(id: &str, output_dir: PathBuf) -> TestResult {
        TestResult {
            test_id: id.into(),
            title: String::new(),
            classname: None,
            outcome: Outcome::Passed,
            outcome_reason: String::new(),
            cycle: 0,
            start_time: Local::now(),
            duration_secs: 0.1,
            test_dir: PathBuf::from("/tests").join(id),
            test_file: "rigtest.toml".into(),
            output_dir,
            run_log: String::new(),
        }
    }

    #[test]
    fn test_enablement_and_summary_last() {
        let log = Log::default();
        let writers: Vec<Box<dyn ResultsWriter>> = vec![
            Box::new(RecordingWriter::new("summary", WriterKind::Summary, &log)),
            Box::new(RecordingWriter::new("record", WriterKind::Record, &log)),
            Box::new(RecordingWriter::new("progress", WriterKind::Progress, &log)),
        ];
        let pipeline = ResultsPipeline::new(writers, true, false, None).unwrap();
        assert_eq!(pipeline.writer_names(), vec!["record", "summary"]);
    }

    #[test]
    fn test_failed_setup_removes_writer() {
        let log = Log::default();
        let mut broken = RecordingWriter::new("broken", WriterKind::Record, &log);
        broken.fail_setup = true;
        let writers: Vec<Box<dyn ResultsWriter>> = vec![
            Box::new(broken),
            Box::new(RecordingWriter::new("ok", WriterKind::Record, &log)),
        ];
        let pipeline = ResultsPipeline::new(writers, true, false, None).unwrap();
        pipeline.setup(&ctx());
        assert_eq!(pipeline.writer_names(), vec!["ok"]);
    }

    #[test]
    fn test_cleanup_order_and_artifact_fan_out() {
        let log = Log::default();
        let mut producer = RecordingWriter::new("producer", WriterKind::Record, &log);
        producer.cleanup_artifact = Some(("/tests/report.xml", "Report"));
        let mut publisher = RecordingWriter::new("publisher", WriterKind::Record, &log);
        publisher.publisher = true;
        let mut hidden = RecordingWriter::new("hidden", WriterKind::Record, &log);
        hidden.cleanup_artifact = Some(("/tests/x", "Internal"));

        let writers: Vec<Box<dyn ResultsWriter>> = vec![
            Box::new(RecordingWriter::new("summary", WriterKind::Summary, &log)),
            Box::new(publisher),
            Box::new(producer),
            Box::new(hidden),
        ];
        let pipeline = ResultsPipeline::new(writers, true, false, Some("Report|Other")).unwrap();
        pipeline.cleanup();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "producer:cleanup",
                "publisher:artifact:Report",
                "hidden:cleanup",
                "publisher:cleanup",
                "summary:cleanup",
            ]
        );
    }

    #[test]
    fn test_output_files_visited_in_order_skipping_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.log"), "b").unwrap();
        std::fs::write(dir.path().join("a.log"), "a").unwrap();
        std::fs::write(dir.path().join("empty.log"), "").unwrap();

        let log = Log::default();
        let mut first = RecordingWriter::new("first", WriterKind::Record, &log);
        first.visitor = true;
        let mut second = RecordingWriter::new("second", WriterKind::Record, &log);
        second.visitor = true;
        let writers: Vec<Box<dyn ResultsWriter>> = vec![Box::new(first), Box::new(second)];

        let pipeline = ResultsPipeline::new(writers, true, false, None).unwrap();
        pipeline.process_result(&result("t1", dir.path().to_path_buf()));

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "first:result:t1",
                "second:result:t1",
                "first:visit:a.log",
                "first:visit:b.log",
            ]
        );
    }
}
