// JSON results writer
// Streams one JSON document with the run details and a result per test

use chrono::Local;
use rigtest_core::application::output_dir_for;
use rigtest_core::domain::{Outcome, TestResult};
use rigtest_core::port::{
    Artifacts, ResultsWriter, RunContext, WriterError, WriterKind, WriterResult,
};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::properties::WriterProperties;
use crate::util::{create_file, expand_time_template, resolve_output_file, write_flushed};

pub const DEFAULT_JSON_FILE: &str = "testsummary_%Y%m%d%H%M%S.json";

/// One result as written by the JSON writer and the `@json@` annotation
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord<'a> {
    pub test_id: &'a str,
    pub outcome: &'static str,
    pub outcome_reason: &'a str,
    pub start_time: String,
    pub duration_secs: f64,
    pub test_dir: String,
    pub test_file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<&'a str>,
}

/// Context needed to turn a TestResult into a ResultRecord
#[derive(Debug, Clone, Default)]
pub struct RecordLayout {
    pub test_root: PathBuf,
    pub output_root: PathBuf,
    pub cycles: u32,
    pub include_title: bool,
}

impl RecordLayout {
    pub fn from_context(ctx: &RunContext, include_title: bool) -> Self {
        Self {
            test_root: ctx.test_root.clone(),
            output_root: ctx.output_root.clone(),
            cycles: ctx.cycles,
            include_title,
        }
    }

    pub fn record<'a>(&self, result: &'a TestResult) -> ResultRecord<'a> {
        let default_output = output_dir_for(&self.output_root, &result.test_id, result.cycle, self.cycles);
        ResultRecord {
            test_id: &result.test_id,
            outcome: result.outcome.display_name(),
            outcome_reason: &result.outcome_reason,
            start_time: result.start_time.format("%Y-%m-%d %H:%M:%S").to_string(),
            duration_secs: result.duration_secs,
            test_dir: result.relative_test_dir(&self.test_root),
            test_file: result.test_file.replace('\\', "/"),
            cycle: (self.cycles > 1).then_some(result.cycle + 1),
            output_dir: (result.output_dir != default_output)
                .then(|| rigtest_core::domain::to_forward_slashes(&result.output_dir)),
            title: self.include_title.then_some(result.title.as_str()),
        }
    }
}

pub struct JsonResultsWriter {
    file: String,
    output_dir: Option<String>,
    include_title: bool,
    include_outcomes: Vec<Outcome>,
    layout: RecordLayout,
    path: Option<PathBuf>,
    out: Option<BufWriter<File>>,
    written: usize,
}

impl JsonResultsWriter {
    pub const PROPERTIES: &'static [&'static str] =
        &["file", "outputDir", "includeTitle", "includeNonFailureOutcomes"];

    pub fn from_properties(props: &WriterProperties) -> WriterResult<Self> {
        props.check_known(Self::PROPERTIES)?;
        Ok(Self {
            file: props.string_or("file", DEFAULT_JSON_FILE),
            output_dir: props.string("outputDir"),
            include_title: props.bool_or("includeTitle", true)?,
            include_outcomes: props.outcomes_or("includeNonFailureOutcomes", "*")?,
            layout: RecordLayout::default(),
            path: None,
            out: None,
            written: 0,
        })
    }

    /// Path of the file being written, once set up
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl ResultsWriter for JsonResultsWriter {
    fn name(&self) -> &str {
        "JsonResultsWriter"
    }

    fn kind(&self) -> WriterKind {
        WriterKind::Record
    }

    fn setup(&mut self, ctx: &RunContext, _artifacts: &mut Artifacts) -> WriterResult<()> {
        let file = expand_time_template(&self.file, Local::now())?;
        let path = resolve_output_file(ctx, self.output_dir.as_deref(), &file);
        self.layout = RecordLayout::from_context(ctx, self.include_title);

        let mut out = create_file(&path)?;
        let details = serde_json::to_string(&ctx.run_details)?;
        write_flushed(&mut out, &format!("{{\"runDetails\": {}, \"results\":[\n", details))?;

        self.out = Some(out);
        self.path = Some(path);
        self.written = 0;
        Ok(())
    }

    fn process_result(&mut self, result: &TestResult, _artifacts: &mut Artifacts) -> WriterResult<()> {
        if !(result.outcome.is_failure() || self.include_outcomes.contains(&result.outcome)) {
            return Ok(());
        }
        let Some(out) = self.out.as_mut() else {
            return Ok(());
        };
        let mut text = String::new();
        if self.written > 0 {
            text.push_str(",\n");
        }
        text.push_str(&serde_json::to_string(&self.layout.record(result))?);
        write_flushed(out, &text)?;
        self.written += 1;
        Ok(())
    }

    fn cleanup(&mut self, _artifacts: &mut Artifacts) -> WriterResult<()> {
        let Some(mut out) = self.out.take() else {
            return Ok(());
        };
        write_flushed(&mut out, "\n]}\n")?;
        drop(out);

        if let Some(path) = &self.path {
            let contents = std::fs::read_to_string(path)?;
            serde_json::from_str::<serde_json::Value>(&contents).map_err(|e| {
                WriterError::Format(format!("{} is not valid JSON: {}", path.display(), e))
            })?;
            info!(file = %path.display(), results = self.written, "Wrote JSON results");
        }
        Ok(())
    }
}
