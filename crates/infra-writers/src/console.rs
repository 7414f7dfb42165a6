// Console writers: progress after each test, the end-of-run summary and
// make-style failure annotations for IDEs and CI log parsers
use colored::{ColoredString, Colorize};
use rigtest_core::application::{
    LineStyle, ShutdownToken, SummaryLine, SummaryOptions, TestOutcomeSummaryGenerator,
};
use rigtest_core::domain::{to_forward_slashes, Outcome, TestResult};
use rigtest_core::port::{
    Artifacts, ResultsWriter, RunContext, SystemTimeProvider, TimeProvider, WriterKind,
    WriterResult,
};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::info;

use crate::json::RecordLayout;
use crate::properties::WriterProperties;
use crate::util::display_id;

pub const ANNOTATIONS_ENV: &str = "RIGTEST_CONSOLE_FAILURE_ANNOTATIONS";
pub const ANNOTATIONS_INCLUDE_OUTCOMES_ENV: &str = "RIGTEST_CONSOLE_FAILURE_ANNOTATIONS_INCLUDE_OUTCOMES";

// ============================================================================
// Progress
// ============================================================================

pub struct ConsoleProgressResultsWriter {
    time: Arc<dyn TimeProvider>,
    recent_failures: usize,
    start_millis: i64,
    num_tests: usize,
    cycles: u32,
    threads: usize,
    outcomes: BTreeMap<Outcome, usize>,
    recent: VecDeque<String>,
    in_progress: BTreeSet<String>,
}

impl ConsoleProgressResultsWriter {
    pub const PROPERTIES: &'static [&'static str] = &["recentFailures"];

    pub fn new(time: Arc<dyn TimeProvider>, recent_failures: usize) -> Self {
        Self {
            time,
            recent_failures,
            start_millis: 0,
            num_tests: 0,
            cycles: 1,
            threads: 1,
            outcomes: BTreeMap::new(),
            recent: VecDeque::new(),
            in_progress: BTreeSet::new(),
        }
    }

    pub fn from_properties(props: &WriterProperties) -> WriterResult<Self> {
        props.check_known(Self::PROPERTIES)?;
        let recent = props.u64_or("recentFailures", 5)? as usize;
        Ok(Self::new(Arc::new(SystemTimeProvider), recent))
    }

    /// Record a result and render the progress report that follows it
    pub fn progress_lines(&mut self, result: &TestResult) -> Vec<String> {
        let id = display_id(&result.test_id, result.cycle, self.cycles);
        if !self.in_progress.remove(&id) {
            // not announced up front; count it as an extra test
            self.num_tests += 1;
        }
        *self.outcomes.entry(result.outcome).or_default() += 1;

        if result.outcome.is_failure() {
            let mut line = format!("{}: {}", result.outcome, id);
            if !result.outcome_reason.is_empty() {
                line.push_str(": ");
                line.push_str(&result.outcome_reason);
            }
            self.recent.push_back(line);
            while self.recent.len() > self.recent_failures {
                self.recent.pop_front();
            }
        }

        let executed: usize = self.outcomes.values().sum();
        let total = self.num_tests.max(executed);
        let elapsed = ((self.time.now_millis() - self.start_millis) / 1000).max(0);
        let (amount, unit) = if elapsed > 60 {
            (elapsed / 60, "minutes")
        } else {
            (elapsed, "seconds")
        };

        let mut lines = vec![format!(
            "Test progress: completed {}/{} = {:.1}% of tests in {} {}",
            executed,
            total,
            100.0 * executed as f64 / total as f64,
            amount,
            unit
        )];

        let counts = |failure: bool| {
            Outcome::ALL
                .iter()
                .filter(|o| o.is_failure() == failure)
                .filter_map(|o| self.outcomes.get(o).filter(|n| **n > 0).map(|n| format!("{} {}", n, o)))
                .collect::<Vec<_>>()
        };
        let failed_count: usize = self
            .outcomes
            .iter()
            .filter(|(o, _)| o.is_failure())
            .map(|(_, n)| n)
            .sum();
        let passed = counts(false);
        if !passed.is_empty() {
            lines.push(format!(
                "   {} ({:.1}%)",
                passed.join(", "),
                100.0 * (executed - failed_count) as f64 / executed as f64
            ));
        }
        let failed = counts(true);
        if !failed.is_empty() {
            lines.push(format!("   {}", failed.join(", ")));
        }

        if !self.recent.is_empty() {
            lines.push("Recent failures: ".to_string());
            lines.extend(self.recent.iter().map(|f| format!("   {}", f)));
        }
        if self.threads > 1 && !self.in_progress.is_empty() {
            let executing: Vec<&str> = self.in_progress.iter().map(String::as_str).collect();
            lines.push(format!("Currently executing: {}", executing.join(", ")));
        }
        lines
    }
}

impl ResultsWriter for ConsoleProgressResultsWriter {
    fn name(&self) -> &str {
        "ConsoleProgressResultsWriter"
    }

    fn kind(&self) -> WriterKind {
        WriterKind::Progress
    }

    fn setup(&mut self, ctx: &RunContext, _artifacts: &mut Artifacts) -> WriterResult<()> {
        self.start_millis = self.time.now_millis();
        self.cycles = ctx.cycles.max(1);
        self.num_tests = ctx.num_tests * self.cycles as usize;
        self.threads = ctx.threads;
        self.outcomes.clear();
        self.recent.clear();
        self.in_progress.clear();
        Ok(())
    }

    fn process_test_starting(&mut self, test_id: &str, cycle: u32) -> WriterResult<()> {
        self.in_progress.insert(display_id(test_id, cycle, self.cycles));
        Ok(())
    }

    fn process_result(&mut self, result: &TestResult, _artifacts: &mut Artifacts) -> WriterResult<()> {
        if self.num_tests == 1 {
            return Ok(());
        }
        for line in self.progress_lines(result) {
            info!(target: "rigtest::progress", "{}", line);
        }
        Ok(())
    }

    fn cleanup(&mut self, _artifacts: &mut Artifacts) -> WriterResult<()> {
        Ok(())
    }
}

// ============================================================================
// Summary
// ============================================================================

/// End-of-run summary on stdout
pub struct ConsoleSummaryResultsWriter {
    generator: TestOutcomeSummaryGenerator,
    options: SummaryOptions,
    shutdown: ShutdownToken,
}

impl ConsoleSummaryResultsWriter {
    pub const PROPERTIES: &'static [&'static str] = &[
        "showDuration",
        "showRunDetails",
        "showOutcomeStats",
        "showOutcomeReason",
        "showOutputDir",
        "showTestDir",
        "showTestTitle",
        "showInspectSummary",
        "showNotVerifiedSummary",
        "showFailureSummary",
        "showTestIdList",
    ];

    pub fn new(time: Arc<dyn TimeProvider>, options: SummaryOptions) -> Self {
        Self {
            generator: TestOutcomeSummaryGenerator::new(time),
            options,
            shutdown: ShutdownToken::never(),
        }
    }

    /// Console defaults: reasons, output dirs, duration, id list and run details on
    pub fn default_options() -> SummaryOptions {
        SummaryOptions {
            show_duration: true,
            show_run_details: true,
            show_test_id_list: true,
            ..SummaryOptions::default()
        }
    }

    pub fn from_properties(props: &WriterProperties) -> WriterResult<Self> {
        props.check_known(Self::PROPERTIES)?;
        let d = Self::default_options();
        let options = SummaryOptions {
            show_duration: props.bool_or("showDuration", d.show_duration)?,
            show_run_details: props.bool_or("showRunDetails", d.show_run_details)?,
            show_outcome_stats: props.bool_or("showOutcomeStats", d.show_outcome_stats)?,
            show_outcome_reason: props.bool_or("showOutcomeReason", d.show_outcome_reason)?,
            show_output_dir: props.bool_or("showOutputDir", d.show_output_dir)?,
            show_test_dir: props.bool_or("showTestDir", d.show_test_dir)?,
            show_test_title: props.bool_or("showTestTitle", d.show_test_title)?,
            show_inspect_summary: props.bool_or("showInspectSummary", d.show_inspect_summary)?,
            show_not_verified_summary: props
                .bool_or("showNotVerifiedSummary", d.show_not_verified_summary)?,
            show_failure_summary: props.bool_or("showFailureSummary", d.show_failure_summary)?,
            show_test_id_list: props.bool_or("showTestIdList", d.show_test_id_list)?,
        };
        Ok(Self::new(Arc::new(SystemTimeProvider), options))
    }

    pub fn summary_lines(&self) -> Vec<SummaryLine> {
        self.generator
            .summary_lines(&self.options, self.shutdown.is_shutdown())
    }
}

fn styled(line: &SummaryLine) -> ColoredString {
    let text = line.text.as_str();
    match line.style {
        LineStyle::Plain => text.normal(),
        LineStyle::Detail => text.dimmed(),
        LineStyle::Reason => text.cyan(),
        LineStyle::Outcome(o) if o.is_failure() => text.red().bold(),
        LineStyle::Outcome(Outcome::Passed) => text.green(),
        LineStyle::Outcome(_) => text.yellow(),
        LineStyle::NoFailures => text.green().bold(),
        LineStyle::Terminated => text.red().bold(),
    }
}

impl ResultsWriter for ConsoleSummaryResultsWriter {
    fn name(&self) -> &str {
        "ConsoleSummaryResultsWriter"
    }

    fn kind(&self) -> WriterKind {
        WriterKind::Summary
    }

    fn setup(&mut self, ctx: &RunContext, _artifacts: &mut Artifacts) -> WriterResult<()> {
        self.generator.setup(ctx);
        self.shutdown = ctx.shutdown.clone();
        Ok(())
    }

    fn process_result(&mut self, result: &TestResult, _artifacts: &mut Artifacts) -> WriterResult<()> {
        self.generator.process_result(result);
        Ok(())
    }

    fn cleanup(&mut self, _artifacts: &mut Artifacts) -> WriterResult<()> {
        println!();
        for line in self.summary_lines() {
            println!("{}", styled(&line));
        }
        Ok(())
    }
}

// ============================================================================
// Failure annotations
// ============================================================================

/// One `file:line: error: ...` line per failure, enabled through the environment
pub struct ConsoleFailureAnnotationsWriter {
    enabled: bool,
    format: String,
    include_non_failures: Vec<Outcome>,
    cycles: u32,
    layout: RecordLayout,
}

impl ConsoleFailureAnnotationsWriter {
    pub const PROPERTIES: &'static [&'static str] = &["format", "includeNonFailureOutcomes"];

    pub const DEFAULT_FORMAT: &'static str =
        "@testFile@:@testFileLine@: @category@: @outcome@ - @outcomeReason@ (@testIdAndCycle@)";

    pub fn from_properties(props: &WriterProperties) -> WriterResult<Self> {
        Self::with_environment(
            props,
            std::env::var(ANNOTATIONS_ENV).ok(),
            std::env::var(ANNOTATIONS_INCLUDE_OUTCOMES_ENV).ok(),
        )
    }

    /// `enable` and `include_outcomes` are the values of the two environment variables
    pub fn with_environment(
        props: &WriterProperties,
        enable: Option<String>,
        include_outcomes: Option<String>,
    ) -> WriterResult<Self> {
        props.check_known(Self::PROPERTIES)?;
        let enabled = enable
            .as_deref()
            .is_some_and(|v| !v.eq_ignore_ascii_case("false"));
        let format = match enable.as_deref() {
            Some(v) if !v.is_empty() && !v.eq_ignore_ascii_case("true") && enabled => v.to_string(),
            _ => props.string_or("format", Self::DEFAULT_FORMAT),
        };
        let include_non_failures = match include_outcomes.filter(|v| !v.trim().is_empty()) {
            Some(list) => rigtest_core::domain::parse_outcome_list(&list)?,
            None => props.outcomes_or("includeNonFailureOutcomes", "NOT VERIFIED")?,
        };
        Ok(Self {
            enabled,
            format,
            include_non_failures,
            cycles: 1,
            layout: RecordLayout::default(),
        })
    }

    fn escape(text: &str) -> String {
        text.replace('\r', "").replace('\n', "; ")
    }

    /// Annotation for `result`, or None if its outcome is not reported
    pub fn format_line(&self, result: &TestResult) -> WriterResult<Option<String>> {
        let category = if result.outcome.is_failure() {
            "error"
        } else if self.include_non_failures.contains(&result.outcome) {
            "warning"
        } else {
            return Ok(None);
        };

        let test_file = result.test_dir.join(&result.test_file);
        let run_log = result.run_log_path();
        let reason = if result.outcome_reason.is_empty() {
            "(no outcome reason)"
        } else {
            result.outcome_reason.as_str()
        };
        let json = if self.format.contains("@json@") {
            Some(serde_json::to_string(&self.layout.record(result))?)
        } else {
            None
        };

        let line = substitute_placeholders(&self.format, |name| match name {
            "testFile" => Some(Self::escape(&test_file.to_string_lossy())),
            "testFile/" => Some(Self::escape(&to_forward_slashes(&test_file))),
            "testFileLine" => Some("0".to_string()),
            "runLogFile" => Some(Self::escape(&run_log.to_string_lossy())),
            "runLogFile/" => Some(Self::escape(&to_forward_slashes(&run_log))),
            "category" => Some(category.to_string()),
            "outcome" => Some(result.outcome.display_name().to_string()),
            "outcomeReason" => Some(Self::escape(reason)),
            "testIdAndCycle" => Some(Self::escape(&display_id(
                &result.test_id,
                result.cycle,
                self.cycles,
            ))),
            "json" => json.clone(),
            _ => None,
        });
        Ok(Some(line))
    }
}

/// Replace each `@name@` in `template` in a single pass; inserted values are never rescanned
fn substitute_placeholders(template: &str, value: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('@') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('@').and_then(|end| value(&after[..end]).map(|v| (end, v))) {
            Some((end, v)) => {
                out.push_str(&v);
                rest = &after[end + 1..];
            }
            None => {
                out.push('@');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

impl ResultsWriter for ConsoleFailureAnnotationsWriter {
    fn name(&self) -> &str {
        "ConsoleFailureAnnotationsWriter"
    }

    fn kind(&self) -> WriterKind {
        WriterKind::Record
    }

    fn is_enabled(&self, _record: bool, _progress: bool) -> bool {
        self.enabled
    }

    fn setup(&mut self, ctx: &RunContext, _artifacts: &mut Artifacts) -> WriterResult<()> {
        self.cycles = ctx.cycles;
        self.layout = RecordLayout::from_context(ctx, true);
        Ok(())
    }

    fn process_result(&mut self, result: &TestResult, _artifacts: &mut Artifacts) -> WriterResult<()> {
        if let Some(line) = self.format_line(result)? {
            println!("{}", line);
        }
        Ok(())
    }

    fn cleanup(&mut self, _artifacts: &mut Artifacts) -> WriterResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{context, result};
    use std::sync::atomic::{AtomicI64, Ordering};

    struct ManualClock(AtomicI64);

    impl TimeProvider for ManualClock {
        fn now_millis(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn props(pairs: &[(&str, &str)]) -> WriterProperties {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WriterProperties::new("console", &map)
    }

    #[test]
    fn test_progress_counts_and_recent_failures() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path(), 4, 1);
        ctx.threads = 2;
        let clock = Arc::new(ManualClock(AtomicI64::new(1_000)));
        let mut w = ConsoleProgressResultsWriter::new(clock.clone(), 1);
        w.setup(&ctx, &mut Artifacts::new()).unwrap();
        for id in ["t1", "t2", "t3"] {
            w.process_test_starting(id, 0).unwrap();
        }

        clock.0.store(11_000, Ordering::SeqCst);
        let lines = w.progress_lines(&result(&ctx, "t1", Outcome::Failed, 0));
        assert_eq!(lines[0], "Test progress: completed 1/4 = 25.0% of tests in 10 seconds");
        assert_eq!(lines[1], "   1 FAILED");
        assert_eq!(lines[2], "Recent failures: ");
        assert_eq!(lines[3], "   FAILED: t1: t1 went wrong");
        assert_eq!(lines[4], "Currently executing: t2, t3");

        clock.0.store(181_000, Ordering::SeqCst);
        let lines = w.progress_lines(&result(&ctx, "t2", Outcome::TimedOut, 0));
        assert_eq!(lines[0], "Test progress: completed 2/4 = 50.0% of tests in 3 minutes");
        assert!(lines.contains(&"   TIMED OUT: t2: t2 went wrong".to_string()));
        assert!(!lines.iter().any(|l| l.contains("FAILED: t1")));

        let lines = w.progress_lines(&result(&ctx, "t3", Outcome::Passed, 0));
        assert_eq!(lines[1], "   1 PASSED (33.3%)");
        assert_eq!(lines[2], "   1 TIMED OUT, 1 FAILED");
    }

    #[test]
    fn test_progress_counts_unannounced_tests() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), 1, 2);
        let mut w = ConsoleProgressResultsWriter::new(Arc::new(ManualClock(AtomicI64::new(0))), 5);
        w.setup(&ctx, &mut Artifacts::new()).unwrap();
        w.process_test_starting("t1", 0).unwrap();
        w.progress_lines(&result(&ctx, "t1", Outcome::Passed, 0));
        let lines = w.progress_lines(&result(&ctx, "extra", Outcome::Passed, 0));
        assert!(lines[0].starts_with("Test progress: completed 2/3 "));
    }

    #[test]
    fn test_summary_uses_console_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), 2, 1);
        let mut w = ConsoleSummaryResultsWriter::from_properties(&props(&[("showDuration", "false")])).unwrap();
        assert!(w.is_enabled(false, false));
        w.setup(&ctx, &mut Artifacts::new()).unwrap();
        w.process_result(&result(&ctx, "t1", Outcome::Failed, 0), &mut Artifacts::new()).unwrap();
        w.process_result(&result(&ctx, "t2", Outcome::Failed, 0), &mut Artifacts::new()).unwrap();

        let lines = w.summary_lines();
        assert!(!lines.iter().any(|l| l.text.starts_with("Completed test run at")));
        assert!(lines.iter().any(|l| l.text == "Run details:"));
        assert!(lines.iter().any(|l| l.text == "List of failed test ids:"));
        assert!(lines.iter().any(|l| l.style == LineStyle::Outcome(Outcome::Failed)));
        assert!(!lines.iter().any(|l| l.style == LineStyle::Terminated));
    }

    #[test]
    fn test_annotation_enablement_and_format_override() {
        let p = props(&[]);
        let w = ConsoleFailureAnnotationsWriter::with_environment(&p, None, None).unwrap();
        assert!(!w.is_enabled(true, true));
        let w = ConsoleFailureAnnotationsWriter::with_environment(&p, Some("FALSE".into()), None).unwrap();
        assert!(!w.is_enabled(true, true));
        let w = ConsoleFailureAnnotationsWriter::with_environment(&p, Some(String::new()), None).unwrap();
        assert!(w.is_enabled(false, false));
        assert_eq!(w.format, ConsoleFailureAnnotationsWriter::DEFAULT_FORMAT);
        let w = ConsoleFailureAnnotationsWriter::with_environment(&p, Some("@outcome@!".into()), None).unwrap();
        assert_eq!(w.format, "@outcome@!");
    }

    #[test]
    fn test_annotation_lines() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), 1, 3);
        let mut w = ConsoleFailureAnnotationsWriter::with_environment(&props(&[]), Some("true".into()), None).unwrap();
        w.setup(&ctx, &mut Artifacts::new()).unwrap();

        let mut failed = result(&ctx, "t1", Outcome::TimedOut, 2);
        failed.outcome_reason = "line one\r\nline two".to_string();
        let line = w.format_line(&failed).unwrap().unwrap();
        let test_file = failed.test_dir.join("rigtest.toml");
        assert_eq!(
            line,
            format!(
                "{}:0: error: TIMED OUT - line one; line two (t1 [CYCLE 03])",
                test_file.to_string_lossy()
            )
        );

        let not_verified = result(&ctx, "t2", Outcome::NotVerified, 0);
        let line = w.format_line(&not_verified).unwrap().unwrap();
        assert!(line.contains(": warning: NOT VERIFIED - (no outcome reason) (t2 [CYCLE 01])"));

        assert!(w.format_line(&result(&ctx, "t3", Outcome::Passed, 0)).unwrap().is_none());
    }

    #[test]
    fn test_annotation_reason_text_is_not_substituted() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), 1, 1);
        let mut w = ConsoleFailureAnnotationsWriter::with_environment(
            &props(&[("format", "@outcome@ - @outcomeReason@ @category@ a@b")]),
            Some(String::new()),
            None,
        )
        .unwrap();
        w.setup(&ctx, &mut Artifacts::new()).unwrap();

        let mut failed = result(&ctx, "t1", Outcome::Failed, 0);
        failed.outcome_reason = "saw @json@ and @category@ in output".to_string();
        let line = w.format_line(&failed).unwrap().unwrap();
        assert_eq!(line, "FAILED - saw @json@ and @category@ in output error a@b");
    }

    #[test]
    fn test_annotation_json_and_outcome_override() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), 1, 1);
        let mut w = ConsoleFailureAnnotationsWriter::with_environment(
            &props(&[("format", "@category@ @json@")]),
            Some(String::new()),
            Some("*".into()),
        )
        .unwrap();
        w.setup(&ctx, &mut Artifacts::new()).unwrap();

        let line = w.format_line(&result(&ctx, "t1", Outcome::Passed, 0)).unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(line.strip_prefix("warning ").unwrap()).unwrap();
        assert_eq!(json["testId"], "t1");
        assert_eq!(json["outcome"], "PASSED");
    }
}
