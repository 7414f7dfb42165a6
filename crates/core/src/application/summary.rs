// Test Outcome Summary Generator
// Accumulates results and renders the end-of-run textual summary.

use crate::application::constants::MAX_SUMMARY_FAILURE_IDS;
use crate::domain::{Outcome, RunDetails, TestResult};
use crate::port::{local_now, RunContext, TimeProvider};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Sections and details to include in the summary
#[derive(Debug, Clone)]
pub struct SummaryOptions {
    pub show_duration: bool,
    pub show_run_details: bool,
    pub show_outcome_stats: bool,
    pub show_outcome_reason: bool,
    pub show_output_dir: bool,
    pub show_test_dir: bool,
    pub show_test_title: bool,
    pub show_inspect_summary: bool,
    pub show_not_verified_summary: bool,
    pub show_failure_summary: bool,
    pub show_test_id_list: bool,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            show_duration: false,
            show_run_details: false,
            show_outcome_stats: true,
            show_outcome_reason: true,
            show_output_dir: true,
            show_test_dir: true,
            show_test_title: false,
            show_inspect_summary: true,
            show_not_verified_summary: true,
            show_failure_summary: true,
            show_test_id_list: false,
        }
    }
}

/// How a summary line should be colored on a console
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStyle {
    Plain,
    /// Timestamps, durations, paths
    Detail,
    /// Outcome reasons
    Reason,
    Outcome(Outcome),
    NoFailures,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryLine {
    pub text: String,
    pub style: LineStyle,
}

impl SummaryLine {
    fn new(text: impl Into<String>, style: LineStyle) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    id: String,
    reason: String,
    title: String,
    test_dir: PathBuf,
    output_dir: PathBuf,
}

pub struct TestOutcomeSummaryGenerator {
    time: Arc<dyn TimeProvider>,
    start_millis: i64,
    /// cycle -> outcome -> entries
    results: BTreeMap<u32, BTreeMap<Outcome, Vec<Entry>>>,
    outcomes: BTreeMap<Outcome, usize>,
    additive_secs: f64,
    num_tests: usize,
    cycles: u32,
    threads: usize,
    run_details: RunDetails,
    relative_to: Option<PathBuf>,
}

impl TestOutcomeSummaryGenerator {
    pub fn new(time: Arc<dyn TimeProvider>) -> Self {
        let start_millis = time.now_millis();
        Self {
            time,
            start_millis,
            results: BTreeMap::new(),
            outcomes: BTreeMap::new(),
            additive_secs: 0.0,
            num_tests: 0,
            cycles: 1,
            threads: 1,
            run_details: RunDetails::new(),
            relative_to: std::env::current_dir().ok(),
        }
    }

    /// Log paths as given instead of relative to the working directory
    pub fn with_absolute_paths(mut self) -> Self {
        self.relative_to = None;
        self
    }

    pub fn setup(&mut self, ctx: &RunContext) {
        self.start_millis = self.time.now_millis();
        self.cycles = ctx.cycles.max(1);
        // one result per test per cycle
        self.num_tests = ctx.num_tests * self.cycles as usize;
        self.threads = ctx.threads;
        self.run_details = ctx.run_details.clone();
        self.results = (0..self.cycles).map(|c| (c, BTreeMap::new())).collect();
        self.outcomes.clear();
        self.additive_secs = 0.0;
    }

    pub fn process_result(&mut self, result: &TestResult) {
        self.results
            .entry(result.cycle)
            .or_default()
            .entry(result.outcome)
            .or_default()
            .push(Entry {
                id: result.test_id.clone(),
                reason: result.outcome_reason.clone(),
                title: result.title.clone(),
                test_dir: result.test_dir.clone(),
                output_dir: result.output_dir.clone(),
            });
        *self.outcomes.entry(result.outcome).or_default() += 1;
        self.additive_secs += result.duration_secs;
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.outcomes.get(&outcome).copied().unwrap_or(0)
    }

    pub fn executed(&self) -> usize {
        self.outcomes.values().sum()
    }

    /// Render the summary; `interrupted` adds the early-termination line
    pub fn summary_lines(&self, options: &SummaryOptions, interrupted: bool) -> Vec<SummaryLine> {
        let multi = self.num_tests > 1;
        let mut out = Vec::new();

        if options.show_duration && multi {
            let now = local_now(self.time.as_ref());
            let elapsed = (self.time.now_millis() - self.start_millis) as f64 / 1000.0;
            out.push(SummaryLine::new(
                format!("Completed test run at:  {}", now.format("%A %Y-%m-%d %H:%M:%S %Z")),
                LineStyle::Detail,
            ));
            if self.threads > 1 {
                out.push(SummaryLine::new(
                    format!("Total test duration (absolute): {:.2} secs", elapsed),
                    LineStyle::Detail,
                ));
                out.push(SummaryLine::new(
                    format!("Total test duration (additive): {:.2} secs", self.additive_secs),
                    LineStyle::Detail,
                ));
            } else {
                out.push(SummaryLine::new(
                    format!("Total test duration:    {:.2} secs", elapsed),
                    LineStyle::Detail,
                ));
            }
            out.push(SummaryLine::new("", LineStyle::Plain));
        }

        if options.show_run_details && multi {
            out.push(SummaryLine::new("Run details:", LineStyle::Plain));
            for (k, v) in self.run_details.iter() {
                out.push(SummaryLine::new(
                    format!(" {:>23}{}", format!("{}: ", k), v),
                    LineStyle::Detail,
                ));
            }
            out.push(SummaryLine::new("", LineStyle::Plain));
        }

        if options.show_outcome_stats && multi {
            self.outcome_stats(&mut out);
        }

        if options.show_not_verified_summary && self.count(Outcome::NotVerified) > 0 {
            out.push(SummaryLine::new("Summary of not verified outcomes:", LineStyle::Plain));
            self.list_outcomes(&mut out, options, |o| o == Outcome::NotVerified);
            out.push(SummaryLine::new("", LineStyle::Plain));
        }

        if options.show_inspect_summary && self.count(Outcome::Inspect) > 0 {
            out.push(SummaryLine::new("Summary of inspect outcomes: ", LineStyle::Plain));
            self.list_outcomes(&mut out, options, |o| o == Outcome::Inspect);
            out.push(SummaryLine::new("", LineStyle::Plain));
        }

        if options.show_failure_summary {
            out.push(SummaryLine::new("Summary of failures: ", LineStyle::Plain));
            let fails: usize = Outcome::ALL
                .iter()
                .filter(|o| o.is_failure())
                .map(|o| self.count(*o))
                .sum();
            if fails == 0 {
                out.push(SummaryLine::new("  THERE WERE NO FAILURES", LineStyle::NoFailures));
            } else {
                self.list_outcomes(&mut out, options, |o| o.is_failure());
            }
            if interrupted {
                let did_not_start = self.num_tests.saturating_sub(self.executed());
                let text = if did_not_start > 0 {
                    format!("  TERMINATED EARLY; {} TESTS DID NOT START", did_not_start)
                } else {
                    "  TERMINATED EARLY".to_string()
                };
                out.push(SummaryLine::new(text, LineStyle::Terminated));
            }
            out.push(SummaryLine::new("", LineStyle::Plain));
        }

        if options.show_test_id_list && multi {
            let ids = self.failed_ids();
            if ids.len() > 1 {
                out.push(SummaryLine::new("List of failed test ids:", LineStyle::Plain));
                out.push(SummaryLine::new(ids.join(" "), LineStyle::Plain));
            }
        }

        out
    }

    /// Summary as plain text, one line per entry
    pub fn summary_text(&self, options: &SummaryOptions, interrupted: bool) -> String {
        self.summary_lines(options, interrupted)
            .into_iter()
            .map(|l| l.text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn outcome_stats(&self, out: &mut Vec<SummaryLine>) {
        let executed = self.executed();
        let describe = |failure: bool| {
            Outcome::ALL
                .iter()
                .filter(|o| o.is_failure() == failure && self.count(**o) > 0)
                .map(|o| format!("{} {}", self.count(*o), o))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let failed = describe(true);
        let passed = describe(false);

        if !failed.is_empty() {
            let failures: usize = Outcome::ALL
                .iter()
                .filter(|o| o.is_failure())
                .map(|o| self.count(*o))
                .sum();
            out.push(SummaryLine::new(
                format!(
                    "Failure outcomes: {} ({:.1}%)",
                    failed,
                    100.0 * failures as f64 / executed as f64
                ),
                LineStyle::Outcome(Outcome::Failed),
            ));
        }
        if !passed.is_empty() {
            out.push(SummaryLine::new(
                format!("Success outcomes: {}", passed),
                LineStyle::Outcome(Outcome::Passed),
            ));
        }
        out.push(SummaryLine::new("", LineStyle::Plain));
    }

    fn list_outcomes<F>(&self, out: &mut Vec<SummaryLine>, options: &SummaryOptions, include: F)
    where
        F: Fn(Outcome) -> bool,
    {
        for (cycle, by_outcome) in &self.results {
            let cycle_str = if self.results.len() > 1 {
                format!("[CYCLE {}] ", cycle + 1)
            } else {
                String::new()
            };
            for outcome in Outcome::ALL.iter().copied().filter(|o| include(*o)) {
                let mut entries: Vec<&Entry> = by_outcome
                    .get(&outcome)
                    .map(|v| v.iter().collect())
                    .unwrap_or_default();
                // similar outcomes together: by reason then test dir
                entries.sort_by(|a, b| (&a.reason, &a.test_dir).cmp(&(&b.reason, &b.test_dir)));

                for entry in entries {
                    out.push(SummaryLine::new(
                        format!("  {}{}: {} ", cycle_str, outcome, entry.id),
                        LineStyle::Outcome(outcome),
                    ));
                    if options.show_test_title && !entry.title.is_empty() {
                        out.push(SummaryLine::new(
                            format!("      (title: {})", entry.title),
                            LineStyle::Detail,
                        ));
                    }
                    if options.show_outcome_reason && !entry.reason.is_empty() {
                        out.push(SummaryLine::new(
                            format!("      {}", entry.reason),
                            LineStyle::Reason,
                        ));
                    }
                    let output_dir = self.display_dir(&entry.output_dir);
                    let test_dir = self.display_dir(&entry.test_dir);
                    if options.show_test_dir
                        && !(options.show_output_dir && output_dir.starts_with(&test_dir))
                    {
                        out.push(SummaryLine::new(format!("      {}", test_dir), LineStyle::Detail));
                    }
                    if options.show_output_dir {
                        out.push(SummaryLine::new(
                            format!("      {}", output_dir),
                            LineStyle::Detail,
                        ));
                    }
                }
            }
        }
    }

    fn failed_ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for by_outcome in self.results.values() {
            for outcome in Outcome::ALL.iter().filter(|o| o.is_failure()) {
                for entry in by_outcome.get(outcome).into_iter().flatten() {
                    if seen.insert(entry.id.clone()) {
                        ids.push(entry.id.clone());
                    }
                }
            }
        }
        if ids.len() > MAX_SUMMARY_FAILURE_IDS {
            ids.truncate(MAX_SUMMARY_FAILURE_IDS);
            ids.push("...".to_string());
        }
        ids
    }

    fn display_dir(&self, path: &Path) -> String {
        let shown = self
            .relative_to
            .as_deref()
            .and_then(|base| path.strip_prefix(base).ok())
            .unwrap_or(path);
        format!("{}{}", shown.display(), std::path::MAIN_SEPARATOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ShutdownToken;
    use crate::port::time_provider::MockTimeProvider;
    use chrono::Local;

    fn ctx(num_tests: usize, threads: usize) -> RunContext {
        RunContext {
            num_tests,
            cycles: 1,
            threads,
            test_root: PathBuf::from("/tests"),
            output_root: PathBuf::from("/tests/out"),
            out_dir_name: "out".into(),
            run_details: RunDetails::new(),
            extra_args: BTreeMap::new(),
            record: false,
            properties: BTreeMap::new(),
            shutdown: ShutdownToken::never(),
        }
    }

    fn result(id: &str, outcome: Outcome, reason: &str) -> TestResult {
        TestResult {
            test_id: id.into(),
            title: String::new(),
            classname: None,
            outcome,
            outcome_reason: reason.into(),
            cycle: 0,
            start_time: Local::now(),
            duration_secs: 1.5,
            test_dir: PathBuf::from("/tests").join(id),
            test_file: "rigtest.toml".into(),
            output_dir: PathBuf::from("/tests").join(id).join("out"),
            run_log: String::new(),
        }
    }

    fn generator() -> TestOutcomeSummaryGenerator {
        let mut time = MockTimeProvider::new();
        time.expect_now_millis().returning(|| 1_700_000_000_000);
        TestOutcomeSummaryGenerator::new(Arc::new(time)).with_absolute_paths()
    }

    #[test]
    fn test_no_failures() {
        let mut gen = generator();
        gen.setup(&ctx(2, 1));
        gen.process_result(&result("a", Outcome::Passed, ""));
        gen.process_result(&result("b", Outcome::Passed, ""));

        let text = gen.summary_text(&SummaryOptions::default(), false);
        assert!(text.contains("Success outcomes: 2 PASSED"));
        assert!(text.contains("THERE WERE NO FAILURES"));
        assert!(!text.contains("Failure outcomes"));
    }

    #[test]
    fn test_failures_sorted_by_reason() {
        let mut gen = generator();
        gen.setup(&ctx(4, 2));
        gen.process_result(&result("t2", Outcome::Failed, "zzz"));
        gen.process_result(&result("t1", Outcome::Failed, "aaa"));
        gen.process_result(&result("t3", Outcome::TimedOut, "slow"));
        gen.process_result(&result("t4", Outcome::Passed, ""));

        let lines = gen.summary_lines(&SummaryOptions::default(), false);
        let texts: Vec<_> = lines.iter().map(|l| l.text.as_str()).collect();

        assert!(texts.contains(&"Failure outcomes: 1 TIMED OUT, 2 FAILED (75.0%)"));
        let t1 = texts.iter().position(|t| *t == "  FAILED: t1 ").unwrap();
        let t2 = texts.iter().position(|t| *t == "  FAILED: t2 ").unwrap();
        let t3 = texts.iter().position(|t| *t == "  TIMED OUT: t3 ").unwrap();
        assert!(t3 < t1 && t1 < t2);
        assert_eq!(texts[t1 + 1], "      aaa");
        // output dir lies under the test dir, so only it is shown
        assert_eq!(texts[t1 + 2], format!("      /tests/t1/out{}", std::path::MAIN_SEPARATOR));
    }

    #[test]
    fn test_terminated_early_and_id_list() {
        let mut gen = generator();
        gen.setup(&ctx(5, 1));
        gen.process_result(&result("x", Outcome::Failed, "r"));
        gen.process_result(&result("y", Outcome::Blocked, "r"));

        let options = SummaryOptions {
            show_test_id_list: true,
            ..SummaryOptions::default()
        };
        let text = gen.summary_text(&options, true);
        assert!(text.contains("  TERMINATED EARLY; 3 TESTS DID NOT START"));
        assert!(text.contains("List of failed test ids:\ny x"));
    }

    #[test]
    fn test_terminated_early_counts_every_cycle() {
        let mut gen = generator();
        let mut context = ctx(2, 1);
        context.cycles = 3;
        gen.setup(&context);
        gen.process_result(&result("a", Outcome::Passed, ""));
        gen.process_result(&result("b", Outcome::Failed, "r"));

        let text = gen.summary_text(&SummaryOptions::default(), true);
        assert!(text.contains("  TERMINATED EARLY; 4 TESTS DID NOT START"));
    }

    #[test]
    fn test_single_test_over_cycles_shows_stats() {
        let mut gen = generator();
        let mut context = ctx(1, 1);
        context.cycles = 2;
        gen.setup(&context);
        gen.process_result(&result("only", Outcome::Passed, ""));
        let mut second = result("only", Outcome::Passed, "");
        second.cycle = 1;
        gen.process_result(&second);

        let text = gen.summary_text(&SummaryOptions::default(), false);
        assert!(text.contains("Success outcomes: 2 PASSED"));
    }

    #[test]
    fn test_single_test_suppresses_stats() {
        let mut gen = generator();
        gen.setup(&ctx(1, 1));
        gen.process_result(&result("only", Outcome::NotVerified, "nothing checked"));

        let options = SummaryOptions {
            show_duration: true,
            ..SummaryOptions::default()
        };
        let text = gen.summary_text(&options, false);
        assert!(!text.contains("Success outcomes"));
        assert!(!text.contains("Completed test run at"));
        assert!(text.contains("Summary of not verified outcomes:"));
        assert!(text.contains("  NOT VERIFIED: only "));
    }
}
