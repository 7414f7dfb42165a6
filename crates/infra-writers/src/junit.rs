// JUnit XML results writer
// reason: quick-junit for the Ant JUnit report format CI servers understand
use quick_junit::{NonSuccessKind, Report, TestCase, TestCaseStatus, TestSuite};
use rigtest_core::domain::{Outcome, TestResult};
use rigtest_core::port::{
    Artifacts, ResultsWriter, RunContext, WriterError, WriterKind, WriterResult,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use crate::properties::WriterProperties;
use crate::util::{replace_illegal_xml_chars, strip_ansi_escape_codes};

pub const JUNIT_DIR_CATEGORY: &str = "JUnitXMLResultsDir";

/// One `TEST-<id>[.<cycle>].xml` file per test per cycle
pub struct JUnitXmlResultsWriter {
    output_dir: Option<String>,
    dir: Option<PathBuf>,
    cycles: u32,
}

impl JUnitXmlResultsWriter {
    pub const PROPERTIES: &'static [&'static str] = &["outputDir"];

    pub fn from_properties(props: &WriterProperties) -> WriterResult<Self> {
        props.check_known(Self::PROPERTIES)?;
        Ok(Self {
            output_dir: props.string("outputDir"),
            dir: None,
            cycles: 1,
        })
    }

    pub fn file_name(test_id: &str, cycle: u32, cycles: u32) -> String {
        if cycles > 1 {
            format!("TEST-{}.{}.xml", test_id, cycle + 1)
        } else {
            format!("TEST-{}.xml", test_id)
        }
    }

    fn report(result: &TestResult) -> Report {
        let outcome = result.outcome;
        let message = if result.outcome_reason.is_empty() {
            outcome.display_name().to_string()
        } else {
            format!("{}: {}", outcome, replace_illegal_xml_chars(&result.outcome_reason))
        };

        let status = if outcome == Outcome::Skipped {
            let mut status = TestCaseStatus::skipped();
            status.set_message(message);
            status
        } else if outcome.is_failure() {
            let mut status = TestCaseStatus::non_success(NonSuccessKind::Failure);
            status.set_message(message);
            status.set_type(outcome.display_name());
            status
        } else {
            TestCaseStatus::success()
        };

        let time = Duration::from_secs_f64(result.duration_secs.max(0.0));
        let mut case = TestCase::new(result.test_id.as_str(), status);
        case.set_classname(result.classname.clone().unwrap_or_else(|| result.test_id.clone()));
        case.set_time(time);
        if outcome.is_failure() || outcome == Outcome::Skipped {
            case.set_system_out(replace_illegal_xml_chars(&strip_ansi_escape_codes(&result.run_log)));
        }

        let mut suite = TestSuite::new(result.test_id.as_str());
        suite.set_time(time);
        // UTC, as Ant does
        suite.set_timestamp(chrono::Utc::now().fixed_offset());
        suite.add_test_case(case);

        let mut report = Report::new(result.test_id.as_str());
        report.add_test_suite(suite);
        report
    }
}

impl ResultsWriter for JUnitXmlResultsWriter {
    fn name(&self) -> &str {
        "JUnitXmlResultsWriter"
    }

    fn kind(&self) -> WriterKind {
        WriterKind::Record
    }

    fn setup(&mut self, ctx: &RunContext, _artifacts: &mut Artifacts) -> WriterResult<()> {
        let dir = match &self.output_dir {
            Some(dir) => ctx.default_output_dir().join(dir),
            None => ctx.test_root.join("target").join("rigtest-reports"),
        };
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        std::fs::create_dir_all(&dir)?;
        self.cycles = ctx.cycles;
        self.dir = Some(dir);
        Ok(())
    }

    fn process_result(&mut self, result: &TestResult, _artifacts: &mut Artifacts) -> WriterResult<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let path = dir.join(Self::file_name(&result.test_id, result.cycle, self.cycles));
        let xml = Self::report(result)
            .to_string()
            .map_err(|e| WriterError::Format(e.to_string()))?;
        std::fs::write(&path, xml)?;
        debug!(file = %path.display(), "Wrote JUnit report");
        Ok(())
    }

    fn cleanup(&mut self, artifacts: &mut Artifacts) -> WriterResult<()> {
        if let Some(dir) = self.dir.take() {
            artifacts.publish(&dir, JUNIT_DIR_CATEGORY);
        }
        Ok(())
    }
}
