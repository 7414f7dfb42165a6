// CSV results writer

use chrono::Local;
use rigtest_core::domain::TestResult;
use rigtest_core::port::{Artifacts, ResultsWriter, RunContext, WriterKind, WriterResult};
use std::fs::File;
use std::io::BufWriter;

use crate::properties::WriterProperties;
use crate::util::{create_file, expand_time_template, resolve_output_file, write_flushed};

pub const DEFAULT_CSV_FILE: &str = "testsummary_%Y%m%d%H%M%S.csv";
pub const CSV_HEADER: &str = "id, title, cycle, startTime, duration, outcome";

pub struct CsvResultsWriter {
    file: String,
    output_dir: Option<String>,
    out: Option<BufWriter<File>>,
}

impl CsvResultsWriter {
    pub const PROPERTIES: &'static [&'static str] = &["file", "outputDir"];

    pub fn from_properties(props: &WriterProperties) -> WriterResult<Self> {
        props.check_known(Self::PROPERTIES)?;
        Ok(Self {
            file: props.string_or("file", DEFAULT_CSV_FILE),
            output_dir: props.string("outputDir"),
            out: None,
        })
    }
}

/// One row; the title is quoted with embedded quotes doubled
fn row(result: &TestResult) -> String {
    format!(
        "{},\"{}\",{},{},{},{}\n",
        result.test_id,
        result.title.replace('"', "\"\""),
        result.cycle + 1,
        result.start_time.format("%Y-%m-%d %H:%M:%S"),
        result.duration_secs,
        result.outcome
    )
}

impl ResultsWriter for CsvResultsWriter {
    fn name(&self) -> &str {
        "CsvResultsWriter"
    }

    fn kind(&self) -> WriterKind {
        WriterKind::Record
    }

    fn setup(&mut self, ctx: &RunContext, _artifacts: &mut Artifacts) -> WriterResult<()> {
        let file = expand_time_template(&self.file, Local::now())?;
        let mut out = create_file(&resolve_output_file(ctx, self.output_dir.as_deref(), &file))?;
        write_flushed(&mut out, &format!("{}\n", CSV_HEADER))?;
        self.out = Some(out);
        Ok(())
    }

    fn process_result(&mut self, result: &TestResult, _artifacts: &mut Artifacts) -> WriterResult<()> {
        match self.out.as_mut() {
            Some(out) => write_flushed(out, &row(result)),
            None => Ok(()),
        }
    }

    fn cleanup(&mut self, _artifacts: &mut Artifacts) -> WriterResult<()> {
        self.out = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{context, result};
    use rigtest_core::domain::Outcome;
    use std::collections::BTreeMap;

    #[test]
    fn test_rows_quote_title() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), 1, 1);
        let props: BTreeMap<String, String> =
            [("file".to_string(), "out.csv".to_string())].into_iter().collect();
        let mut w = CsvResultsWriter::from_properties(&WriterProperties::new("csv", &props)).unwrap();
        let mut artifacts = Artifacts::new();

        let mut r = result(&ctx, "t1", Outcome::Passed, 0);
        r.title = "Says \"hi\", twice".to_string();
        w.setup(&ctx, &mut artifacts).unwrap();
        w.process_result(&r, &mut artifacts).unwrap();
        w.cleanup(&mut artifacts).unwrap();

        let text = std::fs::read_to_string(ctx.default_output_dir().join("out.csv")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(
            lines[1],
            "t1,\"Says \"\"hi\"\", twice\",1,2024-01-02 03:04:05,1.5,PASSED"
        );
    }
}
