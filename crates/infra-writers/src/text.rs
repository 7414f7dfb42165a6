// Plain text results writer

use chrono::Local;
use rigtest_core::domain::TestResult;
use rigtest_core::port::{Artifacts, ResultsWriter, RunContext, WriterKind, WriterResult};
use std::fs::File;
use std::io::BufWriter;

use crate::properties::WriterProperties;
use crate::util::{create_file, expand_time_template, resolve_output_file, write_flushed};

pub const DEFAULT_TEXT_FILE: &str = "testsummary_%Y%m%d%H%M%S.log";

/// `OUTCOME: id` lines grouped under `[Cycle N]:` headings
pub struct TextResultsWriter {
    file: String,
    output_dir: Option<String>,
    out: Option<BufWriter<File>>,
    cycle: Option<u32>,
}

impl TextResultsWriter {
    pub const PROPERTIES: &'static [&'static str] = &["file", "outputDir"];

    pub fn from_properties(props: &WriterProperties) -> WriterResult<Self> {
        props.check_known(Self::PROPERTIES)?;
        Ok(Self {
            file: props.string_or("file", DEFAULT_TEXT_FILE),
            output_dir: props.string("outputDir"),
            out: None,
            cycle: None,
        })
    }
}

impl ResultsWriter for TextResultsWriter {
    fn name(&self) -> &str {
        "TextResultsWriter"
    }

    fn kind(&self) -> WriterKind {
        WriterKind::Record
    }

    fn setup(&mut self, ctx: &RunContext, _artifacts: &mut Artifacts) -> WriterResult<()> {
        let now = Local::now();
        let path = resolve_output_file(ctx, self.output_dir.as_deref(), &expand_time_template(&self.file, now)?);
        let mut out = create_file(&path)?;

        let mut header = format!(
            "DATE:       {}\nPLATFORM:   {}\nTEST HOST:  {}\n\n",
            now.format("%Y-%m-%d %H:%M:%S (%Z)"),
            ctx.run_details.get("os").unwrap_or(std::env::consts::OS),
            ctx.run_details.get("hostname").unwrap_or("localhost"),
        );
        for (key, value) in ctx.run_details.iter() {
            if matches!(key, "startTime" | "hostname" | "os") {
                continue;
            }
            header.push_str(&format!("{:<20}{}\n", format!("{}: ", key), value));
        }
        write_flushed(&mut out, &header)?;

        self.out = Some(out);
        self.cycle = None;
        Ok(())
    }

    fn process_result(&mut self, result: &TestResult, _artifacts: &mut Artifacts) -> WriterResult<()> {
        let Some(out) = self.out.as_mut() else {
            return Ok(());
        };
        let mut text = String::new();
        if self.cycle != Some(result.cycle) {
            self.cycle = Some(result.cycle);
            text.push_str(&format!("\n[Cycle {}]:\n", result.cycle + 1));
        }
        text.push_str(&format!("{}: {}\n", result.outcome, result.test_id));
        write_flushed(out, &text)
    }

    fn cleanup(&mut self, _artifacts: &mut Artifacts) -> WriterResult<()> {
        if let Some(mut out) = self.out.take() {
            write_flushed(&mut out, "\n\n\n")?;
        }
        Ok(())
    }
}
