// XML results writer
// reason: quick-xml event writer; the whole document is rewritten after each result
use chrono::Local;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use rigtest_core::domain::{to_forward_slashes, TestResult};
use rigtest_core::port::{
    Artifacts, ResultsWriter, RunContext, WriterError, WriterKind, WriterResult,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::properties::WriterProperties;
use crate::util::{expand_time_template, replace_illegal_xml_chars, resolve_output_file};

pub const DEFAULT_XML_FILE: &str = "testsummary_%Y%m%d%H%M%S.xml";

struct XmlResult {
    id: String,
    outcome: String,
    reason: String,
    timestamp: String,
    descriptor: String,
    output: String,
}

struct Header {
    timestamp: String,
    platform: String,
    host: String,
    root: String,
    xargs: BTreeMap<String, String>,
}

/// Single `<rigtestlog>` document with one `<results>` element per cycle
pub struct XmlResultsWriter {
    file: String,
    output_dir: Option<String>,
    stylesheet: Option<String>,
    use_file_url: bool,
    path: Option<PathBuf>,
    header: Option<Header>,
    cycles: Vec<(u32, Vec<XmlResult>)>,
    num_tests: usize,
    completed: usize,
    complete: bool,
}

fn xml_err(e: impl std::fmt::Display) -> WriterError {
    WriterError::Format(e.to_string())
}

impl XmlResultsWriter {
    pub const PROPERTIES: &'static [&'static str] =
        &["file", "outputDir", "stylesheet", "useFileURL"];

    pub fn from_properties(props: &WriterProperties) -> WriterResult<Self> {
        props.check_known(Self::PROPERTIES)?;
        Ok(Self {
            file: props.string_or("file", DEFAULT_XML_FILE),
            output_dir: props.string("outputDir"),
            stylesheet: props.string("stylesheet"),
            use_file_url: props.bool_or("useFileURL", false)?,
            path: None,
            header: None,
            cycles: Vec::new(),
            num_tests: 0,
            completed: 0,
            complete: false,
        })
    }

    fn path_text(&self, path: &Path) -> String {
        let path = to_forward_slashes(path);
        if !self.use_file_url {
            return path;
        }
        let host = self
            .header
            .as_ref()
            .map(|h| h.host.as_str())
            .unwrap_or("localhost");
        if path.starts_with('/') {
            format!("file://{}{}", host, path)
        } else {
            format!("file://{}/{}", host, path)
        }
    }

    fn text_element(w: &mut Writer<Vec<u8>>, name: &str, text: &str) -> WriterResult<()> {
        w.write_event(Event::Start(BytesStart::new(name))).map_err(xml_err)?;
        w.write_event(Event::Text(BytesText::new(text))).map_err(xml_err)?;
        w.write_event(Event::End(BytesEnd::new(name))).map_err(xml_err)?;
        Ok(())
    }

    fn render(&self) -> WriterResult<Vec<u8>> {
        let Some(header) = &self.header else {
            return Ok(Vec::new());
        };
        let mut w = Writer::new_with_indent(Vec::new(), b'\t', 1);
        w.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
            .map_err(xml_err)?;
        if let Some(stylesheet) = &self.stylesheet {
            let pi = format!("xml-stylesheet href=\"{}\" type=\"text/xsl\"", stylesheet);
            w.write_event(Event::PI(BytesText::from_escaped(pi.as_str())))
                .map_err(xml_err)?;
        }

        let completed = format!("{}/{}", self.completed, self.num_tests);
        let root = BytesStart::new("rigtestlog").with_attributes([
            ("status", if self.complete { "complete" } else { "running" }),
            ("completed", completed.as_str()),
        ]);
        w.write_event(Event::Start(root)).map_err(xml_err)?;
        Self::text_element(&mut w, "timestamp", &header.timestamp)?;
        Self::text_element(&mut w, "platform", &header.platform)?;
        Self::text_element(&mut w, "host", &header.host)?;
        Self::text_element(&mut w, "root", &header.root)?;

        if header.xargs.is_empty() {
            w.write_event(Event::Empty(BytesStart::new("xargs"))).map_err(xml_err)?;
        } else {
            w.write_event(Event::Start(BytesStart::new("xargs"))).map_err(xml_err)?;
            for (name, value) in &header.xargs {
                let xarg = BytesStart::new("xarg")
                    .with_attributes([("name", name.as_str()), ("value", value.as_str())]);
                w.write_event(Event::Empty(xarg)).map_err(xml_err)?;
            }
            w.write_event(Event::End(BytesEnd::new("xargs"))).map_err(xml_err)?;
        }

        for (cycle, results) in &self.cycles {
            let number = (cycle + 1).to_string();
            let start = BytesStart::new("results").with_attributes([("cycle", number.as_str())]);
            w.write_event(Event::Start(start)).map_err(xml_err)?;
            for r in results {
                let start = BytesStart::new("result")
                    .with_attributes([("id", r.id.as_str()), ("outcome", r.outcome.as_str())]);
                w.write_event(Event::Start(start)).map_err(xml_err)?;
                Self::text_element(&mut w, "outcomeReason", &r.reason)?;
                Self::text_element(&mut w, "timestamp", &r.timestamp)?;
                Self::text_element(&mut w, "descriptor", &r.descriptor)?;
                Self::text_element(&mut w, "output", &r.output)?;
                w.write_event(Event::End(BytesEnd::new("result"))).map_err(xml_err)?;
            }
            w.write_event(Event::End(BytesEnd::new("results"))).map_err(xml_err)?;
        }

        w.write_event(Event::End(BytesEnd::new("rigtestlog"))).map_err(xml_err)?;
        Ok(w.into_inner())
    }

    fn write_document(&self) -> WriterResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut bytes = self.render()?;
        bytes.push(b'\n');
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

impl ResultsWriter for XmlResultsWriter {
    fn name(&self) -> &str {
        "XmlResultsWriter"
    }

    fn kind(&self) -> WriterKind {
        WriterKind::Record
    }

    fn setup(&mut self, ctx: &RunContext, _artifacts: &mut Artifacts) -> WriterResult<()> {
        let now = Local::now();
        let file = expand_time_template(&self.file, now)?;
        let path = resolve_output_file(ctx, self.output_dir.as_deref(), &file);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        self.header = Some(Header {
            timestamp: now.format("%Y-%m-%d %H:%M:%S").to_string(),
            platform: ctx.run_details.get("os").unwrap_or(std::env::consts::OS).to_string(),
            host: ctx.run_details.get("hostname").unwrap_or("localhost").to_string(),
            root: String::new(),
            xargs: ctx
                .extra_args
                .iter()
                .map(|(k, v)| (replace_illegal_xml_chars(k), replace_illegal_xml_chars(v)))
                .collect(),
        });
        let root = self.path_text(&ctx.test_root);
        if let Some(header) = self.header.as_mut() {
            header.root = root;
        }

        self.path = Some(path);
        self.cycles.clear();
        self.num_tests = ctx.num_tests * ctx.cycles.max(1) as usize;
        self.completed = 0;
        self.complete = false;
        self.write_document()
    }

    fn process_result(&mut self, result: &TestResult, _artifacts: &mut Artifacts) -> WriterResult<()> {
        let entry = XmlResult {
            id: replace_illegal_xml_chars(&result.test_id),
            outcome: result.outcome.display_name().to_string(),
            reason: replace_illegal_xml_chars(&result.outcome_reason),
            timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            descriptor: self.path_text(&result.test_dir.join(&result.test_file)),
            output: self.path_text(&result.output_dir),
        };
        match self.cycles.last_mut() {
            Some((cycle, results)) if *cycle == result.cycle => results.push(entry),
            _ => self.cycles.push((result.cycle, vec![entry])),
        }
        self.completed += 1;
        self.write_document()
    }

    fn cleanup(&mut self, _artifacts: &mut Artifacts) -> WriterResult<()> {
        if self.path.is_none() {
            return Ok(());
        }
        self.complete = true;
        self.write_document()?;
        self.path = None;
        Ok(())
    }
}
