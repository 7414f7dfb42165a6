// Writer factory keyed by the `type` of a `[[writers]]` entry

use rigtest_core::config::WriterConfig;
use rigtest_core::port::{ResultsWriter, WriterError, WriterResult};
use std::collections::BTreeMap;

use crate::archive::TestOutputArchiveWriter;
use crate::collect::CollectTestOutputWriter;
use crate::console::{
    ConsoleFailureAnnotationsWriter, ConsoleProgressResultsWriter, ConsoleSummaryResultsWriter,
};
use crate::csv::CsvResultsWriter;
use crate::json::JsonResultsWriter;
use crate::junit::JUnitXmlResultsWriter;
use crate::manifest::ArtifactManifestWriter;
use crate::properties::WriterProperties;
use crate::text::TextResultsWriter;
use crate::xml::XmlResultsWriter;

pub const WRITER_TYPES: &[&str] = &[
    "json",
    "text",
    "xml",
    "junit",
    "csv",
    "archive",
    "collect",
    "artifact-manifest",
    "console-progress",
    "console-summary",
    "console-annotations",
];

/// Writers every run gets unless the project configures its own of the same type
pub const DEFAULT_WRITER_TYPES: &[&str] =
    &["console-progress", "console-summary", "console-annotations"];

pub fn build_writer(
    writer_type: &str,
    properties: &BTreeMap<String, String>,
) -> WriterResult<Box<dyn ResultsWriter>> {
    let props = WriterProperties::new(writer_type, properties);
    let writer: Box<dyn ResultsWriter> = match writer_type {
        "json" => Box::new(JsonResultsWriter::from_properties(&props)?),
        "text" => Box::new(TextResultsWriter::from_properties(&props)?),
        "xml" => Box::new(XmlResultsWriter::from_properties(&props)?),
        "junit" => Box::new(JUnitXmlResultsWriter::from_properties(&props)?),
        "csv" => Box::new(CsvResultsWriter::from_properties(&props)?),
        "archive" => Box::new(TestOutputArchiveWriter::from_properties(&props)?),
        "collect" => Box::new(CollectTestOutputWriter::from_properties(&props)?),
        "artifact-manifest" => Box::new(ArtifactManifestWriter::from_properties(&props)?),
        "console-progress" => Box::new(ConsoleProgressResultsWriter::from_properties(&props)?),
        "console-summary" => Box::new(ConsoleSummaryResultsWriter::from_properties(&props)?),
        "console-annotations" => {
            Box::new(ConsoleFailureAnnotationsWriter::from_properties(&props)?)
        }
        other => {
            return Err(WriterError::Config(format!(
                "unknown writer type \"{}\"; expected one of: {}",
                other,
                WRITER_TYPES.join(", ")
            )))
        }
    };
    Ok(writer)
}

/// Configured writers in order, followed by any default console writer
/// whose type was not configured explicitly
pub fn build_writers(configs: &[WriterConfig]) -> WriterResult<Vec<Box<dyn ResultsWriter>>> {
    let mut writers = configs
        .iter()
        .map(|c| build_writer(&c.writer_type, &c.properties))
        .collect::<WriterResult<Vec<_>>>()?;
    for default in DEFAULT_WRITER_TYPES {
        if !configs.iter().any(|c| c.writer_type == *default) {
            writers.push(build_writer(default, &BTreeMap::new())?);
        }
    }
    Ok(writers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rigtest_core::port::WriterKind;

    #[test]
    fn test_every_type_builds_with_defaults() {
        let required: BTreeMap<String, String> = [
            ("destDir".to_string(), "collected".to_string()),
            ("fileIncludesRegex".to_string(), ".*".to_string()),
        ]
        .into_iter()
        .collect();
        for writer_type in WRITER_TYPES {
            let props = if *writer_type == "collect" {
                required.clone()
            } else {
                BTreeMap::new()
            };
            assert!(build_writer(writer_type, &props).is_ok(), "{}", writer_type);
        }
    }

    #[test]
    fn test_unknown_type_and_property() {
        let err = build_writer("yaml", &BTreeMap::new()).err().unwrap();
        assert!(err.to_string().contains("unknown writer type"));

        let props: BTreeMap<String, String> =
            [("fiel".to_string(), "x.json".to_string())].into_iter().collect();
        assert!(build_writer("json", &props).is_err());
    }

    #[test]
    fn test_defaults_appended_unless_configured() {
        let configs = vec![
            WriterConfig {
                writer_type: "json".to_string(),
                properties: BTreeMap::new(),
            },
            WriterConfig {
                writer_type: "console-summary".to_string(),
                properties: [("showDuration".to_string(), "false".to_string())]
                    .into_iter()
                    .collect(),
            },
        ];
        let writers = build_writers(&configs).unwrap();
        let names: Vec<&str> = writers.iter().map(|w| w.name()).collect();
        assert_eq!(
            names,
            vec![
                "JsonResultsWriter",
                "ConsoleSummaryResultsWriter",
                "ConsoleProgressResultsWriter",
                "ConsoleFailureAnnotationsWriter",
            ]
        );
        assert_eq!(writers[2].kind(), WriterKind::Progress);
    }
}
