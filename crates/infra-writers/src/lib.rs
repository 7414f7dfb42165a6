// rigtest Infrastructure - Results Writers
// Implements: ResultsWriter (record, progress and summary writers)

pub mod archive;
pub mod collect;
pub mod console;
pub mod csv;
pub mod factory;
pub mod json;
pub mod junit;
pub mod manifest;
pub mod properties;
pub mod text;
pub mod util;
pub mod xml;

#[cfg(test)]
mod testutil;

pub use archive::TestOutputArchiveWriter;
pub use collect::CollectTestOutputWriter;
pub use console::{
    ConsoleFailureAnnotationsWriter, ConsoleProgressResultsWriter, ConsoleSummaryResultsWriter,
};
pub use csv::CsvResultsWriter;
pub use factory::{build_writer, build_writers, DEFAULT_WRITER_TYPES, WRITER_TYPES};
pub use json::JsonResultsWriter;
pub use junit::JUnitXmlResultsWriter;
pub use manifest::ArtifactManifestWriter;
pub use properties::WriterProperties;
pub use text::TextResultsWriter;
pub use xml::XmlResultsWriter;
