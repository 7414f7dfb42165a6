// Artifact manifest writer
// Lists every artifact published during the run in one JSON file

use rigtest_core::domain::TestResult;
use rigtest_core::port::{
    Artifact, Artifacts, ResultsWriter, RunContext, WriterKind, WriterResult,
};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

use crate::properties::WriterProperties;
use crate::util::resolve_output_file;

pub const DEFAULT_MANIFEST_FILE: &str = "artifact_manifest.json";

#[derive(Debug, Serialize)]
struct ManifestEntry<'a> {
    path: &'a str,
    category: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Manifest<'a> {
    run_details: &'a rigtest_core::domain::RunDetails,
    artifacts: Vec<ManifestEntry<'a>>,
}

pub struct ArtifactManifestWriter {
    file: String,
    output_dir: Option<String>,
    path: Option<PathBuf>,
    run_details: rigtest_core::domain::RunDetails,
    artifacts: Vec<Artifact>,
}

impl ArtifactManifestWriter {
    pub const PROPERTIES: &'static [&'static str] = &["file", "outputDir"];

    pub fn from_properties(props: &WriterProperties) -> WriterResult<Self> {
        props.check_known(Self::PROPERTIES)?;
        Ok(Self {
            file: props.string_or("file", DEFAULT_MANIFEST_FILE),
            output_dir: props.string("outputDir"),
            path: None,
            run_details: Default::default(),
            artifacts: Vec::new(),
        })
    }

    pub fn path(&self) -> Option<&std::path::Path> {
        self.path.as_deref()
    }
}

impl ResultsWriter for ArtifactManifestWriter {
    fn name(&self) -> &str {
        "ArtifactManifestWriter"
    }

    fn kind(&self) -> WriterKind {
        WriterKind::Record
    }

    fn setup(&mut self, ctx: &RunContext, _artifacts: &mut Artifacts) -> WriterResult<()> {
        self.path = Some(resolve_output_file(ctx, self.output_dir.as_deref(), &self.file));
        self.run_details = ctx.run_details.clone();
        self.artifacts.clear();
        Ok(())
    }

    fn process_result(&mut self, _result: &TestResult, _artifacts: &mut Artifacts) -> WriterResult<()> {
        Ok(())
    }

    fn is_artifact_publisher(&self) -> bool {
        true
    }

    fn publish_artifact(&mut self, artifact: &Artifact) -> WriterResult<()> {
        if !self.artifacts.contains(artifact) {
            self.artifacts.push(artifact.clone());
        }
        Ok(())
    }

    fn cleanup(&mut self, _artifacts: &mut Artifacts) -> WriterResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let manifest = Manifest {
            run_details: &self.run_details,
            artifacts: self
                .artifacts
                .iter()
                .map(|a| ManifestEntry {
                    path: &a.path,
                    category: &a.category,
                })
                .collect(),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&manifest)?)?;
        info!(file = %path.display(), artifacts = self.artifacts.len(), "Wrote artifact manifest");
        Ok(())
    }
}
