// Collect test output writer
// Copies matching output files (coverage data, graphs, ...) into one directory

use regex::Regex;
use rigtest_core::domain::{to_forward_slashes, TestResult};
use rigtest_core::port::{
    Artifacts, ResultsWriter, RunContext, WriterError, WriterKind, WriterResult,
};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::properties::WriterProperties;

pub const DEFAULT_OUTPUT_PATTERN: &str = "@TESTID@.@FILENAME@.@UNIQUE@.@FILENAME_EXT@";

pub struct CollectTestOutputWriter {
    dest_dir_setting: String,
    dest_archive_setting: Option<String>,
    include_pattern: String,
    exclude_pattern: Option<String>,
    output_pattern: String,
    dir_category: Option<String>,
    archive_category: Option<String>,

    includes: Option<Regex>,
    excludes: Option<Regex>,
    dest_dir: PathBuf,
    dest_archive: Option<PathBuf>,
    test_root: PathBuf,
    collected: usize,
}

/// Require a match up to the end of the path unless the pattern says otherwise
fn anchored(pattern: &str) -> WriterResult<Regex> {
    let pattern = if pattern.ends_with('$') {
        pattern.to_string()
    } else {
        format!("(?:{})$", pattern)
    };
    Ok(Regex::new(&pattern)?)
}

impl CollectTestOutputWriter {
    pub const PROPERTIES: &'static [&'static str] = &[
        "destDir",
        "destArchive",
        "fileIncludesRegex",
        "fileExcludesRegex",
        "outputPattern",
        "publishArtifactDirCategory",
        "publishArtifactArchiveCategory",
    ];

    pub fn from_properties(props: &WriterProperties) -> WriterResult<Self> {
        props.check_known(Self::PROPERTIES)?;
        let dest_dir_setting = props
            .string("destDir")
            .ok_or_else(|| WriterError::Config("destDir must be set for collect writers".into()))?;
        let include_pattern = props.string("fileIncludesRegex").ok_or_else(|| {
            WriterError::Config("fileIncludesRegex must be set for collect writers".into())
        })?;
        let output_pattern = props.string_or("outputPattern", DEFAULT_OUTPUT_PATTERN);
        if !output_pattern.contains("@UNIQUE@") {
            return Err(WriterError::Config(format!(
                "outputPattern \"{}\" must contain @UNIQUE@",
                output_pattern
            )));
        }
        Ok(Self {
            dest_dir_setting,
            dest_archive_setting: props.string("destArchive"),
            include_pattern,
            exclude_pattern: props.string("fileExcludesRegex"),
            output_pattern,
            dir_category: props.string("publishArtifactDirCategory"),
            archive_category: props.string("publishArtifactArchiveCategory"),
            includes: None,
            excludes: None,
            dest_dir: PathBuf::new(),
            dest_archive: None,
            test_root: PathBuf::new(),
            collected: 0,
        })
    }

    pub fn dest_dir(&self) -> &Path {
        &self.dest_dir
    }

    pub fn collected(&self) -> usize {
        self.collected
    }

    fn destination(&self, result: &TestResult, path: &Path) -> PathBuf {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let pattern = self
            .output_pattern
            .replace("@TESTID@", &result.test_id)
            .replace("@FILENAME@", &stem)
            .replace(".@FILENAME_EXT@", &ext);

        let mut unique = 1;
        loop {
            let candidate = self.dest_dir.join(pattern.replace("@UNIQUE@", &unique.to_string()));
            if !candidate.exists() {
                return candidate;
            }
            unique += 1;
        }
    }

    fn write_dest_archive(&self, archive: &Path) -> WriterResult<()> {
        if let Some(parent) = archive.parent() {
            fs::create_dir_all(parent)?;
        }
        let options = zip::write::FileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .large_file(true);
        let mut zip = zip::ZipWriter::new(File::create(archive)?);

        let files = WalkDir::new(&self.dest_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && e.path() != archive);
        for entry in files {
            let name = to_forward_slashes(entry.path().strip_prefix(&self.dest_dir).unwrap_or(entry.path()));
            let added = zip
                .start_file(name.as_str(), options)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
                .and_then(|_| io::copy(&mut File::open(entry.path())?, &mut zip).map(|_| ()));
            if let Err(e) = added {
                warn!(file = %entry.path().display(), error = %e, "Could not add collected file to archive");
                zip.start_file(format!("{}.rigtest-error.txt", name), options)
                    .map_err(|e| WriterError::Archive(e.to_string()))?;
                io::Write::write_all(&mut zip, format!("could not archive this file: {}", e).as_bytes())?;
            }
        }
        zip.finish().map_err(|e| WriterError::Archive(e.to_string()))?;
        Ok(())
    }
}

impl ResultsWriter for CollectTestOutputWriter {
    fn name(&self) -> &str {
        "CollectTestOutputWriter"
    }

    fn kind(&self) -> WriterKind {
        WriterKind::Record
    }

    fn is_enabled(&self, _record: bool, _progress: bool) -> bool {
        true
    }

    fn setup(&mut self, ctx: &RunContext, _artifacts: &mut Artifacts) -> WriterResult<()> {
        self.dest_dir = ctx.default_output_dir().join(&self.dest_dir_setting);
        if self.dest_dir == ctx.test_root || self.dest_dir == ctx.default_output_dir() {
            return Err(WriterError::Config(
                "destDir must not be the test root directory".into(),
            ));
        }
        self.includes = Some(anchored(&self.include_pattern)?);
        self.excludes = self.exclude_pattern.as_deref().map(anchored).transpose()?;
        self.dest_archive = self
            .dest_archive_setting
            .as_ref()
            .map(|a| self.dest_dir.join(a));
        self.test_root = ctx.test_root.clone();
        self.collected = 0;

        match fs::remove_dir_all(&self.dest_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    fn process_result(&mut self, _result: &TestResult, _artifacts: &mut Artifacts) -> WriterResult<()> {
        Ok(())
    }

    fn wants_output_files(&self) -> bool {
        true
    }

    fn visit_output_file(&mut self, result: &TestResult, path: &Path) -> WriterResult<bool> {
        let rel = to_forward_slashes(path.strip_prefix(&self.test_root).unwrap_or(path));
        if !self.includes.as_ref().is_some_and(|r| r.is_match(&rel)) {
            return Ok(false);
        }
        if self.excludes.as_ref().is_some_and(|r| r.is_match(&rel)) {
            return Ok(false);
        }

        let dest = self.destination(result, path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(path, &dest)?;
        self.collected += 1;
        // collected copies leave the file available to later visitors
        Ok(false)
    }

    fn cleanup(&mut self, artifacts: &mut Artifacts) -> WriterResult<()> {
        if self.collected == 0 {
            return Ok(());
        }
        info!(files = self.collected, dir = %self.dest_dir.display(), "Collected test output files");

        if let Some(archive) = self.dest_archive.clone() {
            self.write_dest_archive(&archive)?;
            if let Some(category) = &self.archive_category {
                artifacts.publish(&archive, category);
            }
        }
        if let Some(category) = &self.dir_category {
            artifacts.publish(&self.dest_dir, category);
        }
        Ok(())
    }
}
