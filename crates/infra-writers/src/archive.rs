// Test output archive writer
// reason: zip / tar+flate2 for the archive formats, sha2 for a stable archiving order
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression;
use regex::Regex;
use rigtest_core::application::constants::RUN_LOG_FILE;
use rigtest_core::domain::{to_forward_slashes, Outcome, TestResult};
use rigtest_core::port::{
    Artifacts, ResultsWriter, RunContext, WriterError, WriterKind, WriterResult,
};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::properties::WriterProperties;

pub const ARCHIVE_CATEGORY: &str = "TestOutputArchive";
pub const ARCHIVE_DIR_CATEGORY: &str = "TestOutputArchiveDir";
pub const SKIPPED_FILES_ENTRY: &str = "__rigtest_skipped_archive_files.txt";
pub const SKIPPED_TESTS_FILE: &str = "skipped_artifacts.txt";

/// Below this many remaining bytes nothing more is attempted
const MIN_USEFUL_BYTES: u64 = 500;
const MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

impl ArchiveFormat {
    fn parse(value: &str) -> WriterResult<Self> {
        match value.trim().to_lowercase().as_str() {
            "zip" => Ok(ArchiveFormat::Zip),
            "tar.gz" => Ok(ArchiveFormat::TarGz),
            other => Err(WriterError::Config(format!(
                "unsupported archive format \"{}\" (expected zip or tar.gz)",
                other
            ))),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::TarGz => "tar.gz",
        }
    }
}

/// Counts bytes written to it
struct ByteCounter(u64);

impl Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Size of `path` once deflated, as a zip entry would store it
fn compressed_size(path: &Path) -> io::Result<u64> {
    let mut encoder = DeflateEncoder::new(ByteCounter(0), Compression::default());
    io::copy(&mut File::open(path)?, &mut encoder)?;
    Ok(encoder.finish()?.0)
}

fn archive_err(e: impl std::fmt::Display) -> WriterError {
    WriterError::Archive(e.to_string())
}

enum ArchiveSink {
    Zip(zip::ZipWriter<File>),
    TarGz(tar::Builder<GzEncoder<File>>),
}

impl ArchiveSink {
    fn create(path: &Path, format: ArchiveFormat) -> WriterResult<Self> {
        let file = File::create(path)?;
        Ok(match format {
            ArchiveFormat::Zip => ArchiveSink::Zip(zip::ZipWriter::new(file)),
            ArchiveFormat::TarGz => {
                ArchiveSink::TarGz(tar::Builder::new(GzEncoder::new(file, Compression::default())))
            }
        })
    }

    fn zip_options() -> zip::write::FileOptions {
        zip::write::FileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .large_file(true)
    }

    fn add_file(&mut self, path: &Path, name: &str) -> WriterResult<()> {
        match self {
            ArchiveSink::Zip(zip) => {
                zip.start_file(name, Self::zip_options()).map_err(archive_err)?;
                io::copy(&mut File::open(path)?, zip)?;
            }
            ArchiveSink::TarGz(tar) => tar.append_path_with_name(path, name)?,
        }
        Ok(())
    }

    fn add_bytes(&mut self, name: &str, bytes: &[u8]) -> WriterResult<()> {
        match self {
            ArchiveSink::Zip(zip) => {
                zip.start_file(name, Self::zip_options()).map_err(archive_err)?;
                zip.write_all(bytes)?;
            }
            ArchiveSink::TarGz(tar) => {
                let mut header = tar::Header::new_gnu();
                header.set_size(bytes.len() as u64);
                header.set_mode(0o644);
                header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);
                header.set_cksum();
                tar.append_data(&mut header, name, bytes)?;
            }
        }
        Ok(())
    }

    fn finish(self) -> WriterResult<()> {
        match self {
            ArchiveSink::Zip(mut zip) => {
                zip.finish().map_err(archive_err)?;
            }
            ArchiveSink::TarGz(tar) => {
                tar.into_inner()?.finish()?;
            }
        }
        Ok(())
    }
}

/// run.log first, then by name
fn archive_order(a: &DirEntry, b: &DirEntry) -> Ordering {
    let key = |e: &DirEntry| (e.file_name() != RUN_LOG_FILE, e.file_name().to_os_string());
    key(a).cmp(&key(b))
}

/// Archives the output directory of each failed test
pub struct TestOutputArchiveWriter {
    dest_dir_setting: Option<String>,
    format: ArchiveFormat,
    max_total_bytes: u64,
    max_archive_bytes: u64,
    max_archives: usize,
    archive_at_end: bool,
    include_outcomes: Vec<Outcome>,
    includes: Option<Regex>,
    excludes: Option<Regex>,

    dest_dir: PathBuf,
    test_root: PathBuf,
    out_dir_name: String,
    cycles: u32,
    total_remaining: u64,
    queued: Vec<(String, String, PathBuf)>,
    skipped_tests: Vec<PathBuf>,
    created: usize,
}

impl TestOutputArchiveWriter {
    pub const PROPERTIES: &'static [&'static str] = &[
        "destDir",
        "format",
        "maxTotalSizeMB",
        "maxArchiveSizeMB",
        "maxArchives",
        "archiveAtEndOfRun",
        "includeNonFailureOutcomes",
        "fileIncludesRegex",
        "fileExcludesRegex",
    ];

    pub fn from_properties(props: &WriterProperties) -> WriterResult<Self> {
        props.check_known(Self::PROPERTIES)?;
        Ok(Self {
            dest_dir_setting: props.string("destDir"),
            format: ArchiveFormat::parse(&props.string_or("format", "zip"))?,
            max_total_bytes: (props.f64_or("maxTotalSizeMB", 1024.0)? * MB) as u64,
            max_archive_bytes: (props.f64_or("maxArchiveSizeMB", 200.0)? * MB) as u64,
            max_archives: props.u64_or("maxArchives", 50)? as usize,
            archive_at_end: props.bool_or("archiveAtEndOfRun", true)?,
            include_outcomes: props.outcomes_or("includeNonFailureOutcomes", "REQUIRES INSPECTION")?,
            includes: props.regex("fileIncludesRegex")?,
            excludes: props.regex("fileExcludesRegex")?,
            dest_dir: PathBuf::new(),
            test_root: PathBuf::new(),
            out_dir_name: String::new(),
            cycles: 1,
            total_remaining: 0,
            queued: Vec::new(),
            skipped_tests: Vec::new(),
            created: 0,
        })
    }

    pub fn dest_dir(&self) -> &Path {
        &self.dest_dir
    }

    fn should_archive(&self, outcome: Outcome) -> bool {
        outcome.is_failure() || self.include_outcomes.contains(&outcome)
    }

    /// Only remove a previous destination that holds nothing but archives
    fn clear_previous(&self) -> WriterResult<()> {
        if !self.dest_dir.is_dir() {
            return Ok(());
        }
        let only_archives = fs::read_dir(&self.dest_dir)?.all(|entry| {
            entry
                .map(|e| {
                    let name = e.file_name().to_string_lossy().into_owned();
                    name.ends_with(".txt") || name.ends_with(".zip") || name.ends_with(".tar.gz")
                })
                .unwrap_or(false)
        });
        if only_archives {
            fs::remove_dir_all(&self.dest_dir)?;
        } else {
            warn!(dir = %self.dest_dir.display(), "Archive destination holds other files; not clearing it");
        }
        Ok(())
    }

    fn relative_path(&self, path: &Path) -> String {
        to_forward_slashes(path.strip_prefix(&self.test_root).unwrap_or(path))
    }

    fn archive_output_dir(
        &mut self,
        id: &str,
        output_dir: &Path,
        artifacts: &mut Artifacts,
    ) -> WriterResult<()> {
        if self.created == 0 {
            fs::create_dir_all(&self.dest_dir)?;
        }
        if self.created >= self.max_archives {
            debug!(test_id = %id, "Skipping archive; maxArchives limit reached");
            self.skipped_tests.push(output_dir.to_path_buf());
            return Ok(());
        }
        if self.total_remaining < MIN_USEFUL_BYTES {
            debug!(test_id = %id, "Skipping archive; maxTotalSizeMB limit reached");
            self.skipped_tests.push(output_dir.to_path_buf());
            return Ok(());
        }
        self.created += 1;

        let archive_path = self.dest_dir.join(format!(
            "{}.{}.{}",
            id,
            self.out_dir_name,
            self.format.extension()
        ));
        match self.write_archive(&archive_path, output_dir) {
            Ok(0) => {
                debug!(archive = %archive_path.display(), "No files archived; deleting empty archive");
                self.created -= 1;
                fs::remove_file(&archive_path)?;
            }
            Ok(_) => {
                let size = fs::metadata(&archive_path)?.len();
                self.total_remaining = self.total_remaining.saturating_sub(size);
                artifacts.publish(&archive_path, ARCHIVE_CATEGORY);
            }
            Err(e) => {
                self.skipped_tests.push(output_dir.to_path_buf());
                return Err(e);
            }
        }
        Ok(())
    }

    /// Returns the number of output files added
    fn write_archive(&self, archive_path: &Path, output_dir: &Path) -> WriterResult<usize> {
        let mut sink = ArchiveSink::create(archive_path, self.format)?;
        let mut remaining = self.max_archive_bytes.min(self.total_remaining);
        let mut tried_oversized = false;
        let mut skipped: Vec<String> = Vec::new();
        let mut added = 0;

        let files = WalkDir::new(output_dir)
            .sort_by(archive_order)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file());

        for entry in files {
            let path = entry.path();
            let rel = self.relative_path(path);
            if self.excludes.as_ref().is_some_and(|r| r.is_match(&rel))
                || self.includes.as_ref().is_some_and(|r| !r.is_match(&rel))
            {
                skipped.push(to_forward_slashes(path));
                continue;
            }
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            if size == 0 {
                continue;
            }
            if remaining < MIN_USEFUL_BYTES {
                skipped.push(to_forward_slashes(path));
                continue;
            }

            let mut compressed = None;
            if size > remaining {
                if tried_oversized || self.format != ArchiveFormat::Zip {
                    skipped.push(to_forward_slashes(path));
                    continue;
                }
                tried_oversized = true;
                debug!(file = %path.display(), "File might exceed the archive limit; checking compressed size");
                match compressed_size(path) {
                    Ok(c) if c <= remaining => compressed = Some(c),
                    Ok(c) => {
                        debug!(file = %path.display(), compressed = c, remaining = remaining, "Skipping file; compressed size exceeds remaining limit");
                        skipped.push(to_forward_slashes(path));
                        continue;
                    }
                    Err(e) => {
                        warn!(file = %path.display(), error = %e, "Failed to compress output file");
                        skipped.push(to_forward_slashes(path));
                        continue;
                    }
                }
            }

            let name = to_forward_slashes(path.strip_prefix(output_dir).unwrap_or(path));
            if let Err(e) = sink.add_file(path, &name) {
                warn!(file = %path.display(), error = %e, "Failed to add output file to archive");
                skipped.push(to_forward_slashes(path));
                continue;
            }
            added += 1;

            let used = match self.format {
                ArchiveFormat::Zip => match compressed {
                    Some(c) => c,
                    None => compressed_size(path).unwrap_or(size),
                },
                ArchiveFormat::TarGz => size,
            };
            remaining = remaining.saturating_sub(used);
        }

        if !skipped.is_empty() && self.includes.is_none() {
            sink.add_bytes(SKIPPED_FILES_ENTRY, skipped.join("\n").as_bytes())?;
        }
        sink.finish()?;
        Ok(added)
    }

    fn archive_id(&self, result: &TestResult) -> String {
        if self.cycles > 1 {
            format!("{}.cycle{:03}", result.test_id, result.cycle + 1)
        } else {
            result.test_id.clone()
        }
    }
}

impl ResultsWriter for TestOutputArchiveWriter {
    fn name(&self) -> &str {
        "TestOutputArchiveWriter"
    }

    fn kind(&self) -> WriterKind {
        WriterKind::Record
    }

    fn setup(&mut self, ctx: &RunContext, _artifacts: &mut Artifacts) -> WriterResult<()> {
        let dest = self
            .dest_dir_setting
            .clone()
            .unwrap_or_else(|| format!("__rigtest_output_archives.{}", ctx.out_dir_name));
        self.dest_dir = ctx.default_output_dir().join(dest);
        self.test_root = ctx.test_root.clone();
        self.out_dir_name = ctx.out_dir_name.clone();
        self.cycles = ctx.cycles;
        self.total_remaining = self.max_total_bytes;
        self.queued.clear();
        self.skipped_tests.clear();
        self.created = 0;
        self.clear_previous()
    }

    fn process_result(&mut self, result: &TestResult, artifacts: &mut Artifacts) -> WriterResult<()> {
        if !self.should_archive(result.outcome) {
            return Ok(());
        }
        let id = self.archive_id(result);
        if self.archive_at_end {
            let hash = format!("{:x}", Sha256::digest(id.as_bytes()));
            self.queued.push((hash, id, result.output_dir.clone()));
            Ok(())
        } else {
            self.archive_output_dir(&id, &result.output_dir, artifacts)
        }
    }

    fn cleanup(&mut self, artifacts: &mut Artifacts) -> WriterResult<()> {
        let mut queued = std::mem::take(&mut self.queued);
        // varied but deterministic choice when limits are hit
        queued.sort();
        for (_, id, output_dir) in queued {
            if let Err(e) = self.archive_output_dir(&id, &output_dir, artifacts) {
                warn!(test_id = %id, error = %e, "Failed to archive test output");
            }
        }

        if !self.skipped_tests.is_empty() {
            fs::create_dir_all(&self.dest_dir)?;
            let list: Vec<String> = self.skipped_tests.iter().map(|p| to_forward_slashes(p)).collect();
            fs::write(self.dest_dir.join(SKIPPED_TESTS_FILE), list.join("\n"))?;
        }

        if self.created > 0 {
            info!(archives = self.created, dir = %self.dest_dir.display(), "Created test output archives");
            artifacts.publish(&self.dest_dir, ARCHIVE_DIR_CATEGORY);
        } else {
            debug!(dir = %self.dest_dir.display(), "No test output archives created");
        }
        Ok(())
    }
}
