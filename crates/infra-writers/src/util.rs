// Shared helpers for writers

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local};
use rigtest_core::port::{RunContext, WriterError, WriterResult};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Substitute strftime specifiers (e.g. `results_%Y%m%d.json`)
///
/// # Errors
/// WriterError::Config for an unknown or incomplete specifier
pub fn expand_time_template(template: &str, at: DateTime<Local>) -> WriterResult<String> {
    let items: Vec<Item> = StrftimeItems::new(template).collect();
    if items.iter().any(|i| matches!(i, Item::Error)) {
        return Err(WriterError::Config(format!(
            "invalid time format specifier in \"{}\"",
            template
        )));
    }
    Ok(at.format_with_items(items.into_iter()).to_string())
}

/// Replace characters that XML 1.0 does not allow with `?`
pub fn replace_illegal_xml_chars(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\t' | '\n' | '\r' => c,
            '\u{20}'..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..='\u{10FFFF}' => c,
            _ => '?',
        })
        .collect()
}

/// Remove `ESC [ ... letter` colour and cursor sequences
pub fn strip_ansi_escape_codes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' && chars.peek() == Some(&'[') {
            chars.next();
            for c in chars.by_ref() {
                if c.is_ascii_alphabetic() {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Where a writer's `file` goes: an absolute path as-is, otherwise under
/// `outputDir` (itself relative to the test root) or the default output dir
pub fn resolve_output_file(ctx: &RunContext, output_dir: Option<&str>, file: &str) -> PathBuf {
    let file = Path::new(file);
    if file.is_absolute() {
        return file.to_path_buf();
    }
    resolve_dir(ctx, output_dir).join(file)
}

/// `dir` relative to the test root, or the default output dir when unset
pub fn resolve_dir(ctx: &RunContext, dir: Option<&str>) -> PathBuf {
    match dir {
        Some(dir) => ctx.test_root.join(dir),
        None => ctx.default_output_dir(),
    }
}

/// Create `path` (and its parent directories) for buffered writing
pub fn create_file(path: &Path) -> WriterResult<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(BufWriter::new(File::create(path)?))
}

/// Write and flush, so the file is usable while the run continues
pub fn write_flushed(writer: &mut BufWriter<File>, text: &str) -> WriterResult<()> {
    writer.write_all(text.as_bytes())?;
    writer.flush()?;
    Ok(())
}

/// `id`, or `id [CYCLE NN]` in multi-cycle runs
pub fn display_id(test_id: &str, cycle: u32, cycles: u32) -> String {
    if cycles > 1 {
        format!("{} [CYCLE {:02}]", test_id, cycle + 1)
    } else {
        test_id.to_string()
    }
}
