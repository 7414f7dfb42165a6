// Project Configuration Loader

use crate::application::constants::DEFAULT_TEST_TIMEOUT_SECS;
use crate::config::PropertyExpander;
use crate::domain::TestCase;
use crate::error::{AppError, Result};
use chrono::{DateTime, Local};
use ::config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Prefix of environment variables overriding project file values,
/// e.g. `RIGTEST__PROJECT__OUTDIR`
pub const ENV_OVERRIDE_PREFIX: &str = "RIGTEST";

fn default_name() -> String {
    "rigtest".to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TEST_TIMEOUT_SECS
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectSection {
    #[serde(default = "default_name")]
    pub name: String,
    /// Relative to the directory holding the project file
    #[serde(default)]
    pub test_root: Option<String>,
    #[serde(default)]
    pub outdir: Option<String>,
    #[serde(default)]
    pub publish_artifact_category_include_regex: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Extra parent environment variables passed through to processes
    #[serde(default)]
    pub env_allowlist: Vec<String>,
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            name: default_name(),
            test_root: None,
            outdir: None,
            publish_artifact_category_include_regex: None,
            default_timeout_secs: DEFAULT_TEST_TIMEOUT_SECS,
            env_allowlist: Vec::new(),
        }
    }
}

/// One `[[writers]]` entry
#[derive(Debug, Clone, Deserialize)]
pub struct WriterConfig {
    #[serde(rename = "type")]
    pub writer_type: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ProjectFile {
    #[serde(default)]
    project: ProjectSection,
    #[serde(default)]
    properties: BTreeMap<String, String>,
    #[serde(default)]
    writers: Vec<WriterConfig>,
    #[serde(default)]
    tests: Vec<TestCase>,
}

/// Values available to `${...}` expansion that do not come from the file
#[derive(Debug, Clone)]
pub struct LoadContext {
    /// `--outdir` from the command line, overriding the project's outdir
    pub outdir: Option<String>,
    pub hostname: String,
    pub start: DateTime<Local>,
}

impl LoadContext {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            outdir: None,
            hostname: hostname.into(),
            start: Local::now(),
        }
    }
}

/// Fully loaded and expanded project
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    pub name: String,
    pub config_file: PathBuf,
    pub test_root: PathBuf,
    /// Absolute directory the per-test output directories go in
    pub output_root: PathBuf,
    pub out_dir_name: String,
    pub category_include_regex: Option<String>,
    pub default_timeout: Duration,
    pub env_allowlist: Vec<String>,
    pub properties: BTreeMap<String, String>,
    pub writers: Vec<WriterConfig>,
    pub tests: Vec<TestCase>,
}

impl ProjectConfig {
    /// Load `path` with `RIGTEST__`-prefixed environment overrides and expand
    /// every property reference
    pub fn load(path: &Path, ctx: &LoadContext) -> Result<Self> {
        if !path.is_file() {
            return Err(AppError::Config(format!(
                "project file not found: {}",
                path.display()
            )));
        }
        let config_file = std::fs::canonicalize(path)?;
        let project_dir = config_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let raw: ProjectFile = Config::builder()
            .add_source(File::from(config_file.as_path()).format(FileFormat::Toml))
            .add_source(
                Environment::with_prefix(ENV_OVERRIDE_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        let test_root = match &raw.project.test_root {
            Some(root) => project_dir.join(shellexpand::tilde(root).as_ref()),
            None => project_dir.clone(),
        };

        let mut expander = PropertyExpander::new();
        expander.define("hostname", ctx.hostname.clone());
        expander.define("os", std::env::consts::OS);
        expander.define("testRootDir", test_root.to_string_lossy());
        expander.define("startDate", ctx.start.format("%Y-%m-%d").to_string());
        expander.define("startTime", ctx.start.format("%H.%M.%S").to_string());

        // outdir may use every built-in except outDirName itself
        let outdir = match ctx.outdir.clone().or_else(|| raw.project.outdir.clone()) {
            Some(dir) => expander.expand(&dir)?,
            None => "out".to_string(),
        };
        let output_root = test_root.join(&outdir);
        let out_dir_name = Path::new(&outdir)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| outdir.clone());

        expander.define("outDirName", out_dir_name.clone());
        expander.define_all(&raw.properties)?;

        let properties = raw
            .properties
            .keys()
            .map(|k| (k.clone(), expander.get(k).unwrap_or_default().to_string()))
            .collect();

        let writers = raw
            .writers
            .into_iter()
            .map(|w| {
                let properties = w
                    .properties
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), expander.expand(v)?)))
                    .collect::<Result<_>>()?;
                Ok(WriterConfig {
                    writer_type: w.writer_type,
                    properties,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let file_name = config_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut seen = HashSet::new();
        let mut tests = Vec::with_capacity(raw.tests.len());
        for mut case in raw.tests {
            case.validate()?;
            if !seen.insert(case.id.clone()) {
                return Err(AppError::Config(format!("duplicate test id \"{}\"", case.id)));
            }
            case.command = expander.expand(&case.command)?;
            case.args = case
                .args
                .iter()
                .map(|a| expander.expand(a))
                .collect::<Result<_>>()?;
            case.env = case
                .env
                .iter()
                .map(|e| expander.expand(e))
                .collect::<Result<_>>()?;
            case.test_dir = project_dir.clone();
            case.test_file = file_name.clone();
            tests.push(case);
        }

        debug!(
            file = %config_file.display(),
            properties = raw.properties.len(),
            writers = writers.len(),
            "Expanded project configuration"
        );
        info!(project = %raw.project.name, tests = tests.len(), "Loaded project");

        Ok(Self {
            name: raw.project.name,
            config_file,
            test_root,
            output_root,
            out_dir_name,
            category_include_regex: raw
                .project
                .publish_artifact_category_include_regex
                .filter(|r| !r.is_empty()),
            default_timeout: Duration::from_secs(raw.project.default_timeout_secs),
            env_allowlist: raw.project.env_allowlist,
            properties,
            writers,
            tests,
        })
    }

    /// Tests whose ids are in `ids`, in project order; all tests if `ids` is empty
    pub fn select_tests(&self, ids: &[String]) -> Result<Vec<TestCase>> {
        if ids.is_empty() {
            return Ok(self.tests.clone());
        }
        if let Some(missing) = ids.iter().find(|id| !self.tests.iter().any(|t| &t.id == *id)) {
            return Err(AppError::Validation(format!("no test with id \"{}\"", missing)));
        }
        Ok(self
            .tests
            .iter()
            .filter(|t| ids.contains(&t.id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROJECT: &str = r#"
[project]
name = "demo"
outdir = "out-${os}"
default_timeout_secs = 30

[properties]
appHome = "${dataDir}/app"
dataDir = "${testRootDir}/data"

[[writers]]
type = "json"
[writers.properties]
file = "${appHome}/results.json"

[[tests]]
id = "hello"
command = "echo"
args = ["${appHome}", "host=${hostname}"]
env = ["DATA=${dataDir}"]
expect_stdout = ["app"]

[[tests]]
id = "skipped"
command = "true"
skip = "not ready"
"#;

    fn write_project(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rigtest.toml");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn test_load_and_expand() {
        let (dir, path) = write_project(PROJECT);
        let project = ProjectConfig::load(&path, &LoadContext::new("buildhost")).unwrap();
        let root = std::fs::canonicalize(dir.path()).unwrap();
        let data = format!("{}/data", root.display());

        assert_eq!(project.test_root, root);
        assert_eq!(project.default_timeout, Duration::from_secs(30));
        assert_eq!(project.out_dir_name, format!("out-{}", std::env::consts::OS));
        assert_eq!(project.output_root, root.join(&project.out_dir_name));

        let hello = &project.tests[0];
        assert_eq!(hello.args, vec![format!("{}/app", data), "host=buildhost".to_string()]);
        assert_eq!(hello.env, vec![format!("DATA={}", data)]);
        assert_eq!(hello.test_file, "rigtest.toml");
        assert_eq!(project.tests[1].skip.as_deref(), Some("not ready"));

        let writer = &project.writers[0];
        assert_eq!(writer.writer_type, "json");
        assert_eq!(
            writer.properties.get("file").map(String::as_str),
            Some(format!("{}/app/results.json", data).as_str())
        );
    }

    #[test]
    fn test_outdir_override_and_selection() {
        let (_dir, path) = write_project(PROJECT);
        let mut ctx = LoadContext::new("h");
        ctx.outdir = Some("custom/results".into());
        let project = ProjectConfig::load(&path, &ctx).unwrap();

        assert_eq!(project.out_dir_name, "results");
        let selected = project.select_tests(&["skipped".to_string()]).unwrap();
        assert_eq!(selected.len(), 1);
        assert!(project.select_tests(&["nope".to_string()]).is_err());
    }

    #[test]
    fn test_environment_overrides_project_values() {
        let (_dir, path) = write_project(PROJECT);
        std::env::set_var("RIGTEST__PROJECT__NAME", "from-env");
        let project = ProjectConfig::load(&path, &LoadContext::new("h"));
        std::env::remove_var("RIGTEST__PROJECT__NAME");

        assert_eq!(project.unwrap().name, "from-env");
    }

    #[test]
    fn test_unknown_property_is_config_error() {
        let (_dir, path) = write_project(
            r#"
[[tests]]
id = "t"
command = "${undefinedThing}"
"#,
        );
        let err = ProjectConfig::load(&path, &LoadContext::new("h")).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let (_dir, path) = write_project(
            r#"
[[tests]]
id = "t"
command = "a"

[[tests]]
id = "t"
command = "b"
"#,
        );
        assert!(ProjectConfig::load(&path, &LoadContext::new("h")).is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = ProjectConfig::load(Path::new("/nonexistent/rigtest.toml"), &LoadContext::new("h"))
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
