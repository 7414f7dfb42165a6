//! Shared harness for end-to-end runs against real OS processes

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rigtest_core::application::{
    ResultsPipeline, RunOptions, RunSummary, ShutdownToken, TestRunner,
};
use rigtest_core::config::{LoadContext, ProjectConfig};
use rigtest_core::domain::RunDetails;
use rigtest_core::port::{RunContext, SystemTimeProvider};
use rigtest_infra_system::OsProcessLauncher;
use rigtest_infra_writers::build_writers;

pub struct ProjectRun {
    /// Keeps the project directory alive
    pub _dir: tempfile::TempDir,
    pub root: PathBuf,
    pub project: ProjectConfig,
    pub summary: RunSummary,
}

impl ProjectRun {
    pub fn output_dir(&self, test_id: &str) -> PathBuf {
        self.project.output_root.join(test_id)
    }

    pub fn read(&self, rel: impl AsRef<Path>) -> String {
        std::fs::read_to_string(self.root.join(rel)).unwrap()
    }
}

/// Write `contents` as `rigtest.toml` in a fresh directory and run every test
/// with record writers enabled
pub async fn run_project(contents: &str, cycles: u32, threads: usize) -> ProjectRun {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rigtest.toml");
    std::fs::write(&path, contents).unwrap();

    let project = ProjectConfig::load(&path, &LoadContext::new("e2ehost")).unwrap();
    let cases = project.select_tests(&[]).unwrap();

    let writers = build_writers(&project.writers).unwrap();
    let pipeline = Arc::new(
        ResultsPipeline::new(writers, true, false, project.category_include_regex.as_deref())
            .unwrap(),
    );
    let shutdown = ShutdownToken::never();
    let launcher = Arc::new(OsProcessLauncher::new(
        project.env_allowlist.clone(),
        shutdown.clone(),
    ));
    let runner = TestRunner::new(
        launcher,
        pipeline,
        shutdown.clone(),
        Arc::new(SystemTimeProvider),
    );

    let mut run_details = RunDetails::new();
    run_details.insert("outDirName", project.out_dir_name.as_str());
    run_details.insert("hostname", "e2ehost");
    run_details.insert("os", std::env::consts::OS);

    let ctx = RunContext {
        num_tests: cases.len(),
        cycles,
        threads,
        test_root: project.test_root.clone(),
        output_root: project.output_root.clone(),
        out_dir_name: project.out_dir_name.clone(),
        run_details,
        extra_args: Default::default(),
        record: true,
        properties: project.properties.clone(),
        shutdown,
    };
    let options = RunOptions {
        cycles,
        threads,
        output_root: project.output_root.clone(),
        default_timeout: project.default_timeout,
    };

    let summary = runner.run(&cases, &options, &ctx).await.unwrap();
    ProjectRun {
        root: project.test_root.clone(),
        _dir: dir,
        project,
        summary,
    }
}
