// Fixtures shared by the writer tests

use chrono::{Local, TimeZone};
use rigtest_core::application::{output_dir_for, ShutdownToken};
use rigtest_core::domain::{Outcome, RunDetails, TestResult};
use rigtest_core::port::RunContext;
use std::collections::BTreeMap;
use std::path::Path;

/// Test root `<dir>/root`, output root `<dir>/root/out`
pub fn context(dir: &Path, num_tests: usize, cycles: u32) -> RunContext {
    let test_root = dir.join("root");
    std::fs::create_dir_all(&test_root).unwrap();
    let mut run_details = RunDetails::new();
    run_details.insert("outDirName", "out");
    run_details.insert("hostname", "testhost");
    run_details.insert("os", "testos");
    RunContext {
        num_tests,
        cycles,
        threads: 1,
        output_root: test_root.join("out"),
        test_root,
        out_dir_name: "out".to_string(),
        run_details,
        extra_args: BTreeMap::new(),
        record: true,
        properties: BTreeMap::new(),
        shutdown: ShutdownToken::never(),
    }
}

/// A result whose output dir exists and holds a run.log
pub fn result(ctx: &RunContext, id: &str, outcome: Outcome, cycle: u32) -> TestResult {
    let output_dir = output_dir_for(&ctx.output_root, id, cycle, ctx.cycles);
    std::fs::create_dir_all(&output_dir).unwrap();
    let run_log = format!("12:00:00 INFO  \x1b[32mrunning {}\x1b[0m\n", id);
    std::fs::write(output_dir.join("run.log"), &run_log).unwrap();
    TestResult {
        test_id: id.to_string(),
        title: format!("Title of {}", id),
        classname: None,
        outcome,
        outcome_reason: if outcome.is_failure() {
            format!("{} went wrong", id)
        } else {
            String::new()
        },
        cycle,
        start_time: Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
        duration_secs: 1.5,
        test_dir: ctx.test_root.join("tests").join(id),
        test_file: "rigtest.toml".to_string(),
        output_dir,
        run_log,
    }
}
