use std::path::Path;

use assert_cmd::Command;
use benchtrend::bench_utils::{HistoryShape, ReportFixture, generate_history};
use serde_json::Value;

fn benchtrend() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_benchtrend"));
    cmd.env_remove("BENCHTREND_CONFIG");
    cmd.env("RUST_LOG", "warn");
    cmd
}

fn run_json(cmd: &mut Command) -> Value {
    let output = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).unwrap()
}

fn history(root: &Path) {
    generate_history(
        root,
        HistoryShape {
            builds: 3,
            configs: 1,
            drivers: 2,
            test_cases: 2,
        },
        9,
    )
    .unwrap();
}

#[test]
fn test_cli_exits_with_success_on_help() {
    benchtrend().arg("--help").assert().success();
}

#[test]
fn test_cli_rejects_unknown_flag() {
    benchtrend().arg("--verbose").assert().code(2);
}

#[test]
fn test_cli_unknown_command_fails() {
    let dir = tempfile::tempdir().unwrap();
    history(dir.path());
    benchtrend()
        .args(["--project", dir.path().to_str().unwrap(), "frobnicate"])
        .assert()
        .code(1);
}

#[test]
fn test_cli_status_lists_configurations() {
    let dir = tempfile::tempdir().unwrap();
    history(dir.path());
    let status = run_json(benchtrend().args(["--project", dir.path().to_str().unwrap(), "status"]));
    assert_eq!(status["command"], "status");
    assert_eq!(status["builds"], 3);
    assert_eq!(status["latest"], 3);
    assert_eq!(status["target"], "config.suite-0.xml");
    assert_eq!(status["configurations"][0]["test_cases"], 2);
}

#[test]
fn test_cli_trend_outputs_chart_data() {
    let dir = tempfile::tempdir().unwrap();
    history(dir.path());
    let project = dir.path().to_str().unwrap();

    let chart = run_json(benchtrend().args([
        "--project", project, "trend", "--report", "config.suite-0.xml", "--test", "case_1",
    ]));
    assert_eq!(chart["title"], "case/1");
    assert_eq!(chart["series"].as_array().unwrap().len(), 2);

    let mean = run_json(benchtrend().args([
        "--project", project, "trend", "--report", "config.suite-0.xml", "--mean", "geometric",
    ]));
    assert_eq!(mean["series"][0]["points"].as_array().unwrap().len(), 3);

    benchtrend()
        .args(["--project", project, "trend", "--report", "config.suite-0.xml"])
        .assert()
        .code(1);
}

#[test]
fn test_cli_compare_prints_regression_document() {
    let dir = tempfile::tempdir().unwrap();
    let old = ReportFixture::new("suite.xml")
        .case("sax", "testA", 10.0)
        .write_to(dir.path(), "old.xml")
        .unwrap();
    let new = ReportFixture::new("suite.xml")
        .case("sax", "testA", 13.0)
        .write_to(dir.path(), "new.xml")
        .unwrap();

    let output = benchtrend()
        .args([
            "compare",
            "--old",
            old.to_str().unwrap(),
            "--new",
            new.to_str().unwrap(),
            "--threshold",
            "0.2",
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let xml = String::from_utf8(output).unwrap();
    assert!(xml.contains("<regressionReport"));
    assert!(xml.contains("regressed=\"true\""));
}

#[test]
fn test_cli_publish_then_list_regressions() {
    let dir = tempfile::tempdir().unwrap();
    let project = dir.path().join("project");
    let ws = dir.path().join("ws");
    let config = dir.path().join("benchtrend.json");
    std::fs::write(
        &config,
        format!(
            r#"{{"publisher": {{"track_regressions": true, "regression_threshold": 0.2,
                "regression_address": "perf@example.com",
                "notification_spool": {:?}}}}}"#,
            dir.path().join("spool").to_str().unwrap()
        ),
    )
    .unwrap();
    let base = [
        "--project",
        project.to_str().unwrap(),
        "--config",
        config.to_str().unwrap(),
    ];

    for (build, value) in [("1", 10.0), ("2", 13.0)] {
        let _ = std::fs::remove_dir_all(&ws);
        ReportFixture::new("config/suite.xml")
            .case("sax", "testA", value)
            .write_to(&ws, "result.xml")
            .unwrap();
        let published = run_json(benchtrend().args(base).args([
            "publish",
            "--build",
            build,
            "--workspace",
            ws.to_str().unwrap(),
        ]));
        assert_eq!(published["copied"], 1);
    }

    let regressions = run_json(benchtrend().args(base).args(["regressions"]));
    assert_eq!(regressions["build"], 2);
    assert_eq!(regressions["regressed"], true);
    assert_eq!(regressions["reports"][0]["config_id"], "config.suite.xml");

    let status = run_json(benchtrend().args(base).args(["status"]));
    assert_eq!(status["builds"], 2);
    assert_eq!(std::fs::read_dir(dir.path().join("spool")).unwrap().count(), 1);
    assert!(
        std::fs::read_to_string(project.join("builds/2/build.json"))
            .unwrap()
            .contains("unstable")
    );
}
