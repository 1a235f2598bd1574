//! Command-line front end over a [`DirectoryProject`].
//!
//! Every command prints a single JSON object, except `compare` which prints
//! the regression document itself.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value, json};
use tracing::info;

use crate::{
    BenchTrendError,
    config::BenchTrendConfig,
    history::{BuildHistory, BuildNumber, BuildResult, DirectoryProject, now_ms},
    mean::MeanMode,
    notify::SpoolTransport,
    publish::{FsWorkspace, Publisher},
    regression::{compare_reports, list_regression_reports, read_regression_summary},
    report::parse_report_file,
    service::{TrendService, ViewTarget},
};

const DEFAULT_SPOOL_DIR: &str = "mail";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandLineConfig {
    pub project: PathBuf,
    pub config: Option<PathBuf>,
    pub command: String,
    pub command_args: Vec<String>,
}

impl CommandLineConfig {
    pub fn from_args(args: &[&str]) -> Result<Self, String> {
        let mut project = PathBuf::from(".");
        let mut config = None;
        let mut command = String::from("status");
        let mut command_args = Vec::new();
        let mut command_set = false;
        let mut iter = args.iter().skip(1);
        while let Some(arg) = iter.next() {
            if command_set {
                command_args.push(arg.to_string());
                continue;
            }
            match *arg {
                "--project" => {
                    project = PathBuf::from(
                        iter.next()
                            .ok_or_else(|| "--project requires a value".to_string())?,
                    );
                }
                "--config" => {
                    config = Some(PathBuf::from(
                        iter.next()
                            .ok_or_else(|| "--config requires a value".to_string())?,
                    ));
                }
                "--command" => {
                    command = iter
                        .next()
                        .ok_or_else(|| "--command requires a value".to_string())?
                        .to_string();
                    command_set = true;
                }
                other if other.starts_with('-') => {
                    return Err(format!("unknown flag {other}"));
                }
                _ => {
                    command = arg.to_string();
                    command_set = true;
                }
            }
        }
        Ok(Self {
            project,
            config,
            command,
            command_args,
        })
    }

    /// Explicit `--config`, then `BENCHTREND_CONFIG`, then defaults.
    pub fn load_config(&self) -> Result<BenchTrendConfig, BenchTrendError> {
        match &self.config {
            Some(path) => BenchTrendConfig::load(path),
            None => BenchTrendConfig::from_env(),
        }
    }

    pub fn help() -> &'static str {
        "Usage: benchtrend [--project DIR] [--config FILE] COMMAND [ARGS]\n\
         \n\
         Commands:\n\
         \x20 status                                   configurations and latest build\n\
         \x20 publish --build N [--workspace DIR]      record a build's reports\n\
         \x20 trend --report ID (--test NAME | --mean arithmetic|geometric|harmonic)\n\
         \x20 names --report ID                        safe to original test case names\n\
         \x20 compare --old FILE --new FILE [--threshold F] [--format xml|html]\n\
         \x20 regressions [--build N]                  regression verdicts of a build\n"
    }
}

/// Runs `command` and returns what it prints.
pub fn handle_command(
    config: &CommandLineConfig,
    settings: &BenchTrendConfig,
) -> Result<String, BenchTrendError> {
    let args = &config.command_args;
    match config.command.as_str() {
        "status" => run_status(&open_project(config)?, settings),
        "publish" => run_publish(&config.project, settings, args),
        "trend" => run_trend(&open_project(config)?, settings, args),
        "names" => run_names(&open_project(config)?, settings, args),
        "compare" => run_compare(settings, args),
        "regressions" => run_regressions(&open_project(config)?, args),
        other => Err(invalid(format!("unknown command {other}"))),
    }
}

fn open_project(config: &CommandLineConfig) -> Result<DirectoryProject, BenchTrendError> {
    DirectoryProject::open(&config.project)
}

fn run_status(
    project: &DirectoryProject,
    settings: &BenchTrendConfig,
) -> Result<String, BenchTrendError> {
    let service = TrendService::new(&settings.cache);
    let aggregation = service.parse_reports(project)?;
    let configurations = aggregation
        .reports()
        .map(|report| {
            json!({
                "config": report.config_id(),
                "builds": report.series().len(),
                "test_cases": report.test_case_names().len(),
            })
        })
        .collect::<Vec<_>>();
    let target = match service.target(project) {
        ViewTarget::Report(config_id) => Value::String(config_id),
        ViewTarget::Index => Value::String("index".into()),
    };
    let mut object = Map::new();
    object.insert("command".into(), Value::String("status".into()));
    object.insert("project".into(), Value::String(project.display_name()));
    object.insert("builds".into(), json!(project.builds()?.len()));
    object.insert("latest".into(), json!(aggregation.latest_build()));
    object.insert("target".into(), target);
    object.insert("configurations".into(), Value::Array(configurations));
    encode(object)
}

fn run_publish(
    root: &Path,
    settings: &BenchTrendConfig,
    args: &[String],
) -> Result<String, BenchTrendError> {
    let number = BuildNumber(parse_required_u32(args, "--build")?);
    let workspace = FsWorkspace::new(value(args, "--workspace").unwrap_or_else(|| ".".into()));
    let project = DirectoryProject::create(root)?;
    let build = match project.build(number)? {
        Some(build) => build,
        None => project.create_build(number, now_ms(), BuildResult::Success)?,
    };

    let spool = settings
        .publisher
        .notification_spool
        .clone()
        .unwrap_or_else(|| project.root().join(DEFAULT_SPOOL_DIR));
    let publisher = Publisher::new(settings.publisher.clone(), Box::new(SpoolTransport::new(spool)))?;
    let outcome = publisher.perform(&build, &project, &workspace)?;
    project.set_result(number, outcome.result)?;
    info!(build = number.0, result = outcome.result.as_str(), "publish finished");

    let reports = outcome
        .reports
        .iter()
        .map(|r| {
            json!({
                "config": r.config_id,
                "compared": r.check.as_ref().and_then(|c| c.artifact()).is_some(),
                "regressed": r.check.as_ref().is_some_and(|c| c.is_regressed()),
            })
        })
        .collect::<Vec<_>>();
    let failures = outcome
        .failures
        .iter()
        .map(|f| json!({"path": f.path.display().to_string(), "reason": f.reason}))
        .collect::<Vec<_>>();
    let mut object = Map::new();
    object.insert("command".into(), Value::String("publish".into()));
    object.insert("build".into(), json!(number));
    object.insert("result".into(), Value::String(outcome.result.as_str().into()));
    object.insert("copied".into(), json!(outcome.copied));
    object.insert("reports".into(), Value::Array(reports));
    object.insert("failures".into(), Value::Array(failures));
    encode(object)
}

fn run_trend(
    project: &DirectoryProject,
    settings: &BenchTrendConfig,
    args: &[String],
) -> Result<String, BenchTrendError> {
    let config_id = required_value(args, "--report")?;
    let service = TrendService::new(&settings.cache);
    let aggregation = service.parse_reports(project)?;
    let report = aggregation
        .report(&config_id)
        .ok_or_else(|| BenchTrendError::not_found(format!("configuration {config_id}")))?;

    let chart = match (value(args, "--test"), value(args, "--mean")) {
        (Some(test), None) => {
            let original = report.original_name(&test).unwrap_or(test.as_str()).to_string();
            report
                .test_case_chart(&original)
                .ok_or_else(|| BenchTrendError::not_found(format!("test case {test}")))?
        }
        (None, Some(mode)) => report.mean_chart(mode.parse::<MeanMode>()?),
        _ => return Err(invalid("trend needs exactly one of --test or --mean")),
    };
    serde_json::to_string(&chart).map_err(|e| invalid(format!("serialization failed: {e}")))
}

fn run_names(
    project: &DirectoryProject,
    settings: &BenchTrendConfig,
    args: &[String],
) -> Result<String, BenchTrendError> {
    let config_id = required_value(args, "--report")?;
    let service = TrendService::new(&settings.cache);
    let names = service.test_case_names(project, &config_id)?;
    let mut object = Map::new();
    object.insert("command".into(), Value::String("names".into()));
    object.insert("config".into(), Value::String(config_id));
    object.insert("names".into(), json!(names));
    encode(object)
}

fn run_compare(settings: &BenchTrendConfig, args: &[String]) -> Result<String, BenchTrendError> {
    let old = parse_report_file(required_value(args, "--old")?)?;
    let new = parse_report_file(required_value(args, "--new")?)?;
    let threshold = match value(args, "--threshold") {
        Some(raw) => raw
            .parse::<f64>()
            .map_err(|_| invalid("--threshold expects a number"))?,
        None => settings.publisher.regression_threshold,
    };
    let artifact = compare_reports(&old, &new, threshold)?;
    match value(args, "--format").as_deref() {
        None | Some("xml") => artifact.to_xml(),
        Some("html") => Ok(artifact.to_html_document()),
        Some(other) => Err(invalid(format!("unsupported format {other}"))),
    }
}

fn run_regressions(project: &DirectoryProject, args: &[String]) -> Result<String, BenchTrendError> {
    let number = match value(args, "--build") {
        Some(raw) => BuildNumber(
            raw.parse::<u32>()
                .map_err(|_| invalid("--build expects a build number"))?,
        ),
        None => project
            .latest_build()?
            .ok_or_else(|| BenchTrendError::not_found("no builds recorded"))?,
    };
    let build = project
        .build(number)?
        .ok_or_else(|| BenchTrendError::not_found(format!("build {number}")))?;
    let summaries = list_regression_reports(build.report_dir())?
        .iter()
        .map(read_regression_summary)
        .collect::<Result<Vec<_>, _>>()?;
    let mut object = Map::new();
    object.insert("command".into(), Value::String("regressions".into()));
    object.insert("build".into(), json!(number));
    object.insert("regressed".into(), json!(summaries.iter().any(|s| s.regressed)));
    object.insert("reports".into(), json!(summaries));
    encode(object)
}

fn parse_required_u32(args: &[String], flag: &str) -> Result<u32, BenchTrendError> {
    required_value(args, flag)?
        .parse::<u32>()
        .map_err(|_| invalid(format!("{flag} expects a non-negative integer")))
}

fn required_value(args: &[String], flag: &str) -> Result<String, BenchTrendError> {
    value(args, flag).ok_or_else(|| invalid(format!("missing {flag}")))
}

fn value(args: &[String], flag: &str) -> Option<String> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == flag {
            return iter.next().cloned();
        }
    }
    None
}

fn encode(object: Map<String, Value>) -> Result<String, BenchTrendError> {
    serde_json::to_string(&Value::Object(object))
        .map_err(|e| invalid(format!("serialization failed: {e}")))
}

fn invalid<T: Into<String>>(message: T) -> BenchTrendError {
    BenchTrendError::invalid_input(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_before_command() {
        let config = CommandLineConfig::from_args(&[
            "benchtrend",
            "--project",
            "/tmp/p",
            "trend",
            "--report",
            "a.xml",
        ])
        .unwrap();
        assert_eq!(config.project, PathBuf::from("/tmp/p"));
        assert_eq!(config.command, "trend");
        assert_eq!(config.command_args, vec!["--report", "a.xml"]);
    }

    #[test]
    fn defaults_to_status() {
        let config = CommandLineConfig::from_args(&["benchtrend"]).unwrap();
        assert_eq!(config.command, "status");
        assert_eq!(config.project, PathBuf::from("."));
        assert!(config.config.is_none());
    }

    #[test]
    fn rejects_unknown_flag() {
        let err = CommandLineConfig::from_args(&["benchtrend", "--verbose"]).unwrap_err();
        assert!(err.contains("--verbose"));
    }

    #[test]
    fn missing_flag_value_is_reported() {
        let args = vec!["--report".to_string()];
        assert!(required_value(&args, "--report").is_err());
    }
}
