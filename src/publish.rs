//! The publish step run once when a build completes.
//!
//! Reports are copied from the workspace into the build's report directory,
//! parsed one by one (a malformed file is recorded and skipped), archived
//! under their configuration identifier and compared with the same
//! configuration of the nearest earlier non-failed build.

use std::{
    fs,
    path::{Path, PathBuf},
};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::{
    BenchTrendError,
    config::{PublisherConfig, REGRESSION_SUFFIX},
    history::{BuildHistory, BuildRecord, BuildResult, previous_not_failed},
    notify::{DispatchStatus, MailTransport, NotificationDispatcher},
    regression::{RegressionCheck, RegressionDetector},
    report::parse_report_file,
};

/// Source of report files produced by a build.
pub trait Workspace {
    /// Copies files matching `includes` into `dest`, keeping their relative
    /// paths, and returns how many were copied.
    fn copy_reports(&self, includes: &str, dest: &Path) -> Result<usize, BenchTrendError>;
}

/// Workspace rooted at a local directory. `includes` is a comma-separated
/// list of globs relative to the root; `**` crosses directories, `*` does not.
#[derive(Clone, Debug)]
pub struct FsWorkspace {
    root: PathBuf,
}

impl FsWorkspace {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Workspace for FsWorkspace {
    fn copy_reports(&self, includes: &str, dest: &Path) -> Result<usize, BenchTrendError> {
        let globs = build_glob_set(includes)?;
        let mut copied = 0;
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry.map_err(|e| BenchTrendError::io(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            if !globs.is_match(relative) {
                continue;
            }
            let target = dest.join(relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| BenchTrendError::io_at(parent, e))?;
            }
            fs::copy(entry.path(), &target).map_err(|e| BenchTrendError::io_at(entry.path(), e))?;
            preserve_modified(entry.path(), &target)?;
            copied += 1;
        }
        Ok(copied)
    }
}

/// Carries the source's modification time over, so stale reports stay stale.
fn preserve_modified(source: &Path, target: &Path) -> Result<(), BenchTrendError> {
    let modified = fs::metadata(source)
        .and_then(|m| m.modified())
        .map_err(|e| BenchTrendError::io_at(source, e))?;
    fs::OpenOptions::new()
        .write(true)
        .open(target)
        .and_then(|file| file.set_modified(modified))
        .map_err(|e| BenchTrendError::io_at(target, e))
}

fn build_glob_set(includes: &str) -> Result<GlobSet, BenchTrendError> {
    let mut builder = GlobSetBuilder::new();
    let mut patterns = 0;
    for pattern in includes.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| BenchTrendError::config(format!("includes pattern {pattern}: {e}")))?;
        builder.add(glob);
        patterns += 1;
    }
    if patterns == 0 {
        return Err(BenchTrendError::config("includes must name at least one pattern"));
    }
    builder
        .build()
        .map_err(|e| BenchTrendError::config(e.to_string()))
}

/// A file the publish step could not use.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportFailure {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConfigOutcome {
    pub config_id: String,
    pub source: PathBuf,
    pub archived: PathBuf,
    /// `None` when the previous build's report could not be compared.
    pub check: Option<RegressionCheck>,
    pub regression_file: Option<PathBuf>,
    pub notification: Option<DispatchStatus>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PublishOutcome {
    pub result: BuildResult,
    pub copied: usize,
    pub reports: Vec<ConfigOutcome>,
    pub failures: Vec<ReportFailure>,
    pub skipped_old: Vec<PathBuf>,
}

impl PublishOutcome {
    fn new(copied: usize) -> Self {
        Self {
            result: BuildResult::Success,
            copied,
            reports: Vec::new(),
            failures: Vec::new(),
            skipped_old: Vec::new(),
        }
    }

    pub fn has_regression_report(&self) -> bool {
        self.reports.iter().any(|r| r.regression_file.is_some())
    }

    pub fn regressed(&self) -> bool {
        self.reports
            .iter()
            .any(|r| r.check.as_ref().is_some_and(RegressionCheck::is_regressed))
    }
}

pub struct Publisher {
    config: PublisherConfig,
    detector: RegressionDetector,
    dispatcher: NotificationDispatcher,
}

impl Publisher {
    pub fn new(
        config: PublisherConfig,
        transport: Box<dyn MailTransport>,
    ) -> Result<Self, BenchTrendError> {
        config.validate()?;
        let detector = RegressionDetector::new(config.regression_threshold)?;
        let dispatcher = NotificationDispatcher::new(&config, transport);
        Ok(Self {
            config,
            detector,
            dispatcher,
        })
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Copies the build's reports out of `workspace` and processes them.
    ///
    /// Finding no matching file fails the build; a detected regression makes
    /// it unstable when tracking is enabled.
    pub fn perform(
        &self,
        build: &BuildRecord,
        history: &dyn BuildHistory,
        workspace: &dyn Workspace,
    ) -> Result<PublishOutcome, BenchTrendError> {
        info!(includes = self.config.includes.as_str(), build = build.number.0, "recording benchmark reports");
        let out_dir = build.report_dir();
        fs::create_dir_all(&out_dir).map_err(|e| BenchTrendError::io_at(&out_dir, e))?;

        let copied = workspace.copy_reports(&self.config.includes, &out_dir)?;
        if copied == 0 {
            warn!(includes = self.config.includes.as_str(), "no matching file found, configuration error?");
            let mut outcome = PublishOutcome::new(0);
            outcome.result = BuildResult::Failure;
            return Ok(outcome);
        }

        let mut outcome = self.process_reports(build, history)?;
        outcome.copied = copied;
        Ok(outcome)
    }

    /// Processes the files already present in the build's report directory.
    pub fn process_reports(
        &self,
        build: &BuildRecord,
        history: &dyn BuildHistory,
    ) -> Result<PublishOutcome, BenchTrendError> {
        let out_dir = build.report_dir();
        let files = scan_report_dir(&out_dir)?;
        let previous_dir = previous_not_failed(history, build.number)?.map(|b| b.report_dir());
        let mut outcome = PublishOutcome::new(files.len());
        let build_started = build.timestamp();

        for path in files {
            let modified = match fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(err) => {
                    warn!(file = %path.display(), %err, "skipping unreadable report");
                    outcome.failures.push(ReportFailure {
                        path,
                        reason: err.to_string(),
                    });
                    continue;
                }
            };
            if modified < build_started {
                info!(file = %path.display(), "ignoring old file");
                outcome.skipped_old.push(path);
                continue;
            }

            let report = match parse_report_file(&path) {
                Ok(report) => report,
                Err(err) => {
                    warn!(file = %path.display(), %err, "skipping unparsable report");
                    outcome.failures.push(ReportFailure {
                        path,
                        reason: err.to_string(),
                    });
                    continue;
                }
            };
            let config_id = report.config_id.clone();

            let archived = out_dir.join(&config_id);
            if archived != path {
                if let Err(err) = fs::copy(&path, &archived) {
                    warn!(file = %path.display(), archive = %archived.display(), %err, "failed to archive report");
                    outcome.failures.push(ReportFailure {
                        path,
                        reason: format!("archiving as {config_id}: {err}"),
                    });
                    continue;
                }
            }

            let previous = previous_dir
                .as_ref()
                .map(|dir| dir.join(&config_id))
                .filter(|p| p.is_file());
            let check = match previous {
                None => Some(RegressionCheck::NoPriorBuild),
                Some(previous) => match parse_report_file(&previous) {
                    Ok(old) => Some(self.detector.check(Some(&old), &report)),
                    Err(err) => {
                        warn!(config = config_id.as_str(), %err, "failed to compute regression report");
                        outcome.failures.push(ReportFailure {
                            path: previous,
                            reason: err.to_string(),
                        });
                        None
                    }
                },
            };

            let mut regression_file = None;
            let mut notification = None;
            if let Some(RegressionCheck::Compared(artifact)) = &check {
                match artifact.write_to(&out_dir) {
                    Ok(written) => regression_file = Some(written),
                    Err(err) => {
                        warn!(config = config_id.as_str(), %err, "failed to write regression report");
                        outcome.failures.push(ReportFailure {
                            path: out_dir.join(format!("{config_id}{REGRESSION_SUFFIX}")),
                            reason: err.to_string(),
                        });
                    }
                }
                if self.config.track_regressions && artifact.regressed {
                    info!(config = config_id.as_str(), "regression detected");
                    outcome.result = outcome.result.combine(BuildResult::Unstable);
                    notification = Some(self.dispatcher.dispatch(
                        &history.display_name(),
                        &build.display_name(),
                        &artifact.to_html_document(),
                    ));
                }
            }

            outcome.reports.push(ConfigOutcome {
                config_id,
                source: path,
                archived,
                check,
                regression_file,
                notification,
            });
        }
        Ok(outcome)
    }
}

/// Every file under `dir` except regression documents, in path order.
fn scan_report_dir(dir: &Path) -> Result<Vec<PathBuf>, BenchTrendError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| BenchTrendError::io(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.file_name().to_string_lossy().ends_with(REGRESSION_SUFFIX) {
            continue;
        }
        files.push(entry.into_path());
    }
    Ok(files)
}
