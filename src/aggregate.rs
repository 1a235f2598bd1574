//! Groups every report of a build history by configuration identifier.

use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::atomic::{AtomicU64, Ordering},
};

use tracing::{debug, info};

use crate::{
    BenchTrendError,
    config::REPORT_EXTENSION,
    history::{BuildHistory, BuildNumber, BuildRecord},
    report::{ParsedReport, list_report_files, parse_report_file},
    trend::TrendReport,
};

/// One build's report for a configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct SeriesEntry {
    pub build: BuildNumber,
    pub timestamp_ms: u64,
    pub source: PathBuf,
    pub report: ParsedReport,
}

/// Reports of one configuration keyed by build, iterated in ascending build order.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfigurationSeries {
    config_id: String,
    entries: BTreeMap<BuildNumber, SeriesEntry>,
}

impl ConfigurationSeries {
    pub fn new<T: Into<String>>(config_id: T) -> Self {
        Self {
            config_id: config_id.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn config_id(&self) -> &str {
        &self.config_id
    }

    /// Adds an entry, replacing any earlier entry for the same build.
    pub fn insert(&mut self, entry: SeriesEntry) -> Result<Option<SeriesEntry>, BenchTrendError> {
        if entry.report.config_id != self.config_id {
            return Err(BenchTrendError::invalid_input(format!(
                "report for {} does not belong to series {}",
                entry.report.config_id, self.config_id
            )));
        }
        Ok(self.entries.insert(entry.build, entry))
    }

    pub fn entries(&self) -> impl DoubleEndedIterator<Item = &SeriesEntry> + '_ {
        self.entries.values()
    }

    pub fn get(&self, build: BuildNumber) -> Option<&SeriesEntry> {
        self.entries.get(&build)
    }

    pub fn latest(&self) -> Option<&SeriesEntry> {
        self.entries.values().next_back()
    }

    pub fn builds(&self) -> Vec<BuildNumber> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Trend reports for every configuration of a project.
#[derive(Clone, Debug, PartialEq)]
pub struct Aggregation {
    latest_build: Option<BuildNumber>,
    reports: BTreeMap<String, TrendReport>,
}

impl Aggregation {
    pub fn new(
        latest_build: Option<BuildNumber>,
        series: BTreeMap<String, ConfigurationSeries>,
    ) -> Self {
        let reports = series
            .into_iter()
            .map(|(config_id, series)| (config_id, TrendReport::new(series)))
            .collect();
        Self {
            latest_build,
            reports,
        }
    }

    /// Latest build of the project when this aggregation was computed.
    pub fn latest_build(&self) -> Option<BuildNumber> {
        self.latest_build
    }

    pub fn report(&self, config_id: &str) -> Option<&TrendReport> {
        self.reports.get(config_id)
    }

    pub fn reports(&self) -> impl Iterator<Item = &TrendReport> + '_ {
        self.reports.values()
    }

    pub fn config_ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.reports.keys().map(String::as_str)
    }

    /// The only report, when the project has exactly one configuration.
    pub fn singleton(&self) -> Option<&TrendReport> {
        if self.reports.len() == 1 {
            self.reports.values().next()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }
}

/// Parses the report directories of a whole build history.
///
/// Unlike the publish step, aggregation is all-or-nothing: the first
/// malformed file aborts the call with an error naming that file.
#[derive(Debug, Default)]
pub struct ReportAggregator {
    parsed_files: AtomicU64,
    passes: AtomicU64,
}

impl ReportAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn aggregate(&self, history: &dyn BuildHistory) -> Result<Aggregation, BenchTrendError> {
        let builds = history.builds()?;
        let latest = builds.iter().map(|b| b.number).max();
        let series = self.group(&builds)?;
        self.passes.fetch_add(1, Ordering::Relaxed);
        info!(
            project = history.project_name(),
            builds = builds.len(),
            configurations = series.len(),
            "aggregated benchmark reports"
        );
        Ok(Aggregation::new(latest, series))
    }

    /// Groups the reports of `builds`, which may be listed in any order.
    pub fn group(
        &self,
        builds: &[BuildRecord],
    ) -> Result<BTreeMap<String, ConfigurationSeries>, BenchTrendError> {
        let mut series: BTreeMap<String, ConfigurationSeries> = BTreeMap::new();
        for build in builds {
            for file in list_report_files(build.report_dir(), REPORT_EXTENSION)? {
                self.parsed_files.fetch_add(1, Ordering::Relaxed);
                let report = parse_report_file(&file.path)
                    .map_err(|e| BenchTrendError::aggregation(&file.path, e))?;
                let config_id = report.config_id.clone();
                let replaced = series
                    .entry(config_id.clone())
                    .or_insert_with(|| ConfigurationSeries::new(config_id.as_str()))
                    .insert(SeriesEntry {
                        build: build.number,
                        timestamp_ms: build.timestamp_ms,
                        source: file.path.clone(),
                        report,
                    })?;
                if let Some(previous) = replaced {
                    debug!(
                        config = config_id.as_str(),
                        build = build.number.0,
                        replaced = %previous.source.display(),
                        by = %file.path.display(),
                        "duplicate report for build, keeping last seen"
                    );
                }
            }
        }
        Ok(series)
    }

    /// Number of report files parsed so far.
    pub fn parse_count(&self) -> u64 {
        self.parsed_files.load(Ordering::Relaxed)
    }

    /// Number of completed aggregation passes.
    pub fn pass_count(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }
}
