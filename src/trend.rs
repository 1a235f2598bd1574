//! Trend series over one configuration's build history.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use tracing::debug;

use crate::{
    aggregate::{ConfigurationSeries, SeriesEntry},
    history::BuildNumber,
    mean::MeanMode,
};

/// Character that cannot appear in a path or URL segment.
pub const UNSAFE_NAME_CHAR: char = '/';
pub const SAFE_NAME_REPLACEMENT: &str = "_";

/// Test case name usable as a path or URL segment.
pub fn safe_name(name: &str) -> String {
    name.replace(UNSAFE_NAME_CHAR, SAFE_NAME_REPLACEMENT)
}

/// A test case measurement taken in one build by one driver.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrendPoint {
    pub build: BuildNumber,
    pub timestamp_ms: u64,
    pub driver: String,
    pub value: f64,
}

/// Mean over all test cases of one build's report.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MeanPoint {
    pub build: BuildNumber,
    pub timestamp_ms: u64,
    pub value: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChartPoint {
    pub build: BuildNumber,
    pub timestamp_ms: u64,
    pub value: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChartSeries {
    pub label: String,
    pub points: Vec<ChartPoint>,
}

/// Data for one trend chart; rendering is left to the caller.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrendChart {
    pub title: String,
    pub value_label: String,
    /// Timestamp of the newest build in the chart, for conditional requests.
    pub last_modified_ms: Option<u64>,
    pub series: Vec<ChartSeries>,
}

/// Trend view of one configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct TrendReport {
    series: ConfigurationSeries,
    test_case_names: Vec<String>,
    safe_names: BTreeMap<String, String>,
}

impl TrendReport {
    pub fn new(series: ConfigurationSeries) -> Self {
        let mut seen = HashSet::new();
        let mut test_case_names = Vec::new();
        for entry in series.entries() {
            for (_, test_case) in entry.report.test_cases() {
                if seen.insert(test_case.name.clone()) {
                    test_case_names.push(test_case.name.clone());
                }
            }
        }
        let safe_names = build_safe_names(&test_case_names);
        Self {
            series,
            test_case_names,
            safe_names,
        }
    }

    pub fn config_id(&self) -> &str {
        self.series.config_id()
    }

    pub fn display_name(&self) -> &str {
        self.config_id()
    }

    pub fn series(&self) -> &ConfigurationSeries {
        &self.series
    }

    /// Every test case name in the series, in first-seen order.
    pub fn test_case_names(&self) -> &[String] {
        &self.test_case_names
    }

    /// Safe name to original name, for every test case in the series.
    pub fn safe_test_case_names(&self) -> &BTreeMap<String, String> {
        &self.safe_names
    }

    pub fn original_name(&self, safe: &str) -> Option<&str> {
        self.safe_names.get(safe).map(String::as_str)
    }

    pub fn safe_name_of(&self, original: &str) -> Option<&str> {
        self.safe_names
            .iter()
            .find(|(_, name)| name.as_str() == original)
            .map(|(safe, _)| safe.as_str())
    }

    /// Measurements of `test_case` in ascending build order.
    ///
    /// Builds whose report lacks the test case contribute nothing. Each call
    /// returns a fresh iterator over the same points.
    pub fn points<'a>(&'a self, test_case: &'a str) -> impl Iterator<Item = TrendPoint> + 'a {
        self.series.entries().flat_map(move |entry| {
            entry.report.drivers.iter().filter_map(move |driver| {
                driver.test_case(test_case).map(|tc| TrendPoint {
                    build: entry.build,
                    timestamp_ms: entry.timestamp_ms,
                    driver: driver.name.clone(),
                    value: tc.result_value,
                })
            })
        })
    }

    /// Per-build means in ascending build order.
    ///
    /// Builds whose mean is undefined for `mode` are left out.
    pub fn mean_points(&self, mode: MeanMode) -> impl Iterator<Item = MeanPoint> + '_ {
        self.series
            .entries()
            .filter_map(move |entry| build_mean(entry, mode))
    }

    pub fn last_modified_ms(&self) -> Option<u64> {
        self.series.latest().map(|e| e.timestamp_ms)
    }

    pub fn result_unit(&self) -> Option<&str> {
        self.series.latest().and_then(|e| e.report.result_unit())
    }

    /// One line per driver for `test_case`, or `None` if the series never ran it.
    pub fn test_case_chart(&self, test_case: &str) -> Option<TrendChart> {
        if !self.test_case_names.iter().any(|n| n == test_case) {
            return None;
        }
        let mut lines: Vec<ChartSeries> = Vec::new();
        for point in self.points(test_case) {
            let chart_point = ChartPoint {
                build: point.build,
                timestamp_ms: point.timestamp_ms,
                value: point.value,
            };
            match lines.iter().position(|l| l.label == point.driver) {
                Some(idx) => lines[idx].points.push(chart_point),
                None => lines.push(ChartSeries {
                    label: point.driver,
                    points: vec![chart_point],
                }),
            }
        }
        Some(TrendChart {
            title: test_case.to_string(),
            value_label: self.value_label(),
            last_modified_ms: self.last_modified_ms(),
            series: lines,
        })
    }

    pub fn mean_chart(&self, mode: MeanMode) -> TrendChart {
        let points = self
            .mean_points(mode)
            .map(|p| ChartPoint {
                build: p.build,
                timestamp_ms: p.timestamp_ms,
                value: p.value,
            })
            .collect();
        TrendChart {
            title: format!("{} ({} mean)", self.config_id(), mode),
            value_label: self.value_label(),
            last_modified_ms: self.last_modified_ms(),
            series: vec![ChartSeries {
                label: format!("{mode} mean"),
                points,
            }],
        }
    }

    fn value_label(&self) -> String {
        self.result_unit().unwrap_or("value").to_string()
    }
}

fn build_mean(entry: &SeriesEntry, mode: MeanMode) -> Option<MeanPoint> {
    match mode.compute(&entry.report.result_values()) {
        Ok(value) => Some(MeanPoint {
            build: entry.build,
            timestamp_ms: entry.timestamp_ms,
            value,
        }),
        Err(err) => {
            debug!(
                config = entry.report.config_id.as_str(),
                build = entry.build.0,
                %err,
                "skipping build in mean series"
            );
            None
        }
    }
}

/// Maps safe names to originals; names that sanitise to the same string get a `~N` suffix.
fn build_safe_names(names: &[String]) -> BTreeMap<String, String> {
    let mut safe_names = BTreeMap::new();
    for name in names {
        let base = safe_name(name);
        let mut candidate = base.clone();
        let mut n = 2;
        while safe_names.contains_key(&candidate) {
            candidate = format!("{base}~{n}");
            n += 1;
        }
        safe_names.insert(candidate, name.clone());
    }
    safe_names
}
