//! Regression detection between two reports of the same configuration.
//!
//! A comparison is computed once into a [`RegressionArtifact`]; the XML
//! document persisted next to the build and the HTML summary sent to people
//! are both rendered from that artifact.

use std::{
    fs,
    path::{Path, PathBuf},
};

use quick_xml::{
    Reader, Writer,
    escape::escape,
    events::{BytesDecl, BytesEnd, BytesStart, Event},
};
use serde::Serialize;
use tracing::debug;

use crate::{
    BenchTrendError,
    config::REGRESSION_SUFFIX,
    report::{ParsedReport, Polarity, list_report_files},
};

const REGRESSION_ROOT: &str = "regressionReport";
const OLD_REPORT_ELEMENT: &str = "oldReport";
const NEW_REPORT_ELEMENT: &str = "newReport";
const DELTA_ELEMENT: &str = "testCase";
const ADDED_ELEMENT: &str = "added";
const REMOVED_ELEMENT: &str = "removed";

/// File name of the regression document for `config_id`.
pub fn regression_file_name(config_id: &str) -> String {
    format!("{config_id}{REGRESSION_SUFFIX}")
}

/// Comparison of one test case present in both reports.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TestCaseDelta {
    pub driver: String,
    pub test_case: String,
    pub old_value: f64,
    pub new_value: f64,
    /// `(new - old) / old`, `None` when the old value cannot be a base.
    pub change: Option<f64>,
    pub regressed: bool,
}

/// A test case identified by its driver.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CaseRef {
    pub driver: String,
    pub test_case: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RegressionArtifact {
    pub config_id: String,
    pub threshold: f64,
    pub polarity: Polarity,
    pub old: ParsedReport,
    pub new: ParsedReport,
    pub deltas: Vec<TestCaseDelta>,
    /// Present only in the new report.
    pub added: Vec<CaseRef>,
    /// Present only in the old report.
    pub removed: Vec<CaseRef>,
    pub regressed: bool,
}

impl RegressionArtifact {
    pub fn regressed_cases(&self) -> impl Iterator<Item = &TestCaseDelta> + '_ {
        self.deltas.iter().filter(|d| d.regressed)
    }

    /// Machine-readable document, stable for identical inputs.
    pub fn to_xml(&self) -> Result<String, BenchTrendError> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        write_event(
            &mut writer,
            Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
        )?;

        let mut root = BytesStart::new(REGRESSION_ROOT);
        root.push_attribute(("configId", self.config_id.as_str()));
        root.push_attribute(("threshold", self.threshold.to_string().as_str()));
        root.push_attribute(("polarity", self.polarity.as_str()));
        root.push_attribute(("regressed", bool_str(self.regressed)));
        write_event(&mut writer, Event::Start(root))?;

        write_event(&mut writer, Event::Empty(report_element(OLD_REPORT_ELEMENT, &self.old)))?;
        write_event(&mut writer, Event::Empty(report_element(NEW_REPORT_ELEMENT, &self.new)))?;

        for delta in &self.deltas {
            let mut element = BytesStart::new(DELTA_ELEMENT);
            element.push_attribute(("driver", delta.driver.as_str()));
            element.push_attribute(("name", delta.test_case.as_str()));
            element.push_attribute(("oldValue", delta.old_value.to_string().as_str()));
            element.push_attribute(("newValue", delta.new_value.to_string().as_str()));
            if let Some(change) = delta.change {
                element.push_attribute(("change", change.to_string().as_str()));
            }
            element.push_attribute(("regressed", bool_str(delta.regressed)));
            write_event(&mut writer, Event::Empty(element))?;
        }
        for (tag, cases) in [(ADDED_ELEMENT, &self.added), (REMOVED_ELEMENT, &self.removed)] {
            for case in cases {
                let mut element = BytesStart::new(tag);
                element.push_attribute(("driver", case.driver.as_str()));
                element.push_attribute(("name", case.test_case.as_str()));
                write_event(&mut writer, Event::Empty(element))?;
            }
        }

        write_event(&mut writer, Event::End(BytesEnd::new(REGRESSION_ROOT)))?;
        String::from_utf8(writer.into_inner())
            .map_err(|e| BenchTrendError::invalid_input(e.to_string()))
    }

    /// Human-readable HTML fragment.
    pub fn to_html(&self) -> String {
        let mut html = String::new();
        html.push_str(&format!(
            "<h2>Performance regression report for {}</h2>\n",
            escape(&self.config_id)
        ));
        html.push_str(&format!(
            "<p>Threshold: {:.2}% ({}). Verdict: <b>{}</b>.</p>\n",
            self.threshold * 100.0,
            self.polarity.as_str(),
            if self.regressed { "REGRESSED" } else { "OK" }
        ));
        if let (Some(old), Some(new)) = (self.old.date_time(), self.new.date_time()) {
            html.push_str(&format!(
                "<p>Comparing {} against {}.</p>\n",
                escape(new),
                escape(old)
            ));
        }
        html.push_str("<table border=\"1\">\n");
        html.push_str(
            "<tr><th>Driver</th><th>Test case</th><th>Old</th><th>New</th><th>Change</th><th>Status</th></tr>\n",
        );
        for delta in &self.deltas {
            let change = delta
                .change
                .map(|c| format!("{:+.2}%", c * 100.0))
                .unwrap_or_else(|| "n/a".to_string());
            let status = match (delta.change, delta.regressed) {
                (_, true) => "regressed",
                (None, false) => "undefined",
                (Some(_), false) => "ok",
            };
            html.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                escape(&delta.driver),
                escape(&delta.test_case),
                delta.old_value,
                delta.new_value,
                change,
                status
            ));
        }
        html.push_str("</table>\n");
        for (label, cases) in [("Added", &self.added), ("Removed", &self.removed)] {
            if cases.is_empty() {
                continue;
            }
            html.push_str(&format!("<p>{label} test cases:</p>\n<ul>\n"));
            for case in cases {
                html.push_str(&format!(
                    "<li>{} / {}</li>\n",
                    escape(&case.driver),
                    escape(&case.test_case)
                ));
            }
            html.push_str("</ul>\n");
        }
        html
    }

    /// Complete HTML document around [`Self::to_html`].
    pub fn to_html_document(&self) -> String {
        format!(
            "<html>\n<head><title>Performance regression: {}</title></head>\n<body>\n{}</body>\n</html>\n",
            escape(&self.config_id),
            self.to_html()
        )
    }

    /// Writes `<config_id>.regression` into `dir` and returns its path.
    pub fn write_to<P: AsRef<Path>>(&self, dir: P) -> Result<PathBuf, BenchTrendError> {
        let path = dir.as_ref().join(regression_file_name(&self.config_id));
        fs::write(&path, self.to_xml()?).map_err(|e| BenchTrendError::io_at(&path, e))?;
        Ok(path)
    }
}

/// Outcome of the regression check for one configuration of one build.
#[derive(Clone, Debug, PartialEq)]
pub enum RegressionCheck {
    /// No earlier non-failed build has a report for the configuration.
    NoPriorBuild,
    Compared(RegressionArtifact),
}

impl RegressionCheck {
    pub fn is_regressed(&self) -> bool {
        matches!(self, RegressionCheck::Compared(artifact) if artifact.regressed)
    }

    pub fn artifact(&self) -> Option<&RegressionArtifact> {
        match self {
            RegressionCheck::NoPriorBuild => None,
            RegressionCheck::Compared(artifact) => Some(artifact),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RegressionDetector {
    threshold: f64,
}

impl RegressionDetector {
    /// `threshold` is a non-negative fraction; `0.0` flags any degradation.
    pub fn new(threshold: f64) -> Result<Self, BenchTrendError> {
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(BenchTrendError::invalid_input(format!(
                "regression threshold must be a non-negative fraction, got {threshold}"
            )));
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn compare(&self, old: &ParsedReport, new: &ParsedReport) -> RegressionArtifact {
        let polarity = new.polarity();
        let mut deltas = Vec::new();
        let mut added = Vec::new();
        for (driver, test_case) in new.test_cases() {
            let previous = old
                .driver(&driver.name)
                .and_then(|d| d.test_case(&test_case.name));
            let Some(previous) = previous else {
                added.push(CaseRef {
                    driver: driver.name.clone(),
                    test_case: test_case.name.clone(),
                });
                continue;
            };
            let change = relative_change(previous.result_value, test_case.result_value);
            if change.is_none() {
                debug!(
                    config = new.config_id.as_str(),
                    driver = driver.name.as_str(),
                    test_case = test_case.name.as_str(),
                    old = previous.result_value,
                    "undefined ratio, no verdict for test case"
                );
            }
            let regressed = change
                .map(|c| polarity.degradation(c) > self.threshold)
                .unwrap_or(false);
            deltas.push(TestCaseDelta {
                driver: driver.name.clone(),
                test_case: test_case.name.clone(),
                old_value: previous.result_value,
                new_value: test_case.result_value,
                change,
                regressed,
            });
        }
        let removed = old
            .test_cases()
            .filter(|(driver, test_case)| {
                new.driver(&driver.name)
                    .and_then(|d| d.test_case(&test_case.name))
                    .is_none()
            })
            .map(|(driver, test_case)| CaseRef {
                driver: driver.name.clone(),
                test_case: test_case.name.clone(),
            })
            .collect();
        let regressed = deltas.iter().any(|d| d.regressed);
        RegressionArtifact {
            config_id: new.config_id.clone(),
            threshold: self.threshold,
            polarity,
            old: old.clone(),
            new: new.clone(),
            deltas,
            added,
            removed,
            regressed,
        }
    }

    /// Compares against the previous report when there is one.
    pub fn check(&self, previous: Option<&ParsedReport>, new: &ParsedReport) -> RegressionCheck {
        match previous {
            Some(old) => RegressionCheck::Compared(self.compare(old, new)),
            None => RegressionCheck::NoPriorBuild,
        }
    }
}

/// Compares two reports with a validated threshold.
pub fn compare_reports(
    old: &ParsedReport,
    new: &ParsedReport,
    threshold: f64,
) -> Result<RegressionArtifact, BenchTrendError> {
    Ok(RegressionDetector::new(threshold)?.compare(old, new))
}

/// `(new - old) / old`, or `None` when `old` is zero, negative or either value is not finite.
pub fn relative_change(old: f64, new: f64) -> Option<f64> {
    if !old.is_finite() || !new.is_finite() || old <= 0.0 {
        return None;
    }
    let change = (new - old) / old;
    change.is_finite().then_some(change)
}

/// Verdict read back from a persisted regression document.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RegressionSummary {
    pub config_id: String,
    pub threshold: f64,
    pub regressed: bool,
    pub regressed_cases: Vec<CaseRef>,
}

impl RegressionSummary {
    pub fn from_xml<P: AsRef<Path>>(content: &str, origin: P) -> Result<Self, BenchTrendError> {
        let origin = origin.as_ref();
        let mut reader = Reader::from_str(content);
        reader.trim_text(true);
        let mut summary: Option<RegressionSummary> = None;
        loop {
            let event = reader
                .read_event()
                .map_err(|e| BenchTrendError::malformed(origin, e.to_string()))?;
            match event {
                Event::Start(e) | Event::Empty(e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    if name == REGRESSION_ROOT {
                        let threshold = attribute(&e, "threshold", origin)?
                            .and_then(|t| t.parse().ok())
                            .unwrap_or(0.0);
                        summary = Some(RegressionSummary {
                            config_id: attribute(&e, "configId", origin)?.unwrap_or_default(),
                            threshold,
                            regressed: attribute(&e, "regressed", origin)?.as_deref()
                                == Some("true"),
                            regressed_cases: Vec::new(),
                        });
                    } else if name == DELTA_ELEMENT {
                        let Some(summary) = summary.as_mut() else {
                            continue;
                        };
                        if attribute(&e, "regressed", origin)?.as_deref() == Some("true") {
                            summary.regressed_cases.push(CaseRef {
                                driver: attribute(&e, "driver", origin)?.unwrap_or_default(),
                                test_case: attribute(&e, "name", origin)?.unwrap_or_default(),
                            });
                        }
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }
        summary.ok_or_else(|| {
            BenchTrendError::malformed(origin, format!("missing <{REGRESSION_ROOT}> element"))
        })
    }
}

pub fn read_regression_summary<P: AsRef<Path>>(
    path: P,
) -> Result<RegressionSummary, BenchTrendError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .map_err(|e| BenchTrendError::malformed(path, format!("unreadable: {e}")))?;
    RegressionSummary::from_xml(&content, path)
}

/// Regression documents of a build's report directory; empty when there are none.
pub fn list_regression_reports<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>, BenchTrendError> {
    Ok(list_report_files(dir, REGRESSION_SUFFIX)?
        .into_iter()
        .map(|f| f.path)
        .collect())
}

fn report_element<'a>(tag: &'a str, report: &ParsedReport) -> BytesStart<'a> {
    let mut element = BytesStart::new(tag);
    element.push_attribute(("configId", report.config_id.as_str()));
    if let Some(date_time) = report.date_time() {
        element.push_attribute(("dateTime", date_time));
    }
    if let Some(unit) = report.result_unit() {
        element.push_attribute(("resultUnit", unit));
    }
    element
}

fn write_event(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), BenchTrendError> {
    writer
        .write_event(event)
        .map_err(|e| BenchTrendError::invalid_input(format!("xml write failed: {e}")))
}

fn attribute(
    element: &BytesStart<'_>,
    key: &str,
    origin: &Path,
) -> Result<Option<String>, BenchTrendError> {
    let Some(attr) = element
        .try_get_attribute(key)
        .map_err(|e| BenchTrendError::malformed(origin, e.to_string()))?
    else {
        return Ok(None);
    };
    let value = attr
        .unescape_value()
        .map_err(|e| BenchTrendError::malformed(origin, e.to_string()))?;
    Ok(Some(value.into_owned()))
}

fn bool_str(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}
