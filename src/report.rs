//! Benchmark report parsing.
//!
//! A report is an XML document rooted at `testSuiteReport`. Leaf children of
//! the root are report parameters (`configFile`, `resultUnit`, `dateTime`,
//! ...), `driver` elements group `testCase` elements, and leaf children of a
//! driver or test case are its parameters:
//!
//! ```xml
//! <testSuiteReport name="parsers">
//!   <configFile>config/parsers.xml</configFile>
//!   <resultUnit>ms</resultUnit>
//!   <driver name="sax">
//!     <testCase name="small/doc">
//!       <resultValue>12.5</resultValue>
//!       <resultIterations>400</resultIterations>
//!     </testCase>
//!   </driver>
//! </testSuiteReport>
//! ```

use std::{
    collections::BTreeMap,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::SystemTime,
};

use quick_xml::{
    Reader,
    events::{BytesStart, Event},
};
use serde::{Deserialize, Serialize};

use crate::BenchTrendError;

pub const ROOT_ELEMENT: &str = "testSuiteReport";
pub const DRIVER_ELEMENT: &str = "driver";
pub const TEST_CASE_ELEMENT: &str = "testCase";
pub const CONFIG_FILE_PARAM: &str = "configFile";
pub const RESULT_VALUE_PARAM: &str = "resultValue";
pub const RESULT_UNIT_PARAM: &str = "resultUnit";
pub const DATE_TIME_PARAM: &str = "dateTime";

const HIGHER_IS_BETTER_UNITS: &[&str] = &["tps", "ops", "mbps", "kbps", "gbps", "mb/s", "kb/s"];

/// A report file inside a build's report directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawReportFile {
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// Which direction of change is a degradation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Polarity {
    /// Times and sizes: growth is a degradation.
    #[default]
    LowerIsBetter,
    /// Throughput: shrinkage is a degradation.
    HigherIsBetter,
}

impl Polarity {
    pub fn from_unit(unit: Option<&str>) -> Self {
        match unit {
            Some(unit)
                if HIGHER_IS_BETTER_UNITS
                    .iter()
                    .any(|u| u.eq_ignore_ascii_case(unit.trim())) =>
            {
                Polarity::HigherIsBetter
            }
            _ => Polarity::LowerIsBetter,
        }
    }

    /// Relative change expressed so that positive means "got worse".
    pub fn degradation(self, change: f64) -> f64 {
        match self {
            Polarity::LowerIsBetter => change,
            Polarity::HigherIsBetter => -change,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Polarity::LowerIsBetter => "lower-is-better",
            Polarity::HigherIsBetter => "higher-is-better",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    pub result_value: f64,
    pub params: BTreeMap<String, String>,
}

impl TestCase {
    /// Any numeric parameter of the test case, `resultValue` included.
    pub fn measurement(&self, key: &str) -> Option<f64> {
        if key == RESULT_VALUE_PARAM {
            return Some(self.result_value);
        }
        self.params.get(key)?.trim().parse().ok()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Driver {
    pub name: String,
    pub params: BTreeMap<String, String>,
    pub test_cases: Vec<TestCase>,
}

impl Driver {
    pub fn test_case(&self, name: &str) -> Option<&TestCase> {
        self.test_cases.iter().find(|tc| tc.name == name)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParsedReport {
    pub config_id: String,
    pub params: BTreeMap<String, String>,
    pub drivers: Vec<Driver>,
}

impl ParsedReport {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn result_unit(&self) -> Option<&str> {
        self.param(RESULT_UNIT_PARAM)
    }

    pub fn date_time(&self) -> Option<&str> {
        self.param(DATE_TIME_PARAM)
    }

    pub fn polarity(&self) -> Polarity {
        Polarity::from_unit(self.result_unit())
    }

    pub fn driver(&self, name: &str) -> Option<&Driver> {
        self.drivers.iter().find(|d| d.name == name)
    }

    /// Every test case with the driver that ran it, in document order.
    pub fn test_cases(&self) -> impl Iterator<Item = (&Driver, &TestCase)> + '_ {
        self.drivers
            .iter()
            .flat_map(|driver| driver.test_cases.iter().map(move |tc| (driver, tc)))
    }

    pub fn result_values(&self) -> Vec<f64> {
        self.test_cases().map(|(_, tc)| tc.result_value).collect()
    }
}

/// Flattens a config file path into a dotted configuration identifier.
pub fn config_identifier(config_file: &str) -> String {
    config_file.trim().replace(['/', '\\'], ".")
}

/// Lists report files directly inside `dir` whose name ends with `suffix`.
///
/// A missing directory is an empty listing.
pub fn list_report_files<P: AsRef<Path>>(
    dir: P,
    suffix: &str,
) -> Result<Vec<RawReportFile>, BenchTrendError> {
    let dir = dir.as_ref();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(BenchTrendError::io_at(dir, e)),
    };
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| BenchTrendError::io_at(dir, e))?;
        let name = entry.file_name();
        if !name.to_string_lossy().ends_with(suffix) {
            continue;
        }
        let meta = entry
            .metadata()
            .map_err(|e| BenchTrendError::io_at(entry.path(), e))?;
        if !meta.is_file() {
            continue;
        }
        files.push(RawReportFile {
            path: entry.path(),
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        });
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

/// Reads and parses one report file. Every failure is a `MalformedReport`.
pub fn parse_report_file<P: AsRef<Path>>(path: P) -> Result<ParsedReport, BenchTrendError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .map_err(|e| BenchTrendError::malformed(path, format!("unreadable: {e}")))?;
    parse_report_str(&content, path)
}

/// Parses report content; `origin` only labels errors.
pub fn parse_report_str<P: AsRef<Path>>(
    content: &str,
    origin: P,
) -> Result<ParsedReport, BenchTrendError> {
    let origin = origin.as_ref();
    let mut reader = Reader::from_str(content);
    reader.trim_text(true);

    let mut stack: Vec<Frame> = Vec::new();
    let mut report_params = BTreeMap::new();
    let mut drivers = Vec::new();
    let mut root_seen = false;
    let mut root_closed = false;

    loop {
        let event = reader.read_event().map_err(|e| {
            BenchTrendError::malformed(
                origin,
                format!("xml error at byte {}: {e}", reader.buffer_position()),
            )
        })?;
        match event {
            Event::Start(start) => {
                let frame = open_frame(&mut stack, &start, root_closed, origin)?;
                root_seen = true;
                stack.push(frame);
            }
            Event::Empty(start) => {
                let frame = open_frame(&mut stack, &start, root_closed, origin)?;
                root_seen = true;
                stack.push(frame);
                root_closed |= close_frame(&mut stack, &mut report_params, &mut drivers, origin)?;
            }
            Event::End(_) => {
                root_closed |= close_frame(&mut stack, &mut report_params, &mut drivers, origin)?;
            }
            Event::Text(text) => {
                if let Some(Frame::Param { value, .. }) = stack.last_mut() {
                    let text = text
                        .unescape()
                        .map_err(|e| BenchTrendError::malformed(origin, e.to_string()))?;
                    value.push_str(&text);
                }
            }
            Event::CData(data) => {
                if let Some(Frame::Param { value, .. }) = stack.last_mut() {
                    value.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !root_seen {
        return Err(BenchTrendError::malformed(origin, "empty document"));
    }
    if !stack.is_empty() {
        return Err(BenchTrendError::malformed(
            origin,
            "unexpected end of document",
        ));
    }

    let config_file = report_params
        .get(CONFIG_FILE_PARAM)
        .map(|v: &String| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            BenchTrendError::malformed(origin, format!("missing {CONFIG_FILE_PARAM} parameter"))
        })?;

    let config_id = config_identifier(config_file);
    if matches!(config_id.as_str(), "." | "..") {
        return Err(BenchTrendError::malformed(
            origin,
            format!("{CONFIG_FILE_PARAM} {config_file:?} does not name a file"),
        ));
    }

    Ok(ParsedReport {
        config_id,
        params: report_params,
        drivers,
    })
}

enum Frame {
    Report,
    Driver(Driver),
    Case {
        name: String,
        params: BTreeMap<String, String>,
    },
    Param {
        name: String,
        value: String,
        nested: bool,
    },
    Ignored,
}

fn open_frame(
    stack: &mut [Frame],
    start: &BytesStart<'_>,
    root_closed: bool,
    origin: &Path,
) -> Result<Frame, BenchTrendError> {
    let local = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let frame = match stack.last_mut() {
        None => {
            if root_closed {
                return Err(BenchTrendError::malformed(origin, "multiple root elements"));
            }
            if local != ROOT_ELEMENT {
                return Err(BenchTrendError::malformed(
                    origin,
                    format!("expected <{ROOT_ELEMENT}> root, found <{local}>"),
                ));
            }
            Frame::Report
        }
        Some(Frame::Report) if local == DRIVER_ELEMENT => Frame::Driver(Driver {
            name: name_attribute(start, origin)?,
            params: BTreeMap::new(),
            test_cases: Vec::new(),
        }),
        Some(Frame::Driver(_)) if local == TEST_CASE_ELEMENT => Frame::Case {
            name: name_attribute(start, origin)?,
            params: BTreeMap::new(),
        },
        Some(Frame::Report | Frame::Driver(_) | Frame::Case { .. }) => Frame::Param {
            name: local,
            value: String::new(),
            nested: false,
        },
        Some(Frame::Param { nested, .. }) => {
            *nested = true;
            Frame::Ignored
        }
        Some(Frame::Ignored) => Frame::Ignored,
    };
    Ok(frame)
}

/// Pops the innermost frame into its parent. Returns true when the root closed.
fn close_frame(
    stack: &mut Vec<Frame>,
    report_params: &mut BTreeMap<String, String>,
    drivers: &mut Vec<Driver>,
    origin: &Path,
) -> Result<bool, BenchTrendError> {
    let frame = stack
        .pop()
        .ok_or_else(|| BenchTrendError::malformed(origin, "unbalanced end tag"))?;
    match frame {
        Frame::Report => return Ok(true),
        Frame::Ignored => {}
        Frame::Param { nested: true, .. } => {}
        Frame::Param {
            name,
            value,
            nested: false,
        } => match stack.last_mut() {
            Some(Frame::Report) => {
                report_params.insert(name, value);
            }
            Some(Frame::Driver(driver)) => {
                driver.params.insert(name, value);
            }
            Some(Frame::Case { params, .. }) => {
                params.insert(name, value);
            }
            _ => {}
        },
        Frame::Case { name, params } => {
            let raw = params.get(RESULT_VALUE_PARAM).ok_or_else(|| {
                BenchTrendError::malformed(
                    origin,
                    format!("test case {name} has no {RESULT_VALUE_PARAM}"),
                )
            })?;
            let result_value = raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| {
                    BenchTrendError::malformed(
                        origin,
                        format!("test case {name} has non-numeric {RESULT_VALUE_PARAM} {raw:?}"),
                    )
                })?;
            if let Some(Frame::Driver(driver)) = stack.last_mut() {
                driver.test_cases.push(TestCase {
                    name,
                    result_value,
                    params,
                });
            }
        }
        Frame::Driver(driver) => drivers.push(driver),
    }
    Ok(false)
}

fn name_attribute(start: &BytesStart<'_>, origin: &Path) -> Result<String, BenchTrendError> {
    let element = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let attr = start
        .try_get_attribute("name")
        .map_err(|e| BenchTrendError::malformed(origin, e.to_string()))?
        .ok_or_else(|| {
            BenchTrendError::malformed(origin, format!("<{element}> without name attribute"))
        })?;
    let value = attr
        .unescape_value()
        .map_err(|e| BenchTrendError::malformed(origin, e.to_string()))?;
    Ok(value.into_owned())
}
