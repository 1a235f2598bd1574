//! Synthetic report and project generators shared by tests and benches.

use std::{
    fs,
    path::{Path, PathBuf},
};

use quick_xml::escape::escape;
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{
    BenchTrendError,
    config::REPORT_DIR_NAME,
    history::{BuildNumber, BuildResult, DirectoryProject},
};

/// Builder for a report document.
#[derive(Clone, Debug, Default)]
pub struct ReportFixture {
    config_file: String,
    result_unit: Option<String>,
    params: Vec<(String, String)>,
    drivers: Vec<(String, Vec<(String, f64)>)>,
}

impl ReportFixture {
    pub fn new(config_file: impl Into<String>) -> Self {
        Self {
            config_file: config_file.into(),
            ..Self::default()
        }
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.result_unit = Some(unit.into());
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Adds a test case under `driver`, creating the driver on first use.
    pub fn case(mut self, driver: &str, test_case: &str, value: f64) -> Self {
        let slot = match self.drivers.iter().position(|(name, _)| name == driver) {
            Some(idx) => idx,
            None => {
                self.drivers.push((driver.to_string(), Vec::new()));
                self.drivers.len() - 1
            }
        };
        self.drivers[slot].1.push((test_case.to_string(), value));
        self
    }

    pub fn to_xml(&self) -> String {
        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<testSuiteReport>\n");
        xml.push_str(&format!("  <configFile>{}</configFile>\n", escape(&self.config_file)));
        if let Some(unit) = &self.result_unit {
            xml.push_str(&format!("  <resultUnit>{}</resultUnit>\n", escape(unit)));
        }
        for (key, value) in &self.params {
            xml.push_str(&format!("  <{key}>{}</{key}>\n", escape(value)));
        }
        for (driver, cases) in &self.drivers {
            xml.push_str(&format!("  <driver name=\"{}\">\n", escape(driver)));
            for (name, value) in cases {
                xml.push_str(&format!(
                    "    <testCase name=\"{}\">\n      <resultValue>{value}</resultValue>\n    </testCase>\n",
                    escape(name)
                ));
            }
            xml.push_str("  </driver>\n");
        }
        xml.push_str("</testSuiteReport>\n");
        xml
    }

    /// Writes the document to `dir/file_name`, creating `dir` if needed.
    pub fn write_to<P: AsRef<Path>>(&self, dir: P, file_name: &str) -> Result<PathBuf, BenchTrendError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| BenchTrendError::io_at(dir, e))?;
        let path = dir.join(file_name);
        fs::write(&path, self.to_xml()).map_err(|e| BenchTrendError::io_at(&path, e))?;
        Ok(path)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct HistoryShape {
    pub builds: u32,
    pub configs: usize,
    pub drivers: usize,
    pub test_cases: usize,
}

impl HistoryShape {
    pub fn reports(&self) -> usize {
        self.builds as usize * self.configs
    }
}

pub const BASE_TIMESTAMP_MS: u64 = 1_700_000_000_000;
const BUILD_SPACING_MS: u64 = 60_000;

/// Populates a project at `root` with `shape.builds` successful builds, each
/// holding one report per configuration. Values drift around a per-case base
/// so that trends and regressions are non-trivial.
pub fn generate_history<P: AsRef<Path>>(
    root: P,
    shape: HistoryShape,
    seed: u64,
) -> Result<DirectoryProject, BenchTrendError> {
    if shape.configs == 0 || shape.drivers == 0 || shape.test_cases == 0 {
        return Err(BenchTrendError::invalid_input(
            "history shape needs at least one configuration, driver and test case",
        ));
    }
    let project = DirectoryProject::create(root)?;
    let mut rng = StdRng::seed_from_u64(seed);
    let bases: Vec<f64> = (0..shape.configs * shape.drivers * shape.test_cases)
        .map(|_| rng.gen_range(5.0..500.0))
        .collect();

    for number in 1..=shape.builds {
        let record = project.create_build(
            BuildNumber(number),
            BASE_TIMESTAMP_MS + u64::from(number) * BUILD_SPACING_MS,
            BuildResult::Success,
        )?;
        let report_dir = record.root_dir.join(REPORT_DIR_NAME);
        for config in 0..shape.configs {
            let mut fixture = ReportFixture::new(format!("config/suite-{config}.xml")).unit("ms");
            for driver in 0..shape.drivers {
                for case in 0..shape.test_cases {
                    let base = bases[(config * shape.drivers + driver) * shape.test_cases + case];
                    let value = base * rng.gen_range(0.9..1.1);
                    fixture = fixture.case(&format!("driver-{driver}"), &format!("case/{case}"), value);
                }
            }
            fixture.write_to(&report_dir, &format!("report-{config}.xml"))?;
        }
    }
    Ok(project)
}
