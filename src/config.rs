//! Configuration for the publish step, notifications and the aggregation cache.
//!
//! Configuration is read from a JSON document. Every field has a default, so
//! an empty object (or no file at all) yields a working configuration with
//! regression tracking disabled.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::BenchTrendError;

/// Name of the per-build directory holding benchmark reports.
pub const REPORT_DIR_NAME: &str = "benchmarks";

/// Extension of raw benchmark report files.
pub const REPORT_EXTENSION: &str = ".xml";

/// Suffix appended to a configuration identifier to name its regression document.
pub const REGRESSION_SUFFIX: &str = ".regression";

/// Per-build metadata file written by [`crate::history::DirectoryProject`].
pub const BUILD_METADATA_FILE: &str = "build.json";

/// Environment variable naming a configuration file.
pub const CONFIG_ENV_VAR: &str = "BENCHTREND_CONFIG";

/// Options controlling the publish step of a build.
///
/// # Default Configuration
///
/// ```rust
/// use benchtrend::PublisherConfig;
/// let config = PublisherConfig::default();
/// assert_eq!(config.includes, "**/*.xml");
/// assert!(!config.track_regressions);
/// assert!(config.regression_address.is_none());
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Glob of workspace-relative paths to the benchmark XML reports.
    ///
    /// **Default:** `**/*.xml`
    pub includes: String,

    /// Whether a detected regression marks the build unstable and sends a notification.
    ///
    /// **Default:** `false`
    ///
    /// Regression documents are written next to the build's reports either
    /// way; this flag only controls the reaction to a positive verdict.
    pub track_regressions: bool,

    /// Relative change (as a fraction, `0.1` = 10%) above which a test case regressed.
    ///
    /// **Default:** `0.0`, any degradation counts.
    pub regression_threshold: f64,

    /// Comma-separated recipients of regression notifications.
    ///
    /// **Default:** `None`. Required when `track_regressions` is set.
    pub regression_address: Option<String>,

    /// Sender address placed on notifications.
    pub sender_address: String,

    /// Directory where the spool transport drops notification messages.
    ///
    /// **Default:** `None`, which means notifications are spooled under the
    /// project root in a `notifications` directory.
    pub notification_spool: Option<PathBuf>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            includes: "**/*.xml".to_string(),
            track_regressions: false,
            regression_threshold: 0.0,
            regression_address: None,
            sender_address: "benchtrend@localhost".to_string(),
            notification_spool: None,
        }
    }
}

impl PublisherConfig {
    /// Trims the address and maps an empty value to `None`.
    pub fn set_regression_address<T: AsRef<str>>(&mut self, address: Option<T>) {
        self.regression_address = address
            .map(|a| a.as_ref().trim().to_string())
            .filter(|a| !a.is_empty());
    }

    /// Recipients as individual addresses.
    pub fn recipients(&self) -> Vec<String> {
        self.regression_address
            .as_deref()
            .map(split_addresses)
            .unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), BenchTrendError> {
        if !self.regression_threshold.is_finite() || self.regression_threshold < 0.0 {
            return Err(BenchTrendError::config(format!(
                "regression_threshold must be a non-negative fraction, got {}",
                self.regression_threshold
            )));
        }
        if self.includes.trim().is_empty() {
            return Err(BenchTrendError::config("includes must not be empty"));
        }
        if self.track_regressions {
            let address = self
                .regression_address
                .as_deref()
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .ok_or_else(|| BenchTrendError::config("no e-mail address is set"))?;
            validate_addresses(address)?;
        }
        Ok(())
    }
}

/// Options for [`crate::cache::AggregationCache`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of projects whose aggregation is kept in memory.
    ///
    /// **Default:** `16`. The least recently used project is evicted first.
    pub max_projects: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_projects: 16 }
    }
}

/// Complete configuration document.
///
/// ```rust
/// use benchtrend::BenchTrendConfig;
/// let config: BenchTrendConfig = serde_json::from_str(
///     r#"{ "publisher": { "regression_threshold": 0.25 } }"#,
/// ).unwrap();
/// assert_eq!(config.publisher.regression_threshold, 0.25);
/// assert_eq!(config.cache.max_projects, 16);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchTrendConfig {
    pub publisher: PublisherConfig,
    pub cache: CacheConfig,
}

impl BenchTrendConfig {
    /// Reads and validates a JSON configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, BenchTrendError> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|e| BenchTrendError::io_at(path, e))?;
        let mut config: BenchTrendConfig = serde_json::from_slice(&data)
            .map_err(|e| BenchTrendError::config(format!("{}: {e}", path.display())))?;
        let address = config.publisher.regression_address.take();
        config.publisher.set_regression_address(address);
        config.validate()?;
        Ok(config)
    }

    /// Loads the file named by `BENCHTREND_CONFIG`, or the defaults when unset.
    pub fn from_env() -> Result<Self, BenchTrendError> {
        match env::var(CONFIG_ENV_VAR) {
            Ok(path) if !path.trim().is_empty() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), BenchTrendError> {
        self.publisher.validate()?;
        if self.cache.max_projects == 0 {
            return Err(BenchTrendError::config("cache.max_projects must be at least 1"));
        }
        Ok(())
    }
}

fn split_addresses(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .collect()
}

/// Checks a comma-separated address list for `local@domain` shaped entries.
pub fn validate_addresses(list: &str) -> Result<(), BenchTrendError> {
    let addresses = split_addresses(list);
    if addresses.is_empty() {
        return Err(BenchTrendError::config("no e-mail address is set"));
    }
    for address in addresses {
        let valid = match address.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && !domain.is_empty()
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
                    && !address.chars().any(char::is_whitespace)
                    && !domain.contains('@')
            }
            None => false,
        };
        if !valid {
            return Err(BenchTrendError::config(format!(
                "invalid e-mail format: {address}"
            )));
        }
    }
    Ok(())
}
