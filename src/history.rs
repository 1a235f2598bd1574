//! Build history as seen from the host build system.
//!
//! The host owns the project and build lifecycle; this crate only needs to
//! enumerate builds and find their report directories. [`DirectoryProject`]
//! is a filesystem-backed host used by the command line tool and the tests.

use std::{
    fmt, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use crate::{
    BenchTrendError,
    config::{BUILD_METADATA_FILE, REPORT_DIR_NAME},
};

const BUILDS_DIR_NAME: &str = "builds";

/// Monotonically increasing build number, scoped to a project.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildNumber(pub u32);

impl fmt::Display for BuildNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Overall build outcome, ordered from best to worst.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum BuildResult {
    #[default]
    Success,
    Unstable,
    Failure,
}

impl BuildResult {
    /// Combines two results, keeping the worse one.
    pub fn combine(self, other: BuildResult) -> BuildResult {
        self.max(other)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BuildResult::Success => "success",
            BuildResult::Unstable => "unstable",
            BuildResult::Failure => "failure",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildRecord {
    pub number: BuildNumber,
    /// Build start time, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    pub result: BuildResult,
    pub root_dir: PathBuf,
}

impl BuildRecord {
    pub fn report_dir(&self) -> PathBuf {
        self.root_dir.join(REPORT_DIR_NAME)
    }

    pub fn timestamp(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.timestamp_ms)
    }

    pub fn display_name(&self) -> String {
        self.number.to_string()
    }
}

/// Host access to one project's builds.
pub trait BuildHistory: Send + Sync {
    fn project_name(&self) -> &str;

    /// Identity used to key cached state. Two distinct projects must never
    /// share a key, even when their names collide.
    fn cache_key(&self) -> String {
        self.project_name().to_string()
    }

    fn display_name(&self) -> String {
        self.project_name().to_string()
    }

    /// All builds, in whatever order the host lists them.
    fn builds(&self) -> Result<Vec<BuildRecord>, BenchTrendError>;

    fn latest_build(&self) -> Result<Option<BuildNumber>, BenchTrendError> {
        Ok(self.builds()?.iter().map(|b| b.number).max())
    }

    fn build(&self, number: BuildNumber) -> Result<Option<BuildRecord>, BenchTrendError> {
        Ok(self.builds()?.into_iter().find(|b| b.number == number))
    }
}

/// Nearest strictly-earlier build whose result is not a failure.
pub fn previous_not_failed(
    history: &dyn BuildHistory,
    number: BuildNumber,
) -> Result<Option<BuildRecord>, BenchTrendError> {
    Ok(history
        .builds()?
        .into_iter()
        .filter(|b| b.number < number && b.result != BuildResult::Failure)
        .max_by_key(|b| b.number))
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct BuildMetadata {
    #[serde(default)]
    timestamp_ms: Option<u64>,
    #[serde(default)]
    result: BuildResult,
}

/// Project stored as `<root>/builds/<number>/` directories.
///
/// Each build directory may hold a `build.json` with `timestamp_ms` and
/// `result`; without it the directory's modification time is the timestamp
/// and the result is `success`. Directories whose name is not a number are
/// ignored.
#[derive(Clone, Debug)]
pub struct DirectoryProject {
    name: String,
    root: PathBuf,
}

impl DirectoryProject {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, BenchTrendError> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(BenchTrendError::not_found(format!(
                "project directory {}",
                root.display()
            )));
        }
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.display().to_string());
        Ok(Self { name, root })
    }

    /// Creates the project directory if needed.
    pub fn create<P: AsRef<Path>>(root: P) -> Result<Self, BenchTrendError> {
        let root = root.as_ref();
        fs::create_dir_all(root.join(BUILDS_DIR_NAME)).map_err(|e| BenchTrendError::io_at(root, e))?;
        Self::open(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn build_dir(&self, number: BuildNumber) -> PathBuf {
        self.root.join(BUILDS_DIR_NAME).join(number.0.to_string())
    }

    /// Creates a build directory and its metadata file.
    pub fn create_build(
        &self,
        number: BuildNumber,
        timestamp_ms: u64,
        result: BuildResult,
    ) -> Result<BuildRecord, BenchTrendError> {
        let dir = self.build_dir(number);
        fs::create_dir_all(&dir).map_err(|e| BenchTrendError::io_at(&dir, e))?;
        write_metadata(
            &dir,
            &BuildMetadata {
                timestamp_ms: Some(timestamp_ms),
                result,
            },
        )?;
        Ok(BuildRecord {
            number,
            timestamp_ms,
            result,
            root_dir: dir,
        })
    }

    /// Records the outcome of a build, as the host does after publishing.
    pub fn set_result(&self, number: BuildNumber, result: BuildResult) -> Result<(), BenchTrendError> {
        let dir = self.build_dir(number);
        if !dir.is_dir() {
            return Err(BenchTrendError::not_found(format!("build {number}")));
        }
        let mut meta = read_metadata(&dir)?;
        if meta.timestamp_ms.is_none() {
            meta.timestamp_ms = Some(dir_timestamp_ms(&dir));
        }
        meta.result = result;
        write_metadata(&dir, &meta)
    }

    fn load_build(&self, number: BuildNumber, dir: PathBuf) -> Result<BuildRecord, BenchTrendError> {
        let meta = read_metadata(&dir)?;
        Ok(BuildRecord {
            number,
            timestamp_ms: meta.timestamp_ms.unwrap_or_else(|| dir_timestamp_ms(&dir)),
            result: meta.result,
            root_dir: dir,
        })
    }
}

impl BuildHistory for DirectoryProject {
    fn project_name(&self) -> &str {
        &self.name
    }

    fn cache_key(&self) -> String {
        fs::canonicalize(&self.root)
            .unwrap_or_else(|_| self.root.clone())
            .display()
            .to_string()
    }

    fn builds(&self) -> Result<Vec<BuildRecord>, BenchTrendError> {
        let builds_dir = self.root.join(BUILDS_DIR_NAME);
        let entries = match fs::read_dir(&builds_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BenchTrendError::io_at(&builds_dir, e)),
        };
        let mut builds = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| BenchTrendError::io_at(&builds_dir, e))?;
            let Ok(number) = entry.file_name().to_string_lossy().parse::<u32>() else {
                continue;
            };
            if !entry.path().is_dir() {
                continue;
            }
            builds.push(self.load_build(BuildNumber(number), entry.path())?);
        }
        Ok(builds)
    }

    fn build(&self, number: BuildNumber) -> Result<Option<BuildRecord>, BenchTrendError> {
        let dir = self.build_dir(number);
        if !dir.is_dir() {
            return Ok(None);
        }
        self.load_build(number, dir).map(Some)
    }
}

fn read_metadata(dir: &Path) -> Result<BuildMetadata, BenchTrendError> {
    let path = dir.join(BUILD_METADATA_FILE);
    match fs::read(&path) {
        Ok(data) => serde_json::from_slice(&data)
            .map_err(|e| BenchTrendError::invalid_input(format!("{}: {e}", path.display()))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(BuildMetadata::default()),
        Err(e) => Err(BenchTrendError::io_at(&path, e)),
    }
}

fn write_metadata(dir: &Path, meta: &BuildMetadata) -> Result<(), BenchTrendError> {
    let path = dir.join(BUILD_METADATA_FILE);
    let data = serde_json::to_vec_pretty(meta)
        .map_err(|e| BenchTrendError::invalid_input(e.to_string()))?;
    fs::write(&path, data).map_err(|e| BenchTrendError::io_at(&path, e))
}

fn dir_timestamp_ms(dir: &Path) -> u64 {
    fs::metadata(dir)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
