use std::path::{Path, PathBuf};

use thiserror::Error;

/// Error type for benchmark report operations.
#[derive(Debug, Error)]
pub enum BenchTrendError {
    #[error("malformed report {}: {reason}", path.display())]
    MalformedReport { path: PathBuf, reason: String },
    #[error("failed to parse {}: {source}", path.display())]
    Aggregation {
        path: PathBuf,
        #[source]
        source: Box<BenchTrendError>,
    },
    #[error("undefined ratio: {0}")]
    UndefinedRatio(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("notification failed: {0}")]
    Notification(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl BenchTrendError {
    pub fn malformed<P: AsRef<Path>, T: Into<String>>(path: P, reason: T) -> Self {
        BenchTrendError::MalformedReport {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn aggregation<P: AsRef<Path>>(path: P, source: BenchTrendError) -> Self {
        BenchTrendError::Aggregation {
            path: path.as_ref().to_path_buf(),
            source: Box::new(source),
        }
    }

    pub fn undefined_ratio<T: Into<String>>(msg: T) -> Self {
        BenchTrendError::UndefinedRatio(msg.into())
    }

    pub fn io<T: Into<String>>(msg: T) -> Self {
        BenchTrendError::Io(msg.into())
    }

    /// Io error carrying the path it happened on.
    pub fn io_at<P: AsRef<Path>>(path: P, err: std::io::Error) -> Self {
        BenchTrendError::Io(format!("{}: {err}", path.as_ref().display()))
    }

    pub fn invalid_input<T: Into<String>>(msg: T) -> Self {
        BenchTrendError::InvalidInput(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        BenchTrendError::Config(msg.into())
    }

    pub fn notification<T: Into<String>>(msg: T) -> Self {
        BenchTrendError::Notification(msg.into())
    }

    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        BenchTrendError::NotFound(msg.into())
    }

    /// Path of the report file this error is about, if any.
    pub fn report_path(&self) -> Option<&Path> {
        match self {
            BenchTrendError::MalformedReport { path, .. }
            | BenchTrendError::Aggregation { path, .. } => Some(path),
            _ => None,
        }
    }
}
