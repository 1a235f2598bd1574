//! Benchmark trend tracking for a build server.
//!
//! Builds publish XML benchmark reports; this crate parses them, aggregates
//! them per configuration across a project's history, derives per test case
//! and mean trend series, flags regressions against the previous non-failed
//! build and notifies by mail.
//! Run Criterion benchmarks with `cargo bench` to inspect reports under `target/criterion`.

pub mod aggregate;
pub mod bench_utils;
pub mod cache;
pub mod cli;
pub mod config;
pub mod errors;
pub mod history;
pub mod mean;
pub mod notify;
pub mod publish;
pub mod regression;
pub mod report;
pub mod service;
pub mod trend;

pub use crate::aggregate::{Aggregation, ConfigurationSeries, ReportAggregator, SeriesEntry};
pub use crate::cache::{AggregationCache, CacheStats};
pub use crate::config::{BenchTrendConfig, CacheConfig, PublisherConfig};
pub use crate::errors::BenchTrendError;
pub use crate::history::{BuildHistory, BuildNumber, BuildRecord, BuildResult, DirectoryProject};
pub use crate::mean::MeanMode;
pub use crate::notify::{DispatchStatus, MailTransport, NotificationDispatcher, SpoolTransport};
pub use crate::publish::{FsWorkspace, PublishOutcome, Publisher, Workspace};
pub use crate::regression::{RegressionArtifact, RegressionCheck, RegressionDetector};
pub use crate::report::{ParsedReport, Polarity, parse_report_file, parse_report_str};
pub use crate::service::{TrendService, ViewTarget};
pub use crate::trend::{TrendChart, TrendReport};
