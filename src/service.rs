//! Entry points used by the view layer: trend reports, test case names and
//! report comparison.

use std::{collections::BTreeMap, sync::Arc};

use tracing::warn;

use crate::{
    BenchTrendError,
    aggregate::Aggregation,
    cache::{AggregationCache, CacheStats},
    config::CacheConfig,
    history::BuildHistory,
    regression::{RegressionArtifact, compare_reports},
    report::ParsedReport,
};

/// What the project-level page should show.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ViewTarget {
    /// The project has exactly one configuration; show its report directly.
    Report(String),
    /// Show the list of configurations (also used when parsing failed).
    Index,
}

#[derive(Default)]
pub struct TrendService {
    cache: AggregationCache,
}

impl TrendService {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            cache: AggregationCache::new(config),
        }
    }

    /// Trend reports of every configuration, memoized per latest build.
    pub fn parse_reports(
        &self,
        project: &dyn BuildHistory,
    ) -> Result<Arc<Aggregation>, BenchTrendError> {
        self.cache.get(project)
    }

    pub fn has_reports(&self, project: &dyn BuildHistory) -> Result<bool, BenchTrendError> {
        Ok(!self.parse_reports(project)?.is_empty())
    }

    /// Safe name to original name for the test cases of `config_id`.
    pub fn test_case_names(
        &self,
        project: &dyn BuildHistory,
        config_id: &str,
    ) -> Result<BTreeMap<String, String>, BenchTrendError> {
        let aggregation = self.parse_reports(project)?;
        aggregation
            .report(config_id)
            .map(|report| report.safe_test_case_names().clone())
            .ok_or_else(|| BenchTrendError::not_found(format!("configuration {config_id}")))
    }

    pub fn target(&self, project: &dyn BuildHistory) -> ViewTarget {
        match self.parse_reports(project) {
            Ok(aggregation) => match aggregation.singleton() {
                Some(report) => ViewTarget::Report(report.config_id().to_string()),
                None => ViewTarget::Index,
            },
            Err(err) => {
                warn!(project = project.project_name(), %err, "failed to parse benchmark reports");
                ViewTarget::Index
            }
        }
    }

    pub fn compare_reports(
        &self,
        old: &ParsedReport,
        new: &ParsedReport,
        threshold: f64,
    ) -> Result<RegressionArtifact, BenchTrendError> {
        compare_reports(old, new, threshold)
    }

    pub fn cache(&self) -> &AggregationCache {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
