//! Report definitions read from TOML.
//!
//! ```toml
//! [report]
//! project_id = "lending"
//! author = "Risk team"
//! lookback_days = 30
//! alert_details = false
//!
//! [[performance]]
//! model_id = "default_risk"
//! metric = "accuracy"
//! interval = "7d"
//! segment = { column = "home_ownership", mode = "top_n", args = { top_n = 3 } }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer};

use crate::analysis::{AnalysisModule, FailureCaseAnalysis, MetaData, PerformanceAnalysisSpec, ProjectSummary};
use crate::analysis::failure_cases::{
    DEFAULT_DATASET, DEFAULT_EXPLANATION_ALGORITHM, DEFAULT_N_EXAMPLES, DEFAULT_N_TOKENS,
};
use crate::analysis::feature_impact::DEFAULT_TOP_N;
use crate::analysis::project_summary::Sections;
use crate::error::{ConfigError, Result};
use crate::series::EngineOptions;
use crate::window::WindowSpec;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    pub report: ReportSection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub performance: Vec<PerformanceAnalysisSpec>,
}

/// Connection settings. Command line flags and environment variables win.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    pub url: Option<String>,
    pub organization: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReportSection {
    pub project_id: Option<String>,
    pub author: Option<String>,
    pub output: PathBuf,
    #[serde(deserialize_with = "deserialize_instant")]
    pub start: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "deserialize_instant")]
    pub end: Option<DateTime<Utc>>,
    pub lookback_days: Option<u32>,
    pub alerts: bool,
    pub alert_details: bool,
    pub evaluation: bool,
    pub feature_impact: bool,
    pub failure_cases: bool,
    /// Features shown per model in the feature impact section.
    pub top_n: usize,
    pub n_examples: usize,
    pub n_tokens: usize,
    pub explanation_algorithm: String,
    /// Dataset searched for failure cases.
    pub failure_dataset: String,
}

impl Default for ReportSection {
    fn default() -> Self {
        let sections = Sections::default();
        Self {
            project_id: None,
            author: None,
            output: PathBuf::from("report.md"),
            start: None,
            end: None,
            lookback_days: None,
            alerts: sections.alerts,
            alert_details: sections.alert_details,
            evaluation: sections.evaluation,
            feature_impact: sections.feature_impact,
            failure_cases: sections.failure_cases,
            top_n: DEFAULT_TOP_N,
            n_examples: DEFAULT_N_EXAMPLES,
            n_tokens: DEFAULT_N_TOKENS,
            explanation_algorithm: DEFAULT_EXPLANATION_ALGORITHM.to_string(),
            failure_dataset: DEFAULT_DATASET.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSection {
    pub max_concurrency: usize,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        let options = EngineOptions::default();
        Self {
            max_concurrency: options.max_concurrency,
            max_attempts: options.max_attempts,
            retry_backoff_ms: options.retry_backoff.as_millis() as u64,
        }
    }
}

impl From<&EngineSection> for EngineOptions {
    fn from(section: &EngineSection) -> Self {
        Self {
            max_concurrency: section.max_concurrency.max(1),
            max_attempts: section.max_attempts.max(1),
            retry_backoff: Duration::from_millis(section.retry_backoff_ms),
        }
    }
}

/// Parses an RFC 3339 instant or a bare `YYYY-MM-DD` date (midnight UTC).
pub fn parse_instant(value: &str) -> std::result::Result<DateTime<Utc>, ConfigError> {
    let value = value.trim();
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .map(|date| date.and_time(chrono::NaiveTime::MIN).and_utc())
        })
        .map_err(|_| ConfigError::InvalidSpec(format!("`{value}` is not a date or RFC 3339 timestamp")))
}

fn deserialize_instant<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    raw.map(|value| parse_instant(&value).map_err(serde::de::Error::custom))
        .transpose()
}

impl ReportConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: ReportConfig = toml::from_str(text)?;
        log::debug!(
            "loaded report config with {} performance series",
            config.performance.len()
        );
        Ok(config)
    }

    pub fn window(&self) -> WindowSpec {
        WindowSpec {
            start: self.report.start,
            end: self.report.end,
            lookback: self
                .report
                .lookback_days
                .map(|days| chrono::Duration::days(i64::from(days))),
        }
    }

    pub fn project_summary(&self) -> ProjectSummary {
        let report = &self.report;
        let mut summary = ProjectSummary::new(report.project_id.clone());
        summary.window = self.window();
        summary.sections = Sections {
            alerts: report.alerts,
            alert_details: report.alert_details,
            evaluation: report.evaluation,
            feature_impact: report.feature_impact,
            failure_cases: report.failure_cases,
        };
        summary.feature_impact_top_n = report.top_n;
        let mut failure_cases = FailureCaseAnalysis::new(None);
        failure_cases.dataset_id = report.failure_dataset.clone();
        failure_cases.n_examples = report.n_examples;
        failure_cases.n_tokens = report.n_tokens;
        failure_cases.explanation_algorithm = report.explanation_algorithm.clone();
        summary.failure_cases = failure_cases;
        summary.performance = self.performance.clone();
        summary.engine = EngineOptions::from(&self.engine);
        summary
    }

    /// Top-level modules of the report: document metadata and the project summary.
    pub fn modules(&self) -> Vec<Box<dyn AnalysisModule>> {
        vec![
            Box::new(MetaData::new(self.report.author.clone())),
            Box::new(self.project_summary()),
        ]
    }
}
