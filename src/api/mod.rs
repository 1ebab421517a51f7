//! Contract with the model-monitoring backend.
//!
//! Everything the report pipeline needs from the backend goes through
//! [`ReportApi`]. The HTTP implementation lives in [`http`]; unit tests use
//! an in-memory fake.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::RemoteError;
use crate::models::{
    AlertRule, DataSource, DatasetInfo, Explanation, FeatureImpacts, ModelInfo, ScoreResponse,
    SliceTable, TriggeredAlert,
};

pub mod http;

#[cfg(test)]
pub mod fake;

pub type RemoteResult<T> = Result<T, RemoteError>;

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRequest {
    pub project_id: String,
    pub model_id: String,
    pub data_source: DataSource,
    pub metric: Option<String>,
    pub binary_threshold: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExplanationRequest {
    pub project_id: String,
    pub model_id: String,
    pub dataset_id: String,
    /// Input column name to value for the row being explained.
    pub row: serde_json::Map<String, serde_json::Value>,
    pub algorithm: String,
}

/// Backend operations used by analysis modules.
///
/// Implementations must be `Send + Sync` so a single client can be shared by
/// concurrent score requests.
#[async_trait]
pub trait ReportApi: Send + Sync {
    async fn organization_name(&self) -> RemoteResult<String>;

    /// Runs a SQL query over a `"<dataset>.<model>"` view.
    async fn run_sql_slice(&self, project_id: &str, sql: &str) -> RemoteResult<SliceTable>;

    /// Scores a model. Backend-side failures come back as
    /// [`ScoreResponse::Error`], only transport problems are `Err`.
    async fn score(&self, request: &ScoreRequest) -> RemoteResult<ScoreResponse>;

    async fn list_models(&self, project_id: &str) -> RemoteResult<Vec<String>>;

    async fn get_model_info(&self, project_id: &str, model_id: &str) -> RemoteResult<ModelInfo>;

    async fn list_datasets(&self, project_id: &str) -> RemoteResult<Vec<String>>;

    async fn get_dataset(&self, project_id: &str, dataset_id: &str) -> RemoteResult<DatasetInfo>;

    async fn get_alert_rules(
        &self,
        project_id: &str,
        model_id: Option<&str>,
    ) -> RemoteResult<Vec<AlertRule>>;

    /// Triggered alerts for a rule ordered by alert time bucket.
    async fn get_triggered_alerts(
        &self,
        alert_rule_uuid: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> RemoteResult<Vec<TriggeredAlert>>;

    async fn run_explanation(&self, request: &ExplanationRequest) -> RemoteResult<Explanation>;

    async fn run_feature_impact(
        &self,
        project_id: &str,
        model_id: &str,
        dataset_id: &str,
    ) -> RemoteResult<FeatureImpacts>;
}
