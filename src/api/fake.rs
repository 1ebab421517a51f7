use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{ExplanationRequest, RemoteResult, ReportApi, ScoreRequest};
use crate::error::RemoteError;
use crate::models::{
    AlertRule, AlertType, Column, DataType, DatasetInfo, Explanation, FeatureImpacts, ModelInfo,
    ModelTask, ScoreResponse, Scores, SliceTable, TriggeredAlert,
};

type ScoreFn = Box<dyn Fn(&ScoreRequest) -> RemoteResult<ScoreResponse> + Send + Sync>;
type DelayFn = Box<dyn Fn(&ScoreRequest) -> Duration + Send + Sync>;

pub struct FakeApi {
    pub organization: String,
    pub models: BTreeMap<String, ModelInfo>,
    pub datasets: BTreeMap<String, DatasetInfo>,
    /// First entry whose needle appears in the SQL wins.
    pub slices: Vec<(String, SliceTable)>,
    pub alert_rules: Vec<AlertRule>,
    pub triggered: BTreeMap<String, Vec<TriggeredAlert>>,
    pub feature_impacts: BTreeMap<String, FeatureImpacts>,
    pub explanation: Option<Explanation>,
    score_fn: ScoreFn,
    score_delay: Option<DelayFn>,
    pub sql_log: Mutex<Vec<String>>,
    pub score_log: Mutex<Vec<ScoreRequest>>,
}

impl Default for FakeApi {
    fn default() -> Self {
        Self {
            organization: "demo".to_string(),
            models: BTreeMap::new(),
            datasets: BTreeMap::new(),
            slices: Vec::new(),
            alert_rules: Vec::new(),
            triggered: BTreeMap::new(),
            feature_impacts: BTreeMap::new(),
            explanation: None,
            score_fn: Box::new(|_| Ok(normal_score("accuracy", 0.9))),
            score_delay: None,
            sql_log: Mutex::new(Vec::new()),
            score_log: Mutex::new(Vec::new()),
        }
    }
}

impl FakeApi {
    pub fn with_model(mut self, info: ModelInfo) -> Self {
        self.models.insert(info.model_id.clone(), info);
        self
    }

    pub fn with_dataset(mut self, dataset_id: &str, sources: &[&str]) -> Self {
        self.datasets.insert(
            dataset_id.to_string(),
            DatasetInfo {
                dataset_id: dataset_id.to_string(),
                sources: sources.iter().map(|s| s.to_string()).collect(),
            },
        );
        self
    }

    pub fn with_slice(mut self, needle: &str, table: SliceTable) -> Self {
        self.slices.push((needle.to_string(), table));
        self
    }

    pub fn with_scores<F>(mut self, score_fn: F) -> Self
    where
        F: Fn(&ScoreRequest) -> RemoteResult<ScoreResponse> + Send + Sync + 'static,
    {
        self.score_fn = Box::new(score_fn);
        self
    }

    /// Delays each score response, so requests can complete out of order.
    pub fn with_score_delay<F>(mut self, delay: F) -> Self
    where
        F: Fn(&ScoreRequest) -> Duration + Send + Sync + 'static,
    {
        self.score_delay = Some(Box::new(delay));
        self
    }

    pub fn score_requests(&self) -> Vec<ScoreRequest> {
        self.score_log.lock().unwrap().clone()
    }

    pub fn sql_queries(&self) -> Vec<String> {
        self.sql_log.lock().unwrap().clone()
    }
}

pub fn normal_score(metric: &str, value: f64) -> ScoreResponse {
    let mut scores = Scores::default();
    scores.metrics.insert(metric.to_string(), value);
    ScoreResponse::Normal { data: scores }
}

pub fn table(columns: &[&str], rows: Vec<Vec<serde_json::Value>>) -> SliceTable {
    SliceTable {
        columns: columns.iter().map(|c| c.to_string()).collect(),
        rows,
    }
}

pub fn binary_model(model_id: &str) -> ModelInfo {
    ModelInfo {
        model_id: model_id.to_string(),
        model_task: ModelTask::BinaryClassification,
        inputs: vec![
            Column {
                name: "home_ownership".into(),
                data_type: DataType::Category,
            },
            Column {
                name: "loan_amount".into(),
                data_type: DataType::Float,
            },
        ],
        outputs: vec![Column {
            name: "probability_default".into(),
            data_type: DataType::Float,
        }],
        targets: vec![Column {
            name: "default".into(),
            data_type: DataType::Category,
        }],
        metadata: vec![Column {
            name: "timestamp".into(),
            data_type: DataType::Timestamp,
        }],
        datasets: vec!["baseline".into()],
        binary_classification_threshold: Some(0.5),
        target_class_order: Some(vec![serde_json::json!("no"), serde_json::json!("yes")]),
        timestamp_column: Some("timestamp".into()),
    }
}

pub fn alert_rule(uuid: &str, model_id: &str, alert_type: AlertType) -> AlertRule {
    AlertRule {
        alert_rule_uuid: uuid.to_string(),
        name: format!("{} rule {uuid}", alert_type.title()),
        project_id: "lending".to_string(),
        model_id: model_id.to_string(),
        alert_type,
        metric: "jsd".to_string(),
        column: Some("loan_amount".to_string()),
        warning_threshold: Some(0.1),
        critical_threshold: Some(0.2),
    }
}

fn not_found(what: &str, id: &str) -> RemoteError {
    RemoteError::Backend(format!("{what} `{id}` not found"))
}

#[async_trait]
impl ReportApi for FakeApi {
    async fn organization_name(&self) -> RemoteResult<String> {
        Ok(self.organization.clone())
    }

    async fn run_sql_slice(&self, _project_id: &str, sql: &str) -> RemoteResult<SliceTable> {
        self.sql_log.lock().unwrap().push(sql.to_string());
        self.slices
            .iter()
            .find(|(needle, _)| sql.contains(needle.as_str()))
            .map(|(_, table)| table.clone())
            .ok_or_else(|| RemoteError::Backend(format!("no slice for `{sql}`")))
    }

    async fn score(&self, request: &ScoreRequest) -> RemoteResult<ScoreResponse> {
        self.score_log.lock().unwrap().push(request.clone());
        if let Some(delay) = &self.score_delay {
            tokio::time::sleep(delay(request)).await;
        }
        (self.score_fn)(request)
    }

    async fn list_models(&self, _project_id: &str) -> RemoteResult<Vec<String>> {
        Ok(self.models.keys().cloned().collect())
    }

    async fn get_model_info(&self, _project_id: &str, model_id: &str) -> RemoteResult<ModelInfo> {
        self.models
            .get(model_id)
            .cloned()
            .ok_or_else(|| not_found("model", model_id))
    }

    async fn list_datasets(&self, _project_id: &str) -> RemoteResult<Vec<String>> {
        Ok(self.datasets.keys().cloned().collect())
    }

    async fn get_dataset(&self, _project_id: &str, dataset_id: &str) -> RemoteResult<DatasetInfo> {
        self.datasets
            .get(dataset_id)
            .cloned()
            .ok_or_else(|| not_found("dataset", dataset_id))
    }

    async fn get_alert_rules(
        &self,
        _project_id: &str,
        model_id: Option<&str>,
    ) -> RemoteResult<Vec<AlertRule>> {
        Ok(self
            .alert_rules
            .iter()
            .filter(|rule| model_id.map_or(true, |m| rule.model_id == m))
            .cloned()
            .collect())
    }

    async fn get_triggered_alerts(
        &self,
        alert_rule_uuid: &str,
        _start: Option<DateTime<Utc>>,
        _end: Option<DateTime<Utc>>,
    ) -> RemoteResult<Vec<TriggeredAlert>> {
        Ok(self
            .triggered
            .get(alert_rule_uuid)
            .cloned()
            .unwrap_or_default())
    }

    async fn run_explanation(&self, request: &ExplanationRequest) -> RemoteResult<Explanation> {
        self.explanation
            .clone()
            .ok_or_else(|| not_found("explanation for model", &request.model_id))
    }

    async fn run_feature_impact(
        &self,
        _project_id: &str,
        model_id: &str,
        _dataset_id: &str,
    ) -> RemoteResult<FeatureImpacts> {
        self.feature_impacts
            .get(model_id)
            .cloned()
            .ok_or_else(|| not_found("feature impact for model", model_id))
    }
}
