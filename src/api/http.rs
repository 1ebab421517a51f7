use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{ExplanationRequest, RemoteResult, ReportApi, ScoreRequest};
use crate::error::RemoteError;
use crate::models::{
    AlertRule, DatasetInfo, Explanation, FeatureImpacts, ModelInfo, ScoreResponse, SliceTable,
    TriggeredAlert,
};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub url: String,
    pub organization: String,
    pub token: String,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>, organization: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            organization: organization.into(),
            token: token.into(),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Every endpoint except scoring wraps its payload in this envelope.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
enum Envelope<T> {
    Normal { data: T },
    Error { error: String },
}

#[derive(Debug, Deserialize)]
struct ModelList {
    models: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DatasetList {
    datasets: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Organization {
    name: String,
}

#[derive(Debug, Serialize)]
struct ScoreBody<'a> {
    organization_name: &'a str,
    project_name: &'a str,
    model_name: &'a str,
    data_source: &'a crate::models::DataSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    metric: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    binary_threshold: Option<f64>,
}

pub struct HttpReportApi {
    client: reqwest::Client,
    base_url: String,
    organization: String,
    token: String,
}

impl HttpReportApi {
    pub fn new(config: ClientConfig) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            organization: config.organization,
            token: config.token,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> RemoteResult<T> {
        let response = self
            .client
            .get(self.endpoint(path))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;
        unwrap_envelope(read_body(response).await?)
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> RemoteResult<T> {
        let response = self
            .client
            .post(self.endpoint(path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        unwrap_envelope(read_body(response).await?)
    }
}

async fn read_body(response: reqwest::Response) -> RemoteResult<String> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(RemoteError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

fn unwrap_envelope<T: DeserializeOwned>(body: String) -> RemoteResult<T> {
    let envelope: Envelope<T> =
        serde_json::from_str(&body).map_err(|e| RemoteError::Decode(e.to_string()))?;
    match envelope {
        Envelope::Normal { data } => Ok(data),
        Envelope::Error { error } => Err(RemoteError::Backend(error)),
    }
}

fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[async_trait]
impl ReportApi for HttpReportApi {
    async fn organization_name(&self) -> RemoteResult<String> {
        let organization: Organization = self
            .get(&format!("v2/organizations/{}", self.organization), &[])
            .await?;
        Ok(organization.name)
    }

    async fn run_sql_slice(&self, project_id: &str, sql: &str) -> RemoteResult<SliceTable> {
        let body = json!({
            "organization_name": self.organization,
            "project_name": project_id,
            "sql_query": sql,
        });
        self.post("v2/slice-query", &body).await
    }

    async fn score(&self, request: &ScoreRequest) -> RemoteResult<ScoreResponse> {
        let body = ScoreBody {
            organization_name: &self.organization,
            project_name: &request.project_id,
            model_name: &request.model_id,
            data_source: &request.data_source,
            metric: request.metric.as_deref(),
            binary_threshold: request.binary_threshold,
        };
        let response = self
            .client
            .post(self.endpoint("v2/scores"))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        let body = read_body(response).await?;
        serde_json::from_str(&body).map_err(|e| RemoteError::Decode(e.to_string()))
    }

    async fn list_models(&self, project_id: &str) -> RemoteResult<Vec<String>> {
        let list: ModelList = self
            .get(&format!("v2/projects/{project_id}/models"), &[])
            .await?;
        Ok(list.models)
    }

    async fn get_model_info(&self, project_id: &str, model_id: &str) -> RemoteResult<ModelInfo> {
        self.get(&format!("v2/projects/{project_id}/models/{model_id}"), &[])
            .await
    }

    async fn list_datasets(&self, project_id: &str) -> RemoteResult<Vec<String>> {
        let list: DatasetList = self
            .get(&format!("v2/projects/{project_id}/datasets"), &[])
            .await?;
        Ok(list.datasets)
    }

    async fn get_dataset(&self, project_id: &str, dataset_id: &str) -> RemoteResult<DatasetInfo> {
        self.get(&format!("v2/projects/{project_id}/datasets/{dataset_id}"), &[])
            .await
    }

    async fn get_alert_rules(
        &self,
        project_id: &str,
        model_id: Option<&str>,
    ) -> RemoteResult<Vec<AlertRule>> {
        let mut query = vec![
            ("organization_name", self.organization.clone()),
            ("project_name", project_id.to_string()),
        ];
        if let Some(model_id) = model_id {
            query.push(("model_name", model_id.to_string()));
        }
        self.get("v2/alert-configs", &query).await
    }

    async fn get_triggered_alerts(
        &self,
        alert_rule_uuid: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> RemoteResult<Vec<TriggeredAlert>> {
        let mut query = vec![("ordering", "alert_time_bucket".to_string())];
        if let Some(start) = start {
            query.push(("start_time", format_time(start)));
        }
        if let Some(end) = end {
            query.push(("end_time", format_time(end)));
        }
        self.get(
            &format!("v2/alert-configs/{alert_rule_uuid}/records"),
            &query,
        )
        .await
    }

    async fn run_explanation(&self, request: &ExplanationRequest) -> RemoteResult<Explanation> {
        let body = json!({
            "organization_name": self.organization,
            "project_name": request.project_id,
            "model_name": request.model_id,
            "dataset_name": request.dataset_id,
            "input_data": request.row,
            "explanation_type": request.algorithm,
        });
        self.post("v2/explain", &body).await
    }

    async fn run_feature_impact(
        &self,
        project_id: &str,
        model_id: &str,
        dataset_id: &str,
    ) -> RemoteResult<FeatureImpacts> {
        let body = json!({
            "organization_name": self.organization,
            "project_name": project_id,
            "model_name": model_id,
            "dataset_name": dataset_id,
            "impact_not_importance": true,
        });
        self.post("v2/feature-impact", &body).await
    }
}
