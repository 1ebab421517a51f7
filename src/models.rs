use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelTask {
    BinaryClassification,
    MulticlassClassification,
    Regression,
    Ranking,
    #[serde(other)]
    Other,
}

impl ModelTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTask::BinaryClassification => "binary_classification",
            ModelTask::MulticlassClassification => "multiclass_classification",
            ModelTask::Regression => "regression",
            ModelTask::Ranking => "ranking",
            ModelTask::Other => "other",
        }
    }
}

impl fmt::Display for ModelTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Category,
    String,
    Integer,
    Float,
    Boolean,
    Timestamp,
    #[serde(other)]
    Other,
}

impl DataType {
    pub fn is_categorical(&self) -> bool {
        matches!(self, DataType::Category | DataType::Boolean)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_id: String,
    pub model_task: ModelTask,
    #[serde(default)]
    pub inputs: Vec<Column>,
    #[serde(default)]
    pub outputs: Vec<Column>,
    #[serde(default)]
    pub targets: Vec<Column>,
    #[serde(default)]
    pub metadata: Vec<Column>,
    /// Datasets assigned to the model. The first entry is the reference dataset.
    #[serde(default)]
    pub datasets: Vec<String>,
    #[serde(default)]
    pub binary_classification_threshold: Option<f64>,
    /// `[negative, positive]` for binary classifiers.
    #[serde(default)]
    pub target_class_order: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub timestamp_column: Option<String>,
}

impl ModelInfo {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.inputs
            .iter()
            .chain(self.outputs.iter())
            .chain(self.targets.iter())
            .chain(self.metadata.iter())
            .find(|column| column.name == name)
    }

    pub fn reference_dataset(&self) -> Option<&str> {
        self.datasets.first().map(String::as_str)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub dataset_id: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

/// Rows returned by a SQL slice query, column-major names plus row-major values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SliceTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl SliceTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&serde_json::Value> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.get(index)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Where a score request draws its rows from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataSource {
    Dataset {
        dataset_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        source: Option<String>,
    },
    Sql {
        dataset_name: String,
        predicate: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub tp: u64,
    #[serde(rename = "fn")]
    pub fn_: u64,
    pub fp: u64,
    pub tn: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RocCurve {
    pub fpr: Vec<f64>,
    pub tpr: Vec<f64>,
    pub thresholds: Vec<f64>,
}

impl RocCurve {
    /// Returns `(fpr, tpr, threshold)` at the point nearest to `threshold`.
    pub fn operating_point(&self, threshold: f64) -> Option<(f64, f64, f64)> {
        let index = self
            .thresholds
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_finite())
            .min_by(|(_, a), (_, b)| {
                (*a - threshold)
                    .abs()
                    .partial_cmp(&(*b - threshold).abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(index, _)| index)?;
        Some((
            *self.fpr.get(index)?,
            *self.tpr.get(index)?,
            self.thresholds[index],
        ))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    /// Scalar metrics keyed by lowercase name (`accuracy`, `f1`, `auc`, ...).
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub confusion_matrix: Option<ConfusionMatrix>,
    #[serde(default)]
    pub roc_curve: Option<RocCurve>,
}

impl Scores {
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(&name.to_ascii_lowercase()).copied()
    }
}

/// The score endpoint reports failures in-band instead of through the status code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScoreResponse {
    Normal { data: Scores },
    Error { error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Critical,
    Warning,
}

impl Severity {
    pub const ALL: [Severity; 2] = [Severity::Critical, Severity::Warning];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::Warning => "WARNING",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    Performance,
    DataDrift,
    DataIntegrity,
    ServiceMetrics,
}

impl AlertType {
    pub const ALL: [AlertType; 4] = [
        AlertType::Performance,
        AlertType::DataDrift,
        AlertType::DataIntegrity,
        AlertType::ServiceMetrics,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Performance => "PERFORMANCE",
            AlertType::DataDrift => "DATA_DRIFT",
            AlertType::DataIntegrity => "DATA_INTEGRITY",
            AlertType::ServiceMetrics => "SERVICE_METRICS",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            AlertType::Performance => "Performance",
            AlertType::DataDrift => "Data Drift",
            AlertType::DataIntegrity => "Data Integrity",
            AlertType::ServiceMetrics => "Service Metrics",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub alert_rule_uuid: String,
    pub name: String,
    pub project_id: String,
    pub model_id: String,
    pub alert_type: AlertType,
    pub metric: String,
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub warning_threshold: Option<f64>,
    #[serde(default)]
    pub critical_threshold: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggeredAlert {
    pub triggered_alert_id: String,
    pub severity: Severity,
    pub alert_value: f64,
    /// Start of the alert bucket in epoch milliseconds.
    pub alert_time_bucket: i64,
    #[serde(default)]
    pub message: String,
}

impl TriggeredAlert {
    pub fn bucket_start(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.alert_time_bucket)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub inputs: Vec<String>,
    pub attributions: Vec<f64>,
}

impl Explanation {
    /// Top `n` (token, impact) pairs, most positive first or most negative first.
    pub fn top(&self, n: usize, most_positive: bool) -> Vec<(String, f64)> {
        let mut pairs: Vec<(String, f64)> = self
            .inputs
            .iter()
            .cloned()
            .zip(self.attributions.iter().copied())
            .collect();
        pairs.sort_by(|a, b| {
            let ordering = a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal);
            if most_positive {
                ordering.reverse()
            } else {
                ordering
            }
        });
        pairs.truncate(n);
        pairs
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureImpacts {
    /// Mean absolute impact per feature.
    pub impacts: BTreeMap<String, f64>,
}
