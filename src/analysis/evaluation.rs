use async_trait::async_trait;

use super::{load_models, preflighted, resolve_project_id, AnalysisModule, ModuleOutput, ParentContext};
use crate::api::{ReportApi, ScoreRequest};
use crate::content::{format_score, ContentBlock, Table, TextRun, TextStyle};
use crate::error::Result;
use crate::models::{DataSource, ModelInfo, ModelTask, ScoreResponse, Scores};

const METRICS: [(&str, &str); 5] = [
    ("Accuracy", "accuracy"),
    ("Precision", "precision"),
    ("Recall", "recall"),
    ("F1", "f1"),
    ("AUC", "auc"),
];

/// Metrics, confusion matrices and ROC operating points for binary classifiers.
#[derive(Debug, Clone, Default)]
pub struct ModelEvaluation {
    pub project_id: Option<String>,
    /// Models to evaluate. Every model in the project when `None`.
    pub models: Option<Vec<String>>,
    resolved: Vec<ModelInfo>,
}

impl ModelEvaluation {
    pub fn new(project_id: Option<String>, models: Option<Vec<String>>) -> Self {
        Self {
            project_id,
            models,
            resolved: Vec::new(),
        }
    }
}

struct SourceScores {
    model_id: String,
    dataset_id: String,
    source: String,
    threshold: f64,
    scores: Option<Scores>,
}

async fn score_source(
    api: &dyn ReportApi,
    project_id: &str,
    model: &ModelInfo,
    dataset_id: &str,
    source: &str,
) -> Option<Scores> {
    let request = ScoreRequest {
        project_id: project_id.to_string(),
        model_id: model.model_id.clone(),
        data_source: DataSource::Dataset {
            dataset_name: dataset_id.to_string(),
            source: Some(source.to_string()),
        },
        metric: None,
        binary_threshold: Some(model.binary_classification_threshold.unwrap_or(0.5)),
    };
    match api.score(&request).await {
        Ok(ScoreResponse::Normal { data }) => Some(data),
        Ok(ScoreResponse::Error { error }) => {
            log::warn!("scoring {} on {dataset_id}/{source} failed: {error}", model.model_id);
            None
        }
        Err(err) => {
            log::warn!("scoring {} on {dataset_id}/{source} failed: {err}", model.model_id);
            None
        }
    }
}

fn metrics_row(entry: &SourceScores) -> Vec<String> {
    let mut row = vec![
        entry.model_id.clone(),
        entry.dataset_id.clone(),
        entry.source.clone(),
    ];
    row.extend(METRICS.iter().map(|(_, key)| {
        let value = entry
            .scores
            .as_ref()
            .and_then(|scores| scores.metric(key))
            .unwrap_or(f64::NAN);
        format_score(value)
    }));
    row
}

fn confusion_table(entry: &SourceScores) -> Result<Option<Table>> {
    let Some(matrix) = entry.scores.as_ref().and_then(|s| s.confusion_matrix.as_ref()) else {
        return Ok(None);
    };
    Table::with_header(
        &["", "Predicted Positive", "Predicted Negative"],
        vec![
            vec!["Actual Positive".into(), matrix.tp.to_string(), matrix.fn_.to_string()],
            vec!["Actual Negative".into(), matrix.fp.to_string(), matrix.tn.to_string()],
        ],
    )
    .map(Some)
}

#[async_trait]
impl AnalysisModule for ModelEvaluation {
    fn name(&self) -> &'static str {
        "model evaluation"
    }

    async fn preflight(&mut self, api: &dyn ReportApi, parent: &ParentContext) -> Result<()> {
        let project_id = resolve_project_id(self.project_id.as_deref(), parent)?;
        self.resolved = load_models(api, &project_id, self.models.as_deref()).await?;
        self.project_id = Some(project_id);
        Ok(())
    }

    async fn run(&mut self, api: &dyn ReportApi) -> Result<ModuleOutput> {
        let project_id = preflighted(&self.project_id, self.name())?;

        let mut blocks = vec![
            ContentBlock::styled("Model Evaluations", TextStyle::centered_heading(22)),
            ContentBlock::styled("Performance Summary", TextStyle::centered_heading(18)),
        ];

        let mut entries = Vec::new();
        let mut notes = Vec::new();
        for model in &self.resolved {
            if model.model_task != ModelTask::BinaryClassification {
                notes.push(ContentBlock::note(format!(
                    "Evaluation of {} models is not supported, skipping model {}.",
                    model.model_task, model.model_id
                )));
                continue;
            }
            for dataset_id in &model.datasets {
                let dataset = api.get_dataset(project_id, dataset_id).await?;
                for source in &dataset.sources {
                    entries.push(SourceScores {
                        model_id: model.model_id.clone(),
                        dataset_id: dataset_id.clone(),
                        source: source.clone(),
                        threshold: model.binary_classification_threshold.unwrap_or(0.5),
                        scores: score_source(api, project_id, model, dataset_id, source).await,
                    });
                }
            }
        }

        let mut header = vec!["Model", "Dataset", "Source"];
        header.extend(METRICS.iter().map(|(title, _)| *title));
        blocks.push(ContentBlock::Table(Table::with_header(
            &header,
            entries.iter().map(metrics_row).collect(),
        )?));
        blocks.extend(notes);
        blocks.push(ContentBlock::breaks(2));

        blocks.push(ContentBlock::styled("Performance Charts", TextStyle::centered_heading(18)));
        blocks.push(ContentBlock::breaks(1));
        blocks.push(ContentBlock::formatted(vec![TextRun::bold("ROC Operating Points")]));
        let roc_rows = entries
            .iter()
            .filter_map(|entry| {
                let roc = entry.scores.as_ref()?.roc_curve.as_ref()?;
                let (fpr, tpr, threshold) = roc.operating_point(entry.threshold)?;
                Some(vec![
                    entry.model_id.clone(),
                    entry.source.clone(),
                    format!("{threshold:.2}"),
                    format_score(fpr),
                    format_score(tpr),
                ])
            })
            .collect();
        blocks.push(ContentBlock::Table(Table::with_header(
            &["Model", "Source", "Threshold", "FPR", "TPR"],
            roc_rows,
        )?));
        blocks.push(ContentBlock::breaks(2));

        let mut current_model: Option<&str> = None;
        for entry in &entries {
            let Some(table) = confusion_table(entry)? else {
                continue;
            };
            if current_model != Some(entry.model_id.as_str()) {
                blocks.push(ContentBlock::labelled("Model", entry.model_id.clone()));
                current_model = Some(entry.model_id.as_str());
            }
            blocks.push(ContentBlock::styled(
                format!("Confusion matrix, {} ({})", entry.source, entry.dataset_id),
                TextStyle::small_centered(),
            ));
            blocks.push(ContentBlock::Table(table));
            blocks.push(ContentBlock::breaks(1));
        }

        blocks.push(ContentBlock::PageBreak);
        Ok(blocks.into())
    }
}
