//! Most confident false positives and false negatives of binary classifiers,
//! each explained by its top attributions.

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{load_models, preflighted, resolve_project_id, AnalysisModule, ModuleOutput, ParentContext};
use crate::api::{ExplanationRequest, ReportApi};
use crate::content::{ContentBlock, Table, TextRun, TextStyle};
use crate::error::Result;
use crate::models::{ModelInfo, ModelTask};
use crate::predicate::{CompareOp, Literal, Predicate};
use crate::queries;

pub const DEFAULT_DATASET: &str = "production";
pub const DEFAULT_N_EXAMPLES: usize = 5;
pub const DEFAULT_N_TOKENS: usize = 10;
pub const DEFAULT_EXPLANATION_ALGORITHM: &str = "fiddler_shapley_values";

const EXPLANATION_COLUMN: &str = "top tokens";
const MAX_CELL_CHARS: usize = 260;

#[derive(Debug, Clone)]
pub struct FailureCaseAnalysis {
    pub project_id: Option<String>,
    pub models: Option<Vec<String>>,
    pub dataset_id: String,
    pub n_examples: usize,
    pub n_tokens: usize,
    pub explanation_algorithm: String,
    resolved: Vec<ModelInfo>,
}

impl Default for FailureCaseAnalysis {
    fn default() -> Self {
        Self {
            project_id: None,
            models: None,
            dataset_id: DEFAULT_DATASET.to_string(),
            n_examples: DEFAULT_N_EXAMPLES,
            n_tokens: DEFAULT_N_TOKENS,
            explanation_algorithm: DEFAULT_EXPLANATION_ALGORITHM.to_string(),
            resolved: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureKind {
    FalsePositive,
    FalseNegative,
}

impl FailureKind {
    fn title(&self) -> &'static str {
        match self {
            FailureKind::FalsePositive => "False Positives",
            FailureKind::FalseNegative => "False Negatives",
        }
    }

    /// False positives are ranked most confident first, false negatives least.
    fn descending(&self) -> bool {
        matches!(self, FailureKind::FalsePositive)
    }

    fn filter(&self, schema: &BinarySchema) -> Predicate {
        let (op, class) = match self {
            FailureKind::FalsePositive => (CompareOp::Greater, &schema.negative_class),
            FailureKind::FalseNegative => (CompareOp::Less, &schema.positive_class),
        };
        Predicate::and([
            Predicate::ColumnCompare {
                column: schema.output.clone(),
                op,
                value: Literal::Float(schema.threshold),
            },
            Predicate::equals(schema.target.clone(), class.clone()),
        ])
    }
}

/// The columns and labels failure cases are selected by.
#[derive(Debug, Clone, PartialEq)]
struct BinarySchema {
    inputs: Vec<String>,
    output: String,
    target: String,
    threshold: f64,
    negative_class: Literal,
    positive_class: Literal,
}

/// Class labels are compared as quoted text. Boolean labels become `0` and `1`.
fn class_literal(value: &Value) -> Literal {
    match value {
        Value::Bool(flag) => Literal::Text(u8::from(*flag).to_string()),
        Value::String(text) => Literal::Text(text.clone()),
        other => Literal::Text(other.to_string()),
    }
}

fn binary_schema(model: &ModelInfo) -> std::result::Result<BinarySchema, String> {
    if model.outputs.len() > 1 || model.targets.len() > 1 {
        return Err("multi-output models are not supported".to_string());
    }
    let (Some(output), Some(target)) = (model.outputs.first(), model.targets.first()) else {
        return Err("the model has no output or target column".to_string());
    };
    let [negative, positive] = model.target_class_order.as_deref().unwrap_or_default() else {
        return Err("inferring positive and negative labels without a target class order is not supported".to_string());
    };
    Ok(BinarySchema {
        inputs: model.inputs.iter().map(|c| c.name.clone()).collect(),
        output: output.name.clone(),
        target: target.name.clone(),
        threshold: model.binary_classification_threshold.unwrap_or(0.5),
        negative_class: class_literal(negative),
        positive_class: class_literal(positive),
    })
}

/// Renders one slice cell. Long strings are truncated and floats rounded.
pub fn format_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.chars().take(MAX_CELL_CHARS).collect(),
        Value::Number(number) if number.is_f64() => {
            number.as_f64().map_or_else(|| number.to_string(), |v| format!("{v:.2}"))
        }
        other => other.to_string(),
    }
}

impl FailureCaseAnalysis {
    pub fn new(project_id: Option<String>) -> Self {
        Self {
            project_id,
            ..Self::default()
        }
    }

    async fn explain_row(
        &self,
        api: &dyn ReportApi,
        project_id: &str,
        model: &ModelInfo,
        inputs: Map<String, Value>,
        kind: FailureKind,
    ) -> String {
        let request = ExplanationRequest {
            project_id: project_id.to_string(),
            model_id: model.model_id.clone(),
            dataset_id: self.dataset_id.clone(),
            row: inputs,
            algorithm: self.explanation_algorithm.clone(),
        };

        match api.run_explanation(&request).await {
            Ok(explanation) => explanation
                .top(self.n_tokens, kind == FailureKind::FalsePositive)
                .iter()
                .map(|(token, impact)| format!("{token}:{impact:.3}"))
                .collect::<Vec<_>>()
                .join("\n"),
            Err(err) => {
                log::warn!("explanation of a {} row failed: {err}", model.model_id);
                format!("explanation unavailable: {err}")
            }
        }
    }

    async fn failure_blocks(
        &self,
        api: &dyn ReportApi,
        project_id: &str,
        model: &ModelInfo,
        schema: &BinarySchema,
        kind: FailureKind,
    ) -> Result<Vec<ContentBlock>> {
        let sql = queries::ranked_rows(
            &self.dataset_id,
            &model.model_id,
            &kind.filter(schema),
            &schema.output,
            kind.descending(),
            self.n_examples,
        );
        let slice = api.run_sql_slice(project_id, &sql).await?;

        let mut header = schema.inputs.clone();
        header.push(EXPLANATION_COLUMN.to_string());
        header.push(schema.output.clone());
        header.push(schema.target.clone());

        let mut records = Vec::with_capacity(slice.len());
        for row in 0..slice.len() {
            let cell = |column: &str| slice.value(row, column).map(format_cell).unwrap_or_default();
            let mut record: Vec<String> = schema.inputs.iter().map(|c| cell(c)).collect();
            let inputs: Map<String, Value> = schema
                .inputs
                .iter()
                .filter_map(|column| Some((column.clone(), slice.value(row, column)?.clone())))
                .collect();
            record.push(self.explain_row(api, project_id, model, inputs, kind).await);
            record.push(cell(&schema.output));
            record.push(cell(&schema.target));
            records.push(record);
        }

        Ok(vec![
            ContentBlock::formatted(vec![TextRun::bold(kind.title())]),
            ContentBlock::formatted(vec![
                TextRun::plain("Explanation Algorithm: "),
                TextRun::bold(self.explanation_algorithm.clone()),
            ]),
            ContentBlock::Table(Table::new(header, records)?),
            ContentBlock::breaks(2),
        ])
    }
}

#[async_trait]
impl AnalysisModule for FailureCaseAnalysis {
    fn name(&self) -> &'static str {
        "failure case analysis"
    }

    async fn preflight(&mut self, api: &dyn ReportApi, parent: &ParentContext) -> Result<()> {
        let project_id = resolve_project_id(self.project_id.as_deref(), parent)?;
        self.resolved = load_models(api, &project_id, self.models.as_deref()).await?;
        self.project_id = Some(project_id);
        Ok(())
    }

    async fn run(&mut self, api: &dyn ReportApi) -> Result<ModuleOutput> {
        let project_id = preflighted(&self.project_id, self.name())?;
        let mut blocks = vec![ContentBlock::styled(
            "Failure Cases Analysis",
            TextStyle::centered_heading(22),
        )];

        for model in &self.resolved {
            if model.model_task != ModelTask::BinaryClassification {
                blocks.push(ContentBlock::note(format!(
                    "Failure case analysis for {} models is not implemented yet, skipping model {}.",
                    model.model_task, model.model_id
                )));
                continue;
            }
            let schema = match binary_schema(model) {
                Ok(schema) => schema,
                Err(reason) => {
                    log::warn!("skipping failure cases of {}: {reason}", model.model_id);
                    blocks.push(ContentBlock::note(format!(
                        "Failure case analysis skipped for model {}: {reason}.",
                        model.model_id
                    )));
                    continue;
                }
            };

            blocks.push(ContentBlock::labelled("Model name", model.model_id.clone()));
            blocks.push(ContentBlock::labelled("Model Task", model.model_task.to_string()));
            for kind in [FailureKind::FalsePositive, FailureKind::FalseNegative] {
                blocks.extend(
                    self.failure_blocks(api, project_id, model, &schema, kind)
                        .await?,
                );
            }
        }

        blocks.push(ContentBlock::breaks(2));
        Ok(blocks.into())
    }
}
