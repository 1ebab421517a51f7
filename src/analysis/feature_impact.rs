use async_trait::async_trait;

use super::{load_models, preflighted, resolve_project_id, AnalysisModule, ModuleOutput, ParentContext};
use crate::api::ReportApi;
use crate::content::{Chart, ChartData, ContentBlock, PlotStyle, Table, TextRun};
use crate::error::Result;
use crate::models::{FeatureImpacts, ModelInfo};

pub const DEFAULT_TOP_N: usize = 6;

/// Mean absolute feature impact per model.
#[derive(Debug, Clone)]
pub struct FeatureImpact {
    pub project_id: Option<String>,
    pub models: Option<Vec<String>>,
    /// Dataset to explain. Each model's reference dataset when `None`.
    pub dataset_id: Option<String>,
    pub top_n: usize,
    resolved: Vec<ModelInfo>,
}

impl Default for FeatureImpact {
    fn default() -> Self {
        Self {
            project_id: None,
            models: None,
            dataset_id: None,
            top_n: DEFAULT_TOP_N,
            resolved: Vec::new(),
        }
    }
}

impl FeatureImpact {
    pub fn new(project_id: Option<String>, top_n: usize) -> Self {
        Self {
            project_id,
            top_n,
            ..Self::default()
        }
    }
}

/// Features ordered by impact magnitude, largest first.
pub fn top_impacts(impacts: &FeatureImpacts, n: usize) -> Vec<(String, f64)> {
    let mut ranked: Vec<(String, f64)> = impacts
        .impacts
        .iter()
        .filter(|(_, value)| value.is_finite())
        .map(|(feature, value)| (feature.clone(), *value))
        .collect();
    ranked.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(n);
    ranked
}

#[async_trait]
impl AnalysisModule for FeatureImpact {
    fn name(&self) -> &'static str {
        "feature impact"
    }

    async fn preflight(&mut self, api: &dyn ReportApi, parent: &ParentContext) -> Result<()> {
        let project_id = resolve_project_id(self.project_id.as_deref(), parent)?;
        self.resolved = load_models(api, &project_id, self.models.as_deref()).await?;
        self.project_id = Some(project_id);
        Ok(())
    }

    async fn run(&mut self, api: &dyn ReportApi) -> Result<ModuleOutput> {
        let project_id = preflighted(&self.project_id, self.name())?;
        let mut blocks = vec![ContentBlock::heading("Global Feature Impact", 18), ContentBlock::breaks(2)];

        for model in &self.resolved {
            let Some(dataset_id) = self.dataset_id.as_deref().or(model.reference_dataset()) else {
                blocks.push(ContentBlock::note(format!(
                    "Model {} has no dataset to compute feature impact on.",
                    model.model_id
                )));
                continue;
            };

            let impacts = match api
                .run_feature_impact(project_id, &model.model_id, dataset_id)
                .await
            {
                Ok(impacts) => impacts,
                Err(err) => {
                    log::warn!("feature impact for {} failed: {err}", model.model_id);
                    blocks.push(ContentBlock::note(format!(
                        "Feature impact unavailable for model {}: {err}",
                        model.model_id
                    )));
                    continue;
                }
            };

            let top = top_impacts(&impacts, self.top_n);
            if top.is_empty() {
                continue;
            }

            blocks.push(ContentBlock::formatted(vec![
                TextRun::bold("Model: "),
                TextRun::plain(format!("{}\n", model.model_id)),
                TextRun::bold("Dataset: "),
                TextRun::plain(dataset_id),
            ]));
            blocks.push(ContentBlock::Chart(Chart {
                title: format!("Top {} features for {}", top.len(), model.model_id),
                data: ChartData::Bar { slices: top.clone() },
                style: PlotStyle::compact(),
            }));
            blocks.push(ContentBlock::Table(Table::with_header(
                &["Feature", "Mean |Impact|"],
                top.iter()
                    .map(|(feature, impact)| vec![feature.clone(), format!("{impact:.3}")])
                    .collect(),
            )?));
            blocks.push(ContentBlock::breaks(2));
        }

        blocks.push(ContentBlock::breaks(2));
        Ok(blocks.into())
    }
}
