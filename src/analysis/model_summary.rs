use async_trait::async_trait;

use super::{preflighted, resolve_project_id, AnalysisModule, ModuleOutput, ParentContext, ReportFacts};
use crate::api::ReportApi;
use crate::content::{ContentBlock, Table};
use crate::error::Result;

/// Table of every model in the project and its task.
#[derive(Debug, Clone, Default)]
pub struct ModelSummary {
    pub project_id: Option<String>,
}

impl ModelSummary {
    pub fn new(project_id: Option<String>) -> Self {
        Self { project_id }
    }
}

#[async_trait]
impl AnalysisModule for ModelSummary {
    fn name(&self) -> &'static str {
        "model summary"
    }

    async fn preflight(&mut self, _api: &dyn ReportApi, parent: &ParentContext) -> Result<()> {
        self.project_id = Some(resolve_project_id(self.project_id.as_deref(), parent)?);
        Ok(())
    }

    async fn run(&mut self, api: &dyn ReportApi) -> Result<ModuleOutput> {
        let project_id = preflighted(&self.project_id, self.name())?;
        let models = api.list_models(project_id).await?;

        let mut records = Vec::with_capacity(models.len());
        for model_id in &models {
            let info = api.get_model_info(project_id, model_id).await?;
            records.push(vec![model_id.clone(), info.model_task.to_string()]);
        }

        Ok(ModuleOutput {
            blocks: vec![
                ContentBlock::heading("Models", 16),
                ContentBlock::breaks(1),
                ContentBlock::Table(Table::with_header(&["Model ID", "Model Type"], records)?),
                ContentBlock::breaks(1),
            ],
            facts: ReportFacts {
                model_count: Some(models.len()),
                ..ReportFacts::default()
            },
        })
    }
}
