use std::collections::BTreeMap;

use async_trait::async_trait;

use super::{preflighted, resolve_project_id, AnalysisModule, ModuleOutput, ParentContext, ReportFacts};
use crate::api::ReportApi;
use crate::content::{ContentBlock, Table};
use crate::error::Result;
use crate::queries;

/// Row counts per source file of every dataset that is some model's reference dataset.
#[derive(Debug, Clone, Default)]
pub struct DatasetSummary {
    pub project_id: Option<String>,
}

impl DatasetSummary {
    pub fn new(project_id: Option<String>) -> Self {
        Self { project_id }
    }
}

#[async_trait]
impl AnalysisModule for DatasetSummary {
    fn name(&self) -> &'static str {
        "dataset summary"
    }

    async fn preflight(&mut self, _api: &dyn ReportApi, parent: &ParentContext) -> Result<()> {
        self.project_id = Some(resolve_project_id(self.project_id.as_deref(), parent)?);
        Ok(())
    }

    async fn run(&mut self, api: &dyn ReportApi) -> Result<ModuleOutput> {
        let project_id = preflighted(&self.project_id, self.name())?;

        // A dataset view is addressed through a model, so pick one per dataset.
        let mut assigned: BTreeMap<String, String> = BTreeMap::new();
        for model_id in api.list_models(project_id).await? {
            let info = api.get_model_info(project_id, &model_id).await?;
            if let Some(dataset) = info.reference_dataset() {
                assigned.insert(dataset.to_string(), model_id);
            }
        }

        let datasets = api.list_datasets(project_id).await?;
        let mut records = Vec::new();
        for dataset_id in &datasets {
            let Some(model_id) = assigned.get(dataset_id) else {
                log::debug!("dataset `{dataset_id}` is not assigned to any model, skipping");
                continue;
            };
            let dataset = api.get_dataset(project_id, dataset_id).await?;
            for source in &dataset.sources {
                let sql = queries::source_row_count(dataset_id, model_id, source);
                let rows = match queries::fetch_row_count(api, project_id, &sql).await {
                    Ok(count) => count.to_string(),
                    Err(err) => {
                        log::warn!("row count for {dataset_id}/{source} failed: {err}");
                        "n/a".to_string()
                    }
                };
                records.push(vec![dataset_id.clone(), source.clone(), rows]);
            }
        }

        Ok(ModuleOutput {
            blocks: vec![
                ContentBlock::heading("Datasets", 18),
                ContentBlock::breaks(1),
                ContentBlock::Table(Table::with_header(
                    &["Dataset ID", "Source", "Size (#Rows)"],
                    records,
                )?),
                ContentBlock::breaks(2),
            ],
            facts: ReportFacts {
                dataset_count: Some(datasets.len()),
                ..ReportFacts::default()
            },
        })
    }
}
