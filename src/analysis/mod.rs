//! Analysis modules and the two-phase contract they share.
//!
//! Every module is first preflighted, which validates and normalizes its
//! configuration using only cheap metadata calls, and then run, which does the
//! expensive work and returns content blocks. A driver preflights every module
//! before running any of them, so a single bad configuration stops the report
//! before slow network work starts.

use std::path::Path;

use async_trait::async_trait;

use crate::api::ReportApi;
use crate::content::ContentBlock;
use crate::error::{ConfigError, Result};
use crate::models::ModelInfo;
use crate::render::MarkdownRenderer;
use crate::window::TimeWindow;

pub mod alerts;
pub mod dataset_summary;
pub mod evaluation;
pub mod failure_cases;
pub mod feature_impact;
pub mod metadata;
pub mod model_summary;
pub mod performance;
pub mod project_summary;

pub use alerts::Alerts;
pub use dataset_summary::DatasetSummary;
pub use evaluation::ModelEvaluation;
pub use failure_cases::FailureCaseAnalysis;
pub use feature_impact::FeatureImpact;
pub use metadata::MetaData;
pub use model_summary::ModelSummary;
pub use performance::{PerformanceAnalysis, PerformanceAnalysisSpec};
pub use project_summary::ProjectSummary;

/// Values a parent hands down to the modules it constructs.
#[derive(Debug, Clone, Default)]
pub struct ParentContext {
    pub project_id: Option<String>,
    pub window: Option<TimeWindow>,
}

impl ParentContext {
    pub fn for_project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
            window: None,
        }
    }
}

/// Facts a module computed that later sections may refer to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportFacts {
    pub alert_count: Option<usize>,
    pub model_count: Option<usize>,
    pub dataset_count: Option<usize>,
}

impl ReportFacts {
    pub fn merge(&mut self, other: ReportFacts) {
        self.alert_count = other.alert_count.or(self.alert_count);
        self.model_count = other.model_count.or(self.model_count);
        self.dataset_count = other.dataset_count.or(self.dataset_count);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleOutput {
    pub blocks: Vec<ContentBlock>,
    pub facts: ReportFacts,
}

impl From<Vec<ContentBlock>> for ModuleOutput {
    fn from(blocks: Vec<ContentBlock>) -> Self {
        Self {
            blocks,
            facts: ReportFacts::default(),
        }
    }
}

#[async_trait]
pub trait AnalysisModule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Validates configuration and fills in defaults from `parent`. Must be
    /// safe to call more than once.
    async fn preflight(&mut self, api: &dyn ReportApi, parent: &ParentContext) -> Result<()>;

    async fn run(&mut self, api: &dyn ReportApi) -> Result<ModuleOutput>;
}

/// Picks the module's own project id, falling back to the parent's.
pub fn resolve_project_id(
    own: Option<&str>,
    parent: &ParentContext,
) -> std::result::Result<String, ConfigError> {
    own.filter(|id| !id.is_empty())
        .or(parent.project_id.as_deref().filter(|id| !id.is_empty()))
        .map(str::to_string)
        .ok_or(ConfigError::MissingProjectId)
}

/// The project id a preflighted module resolved.
pub(crate) fn preflighted<'a>(
    project_id: &'a Option<String>,
    module: &'static str,
) -> std::result::Result<&'a str, ConfigError> {
    project_id
        .as_deref()
        .ok_or(ConfigError::NotPreflighted(module))
}

/// Schemas of the configured models, or of every model in the project.
pub(crate) async fn load_models(
    api: &dyn ReportApi,
    project_id: &str,
    configured: Option<&[String]>,
) -> Result<Vec<ModelInfo>> {
    let known = api.list_models(project_id).await?;
    let wanted = match configured {
        Some(models) => {
            if let Some(unknown) = models.iter().find(|m| !known.contains(*m)) {
                return Err(ConfigError::UnknownModel(unknown.clone()).into());
            }
            models.to_vec()
        }
        None => known,
    };

    let mut infos = Vec::with_capacity(wanted.len());
    for model_id in &wanted {
        infos.push(api.get_model_info(project_id, model_id).await?);
    }
    Ok(infos)
}

/// Preflights every module, then runs them in order and concatenates their blocks.
pub async fn run_analyses(
    api: &dyn ReportApi,
    modules: &mut [Box<dyn AnalysisModule>],
    parent: &ParentContext,
) -> Result<Vec<ContentBlock>> {
    for module in modules.iter_mut() {
        log::debug!("preflight {}", module.name());
        module.preflight(api, parent).await?;
    }

    let mut blocks = Vec::new();
    for module in modules.iter_mut() {
        log::info!("running {}", module.name());
        blocks.extend(module.run(api).await?.blocks);
    }
    Ok(blocks)
}

pub async fn generate_report(
    api: &dyn ReportApi,
    modules: &mut [Box<dyn AnalysisModule>],
    renderer: &MarkdownRenderer,
    output: &Path,
) -> Result<()> {
    let blocks = run_analyses(api, modules, &ParentContext::default()).await?;
    renderer.write(&blocks, output)?;
    log::info!("report written to {}", output.display());
    Ok(())
}
