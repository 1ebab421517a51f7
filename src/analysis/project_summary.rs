//! The project summary: a report section composed of the other analyses.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    resolve_project_id, Alerts, AnalysisModule, DatasetSummary, FailureCaseAnalysis, FeatureImpact,
    ModelEvaluation, ModelSummary, ModuleOutput, ParentContext, PerformanceAnalysis,
    PerformanceAnalysisSpec, ReportFacts,
};
use crate::api::ReportApi;
use crate::content::{ContentBlock, TextRun, TextStyle};
use crate::error::{ConfigError, Result};
use crate::series::EngineOptions;
use crate::window::{TimeWindow, WindowSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Configured,
    Preflighted,
    Done,
}

/// Optional sections. Model and dataset summaries are always included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sections {
    pub alerts: bool,
    pub alert_details: bool,
    pub evaluation: bool,
    pub feature_impact: bool,
    pub failure_cases: bool,
}

impl Default for Sections {
    fn default() -> Self {
        Self {
            alerts: true,
            alert_details: true,
            evaluation: true,
            feature_impact: false,
            failure_cases: false,
        }
    }
}

/// Resolves the project and time window once, hands them to its children and
/// runs the children in a fixed order so the overview can quote their facts.
pub struct ProjectSummary {
    pub project_id: Option<String>,
    pub window: WindowSpec,
    pub sections: Sections,
    pub feature_impact_top_n: usize,
    /// Settings for the failure case section. Its project id is ignored.
    pub failure_cases: FailureCaseAnalysis,
    pub performance: Vec<PerformanceAnalysisSpec>,
    pub engine: EngineOptions,
    /// Reference time for relative windows. Defaults to the time of preflight.
    pub now: Option<DateTime<Utc>>,
    phase: Phase,
    context: ParentContext,
    children: Vec<Box<dyn AnalysisModule>>,
}

impl ProjectSummary {
    pub fn new(project_id: Option<String>) -> Self {
        Self {
            project_id,
            window: WindowSpec::default(),
            sections: Sections::default(),
            feature_impact_top_n: super::feature_impact::DEFAULT_TOP_N,
            failure_cases: FailureCaseAnalysis::default(),
            performance: Vec::new(),
            engine: EngineOptions::default(),
            now: None,
            phase: Phase::Configured,
            context: ParentContext::default(),
            children: Vec::new(),
        }
    }

    /// Children in run order. Summaries first, performance last.
    fn build_children(&self, now: DateTime<Utc>) -> Vec<Box<dyn AnalysisModule>> {
        let mut children: Vec<Box<dyn AnalysisModule>> = vec![
            Box::new(ModelSummary::default()),
            Box::new(DatasetSummary::default()),
        ];
        if self.sections.alerts {
            children.push(Box::new(
                Alerts::default().with_details(self.sections.alert_details),
            ));
        }
        if self.sections.evaluation {
            children.push(Box::new(ModelEvaluation::default()));
        }
        if self.sections.feature_impact {
            children.push(Box::new(FeatureImpact::new(None, self.feature_impact_top_n)));
        }
        if self.sections.failure_cases {
            let mut failure_cases = self.failure_cases.clone();
            failure_cases.project_id = None;
            children.push(Box::new(failure_cases));
        }
        if !self.performance.is_empty() {
            let mut performance = PerformanceAnalysis::new(None, self.performance.clone());
            performance.options = self.engine.clone();
            performance.now = Some(now);
            children.push(Box::new(performance));
        }
        children
    }
}

fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{count} {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

/// The overview paragraph, quoting facts the sections computed.
pub fn overview_runs(project_id: &str, window: Option<&TimeWindow>, facts: &ReportFacts) -> Vec<TextRun> {
    let mut runs = vec![TextRun::plain("This report summarizes project "), TextRun::bold(project_id)];
    match window {
        Some(window) => runs.push(TextRun::plain(format!(
            " from {} to {}. ",
            window.start.format("%B %d, %Y"),
            window.end.format("%B %d, %Y")
        ))),
        None => runs.push(TextRun::plain(". ")),
    }

    if let (Some(models), Some(datasets)) = (facts.model_count, facts.dataset_count) {
        runs.push(TextRun::plain(format!(
            "The project contains {} and {}. ",
            plural(models, "model"),
            plural(datasets, "dataset")
        )));
    }

    if let Some(alerts) = facts.alert_count {
        runs.push(TextRun::plain("A total of "));
        runs.push(TextRun::bold(plural(alerts, "alert")));
        runs.push(TextRun::plain(if alerts == 1 {
            " was triggered during this period."
        } else {
            " were triggered during this period."
        }));
    }
    runs
}

fn ends_with_page_break(blocks: &[ContentBlock]) -> bool {
    matches!(blocks.last(), Some(ContentBlock::PageBreak))
}

#[async_trait]
impl AnalysisModule for ProjectSummary {
    fn name(&self) -> &'static str {
        "project summary"
    }

    async fn preflight(&mut self, api: &dyn ReportApi, parent: &ParentContext) -> Result<()> {
        if self.phase == Phase::Done {
            return Err(ConfigError::AlreadyRun(self.name()).into());
        }
        let project_id = resolve_project_id(self.project_id.as_deref(), parent)?;
        let now = self.now.unwrap_or_else(Utc::now);
        let window = self.window.resolve_local(now)?.or(parent.window);
        let context = ParentContext {
            project_id: Some(project_id.clone()),
            window,
        };

        let mut children = self.build_children(now);
        for child in children.iter_mut() {
            log::debug!("preflight {} for project `{project_id}`", child.name());
            child.preflight(api, &context).await?;
        }

        self.children = children;
        self.context = context;
        self.phase = Phase::Preflighted;
        Ok(())
    }

    async fn run(&mut self, api: &dyn ReportApi) -> Result<ModuleOutput> {
        match self.phase {
            Phase::Configured => return Err(ConfigError::NotPreflighted(self.name()).into()),
            Phase::Done => return Err(ConfigError::AlreadyRun(self.name()).into()),
            Phase::Preflighted => {}
        }

        let mut facts = ReportFacts::default();
        let mut sections = Vec::with_capacity(self.children.len());
        for child in self.children.iter_mut() {
            log::info!("running {}", child.name());
            let output = child.run(api).await?;
            facts.merge(output.facts);
            sections.push(output.blocks);
        }
        self.phase = Phase::Done;

        let project_id = self.context.project_id.as_deref().unwrap_or_default();
        let mut blocks = vec![
            ContentBlock::styled(
                format!("Project Summary: {project_id}"),
                TextStyle::centered_heading(22),
            ),
            ContentBlock::breaks(1),
            ContentBlock::heading("Overview", 18),
            ContentBlock::formatted(overview_runs(project_id, self.context.window.as_ref(), &facts)),
            ContentBlock::breaks(1),
        ];

        let mut sections = sections.into_iter();
        // Model and dataset tables share the overview page.
        for summary in sections.by_ref().take(2) {
            blocks.extend(summary);
        }
        blocks.push(ContentBlock::PageBreak);
        for section in sections {
            blocks.extend(section);
            if !ends_with_page_break(&blocks) {
                blocks.push(ContentBlock::PageBreak);
            }
        }

        Ok(ModuleOutput { blocks, facts })
    }
}
