use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{load_models, preflighted, resolve_project_id, AnalysisModule, ModuleOutput, ParentContext};
use crate::api::ReportApi;
use crate::content::{format_score, Chart, ChartData, ContentBlock, PlotStyle, Table, TextRun};
use crate::error::{ConfigError, ReportError, Result};
use crate::models::ModelInfo;
use crate::segment::SegmentSpec;
use crate::series::{EngineOptions, PerformanceSeries, PerformanceTimeSeries, DEFAULT_TIMESTAMP_COLUMN};
use crate::window::{Cadence, EventSource, WindowSpec};

fn default_interval() -> Cadence {
    Cadence::DAILY
}

fn default_dataset() -> String {
    "production".to_string()
}

/// A requested performance series.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PerformanceAnalysisSpec {
    pub model_id: String,
    pub metric: String,
    #[serde(default = "default_interval")]
    pub interval: Cadence,
    #[serde(default)]
    pub segment: Option<SegmentSpec>,
    /// SQL condition applied to every point.
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default = "default_dataset")]
    pub dataset_id: String,
    /// Score the model's reference dataset once per series as a marker.
    #[serde(default)]
    pub show_baseline: bool,
    #[serde(default)]
    pub timestamp_column: Option<String>,
}

impl PerformanceAnalysisSpec {
    pub fn new(model_id: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            metric: metric.into(),
            interval: default_interval(),
            segment: None,
            filter: None,
            dataset_id: default_dataset(),
            show_baseline: false,
            timestamp_column: None,
        }
    }

    pub fn title(&self) -> String {
        format!("{} of {} on {}", self.metric, self.model_id, self.dataset_id)
    }
}

#[derive(Debug, Clone)]
enum PreparedSeries {
    Ready(Box<PerformanceTimeSeries>),
    /// Validated but cannot be computed, shown as a note.
    Unsupported { title: String, reason: String },
}

#[derive(Debug, Clone, Default)]
pub struct PerformanceAnalysis {
    pub project_id: Option<String>,
    pub specs: Vec<PerformanceAnalysisSpec>,
    /// Used when the parent supplies no window.
    pub window: WindowSpec,
    pub options: EngineOptions,
    /// Reference time for relative windows. Defaults to the time of preflight.
    pub now: Option<DateTime<Utc>>,
    prepared: Vec<PreparedSeries>,
}

impl PerformanceAnalysis {
    pub fn new(project_id: Option<String>, specs: Vec<PerformanceAnalysisSpec>) -> Self {
        Self {
            project_id,
            specs,
            ..Self::default()
        }
    }

    async fn prepare(
        &self,
        api: &dyn ReportApi,
        project_id: &str,
        parent: &ParentContext,
        spec: &PerformanceAnalysisSpec,
        model: &ModelInfo,
    ) -> Result<PreparedSeries> {
        if spec.metric.trim().is_empty() {
            return Err(ConfigError::InvalidSpec(format!(
                "no metric given for model `{}`",
                spec.model_id
            ))
            .into());
        }
        if let Some(segment) = &spec.segment {
            match segment.validate(model) {
                Ok(_) => {}
                Err(ReportError::Unsupported(reason)) => {
                    return Ok(PreparedSeries::Unsupported {
                        title: spec.title(),
                        reason,
                    });
                }
                Err(err) => return Err(err),
            }
        }

        let timestamp_column = spec
            .timestamp_column
            .clone()
            .or_else(|| model.timestamp_column.clone())
            .unwrap_or_else(|| DEFAULT_TIMESTAMP_COLUMN.to_string());

        let window = match parent.window {
            Some(window) if self.window == WindowSpec::default() => window,
            _ => {
                let source = EventSource {
                    dataset_id: &spec.dataset_id,
                    model_id: &spec.model_id,
                    timestamp_column: &timestamp_column,
                };
                self.window
                    .resolve(api, project_id, source, self.now.unwrap_or_else(Utc::now))
                    .await?
            }
        };

        let baseline_dataset = if spec.show_baseline {
            let reference = model.reference_dataset().ok_or_else(|| {
                ConfigError::InvalidSpec(format!(
                    "model `{}` has no reference dataset for a baseline",
                    spec.model_id
                ))
            })?;
            Some(reference.to_string())
        } else {
            None
        };

        let mut series = PerformanceTimeSeries::new(
            project_id,
            model.clone(),
            spec.metric.clone(),
            spec.dataset_id.clone(),
            window,
            spec.interval,
        );
        series.segment = spec.segment.clone();
        series.filter = spec.filter.clone();
        series.baseline_dataset = baseline_dataset;
        series.timestamp_column = timestamp_column;
        series.options = self.options.clone();
        Ok(PreparedSeries::Ready(Box::new(series)))
    }
}

fn series_blocks(engine: &PerformanceTimeSeries, result: PerformanceSeries) -> Result<Vec<ContentBlock>> {
    let labels: Vec<String> = result.intervals.iter().map(|i| i.label()).collect();

    let mut header = vec!["Interval".to_string()];
    header.extend(result.scores.keys().cloned());
    let mut records: Vec<Vec<String>> = labels
        .iter()
        .enumerate()
        .map(|(index, label)| {
            let mut record = vec![label.clone()];
            record.extend(
                result
                    .scores
                    .values()
                    .map(|values| format_score(values.get(index).copied().unwrap_or(f64::NAN))),
            );
            record
        })
        .collect();
    if let Some(baseline) = &result.baseline {
        let mut record = vec!["baseline".to_string()];
        record.extend(
            result
                .scores
                .keys()
                .map(|name| format_score(baseline.get(name).copied().unwrap_or(f64::NAN))),
        );
        records.push(record);
    }

    let mut blocks = vec![
        ContentBlock::formatted(vec![TextRun::bold(format!(
            "{} of {}",
            engine.metric, engine.model.model_id
        ))]),
        ContentBlock::labelled("Dataset", engine.dataset_id.clone()),
        ContentBlock::labelled("Window", engine.window.to_string()),
        ContentBlock::labelled("Interval", engine.cadence.to_string()),
    ];

    let failed = result.failed_points();
    if failed > 0 {
        let total: usize = result.scores.values().map(Vec::len).sum();
        blocks.push(ContentBlock::note(format!(
            "{failed} of {total} points could not be scored and are shown as n/a."
        )));
    }

    blocks.push(ContentBlock::Chart(Chart {
        title: format!("{} over time", engine.metric),
        data: ChartData::Line {
            x_labels: labels,
            series: result.scores,
            baseline: result.baseline,
            y_label: engine.metric.clone(),
        },
        style: PlotStyle::for_metric(&engine.metric),
    }));
    blocks.push(ContentBlock::Table(Table::new(header, records)?));
    blocks.push(ContentBlock::breaks(2));
    Ok(blocks)
}

#[async_trait]
impl AnalysisModule for PerformanceAnalysis {
    fn name(&self) -> &'static str {
        "performance analysis"
    }

    async fn preflight(&mut self, api: &dyn ReportApi, parent: &ParentContext) -> Result<()> {
        let project_id = resolve_project_id(self.project_id.as_deref(), parent)?;

        let mut model_ids: Vec<String> = self.specs.iter().map(|s| s.model_id.clone()).collect();
        model_ids.sort();
        model_ids.dedup();
        let models: BTreeMap<String, ModelInfo> = load_models(api, &project_id, Some(model_ids.as_slice()))
            .await?
            .into_iter()
            .map(|info| (info.model_id.clone(), info))
            .collect();

        let mut prepared = Vec::with_capacity(self.specs.len());
        for spec in &self.specs {
            let model = models
                .get(&spec.model_id)
                .ok_or_else(|| ConfigError::UnknownModel(spec.model_id.clone()))?;
            prepared.push(self.prepare(api, &project_id, parent, spec, model).await?);
        }

        self.prepared = prepared;
        self.project_id = Some(project_id);
        Ok(())
    }

    async fn run(&mut self, api: &dyn ReportApi) -> Result<ModuleOutput> {
        preflighted(&self.project_id, self.name())?;
        let mut blocks = vec![ContentBlock::heading("Performance Analysis", 18), ContentBlock::breaks(1)];

        for prepared in &self.prepared {
            match prepared {
                PreparedSeries::Ready(engine) => {
                    let result = engine.compute(api).await?;
                    if result.failed_points() > 0 {
                        log::warn!(
                            "{} points of `{}` for {} could not be scored",
                            result.failed_points(),
                            engine.metric,
                            engine.model.model_id
                        );
                    }
                    blocks.extend(series_blocks(engine, result)?);
                }
                PreparedSeries::Unsupported { title, reason } => {
                    log::warn!("skipping {title}: {reason}");
                    blocks.push(ContentBlock::note(format!("{title} skipped, unsupported: {reason}.")));
                }
            }
        }
        Ok(blocks.into())
    }
}
