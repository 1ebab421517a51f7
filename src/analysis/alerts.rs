use std::collections::BTreeMap;

use async_trait::async_trait;

use super::{preflighted, resolve_project_id, AnalysisModule, ModuleOutput, ParentContext, ReportFacts};
use crate::api::ReportApi;
use crate::content::{Chart, ChartData, ContentBlock, PlotStyle, Table, TextRun, TextStyle};
use crate::error::Result;
use crate::models::{AlertRule, AlertType, Severity, TriggeredAlert};
use crate::window::TimeWindow;

/// Fetches alert rules during preflight and their triggered alerts during run.
///
/// The summary is always produced; the per-rule incident tables only when
/// `details` is set. The number of triggered alerts is reported as a fact.
#[derive(Debug, Clone, Default)]
pub struct Alerts {
    pub project_id: Option<String>,
    pub model_id: Option<String>,
    pub window: Option<TimeWindow>,
    /// Rules to report on. Fetched from the backend when not given.
    pub rules: Option<Vec<AlertRule>>,
    pub details: bool,
}

impl Alerts {
    pub fn new(project_id: Option<String>) -> Self {
        Self {
            project_id,
            ..Self::default()
        }
    }

    pub fn with_details(mut self, details: bool) -> Self {
        self.details = details;
        self
    }

    async fn triggered(
        &self,
        api: &dyn ReportApi,
        rules: &[AlertRule],
    ) -> Result<BTreeMap<String, Vec<TriggeredAlert>>> {
        let (start, end) = match self.window {
            Some(window) => (Some(window.start), Some(window.end)),
            None => (None, None),
        };
        let mut triggered = BTreeMap::new();
        for rule in rules {
            let alerts = api
                .get_triggered_alerts(&rule.alert_rule_uuid, start, end)
                .await?;
            triggered.insert(rule.alert_rule_uuid.clone(), alerts);
        }
        Ok(triggered)
    }
}

/// Alert counts keyed by severity, then by alert type.
type SeverityCounts = BTreeMap<Severity, BTreeMap<AlertType, usize>>;

fn count_by_severity(rules: &[AlertRule], triggered: &BTreeMap<String, Vec<TriggeredAlert>>) -> SeverityCounts {
    let mut counts = SeverityCounts::new();
    for rule in rules {
        for alert in triggered.get(&rule.alert_rule_uuid).into_iter().flatten() {
            *counts
                .entry(alert.severity)
                .or_default()
                .entry(rule.alert_type)
                .or_default() += 1;
        }
    }
    counts
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn summary_blocks(counts: &SeverityCounts) -> Result<Vec<ContentBlock>> {
    let mut blocks = vec![ContentBlock::heading("Alert Summary", 18), ContentBlock::breaks(2)];

    let mut header = vec!["Severity".to_string()];
    header.extend(AlertType::ALL.iter().map(|t| t.title().to_string()));
    header.push("Total".to_string());

    let mut records = Vec::new();
    for severity in Severity::ALL {
        let by_type = counts.get(&severity);
        let count_of = |alert_type: &AlertType| {
            by_type.and_then(|m| m.get(alert_type)).copied().unwrap_or(0)
        };
        let total: usize = AlertType::ALL.iter().map(count_of).sum();

        let title = match severity {
            Severity::Critical => "Critical Alerts",
            Severity::Warning => "Warning Alerts",
        };
        blocks.push(ContentBlock::Chart(Chart {
            title: title.to_string(),
            data: ChartData::Pie {
                center_label: total.to_string(),
                slices: AlertType::ALL
                    .iter()
                    .map(|t| (t.title().to_string(), count_of(t) as f64))
                    .collect(),
            },
            style: PlotStyle::compact(),
        }));

        let mut record = vec![severity.as_str().to_string()];
        record.extend(AlertType::ALL.iter().map(|t| count_of(t).to_string()));
        record.push(total.to_string());
        records.push(record);
    }

    blocks.push(ContentBlock::Table(Table::new(header, records)?));
    blocks.push(ContentBlock::breaks(2));
    Ok(blocks)
}

fn threshold(value: Option<f64>) -> String {
    value.map_or_else(|| "none".to_string(), |v| round2(v).to_string())
}

fn detail_blocks(rules: &[AlertRule], triggered: &BTreeMap<String, Vec<TriggeredAlert>>) -> Result<Vec<ContentBlock>> {
    let mut blocks = vec![
        ContentBlock::heading("Alert Rules and Incidents", 18),
        ContentBlock::breaks(2),
    ];

    let mut by_type: BTreeMap<AlertType, Vec<&AlertRule>> = BTreeMap::new();
    for rule in rules {
        by_type.entry(rule.alert_type).or_default().push(rule);
    }

    for (alert_type, rules) in by_type {
        blocks.push(ContentBlock::formatted(vec![TextRun::bold(format!(
            "{} Alerts",
            alert_type.as_str()
        ))]));
        blocks.push(ContentBlock::breaks(1));

        for rule in rules {
            blocks.push(ContentBlock::centered(vec![
                TextRun::bold("Rule: "),
                TextRun::plain(rule.name.clone()),
            ]));
            blocks.push(ContentBlock::styled(
                format!(
                    "(model_id={}, metric={}, column={}, warning_threshold={}, critical_threshold={})",
                    rule.model_id,
                    rule.metric,
                    rule.column.as_deref().unwrap_or("none"),
                    threshold(rule.warning_threshold),
                    threshold(rule.critical_threshold),
                ),
                TextStyle::small_centered(),
            ));
            blocks.push(ContentBlock::breaks(1));

            let records = triggered
                .get(&rule.alert_rule_uuid)
                .into_iter()
                .flatten()
                .map(|alert| {
                    vec![
                        rule.model_id.clone(),
                        rule.alert_type.as_str().to_string(),
                        alert
                            .bucket_start()
                            .map_or_else(|| "unknown".to_string(), |t| t.format("%Y-%m-%d").to_string()),
                        alert.severity.as_str().to_string(),
                        format!("{:.2}", round2(alert.alert_value)),
                    ]
                })
                .collect();
            blocks.push(ContentBlock::Table(Table::with_header(
                &["model_id", "alert_type", "date", "severity", "value"],
                records,
            )?));
            blocks.push(ContentBlock::breaks(2));
        }
    }

    blocks.push(ContentBlock::breaks(2));
    Ok(blocks)
}

#[async_trait]
impl AnalysisModule for Alerts {
    fn name(&self) -> &'static str {
        "alerts"
    }

    async fn preflight(&mut self, api: &dyn ReportApi, parent: &ParentContext) -> Result<()> {
        let project_id = resolve_project_id(self.project_id.as_deref(), parent)?;
        if self.window.is_none() {
            self.window = parent.window;
        }
        if self.rules.is_none() {
            let rules = api
                .get_alert_rules(&project_id, self.model_id.as_deref())
                .await?;
            log::debug!("{} alert rules in project `{project_id}`", rules.len());
            self.rules = Some(rules);
        }
        self.project_id = Some(project_id);
        Ok(())
    }

    async fn run(&mut self, api: &dyn ReportApi) -> Result<ModuleOutput> {
        preflighted(&self.project_id, self.name())?;
        let rules = self.rules.as_deref().unwrap_or_default();
        let triggered = self.triggered(api, rules).await?;
        let alert_count: usize = triggered.values().map(Vec::len).sum();

        let mut blocks = summary_blocks(&count_by_severity(rules, &triggered))?;
        if self.details {
            blocks.extend(detail_blocks(rules, &triggered)?);
        }

        Ok(ModuleOutput {
            blocks,
            facts: ReportFacts {
                alert_count: Some(alert_count),
                ..ReportFacts::default()
            },
        })
    }
}
