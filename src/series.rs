//! Performance time series: one score per (interval, segment) pair.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use futures::stream::{self, StreamExt};

use crate::api::{ReportApi, ScoreRequest};
use crate::error::Result;
use crate::models::{DataSource, ModelInfo, ScoreResponse};
use crate::predicate::Predicate;
use crate::segment::{SegmentPredicateSet, SegmentResolver, SegmentSpec};
use crate::window::{partition, Cadence, Interval, TimeWindow};

pub const DEFAULT_TIMESTAMP_COLUMN: &str = "timestamp";

/// Series name to one score per interval. Failed points are `NaN`.
pub type ScoreSeries = BTreeMap<String, Vec<f64>>;

/// Series name to a single unwindowed score.
pub type BaselineScores = BTreeMap<String, f64>;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Score requests in flight at once.
    pub max_concurrency: usize,
    /// Attempts per point for transport failures. Backend errors are not retried.
    pub max_attempts: u32,
    pub retry_backoff: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            max_attempts: 2,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PerformanceTimeSeries {
    pub project_id: String,
    pub model: ModelInfo,
    pub metric: String,
    pub dataset_id: String,
    pub window: TimeWindow,
    pub cadence: Cadence,
    pub segment: Option<SegmentSpec>,
    /// Extra SQL filter applied to every point.
    pub filter: Option<String>,
    /// Dataset scored once per series as a reference marker.
    pub baseline_dataset: Option<String>,
    pub timestamp_column: String,
    pub options: EngineOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceSeries {
    pub intervals: Vec<Interval>,
    pub scores: ScoreSeries,
    pub baseline: Option<BaselineScores>,
}

impl PerformanceSeries {
    pub fn overall_name(dataset_id: &str) -> String {
        format!("{dataset_id}_all")
    }

    pub fn segment_name(dataset_id: &str, label: &str) -> String {
        format!("{dataset_id}_{label}")
    }

    /// Series names for segment labels in order. A name that would shadow the
    /// overall series or an earlier segment gets a numeric suffix.
    pub fn segment_names<'a>(
        dataset_id: &str,
        labels: impl IntoIterator<Item = &'a str>,
    ) -> Vec<String> {
        let mut taken = BTreeSet::from([Self::overall_name(dataset_id)]);
        labels
            .into_iter()
            .map(|label| {
                let base = Self::segment_name(dataset_id, label);
                let mut name = base.clone();
                let mut suffix = 1;
                while taken.contains(&name) {
                    name = format!("{base}_{suffix}");
                    suffix += 1;
                }
                if name != base {
                    log::warn!("segment `{label}` is reported as `{name}`");
                }
                taken.insert(name.clone());
                name
            })
            .collect()
    }

    pub fn failed_points(&self) -> usize {
        self.scores
            .values()
            .flat_map(|values| values.iter())
            .filter(|value| value.is_nan())
            .count()
    }
}

struct ScoreJob {
    series: String,
    index: usize,
    predicate: Predicate,
}

impl PerformanceTimeSeries {
    pub fn new(
        project_id: impl Into<String>,
        model: ModelInfo,
        metric: impl Into<String>,
        dataset_id: impl Into<String>,
        window: TimeWindow,
        cadence: Cadence,
    ) -> Self {
        let timestamp_column = model
            .timestamp_column
            .clone()
            .unwrap_or_else(|| DEFAULT_TIMESTAMP_COLUMN.to_string());
        Self {
            project_id: project_id.into(),
            model,
            metric: metric.into(),
            dataset_id: dataset_id.into(),
            window,
            cadence,
            segment: None,
            filter: None,
            baseline_dataset: None,
            timestamp_column,
            options: EngineOptions::default(),
        }
    }

    /// Issues `|intervals| * (1 + |segments|)` score requests, plus one per
    /// series for the baseline, and assembles them positionally.
    pub async fn compute(&self, api: &dyn ReportApi) -> Result<PerformanceSeries> {
        let intervals = partition(&self.window, self.cadence)?;
        let segments = match &self.segment {
            Some(spec) => {
                SegmentResolver::new(api, &self.project_id, &self.dataset_id, &self.model)
                    .resolve(spec)
                    .await?
            }
            None => SegmentPredicateSet::new(),
        };

        let overall = PerformanceSeries::overall_name(&self.dataset_id);
        let names =
            PerformanceSeries::segment_names(&self.dataset_id, segments.keys().map(String::as_str));
        let named: Vec<(String, Predicate)> = names.into_iter().zip(segments.into_values()).collect();

        let mut scores = ScoreSeries::new();
        scores.insert(overall.clone(), vec![f64::NAN; intervals.len()]);
        for (name, _) in &named {
            scores.insert(name.clone(), vec![f64::NAN; intervals.len()]);
        }

        let mut jobs = Vec::with_capacity(intervals.len() * (1 + named.len()));
        for (index, interval) in intervals.iter().enumerate() {
            let time = interval.predicate(&self.timestamp_column);
            jobs.push(ScoreJob {
                series: overall.clone(),
                index,
                predicate: self.with_filter([time.clone()]),
            });
            for (name, segment) in &named {
                jobs.push(ScoreJob {
                    series: name.clone(),
                    index,
                    predicate: self.with_filter([time.clone(), segment.clone()]),
                });
            }
        }

        log::info!(
            "scoring `{}` for model `{}`: {} intervals x {} series",
            self.metric,
            self.model.model_id,
            intervals.len(),
            1 + named.len()
        );

        let points: Vec<(ScoreJob, f64)> = stream::iter(jobs)
            .map(|job| async move {
                let source = DataSource::Sql {
                    dataset_name: self.dataset_id.clone(),
                    predicate: job.predicate.to_sql(),
                };
                let value = self.score_point(api, source, &job.series).await;
                (job, value)
            })
            .buffered(self.options.max_concurrency.max(1))
            .collect()
            .await;

        for (job, value) in points {
            if let Some(slot) = scores
                .get_mut(&job.series)
                .and_then(|values| values.get_mut(job.index))
            {
                *slot = value;
            }
        }

        let baseline = match &self.baseline_dataset {
            Some(baseline_dataset) => {
                Some(self.baseline_scores(api, baseline_dataset, &named).await)
            }
            None => None,
        };

        Ok(PerformanceSeries {
            intervals,
            scores,
            baseline,
        })
    }

    async fn baseline_scores(
        &self,
        api: &dyn ReportApi,
        baseline_dataset: &str,
        segments: &[(String, Predicate)],
    ) -> BaselineScores {
        let mut baseline = BaselineScores::new();

        let overall_source = match &self.filter {
            Some(filter) => DataSource::Sql {
                dataset_name: baseline_dataset.to_string(),
                predicate: Predicate::Raw(filter.clone()).to_sql(),
            },
            None => DataSource::Dataset {
                dataset_name: baseline_dataset.to_string(),
                source: None,
            },
        };
        let overall = PerformanceSeries::overall_name(&self.dataset_id);
        let value = self.score_point(api, overall_source, &overall).await;
        baseline.insert(overall, value);

        for (name, segment) in segments {
            let source = DataSource::Sql {
                dataset_name: baseline_dataset.to_string(),
                predicate: self.with_filter([segment.clone()]).to_sql(),
            };
            let value = self.score_point(api, source, name).await;
            baseline.insert(name.clone(), value);
        }
        baseline
    }

    fn with_filter<const N: usize>(&self, parts: [Predicate; N]) -> Predicate {
        let filter = self.filter.clone().map(Predicate::Raw);
        Predicate::and(parts.into_iter().chain(filter))
    }

    /// Scores one point, falling back to `NaN` once attempts are exhausted.
    async fn score_point(&self, api: &dyn ReportApi, data_source: DataSource, series: &str) -> f64 {
        let request = ScoreRequest {
            project_id: self.project_id.clone(),
            model_id: self.model.model_id.clone(),
            data_source,
            metric: Some(self.metric.clone()),
            binary_threshold: self.model.binary_classification_threshold,
        };

        let attempts = self.options.max_attempts.max(1);
        for attempt in 1..=attempts {
            match api.score(&request).await {
                Ok(ScoreResponse::Normal { data }) => {
                    return data.metric(&self.metric).unwrap_or_else(|| {
                        log::warn!("`{}` missing from scores for {series}", self.metric);
                        f64::NAN
                    });
                }
                Ok(ScoreResponse::Error { error }) => {
                    log::warn!("score request for {series} failed: {error}");
                    return f64::NAN;
                }
                Err(err) => {
                    log::warn!("score request for {series} failed (attempt {attempt}/{attempts}): {err}");
                    if attempt < attempts {
                        tokio::time::sleep(self.options.retry_backoff * attempt).await;
                    }
                }
            }
        }
        f64::NAN
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::{binary_model, normal_score, table, FakeApi};
    use crate::error::RemoteError;
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, d, 0, 0, 0).unwrap()
    }

    fn engine() -> PerformanceTimeSeries {
        let mut engine = PerformanceTimeSeries::new(
            "lending",
            binary_model("m"),
            "accuracy",
            "dataset",
            TimeWindow::new(day(1), day(4)).unwrap(),
            Cadence::DAILY,
        );
        engine.options.retry_backoff = Duration::ZERO;
        engine
    }

    fn predicate_of(request: &ScoreRequest) -> String {
        match &request.data_source {
            DataSource::Sql { predicate, .. } => predicate.clone(),
            DataSource::Dataset { dataset_name, .. } => dataset_name.clone(),
        }
    }

    #[tokio::test]
    async fn failed_point_becomes_nan_in_place() {
        let api = FakeApi::default().with_scores(|request| {
            let predicate = predicate_of(request);
            if predicate.contains(">= '2023-01-01") {
                Ok(normal_score("accuracy", 0.91))
            } else if predicate.contains(">= '2023-01-02") {
                Ok(ScoreResponse::Error {
                    error: "timeout".into(),
                })
            } else {
                Ok(normal_score("accuracy", 0.88))
            }
        });

        let series = engine().compute(&api).await.unwrap();
        let overall = &series.scores["dataset_all"];

        assert_eq!(overall.len(), 3);
        assert_eq!(overall[0], 0.91);
        assert!(overall[1].is_nan());
        assert_eq!(overall[2], 0.88);
        assert_eq!(series.failed_points(), 1);
        assert_eq!(series.baseline, None);
    }

    #[tokio::test]
    async fn every_series_stays_dense_when_all_calls_fail() {
        let api = FakeApi::default()
            .with_slice(
                "SELECT DISTINCT home_ownership",
                table(&["home_ownership"], vec![vec![json!("OWN")], vec![json!("RENT")]]),
            )
            .with_scores(|_| Err(RemoteError::Backend("down".into())));

        let mut engine = engine();
        engine.segment = Some(SegmentSpec::categorical("home_ownership", "all"));
        let series = engine.compute(&api).await.unwrap();

        assert_eq!(series.scores.len(), 3);
        for values in series.scores.values() {
            assert_eq!(values.len(), 3);
            assert!(values.iter().all(|v| v.is_nan()));
        }
        // 3 intervals x 3 series, two attempts each
        assert_eq!(api.score_requests().len(), 18);
    }

    #[tokio::test]
    async fn issues_one_call_per_interval_and_segment() {
        let api = FakeApi::default().with_slice(
            "SELECT DISTINCT home_ownership",
            table(&["home_ownership"], vec![vec![json!("OWN")], vec![json!("RENT")]]),
        );
        let mut engine = engine();
        engine.segment = Some(SegmentSpec::categorical("home_ownership", "all"));
        engine.filter = Some("loan_amount > 1000".into());

        let series = engine.compute(&api).await.unwrap();
        let requests = api.score_requests();

        assert_eq!(requests.len(), 3 * (1 + 2));
        assert!(series.scores.contains_key("dataset_OWN"));
        assert!(series.scores.contains_key("dataset_RENT"));
        let own_day_two = requests
            .iter()
            .map(predicate_of)
            .find(|p| p.contains("home_ownership='OWN'") && p.contains(">= '2023-01-02"))
            .unwrap();
        assert!(own_day_two.ends_with("AND (loan_amount > 1000)"));
        assert!(requests.iter().all(|r| r.metric.as_deref() == Some("accuracy")));
    }

    #[tokio::test]
    async fn top_zero_only_scores_the_overall_series() {
        let api = FakeApi::default();
        let mut engine = engine();
        engine.segment = Some(SegmentSpec::categorical("home_ownership", "top_n").with_top_n(0));

        let series = engine.compute(&api).await.unwrap();
        assert_eq!(series.scores.keys().collect::<Vec<_>>(), vec!["dataset_all"]);
        assert_eq!(api.score_requests().len(), 3);
    }

    #[tokio::test]
    async fn transport_failures_are_retried_before_giving_up() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let api = FakeApi::default().with_scores(move |_| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(RemoteError::Backend("connection reset".into()))
            } else {
                Ok(normal_score("accuracy", 0.5))
            }
        });
        let mut engine = engine();
        engine.options.max_concurrency = 1;

        let series = engine.compute(&api).await.unwrap();
        assert_eq!(series.scores["dataset_all"], vec![0.5, 0.5, 0.5]);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn baseline_scores_each_series_once() {
        let api = FakeApi::default()
            .with_slice(
                "SELECT DISTINCT home_ownership",
                table(&["home_ownership"], vec![vec![json!("OWN")]]),
            )
            .with_scores(|request| match &request.data_source {
                DataSource::Dataset { .. } => Ok(normal_score("accuracy", 0.95)),
                DataSource::Sql { dataset_name, .. } if dataset_name == "baseline" => {
                    Ok(normal_score("accuracy", 0.93))
                }
                DataSource::Sql { .. } => Ok(normal_score("accuracy", 0.9)),
            });
        let mut engine = engine();
        engine.segment = Some(SegmentSpec::categorical("home_ownership", "all"));
        engine.baseline_dataset = Some("baseline".into());

        let series = engine.compute(&api).await.unwrap();
        let baseline = series.baseline.unwrap();

        assert_eq!(baseline["dataset_all"], 0.95);
        assert_eq!(baseline["dataset_OWN"], 0.93);
        assert_eq!(api.score_requests().len(), 3 * 2 + 2);
    }

    #[tokio::test]
    async fn late_responses_land_at_their_interval() {
        let completed = Arc::new(std::sync::Mutex::new(Vec::new()));
        let order = Arc::clone(&completed);
        let day_of = |request: &ScoreRequest| {
            (1..=3u32)
                .find(|d| predicate_of(request).contains(&format!(">= '2023-01-0{d}")))
                .unwrap()
        };
        let api = FakeApi::default()
            .with_score_delay(move |request| Duration::from_millis(30 * u64::from(3 - day_of(request))))
            .with_scores(move |request| {
                let day = day_of(request);
                order.lock().unwrap().push(day);
                Ok(normal_score("accuracy", f64::from(day) / 10.0))
            });
        let mut engine = engine();
        engine.options.max_concurrency = 3;

        let series = engine.compute(&api).await.unwrap();

        assert_eq!(*completed.lock().unwrap(), vec![3, 2, 1]);
        assert_eq!(series.scores["dataset_all"], vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn segment_named_all_keeps_the_overall_series() {
        let api = FakeApi::default()
            .with_slice(
                "SELECT DISTINCT home_ownership",
                table(&["home_ownership"], vec![vec![json!("all")], vec![json!("OWN")]]),
            )
            .with_scores(|request| {
                if predicate_of(request).contains("home_ownership='all'") {
                    Ok(normal_score("accuracy", 0.1))
                } else {
                    Ok(normal_score("accuracy", 0.9))
                }
            });
        let mut engine = engine();
        engine.segment = Some(SegmentSpec::categorical("home_ownership", "all"));
        engine.baseline_dataset = Some("baseline".into());

        let series = engine.compute(&api).await.unwrap();

        assert_eq!(
            series.scores.keys().collect::<Vec<_>>(),
            vec!["dataset_OWN", "dataset_all", "dataset_all_1"]
        );
        assert_eq!(series.scores["dataset_all"], vec![0.9, 0.9, 0.9]);
        assert_eq!(series.scores["dataset_all_1"], vec![0.1, 0.1, 0.1]);
        assert_eq!(series.baseline.unwrap().len(), 3);
    }

    #[test]
    fn segment_names_never_repeat() {
        let names = PerformanceSeries::segment_names("ds", ["all", "all_1", "RENT"]);
        assert_eq!(names, vec!["ds_all_1", "ds_all_1_1", "ds_RENT"]);
    }

    #[tokio::test]
    async fn missing_metric_is_a_gap() {
        let api = FakeApi::default().with_scores(|_| Ok(normal_score("precision", 0.7)));
        let series = engine().compute(&api).await.unwrap();
        assert!(series.scores["dataset_all"].iter().all(|v| v.is_nan()));
    }
}
