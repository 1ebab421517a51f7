use std::collections::BTreeMap;

use serde::Deserialize;

use crate::api::ReportApi;
use crate::error::{ConfigError, ReportError, Result};
use crate::models::ModelInfo;
use crate::predicate::Predicate;
use crate::queries;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentType {
    #[default]
    Categorical,
    Numerical,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentMode {
    All,
    TopN(usize),
    /// Reserved, resolves to no segments.
    TopNWithOther,
    /// Reserved, resolves to no segments.
    List,
}

/// How to split a column into labelled subpopulations.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SegmentSpec {
    #[serde(rename = "type", default)]
    pub segment_type: SegmentType,
    pub column: String,
    pub mode: String,
    #[serde(default)]
    pub args: BTreeMap<String, serde_json::Value>,
}

/// Segment label to predicate. Empty means no segmentation.
pub type SegmentPredicateSet = BTreeMap<String, Predicate>;

impl SegmentSpec {
    pub fn categorical(column: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            segment_type: SegmentType::Categorical,
            column: column.into(),
            mode: mode.into(),
            args: BTreeMap::new(),
        }
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.args.insert("top_n".to_string(), serde_json::json!(top_n));
        self
    }

    pub fn parsed_mode(&self) -> std::result::Result<SegmentMode, ConfigError> {
        match self.mode.as_str() {
            "all" => Ok(SegmentMode::All),
            "top_n" => {
                let raw = self.args.get("top_n").ok_or(ConfigError::MissingTopN)?;
                let top_n = raw.as_u64().ok_or_else(|| {
                    ConfigError::InvalidSpec(format!(
                        "`top_n` must be a non-negative integer, got {raw}"
                    ))
                })?;
                Ok(SegmentMode::TopN(top_n as usize))
            }
            "top_n_with_other" => Ok(SegmentMode::TopNWithOther),
            "list" => Ok(SegmentMode::List),
            other => Err(ConfigError::UnknownSegmentMode(other.to_string())),
        }
    }

    /// Checks the segmentation against a model schema without querying any data.
    pub fn validate(&self, model: &ModelInfo) -> Result<SegmentMode> {
        if self.segment_type != SegmentType::Categorical {
            return Err(ReportError::Unsupported(format!(
                "{:?} segmentation of `{}`",
                self.segment_type, self.column
            )));
        }
        let column = model
            .column(&self.column)
            .ok_or_else(|| ConfigError::InvalidColumn {
                column: self.column.clone(),
                reason: format!("not in the schema of model `{}`", model.model_id),
            })?;
        if !column.data_type.is_categorical() {
            return Err(ConfigError::InvalidColumn {
                column: self.column.clone(),
                reason: format!("{:?} columns cannot be segmented categorically", column.data_type),
            }
            .into());
        }
        Ok(self.parsed_mode()?)
    }
}

/// Resolves segment specs against one `"<dataset>.<model>"` view.
pub struct SegmentResolver<'a> {
    api: &'a dyn ReportApi,
    project_id: &'a str,
    dataset_id: &'a str,
    model: &'a ModelInfo,
}

impl<'a> SegmentResolver<'a> {
    pub fn new(
        api: &'a dyn ReportApi,
        project_id: &'a str,
        dataset_id: &'a str,
        model: &'a ModelInfo,
    ) -> Self {
        Self {
            api,
            project_id,
            dataset_id,
            model,
        }
    }

    pub async fn resolve(&self, spec: &SegmentSpec) -> Result<SegmentPredicateSet> {
        let sql = match spec.validate(self.model)? {
            SegmentMode::All => {
                queries::distinct_values(self.dataset_id, &self.model.model_id, &spec.column)
            }
            SegmentMode::TopN(0) => return Ok(SegmentPredicateSet::new()),
            SegmentMode::TopN(top_n) => queries::most_frequent_values(
                self.dataset_id,
                &self.model.model_id,
                &spec.column,
                top_n,
            ),
            SegmentMode::TopNWithOther | SegmentMode::List => {
                log::warn!(
                    "segmentation mode `{}` is not implemented, `{}` is left unsegmented",
                    spec.mode,
                    spec.column
                );
                return Ok(SegmentPredicateSet::new());
            }
        };

        let values = queries::fetch_first_column(self.api, self.project_id, &sql).await?;
        let segments: SegmentPredicateSet = values
            .into_iter()
            .map(|value| (value.to_string(), Predicate::equals(spec.column.clone(), value)))
            .collect();
        log::debug!(
            "resolved {} segments for `{}` ({})",
            segments.len(),
            spec.column,
            spec.mode
        );
        Ok(segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::{binary_model, table, FakeApi};
    use serde_json::json;

    fn ownership_api() -> FakeApi {
        FakeApi::default()
            .with_slice(
                "SELECT DISTINCT home_ownership",
                table(
                    &["home_ownership"],
                    vec![vec![json!("RENT")], vec![json!("OWN")], vec![json!("MORTGAGE")]],
                ),
            )
            .with_slice(
                "COUNT(*) DESC LIMIT 2",
                table(
                    &["home_ownership", "count"],
                    vec![vec![json!("RENT"), json!(40)], vec![json!("MORTGAGE"), json!(25)]],
                ),
            )
            .with_slice(
                "COUNT(*) DESC LIMIT 10",
                table(
                    &["home_ownership", "count"],
                    vec![
                        vec![json!("RENT"), json!(40)],
                        vec![json!("MORTGAGE"), json!(25)],
                        vec![json!("OWN"), json!(5)],
                    ],
                ),
            )
    }

    #[tokio::test]
    async fn all_mode_builds_one_predicate_per_sorted_value() {
        let api = ownership_api();
        let model = binary_model("m");
        let resolver = SegmentResolver::new(&api, "lending", "production", &model);

        let segments = resolver
            .resolve(&SegmentSpec::categorical("home_ownership", "all"))
            .await
            .unwrap();

        let keys: Vec<&str> = segments.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["MORTGAGE", "OWN", "RENT"]);
        assert_eq!(segments["RENT"].to_sql(), "home_ownership='RENT'");
        assert_eq!(
            api.sql_queries(),
            vec!["SELECT DISTINCT home_ownership FROM \"production.m\"".to_string()]
        );
    }

    #[tokio::test]
    async fn top_n_keeps_the_most_frequent_values() {
        let api = ownership_api();
        let model = binary_model("m");
        let resolver = SegmentResolver::new(&api, "lending", "production", &model);

        let segments = resolver
            .resolve(&SegmentSpec::categorical("home_ownership", "top_n").with_top_n(2))
            .await
            .unwrap();
        let keys: Vec<&str> = segments.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["MORTGAGE", "RENT"]);

        let all = resolver
            .resolve(&SegmentSpec::categorical("home_ownership", "top_n").with_top_n(10))
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn top_zero_is_empty_without_querying() {
        let api = ownership_api();
        let model = binary_model("m");
        let resolver = SegmentResolver::new(&api, "lending", "production", &model);

        let segments = resolver
            .resolve(&SegmentSpec::categorical("home_ownership", "top_n").with_top_n(0))
            .await
            .unwrap();
        assert!(segments.is_empty());
        assert!(api.sql_queries().is_empty());
    }

    #[tokio::test]
    async fn resolution_is_repeatable() {
        let api = ownership_api();
        let model = binary_model("m");
        let resolver = SegmentResolver::new(&api, "lending", "production", &model);
        let spec = SegmentSpec::categorical("home_ownership", "all");

        let first = resolver.resolve(&spec).await.unwrap();
        let second = resolver.resolve(&spec).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn reserved_modes_resolve_to_nothing() {
        let api = ownership_api();
        let model = binary_model("m");
        let resolver = SegmentResolver::new(&api, "lending", "production", &model);

        for mode in ["top_n_with_other", "list"] {
            let segments = resolver
                .resolve(&SegmentSpec::categorical("home_ownership", mode))
                .await
                .unwrap();
            assert!(segments.is_empty());
        }
    }

    #[test]
    fn rejects_bad_columns_and_modes() {
        let model = binary_model("m");

        let missing = SegmentSpec::categorical("zip_code", "all").validate(&model);
        assert!(matches!(
            missing,
            Err(ReportError::Configuration(ConfigError::InvalidColumn { .. }))
        ));

        let numeric = SegmentSpec::categorical("loan_amount", "all").validate(&model);
        assert!(matches!(
            numeric,
            Err(ReportError::Configuration(ConfigError::InvalidColumn { .. }))
        ));

        let unknown = SegmentSpec::categorical("home_ownership", "median").validate(&model);
        assert!(matches!(
            unknown,
            Err(ReportError::Configuration(ConfigError::UnknownSegmentMode(_)))
        ));

        let no_top_n = SegmentSpec::categorical("home_ownership", "top_n").validate(&model);
        assert!(matches!(
            no_top_n,
            Err(ReportError::Configuration(ConfigError::MissingTopN))
        ));
    }

    #[test]
    fn numerical_segments_are_unsupported() {
        let model = binary_model("m");
        let spec = SegmentSpec {
            segment_type: SegmentType::Numerical,
            ..SegmentSpec::categorical("loan_amount", "all")
        };
        assert!(matches!(spec.validate(&model), Err(ReportError::Unsupported(_))));
    }
}
