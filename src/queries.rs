use chrono::{DateTime, NaiveDateTime, Utc};

use crate::api::ReportApi;
use crate::error::{RemoteError, Result};
use crate::predicate::{quote_identifier, Literal, Predicate};

/// The `"<dataset>.<model>"` view a slice query reads from.
pub fn dataset_view(dataset_id: &str, model_id: &str) -> String {
    format!("\"{dataset_id}.{model_id}\"")
}

pub fn distinct_values(dataset_id: &str, model_id: &str, column: &str) -> String {
    format!(
        "SELECT DISTINCT {} FROM {}",
        quote_identifier(column),
        dataset_view(dataset_id, model_id)
    )
}

pub fn most_frequent_values(dataset_id: &str, model_id: &str, column: &str, limit: usize) -> String {
    let column = quote_identifier(column);
    format!(
        "SELECT {column}, COUNT(*) FROM {} GROUP BY {column} ORDER BY COUNT(*) DESC LIMIT {limit}",
        dataset_view(dataset_id, model_id)
    )
}

pub fn timestamp_bounds(dataset_id: &str, model_id: &str, column: &str) -> String {
    let column = quote_identifier(column);
    format!(
        "SELECT MIN({column}), MAX({column}) FROM {}",
        dataset_view(dataset_id, model_id)
    )
}

pub fn source_row_count(dataset_id: &str, model_id: &str, source: &str) -> String {
    format!(
        "SELECT COUNT(*) FROM {} WHERE {}",
        dataset_view(dataset_id, model_id),
        Predicate::equals("__source_file", Literal::Text(source.to_string())).to_sql()
    )
}

pub fn ranked_rows(
    dataset_id: &str,
    model_id: &str,
    filter: &Predicate,
    order_by: &str,
    descending: bool,
    limit: usize,
) -> String {
    format!(
        "SELECT * FROM {} WHERE {} ORDER BY {} {} LIMIT {limit}",
        dataset_view(dataset_id, model_id),
        filter.to_sql(),
        quote_identifier(order_by),
        if descending { "DESC" } else { "ASC" }
    )
}

/// Values of the first column of a slice, skipping nulls.
pub async fn fetch_first_column(
    api: &dyn ReportApi,
    project_id: &str,
    sql: &str,
) -> Result<Vec<Literal>> {
    let table = api.run_sql_slice(project_id, sql).await?;
    Ok(table
        .rows
        .iter()
        .filter_map(|row| row.first().and_then(Literal::from_json))
        .collect())
}

pub async fn fetch_row_count(api: &dyn ReportApi, project_id: &str, sql: &str) -> Result<u64> {
    let table = api.run_sql_slice(project_id, sql).await?;
    table
        .rows
        .first()
        .and_then(|row| row.first())
        .and_then(|cell| cell.as_u64().or_else(|| cell.as_f64().map(|v| v as u64)))
        .ok_or_else(|| RemoteError::Decode(format!("no count in result of `{sql}`")).into())
}

/// Earliest and latest event timestamps, or `None` when the view is empty.
pub async fn fetch_timestamp_bounds(
    api: &dyn ReportApi,
    project_id: &str,
    dataset_id: &str,
    model_id: &str,
    column: &str,
) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
    let sql = timestamp_bounds(dataset_id, model_id, column);
    let table = api.run_sql_slice(project_id, &sql).await?;
    let Some(row) = table.rows.first() else {
        return Ok(None);
    };
    let min = row.first().and_then(parse_timestamp);
    let max = row.get(1).and_then(parse_timestamp);
    Ok(min.zip(max))
}

/// Accepts RFC 3339 strings, `YYYY-MM-DD HH:MM:SS` strings or epoch milliseconds.
pub fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(text) => DateTime::parse_from_rfc3339(text)
            .map(|t| t.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
                    .ok()
                    .map(|t| t.and_utc())
            }),
        serde_json::Value::Number(number) => {
            number.as_i64().and_then(DateTime::from_timestamp_millis)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::{table, FakeApi};
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn builds_top_n_query() {
        assert_eq!(
            most_frequent_values("production", "m", "home_ownership", 2),
            "SELECT home_ownership, COUNT(*) FROM \"production.m\" GROUP BY home_ownership ORDER BY COUNT(*) DESC LIMIT 2"
        );
    }

    #[test]
    fn builds_source_count_query() {
        assert_eq!(
            source_row_count("baseline", "m", "train.csv"),
            "SELECT COUNT(*) FROM \"baseline.m\" WHERE __source_file='train.csv'"
        );
    }

    #[test]
    fn parses_backend_timestamps() {
        let expected = Utc.with_ymd_and_hms(2023, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(parse_timestamp(&json!("2023-01-02T03:04:05Z")), Some(expected));
        assert_eq!(parse_timestamp(&json!("2023-01-02 03:04:05")), Some(expected));
        assert_eq!(
            parse_timestamp(&json!(expected.timestamp_millis())),
            Some(expected)
        );
        assert_eq!(parse_timestamp(&json!(null)), None);
    }

    #[tokio::test]
    async fn first_column_skips_nulls() {
        let api = FakeApi::default().with_slice(
            "SELECT DISTINCT",
            table(&["grade"], vec![vec![json!("A")], vec![json!(null)], vec![json!("B")]]),
        );
        let values = fetch_first_column(&api, "p", "SELECT DISTINCT grade FROM x")
            .await
            .unwrap();
        assert_eq!(
            values,
            vec![Literal::Text("A".into()), Literal::Text("B".into())]
        );
    }

    #[tokio::test]
    async fn empty_bounds_are_none() {
        let api = FakeApi::default().with_slice("MIN(", table(&["min", "max"], vec![]));
        let bounds = fetch_timestamp_bounds(&api, "p", "production", "m", "timestamp")
            .await
            .unwrap();
        assert_eq!(bounds, None);
    }
}
