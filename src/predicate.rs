//! Filter predicates for slice queries and score requests.
//!
//! Predicates are built as values and serialized in one place so that quoting
//! rules live next to each other and can be tested without a backend.

use std::fmt;

use chrono::{DateTime, Utc};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl Literal {
    /// Converts a JSON cell from a slice query. `null` has no literal form.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(text) => Some(Literal::Text(text.clone())),
            serde_json::Value::Bool(flag) => Some(Literal::Bool(*flag)),
            serde_json::Value::Number(number) => number
                .as_i64()
                .map(Literal::Integer)
                .or_else(|| number.as_f64().map(Literal::Float)),
            _ => None,
        }
    }

    fn to_sql(&self) -> String {
        match self {
            Literal::Text(text) => format!("'{}'", text.replace('\'', "''")),
            Literal::Integer(value) => value.to_string(),
            Literal::Float(value) => value.to_string(),
            // Categorical columns are compared against their quoted label.
            Literal::Bool(flag) => format!("'{flag}'"),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Text(text) => f.write_str(text),
            Literal::Integer(value) => write!(f, "{value}"),
            Literal::Float(value) => write!(f, "{value}"),
            Literal::Bool(flag) => write!(f, "{flag}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Less,
    Greater,
}

impl CompareOp {
    fn as_sql(&self) -> &'static str {
        match self {
            CompareOp::Less => "<",
            CompareOp::Greater => ">",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    ColumnEquals {
        column: String,
        value: Literal,
    },
    ColumnCompare {
        column: String,
        op: CompareOp,
        value: Literal,
    },
    /// `[start, end)`, or `[start, end]` when `inclusive_end` is set.
    TimestampRange {
        column: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        inclusive_end: bool,
    },
    And(Vec<Predicate>),
    /// A user supplied filter, passed through verbatim inside parentheses.
    Raw(String),
}

impl Predicate {
    pub fn equals(column: impl Into<String>, value: Literal) -> Self {
        Predicate::ColumnEquals {
            column: column.into(),
            value,
        }
    }

    /// Conjunction that flattens nested `And`s.
    pub fn and(parts: impl IntoIterator<Item = Predicate>) -> Self {
        let mut flat = Vec::new();
        for part in parts {
            match part {
                Predicate::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        if flat.len() == 1 {
            flat.remove(0)
        } else {
            Predicate::And(flat)
        }
    }

    pub fn to_sql(&self) -> String {
        match self {
            Predicate::ColumnEquals { column, value } => {
                format!("{}={}", quote_identifier(column), value.to_sql())
            }
            Predicate::ColumnCompare { column, op, value } => format!(
                "{} {} {}",
                quote_identifier(column),
                op.as_sql(),
                value.to_sql()
            ),
            Predicate::TimestampRange {
                column,
                start,
                end,
                inclusive_end,
            } => {
                let column = quote_identifier(column);
                let start = start.format(TIMESTAMP_FORMAT);
                let end = end.format(TIMESTAMP_FORMAT);
                if *inclusive_end {
                    format!("{column} BETWEEN '{start}' AND '{end}'")
                } else {
                    format!("{column} >= '{start}' AND {column} < '{end}'")
                }
            }
            Predicate::And(parts) if parts.is_empty() => "TRUE".to_string(),
            Predicate::And(parts) => parts
                .iter()
                .map(|part| match part {
                    Predicate::ColumnEquals { .. }
                    | Predicate::ColumnCompare { .. }
                    | Predicate::Raw(_) => part.to_sql(),
                    _ => format!("({})", part.to_sql()),
                })
                .collect::<Vec<_>>()
                .join(" AND "),
            Predicate::Raw(sql) => format!("({sql})"),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql())
    }
}

/// Plain identifiers are emitted as-is, anything else is double-quoted.
pub fn quote_identifier(name: &str) -> String {
    let mut chars = name.chars();
    let plain = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}
