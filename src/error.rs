use chrono::{DateTime, Utc};

pub type Result<T> = std::result::Result<T, ReportError>;

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("remote call failed: {0}")]
    Remote(#[from] RemoteError),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("table row {row} has {found} cells, header has {expected}")]
    TableShape {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Raised during preflight. Aborts the whole report before any scoring work.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("project id is not specified")]
    MissingProjectId,

    #[error("invalid time window: start {start} is after end {end}")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("invalid cadence `{0}`: expected a positive number of days (`7d`) or hours (`6h`)")]
    InvalidCadence(String),

    #[error("invalid segment column `{column}`: {reason}")]
    InvalidColumn { column: String, reason: String },

    #[error("unknown segmentation mode `{0}`")]
    UnknownSegmentMode(String),

    #[error("segmentation mode `top_n` requires a `top_n` argument")]
    MissingTopN,

    #[error("model `{0}` does not exist in the project")]
    UnknownModel(String),

    #[error("invalid analysis configuration: {0}")]
    InvalidSpec(String),

    #[error("analysis module `{0}` was run before preflight")]
    NotPreflighted(&'static str),

    #[error("analysis module `{0}` has already run")]
    AlreadyRun(&'static str),
}

/// A failure of a single backend request.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("backend error: {0}")]
    Backend(String),

    #[error("could not decode backend response: {0}")]
    Decode(String),
}
