//! Report generation for a model-monitoring backend.
//!
//! Analysis modules are preflighted, then run, producing content blocks that
//! a renderer turns into a document. The performance time-series engine is the
//! computational core: it partitions a time window, resolves segments and
//! scores every (interval, segment) point.

pub mod analysis;
pub mod api;
pub mod artifact;
pub mod config;
pub mod content;
pub mod error;
pub mod models;
pub mod predicate;
pub mod queries;
pub mod render;
pub mod segment;
pub mod series;
pub mod window;

pub use analysis::{generate_report, run_analyses, AnalysisModule, ParentContext, ProjectSummary};
pub use api::http::{ClientConfig, HttpReportApi};
pub use api::ReportApi;
pub use config::ReportConfig;
pub use content::ContentBlock;
pub use error::{ConfigError, RemoteError, ReportError, Result};
pub use render::{MarkdownRenderer, RenderConfig};
pub use segment::{SegmentPredicateSet, SegmentResolver, SegmentSpec};
pub use series::{PerformanceSeries, PerformanceTimeSeries, ScoreSeries};
pub use window::{partition, Cadence, Interval, TimeWindow, WindowSpec};
