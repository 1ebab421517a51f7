//! Content blocks produced by analysis modules.
//!
//! Analysis modules only build these values; ordering them and turning them
//! into a document is left to the report driver and a renderer.

use std::collections::BTreeMap;

use crate::error::{ReportError, Result};
use crate::series::{BaselineScores, ScoreSeries};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Alignment {
    #[default]
    Left,
    Center,
    Right,
    Justify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FontStyle {
    #[default]
    Regular,
    Bold,
    Italic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextStyle {
    pub alignment: Alignment,
    /// Point size.
    pub size: u8,
    pub font_style: FontStyle,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            alignment: Alignment::Left,
            size: 12,
            font_style: FontStyle::Regular,
        }
    }
}

impl TextStyle {
    pub fn heading(size: u8) -> Self {
        Self {
            size,
            font_style: FontStyle::Bold,
            ..Self::default()
        }
    }

    pub fn centered_heading(size: u8) -> Self {
        Self {
            alignment: Alignment::Center,
            ..Self::heading(size)
        }
    }

    pub fn small_centered() -> Self {
        Self {
            alignment: Alignment::Center,
            size: 9,
            font_style: FontStyle::Regular,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextRun {
    Plain(String),
    Bold(String),
    Italic(String),
}

impl TextRun {
    pub fn plain(text: impl Into<String>) -> Self {
        TextRun::Plain(text.into())
    }

    pub fn bold(text: impl Into<String>) -> Self {
        TextRun::Bold(text.into())
    }

    pub fn italic(text: impl Into<String>) -> Self {
        TextRun::Italic(text.into())
    }

    pub fn text(&self) -> &str {
        match self {
            TextRun::Plain(text) | TextRun::Bold(text) | TextRun::Italic(text) => text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub header: Vec<String>,
    pub records: Vec<Vec<String>>,
}

impl Table {
    pub fn new(header: Vec<String>, records: Vec<Vec<String>>) -> Result<Self> {
        for (row, record) in records.iter().enumerate() {
            if record.len() != header.len() {
                return Err(ReportError::TableShape {
                    row,
                    expected: header.len(),
                    found: record.len(),
                });
            }
        }
        Ok(Self { header, records })
    }

    pub fn with_header(header: &[&str], records: Vec<Vec<String>>) -> Result<Self> {
        Self::new(header.iter().map(|h| h.to_string()).collect(), records)
    }
}

/// Chart appearance, carried by each chart.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotStyle {
    pub width_in: f32,
    pub height_in: f32,
    pub font_size: u8,
    pub y_range: Option<(f64, f64)>,
    pub show_markers: bool,
}

impl Default for PlotStyle {
    fn default() -> Self {
        Self {
            width_in: 6.0,
            height_in: 4.0,
            font_size: 12,
            y_range: None,
            show_markers: true,
        }
    }
}

impl PlotStyle {
    pub fn unit_interval() -> Self {
        Self {
            y_range: Some((0.0, 1.0)),
            ..Self::default()
        }
    }

    /// Suits metrics bounded by zero and one.
    pub fn for_metric(metric: &str) -> Self {
        const BOUNDED: [&str; 7] = ["accuracy", "precision", "recall", "f1", "auc", "auroc", "fpr"];
        if BOUNDED.contains(&metric.to_ascii_lowercase().as_str()) {
            Self::unit_interval()
        } else {
            Self::default()
        }
    }

    pub fn compact() -> Self {
        Self {
            width_in: 3.0,
            height_in: 2.0,
            font_size: 7,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChartData {
    /// One line per series over the interval labels. `NaN` points are gaps.
    Line {
        x_labels: Vec<String>,
        series: ScoreSeries,
        baseline: Option<BaselineScores>,
        y_label: String,
    },
    /// Donut with a centre figure, used for alert counts.
    Pie {
        center_label: String,
        slices: Vec<(String, f64)>,
    },
    Bar { slices: Vec<(String, f64)> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chart {
    pub title: String,
    pub data: ChartData,
    pub style: PlotStyle,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text { text: String, style: TextStyle },
    Formatted { runs: Vec<TextRun>, alignment: Alignment },
    Table(Table),
    Chart(Chart),
    /// Blank lines.
    Break(u8),
    PageBreak,
    /// Key-value pairs for the document template (organisation, footer).
    Metadata(BTreeMap<String, String>),
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text {
            text: text.into(),
            style: TextStyle::default(),
        }
    }

    pub fn styled(text: impl Into<String>, style: TextStyle) -> Self {
        ContentBlock::Text {
            text: text.into(),
            style,
        }
    }

    pub fn heading(text: impl Into<String>, size: u8) -> Self {
        Self::styled(text, TextStyle::heading(size))
    }

    pub fn formatted(runs: Vec<TextRun>) -> Self {
        ContentBlock::Formatted {
            runs,
            alignment: Alignment::Left,
        }
    }

    pub fn centered(runs: Vec<TextRun>) -> Self {
        ContentBlock::Formatted {
            runs,
            alignment: Alignment::Center,
        }
    }

    /// A bold label followed by a plain value, e.g. `Model: fraud`.
    pub fn labelled(label: &str, value: impl Into<String>) -> Self {
        Self::formatted(vec![TextRun::plain(format!("{label}: ")), TextRun::bold(value)])
    }

    pub fn breaks(lines: u8) -> Self {
        ContentBlock::Break(lines.max(1))
    }

    /// A visible note for work that was skipped.
    pub fn note(text: impl Into<String>) -> Self {
        Self::formatted(vec![TextRun::italic(text)])
    }
}

/// Formats a score for a table cell. Missing values are visibly marked.
pub fn format_score(value: f64) -> String {
    if value.is_nan() {
        "n/a".to_string()
    } else {
        format!("{value:.2}")
    }
}
