use std::fmt::Write;
use std::path::{Path, PathBuf};

use crate::artifact::TempArtifact;
use crate::content::{
    format_score, Chart, ChartData, ContentBlock, FontStyle, PlotStyle, Table, TextRun, TextStyle,
};
use crate::error::Result;
use crate::series::PerformanceSeries;

pub const ORGANIZATION_KEY: &str = "organization_name";
pub const FOOTER_KEY: &str = "footer_metadata";

#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Where chart data is staged while it is embedded.
    pub artifact_dir: PathBuf,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            artifact_dir: std::env::temp_dir().join("reportgen").join("figs"),
        }
    }
}

/// Renders content blocks into a markdown document.
pub struct MarkdownRenderer {
    config: RenderConfig,
}

impl MarkdownRenderer {
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }

    pub fn write(&self, blocks: &[ContentBlock], path: &Path) -> Result<()> {
        let document = self.render(blocks)?;
        std::fs::write(path, document)?;
        Ok(())
    }

    pub fn render(&self, blocks: &[ContentBlock]) -> Result<String> {
        let mut output = String::new();
        let mut footer = None;

        for block in blocks {
            if let ContentBlock::Metadata(context) = block {
                if let Some(organization) = context.get(ORGANIZATION_KEY) {
                    let _ = writeln!(output, "_{organization}_");
                    let _ = writeln!(output);
                }
                if let Some(text) = context.get(FOOTER_KEY) {
                    footer = Some(text.clone());
                }
            }
        }

        for block in blocks {
            match block {
                ContentBlock::Text { text, style } => render_text(&mut output, text, style),
                ContentBlock::Formatted { runs, .. } => {
                    let line: String = runs.iter().map(render_run).collect();
                    let _ = writeln!(output, "{}", line.trim_end().replace('\n', "  \n"));
                    let _ = writeln!(output);
                }
                ContentBlock::Table(table) => render_table(&mut output, table),
                ContentBlock::Chart(chart) => self.render_chart(&mut output, chart)?,
                ContentBlock::Break(lines) => {
                    for _ in 1..*lines {
                        let _ = writeln!(output, "<br>");
                    }
                    let _ = writeln!(output);
                }
                ContentBlock::PageBreak => {
                    let _ = writeln!(output, "---");
                    let _ = writeln!(output);
                }
                ContentBlock::Metadata(_) => {}
            }
        }

        if let Some(footer) = footer {
            let _ = writeln!(output, "---");
            let _ = writeln!(output, "_{}_", footer.trim_end());
        }
        Ok(output)
    }

    /// Stages the chart data as a temporary CSV, embeds it, then releases it.
    fn render_chart(&self, output: &mut String, chart: &Chart) -> Result<()> {
        let (artifact, file) = TempArtifact::create(&self.config.artifact_dir, "csv")?;
        write_chart_csv(file, &chart.data, &chart.style)?;
        let data = artifact.read_to_string()?;

        let _ = writeln!(output, "**{}**", chart.title);
        let _ = writeln!(output, "<!-- {} -->", style_caption(&chart.style));
        let _ = writeln!(output);
        if let ChartData::Line { series, y_label, .. } = &chart.data {
            let gaps = series.values().flatten().filter(|v| v.is_nan()).count();
            let _ = writeln!(output, "_{y_label} per interval_");
            if gaps > 0 {
                let _ = writeln!(output, "_{gaps} points unavailable (n/a)_");
            }
            let _ = writeln!(output);
        }
        let _ = writeln!(output, "```csv");
        let _ = write!(output, "{data}");
        let _ = writeln!(output, "```");
        let _ = writeln!(output);
        Ok(())
    }
}

fn style_caption(style: &PlotStyle) -> String {
    let mut caption = format!(
        "figure {}x{} in, {} pt",
        style.width_in, style.height_in, style.font_size
    );
    if let Some((low, high)) = style.y_range {
        let _ = write!(caption, ", y {low}..{high}");
    }
    caption
}

/// A point as plotted, clamped into the style's y range.
fn plotted_cell(value: Option<&f64>, style: &PlotStyle) -> String {
    match (value, style.y_range) {
        (None, _) => "n/a".to_string(),
        (Some(value), Some((low, high))) if !value.is_nan() => format_score(value.max(low).min(high)),
        (Some(value), _) => format_score(*value),
    }
}

fn render_text(output: &mut String, text: &str, style: &TextStyle) {
    let line = match style.font_style {
        FontStyle::Bold if style.size >= 22 => format!("# {text}"),
        FontStyle::Bold if style.size >= 18 => format!("## {text}"),
        FontStyle::Bold if style.size >= 16 => format!("### {text}"),
        FontStyle::Bold => format!("**{text}**"),
        FontStyle::Italic => format!("*{text}*"),
        FontStyle::Regular => text.to_string(),
    };
    let _ = writeln!(output, "{line}");
    let _ = writeln!(output);
}

fn render_run(run: &TextRun) -> String {
    match run {
        TextRun::Plain(text) => text.clone(),
        TextRun::Bold(text) if text.trim().is_empty() => text.clone(),
        TextRun::Bold(text) => wrap_keeping_whitespace(text, "**"),
        TextRun::Italic(text) if text.trim().is_empty() => text.clone(),
        TextRun::Italic(text) => wrap_keeping_whitespace(text, "_"),
    }
}

/// Markdown emphasis must hug the text, so surrounding whitespace stays outside.
fn wrap_keeping_whitespace(text: &str, marker: &str) -> String {
    let trimmed_start = text.trim_start();
    let leading = &text[..text.len() - trimmed_start.len()];
    let core = trimmed_start.trim_end();
    let trailing = &trimmed_start[core.len()..];
    format!("{leading}{marker}{core}{marker}{trailing}")
}

fn escape_cell(cell: &str) -> String {
    cell.trim_end().replace('|', "\\|").replace('\n', "<br>")
}

fn render_table(output: &mut String, table: &Table) {
    let header: Vec<String> = table.header.iter().map(|h| escape_cell(h)).collect();
    let _ = writeln!(output, "| {} |", header.join(" | "));
    let _ = writeln!(output, "|{}", " --- |".repeat(header.len()));
    for record in &table.records {
        let cells: Vec<String> = record.iter().map(|c| escape_cell(c)).collect();
        let _ = writeln!(output, "| {} |", cells.join(" | "));
    }
    let _ = writeln!(output);
}

/// Writes the data a chart plots. Baseline markers are left out when the style hides markers.
pub fn write_chart_csv<W: std::io::Write>(writer: W, data: &ChartData, style: &PlotStyle) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    match data {
        ChartData::Line {
            x_labels,
            series,
            baseline,
            ..
        } => {
            let mut header = vec!["interval".to_string()];
            header.extend(series.keys().cloned());
            csv.write_record(&header)?;
            for (index, label) in x_labels.iter().enumerate() {
                let mut record = vec![label.clone()];
                record.extend(
                    series
                        .values()
                        .map(|values| plotted_cell(values.get(index), style)),
                );
                csv.write_record(&record)?;
            }
            if let Some(baseline) = baseline.as_ref().filter(|_| style.show_markers) {
                let mut record = vec!["baseline".to_string()];
                record.extend(
                    series
                        .keys()
                        .map(|name| plotted_cell(baseline.get(name), style)),
                );
                csv.write_record(&record)?;
            }
        }
        ChartData::Pie {
            center_label,
            slices,
        } => {
            csv.write_record(["section", "value"])?;
            for (label, value) in slices {
                csv.write_record([label.clone(), format!("{value}")])?;
            }
            csv.write_record(["total".to_string(), center_label.clone()])?;
        }
        ChartData::Bar { slices } => {
            csv.write_record(["label", "value"])?;
            for (label, value) in slices {
                csv.write_record([label.clone(), format!("{value:.3}")])?;
            }
        }
    }
    csv.flush()?;
    Ok(())
}

/// Exports a computed series with one row per interval. Failed points are empty cells.
pub fn write_series_csv<W: std::io::Write>(writer: W, series: &PerformanceSeries) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    let mut header = vec!["interval_start".to_string(), "interval_end".to_string()];
    header.extend(series.scores.keys().cloned());
    csv.write_record(&header)?;

    for (index, interval) in series.intervals.iter().enumerate() {
        let mut record = vec![interval.left.to_rfc3339(), interval.right.to_rfc3339()];
        record.extend(series.scores.values().map(|values| match values.get(index) {
            Some(value) if !value.is_nan() => value.to_string(),
            _ => String::new(),
        }));
        csv.write_record(&record)?;
    }
    csv.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::PlotStyle;
    use crate::series::ScoreSeries;
    use std::collections::BTreeMap;

    fn renderer(dir: &Path) -> MarkdownRenderer {
        MarkdownRenderer::new(RenderConfig {
            artifact_dir: dir.to_path_buf(),
        })
    }

    #[test]
    fn renders_headings_runs_and_tables() {
        let dir = tempfile::tempdir().unwrap();
        let blocks = vec![
            ContentBlock::heading("Models", 18),
            ContentBlock::labelled("Model", "fraud"),
            ContentBlock::Table(
                Table::with_header(&["Model ID", "Model Type"], vec![vec!["fraud".into(), "a|b".into()]])
                    .unwrap(),
            ),
            ContentBlock::PageBreak,
        ];

        let markdown = renderer(dir.path()).render(&blocks).unwrap();
        assert!(markdown.starts_with("## Models\n"));
        assert!(markdown.contains("Model: **fraud**\n"));
        assert!(markdown.contains("| Model ID | Model Type |\n| --- | --- |\n| fraud | a\\|b |"));
        assert!(markdown.contains("---\n"));
    }

    #[test]
    fn charts_are_embedded_and_artifacts_released() {
        let dir = tempfile::tempdir().unwrap();
        let mut series = ScoreSeries::new();
        series.insert("production_all".into(), vec![0.91, f64::NAN, 0.88]);
        let mut baseline = BTreeMap::new();
        baseline.insert("production_all".to_string(), 0.9);
        let chart = Chart {
            title: "Accuracy over time".into(),
            data: ChartData::Line {
                x_labels: vec!["2023-01-01".into(), "2023-01-02".into(), "2023-01-03".into()],
                series,
                baseline: Some(baseline),
                y_label: "accuracy".into(),
            },
            style: PlotStyle::unit_interval(),
        };

        let markdown = renderer(dir.path()).render(&[ContentBlock::Chart(chart)]).unwrap();
        assert!(markdown.contains("interval,production_all\n2023-01-01,0.91\n2023-01-02,n/a\n"));
        assert!(markdown.contains("baseline,0.90\n"));
        assert!(markdown.contains("_1 points unavailable (n/a)_"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn chart_style_changes_the_rendering() {
        let dir = tempfile::tempdir().unwrap();
        let mut series = ScoreSeries::new();
        series.insert("production_all".into(), vec![1.2, 0.4]);
        let mut baseline = BTreeMap::new();
        baseline.insert("production_all".to_string(), 0.5);
        let chart = |style: PlotStyle| {
            ContentBlock::Chart(Chart {
                title: "Drift".into(),
                data: ChartData::Line {
                    x_labels: vec!["d1".into(), "d2".into()],
                    series: series.clone(),
                    baseline: Some(baseline.clone()),
                    y_label: "jsd".into(),
                },
                style,
            })
        };

        let bounded = renderer(dir.path()).render(&[chart(PlotStyle::unit_interval())]).unwrap();
        let compact = renderer(dir.path())
            .render(&[chart(PlotStyle {
                show_markers: false,
                ..PlotStyle::compact()
            })])
            .unwrap();

        assert!(bounded.contains("<!-- figure 6x4 in, 12 pt, y 0..1 -->"));
        assert!(bounded.contains("d1,1.00\n"));
        assert!(bounded.contains("baseline,0.50\n"));
        assert!(compact.contains("<!-- figure 3x2 in, 7 pt -->"));
        assert!(compact.contains("d1,1.20\n"));
        assert!(!compact.contains("baseline"));
    }

    #[test]
    fn metric_picks_a_bounded_axis() {
        assert_eq!(PlotStyle::for_metric("AUC").y_range, Some((0.0, 1.0)));
        assert_eq!(PlotStyle::for_metric("mae").y_range, None);
    }

    #[test]
    fn metadata_frames_the_document() {
        let dir = tempfile::tempdir().unwrap();
        let mut context = BTreeMap::new();
        context.insert(ORGANIZATION_KEY.to_string(), "demo".to_string());
        context.insert(FOOTER_KEY.to_string(), "Generated today".to_string());

        let markdown = renderer(dir.path())
            .render(&[ContentBlock::text("body"), ContentBlock::Metadata(context)])
            .unwrap();
        assert!(markdown.starts_with("_demo_\n\nbody\n"));
        assert!(markdown.ends_with("---\n_Generated today_\n"));
    }

    #[test]
    fn series_csv_leaves_failed_points_empty() {
        use crate::window::{partition, Cadence, TimeWindow};
        use chrono::{TimeZone, Utc};

        let window = TimeWindow::new(
            Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2023, 1, 3, 0, 0, 0).unwrap(),
        )
        .unwrap();
        let mut scores = ScoreSeries::new();
        scores.insert("production_all".into(), vec![0.5, f64::NAN]);
        let series = PerformanceSeries {
            intervals: partition(&window, Cadence::DAILY).unwrap(),
            scores,
            baseline: None,
        };

        let mut buffer = Vec::new();
        write_series_csv(&mut buffer, &series).unwrap();
        assert_eq!(
            String::from_utf8(buffer).unwrap(),
            "interval_start,interval_end,production_all\n\
             2023-01-01T00:00:00+00:00,2023-01-02T00:00:00+00:00,0.5\n\
             2023-01-02T00:00:00+00:00,2023-01-03T00:00:00+00:00,\n"
        );
    }

    #[test]
    fn emphasis_keeps_whitespace_outside() {
        assert_eq!(render_run(&TextRun::bold("fraud\n")), "**fraud**\n");
        assert_eq!(render_run(&TextRun::italic(" note")), " _note_");
    }
}
