use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};

use reportgen::api::http::{ClientConfig, HttpReportApi};
use reportgen::config::{parse_instant, ReportConfig};
use reportgen::render::{write_series_csv, MarkdownRenderer, RenderConfig};
use reportgen::series::{PerformanceTimeSeries, DEFAULT_TIMESTAMP_COLUMN};
use reportgen::window::{Cadence, EventSource, WindowSpec};
use reportgen::{generate_report, ReportApi, SegmentResolver, SegmentSpec};

#[derive(Parser)]
#[command(name = "reportgen")]
#[command(about = "Model monitoring reports from a monitoring backend", long_about = None)]
struct Cli {
    /// Backend base URL
    #[arg(long, env = "REPORTGEN_URL", global = true)]
    url: Option<String>,
    /// Organization the API token belongs to
    #[arg(long, env = "REPORTGEN_ORG", global = true)]
    organization: Option<String>,
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a markdown report from a TOML report definition
    Generate {
        #[arg(long)]
        config: PathBuf,
        /// Overrides the output path of the report definition
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Compute one performance time series
    Series {
        #[arg(long)]
        project: String,
        #[arg(long)]
        model: String,
        #[arg(long, default_value = "accuracy")]
        metric: String,
        #[arg(long, default_value = "production")]
        dataset: String,
        #[arg(long, default_value = "1d")]
        interval: Cadence,
        #[arg(long, value_parser = parse_instant)]
        start: Option<chrono::DateTime<Utc>>,
        #[arg(long, value_parser = parse_instant)]
        end: Option<chrono::DateTime<Utc>>,
        #[arg(long)]
        lookback_days: Option<u32>,
        #[arg(long)]
        segment_column: Option<String>,
        #[arg(long, default_value = "all")]
        mode: String,
        #[arg(long)]
        top_n: Option<usize>,
        /// SQL condition applied to every point
        #[arg(long)]
        filter: Option<String>,
        /// Also score the model's reference dataset once per series
        #[arg(long)]
        baseline: bool,
        #[arg(long, default_value_t = 4)]
        max_concurrency: usize,
        /// Write the series as CSV instead of printing it
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Resolve a categorical segmentation into its filters
    Segments {
        #[arg(long)]
        project: String,
        #[arg(long)]
        model: String,
        #[arg(long, default_value = "production")]
        dataset: String,
        #[arg(long)]
        column: String,
        #[arg(long, default_value = "all")]
        mode: String,
        #[arg(long)]
        top_n: Option<usize>,
    },
}

fn connect(
    url: Option<String>,
    organization: Option<String>,
    timeout_secs: Option<u64>,
) -> anyhow::Result<HttpReportApi> {
    let token = std::env::var("REPORTGEN_API_TOKEN")
        .context("REPORTGEN_API_TOKEN must be set to a backend API token")?;
    let url = url.context("backend URL must be set with --url, REPORTGEN_URL or [backend] url")?;
    let organization = organization
        .context("organization must be set with --organization, REPORTGEN_ORG or [backend] organization")?;

    let mut config = ClientConfig::new(url, organization, token);
    if let Some(secs) = timeout_secs {
        config.timeout = Duration::from_secs(secs);
    }
    HttpReportApi::new(config).context("failed to build the backend client")
}

fn segment_spec(column: String, mode: String, top_n: Option<usize>) -> SegmentSpec {
    let spec = SegmentSpec::categorical(column, mode);
    match top_n {
        Some(n) => spec.with_top_n(n),
        None => spec,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Generate { config, out } => {
            let report = ReportConfig::load(&config)
                .with_context(|| format!("failed to read report definition {}", config.display()))?;
            let api = connect(
                cli.url.or_else(|| report.backend.url.clone()),
                cli.organization.or_else(|| report.backend.organization.clone()),
                cli.timeout_secs.or(report.backend.timeout_secs),
            )?;
            let out = out.unwrap_or_else(|| report.report.output.clone());

            let mut modules = report.modules();
            let renderer = MarkdownRenderer::new(RenderConfig::default());
            generate_report(&api, &mut modules, &renderer, &out).await?;
            println!("Report written to {}.", out.display());
        }
        Commands::Series {
            project,
            model,
            metric,
            dataset,
            interval,
            start,
            end,
            lookback_days,
            segment_column,
            mode,
            top_n,
            filter,
            baseline,
            max_concurrency,
            csv,
        } => {
            let api = connect(cli.url, cli.organization, cli.timeout_secs)?;
            let info = api
                .get_model_info(&project, &model)
                .await
                .with_context(|| format!("failed to load model {model}"))?;
            let timestamp_column = info
                .timestamp_column
                .clone()
                .unwrap_or_else(|| DEFAULT_TIMESTAMP_COLUMN.to_string());

            let window_spec = WindowSpec {
                start,
                end,
                lookback: lookback_days.map(|days| chrono::Duration::days(i64::from(days))),
            };
            let source = EventSource {
                dataset_id: &dataset,
                model_id: &model,
                timestamp_column: &timestamp_column,
            };
            let window = window_spec.resolve(&api, &project, source, Utc::now()).await?;

            let baseline_dataset = if baseline {
                Some(
                    info.reference_dataset()
                        .with_context(|| format!("model {model} has no reference dataset"))?
                        .to_string(),
                )
            } else {
                None
            };
            let mut engine = PerformanceTimeSeries::new(&project, info, &metric, &dataset, window, interval);
            engine.segment = segment_column.map(|column| segment_spec(column, mode, top_n));
            engine.filter = filter;
            engine.baseline_dataset = baseline_dataset;
            engine.options.max_concurrency = max_concurrency;

            let series = engine.compute(&api).await?;
            match csv {
                Some(path) => {
                    let file = std::fs::File::create(&path)
                        .with_context(|| format!("failed to create {}", path.display()))?;
                    write_series_csv(file, &series)?;
                    println!(
                        "Wrote {} intervals x {} series to {}.",
                        series.intervals.len(),
                        series.scores.len(),
                        path.display()
                    );
                }
                None => {
                    println!("{metric} of {model} on {dataset}, {window}, every {interval}:");
                    for (name, values) in &series.scores {
                        let cells: Vec<String> = values
                            .iter()
                            .map(|v| reportgen::content::format_score(*v))
                            .collect();
                        println!("- {name}: {}", cells.join(" "));
                    }
                    if let Some(baseline) = &series.baseline {
                        for (name, value) in baseline {
                            println!("- {name} baseline: {}", reportgen::content::format_score(*value));
                        }
                    }
                }
            }
            if series.failed_points() > 0 {
                println!("{} points could not be scored.", series.failed_points());
            }
        }
        Commands::Segments {
            project,
            model,
            dataset,
            column,
            mode,
            top_n,
        } => {
            let api = connect(cli.url, cli.organization, cli.timeout_secs)?;
            let info = api
                .get_model_info(&project, &model)
                .await
                .with_context(|| format!("failed to load model {model}"))?;
            let spec = segment_spec(column, mode, top_n);
            let segments = SegmentResolver::new(&api, &project, &dataset, &info)
                .resolve(&spec)
                .await?;
            if segments.is_empty() {
                println!("No segments resolved.");
                return Ok(());
            }
            for (label, predicate) in &segments {
                println!("{label}: {predicate}");
            }
        }
    }

    Ok(())
}
