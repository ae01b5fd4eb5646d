//! Command-line interface for the stock analysis orchestrator

mod output;

use agent_core::{AnalysisRequest, Depth};
use agent_stock::{
    AlertMonitor, AlertRule, CacheStore, FileCache, HttpCollaborator, JsonRenderer,
    MarkdownRenderer, MemoryCache, ReportRenderer, StockConfig,
};
use agent_utils::{LogFormat, load_json_file};
use agent_workflow::{AnalysisWorkflow, BatchOrchestrator, BatchProgress, ProgressCallback};
use anyhow::{Context as _, bail};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "agent-cli", version)]
#[command(about = "Adaptive multi-agent stock analysis", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Base URL of the analysis service
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Directory rendered reports are written to
    #[arg(long, global = true)]
    report_dir: Option<PathBuf>,

    /// Persist the report cache to this file
    #[arg(long, global = true)]
    cache_path: Option<PathBuf>,

    /// Always analyse afresh
    #[arg(long, global = true)]
    no_cache: bool,

    /// JSON file with alert rules to evaluate against every report
    #[arg(long, global = true)]
    alerts: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze one ticker
    Analyze {
        ticker: String,

        /// Company name; defaults to the ticker
        #[arg(long)]
        company: Option<String>,

        #[arg(long, default_value = "standard")]
        depth: Depth,

        #[arg(long, value_enum, default_value_t = ReportFormat::Md)]
        format: ReportFormat,
    },

    /// Analyze many tickers under the worker budget
    Batch {
        /// JSON file holding an array of `{ "ticker", "company", "depth" }`
        #[arg(long, conflicts_with = "tickers")]
        file: Option<PathBuf>,

        /// Comma-separated tickers
        #[arg(long, value_delimiter = ',')]
        tickers: Vec<String>,

        #[arg(long, default_value = "standard")]
        depth: Depth,

        /// Maximum concurrent analyses
        #[arg(long)]
        workers: Option<usize>,

        #[arg(long, value_enum, default_value_t = ReportFormat::Md)]
        format: ReportFormat,

        /// Skip writing per-ticker reports
        #[arg(long)]
        summary_only: bool,
    },

    /// Probe the analysis service
    Health,

    /// Maintain the file-backed report cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum CacheAction {
    /// Drop expired entries
    Sweep,
    /// Drop every entry
    Clear,
    /// Show entry and hit counters
    Stats,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum ReportFormat {
    Md,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let app = agent_utils::Config::default().with_env();
    let log_format = if cli.json_logs {
        LogFormat::Json
    } else {
        app.log_format
    };
    agent_utils::init_tracing_with(log_format, &app.log_filter);

    let config = load_config(&cli)?;
    info!(environment = %app.environment, "starting agent-cli");

    match cli.command {
        Command::Analyze {
            ref ticker,
            ref company,
            depth,
            format,
        } => {
            let request = match company {
                Some(company) => AnalysisRequest::new(company.as_str(), ticker),
                None => AnalysisRequest::for_ticker(ticker),
            }
            .with_depth(depth);
            analyze(&cli, &config, request, format).await
        }
        Command::Batch {
            ref file,
            ref tickers,
            depth,
            workers,
            format,
            summary_only,
        } => {
            let requests = batch_requests(file.as_ref(), tickers, depth)?;
            let mut config = config.clone();
            if let Some(workers) = workers {
                config.worker_budget = workers;
                config.validate()?;
            }
            batch(&cli, &config, requests, format, summary_only).await
        }
        Command::Health => health(&config).await,
        Command::Cache { action } => cache(&config, action).await,
    }
}

/// Defaults, then the config file, then the environment, then flags
fn load_config(cli: &Cli) -> anyhow::Result<StockConfig> {
    let config = match &cli.config {
        Some(path) => StockConfig::from_file(path)?,
        None => StockConfig::default(),
    };
    let mut config = config.with_env()?;

    if let Some(endpoint) = &cli.endpoint {
        config.collaborator_endpoint = Some(endpoint.clone());
    }
    if let Some(dir) = &cli.report_dir {
        config.report_dir.clone_from(dir);
    }
    if let Some(path) = &cli.cache_path {
        config.cache_path = Some(path.clone());
    }
    if cli.no_cache {
        config.cache_enabled = false;
    }

    config.validate()?;
    Ok(config)
}

/// An unreadable cache file degrades to an in-memory cache for this run
async fn open_cache(config: &StockConfig) -> Arc<dyn CacheStore> {
    let Some(path) = &config.cache_path else {
        return Arc::new(MemoryCache::new());
    };
    match FileCache::open(path.clone()).await {
        Ok(cache) => Arc::new(cache),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cache file unusable, continuing with memory cache");
            Arc::new(MemoryCache::new())
        }
    }
}

async fn build_workflow(cli: &Cli, config: &StockConfig) -> anyhow::Result<AnalysisWorkflow> {
    let collaborator = HttpCollaborator::from_config(config)?;
    let mut builder = AnalysisWorkflow::builder()
        .collaborator(Arc::new(collaborator))
        .cache(open_cache(config).await)
        .config(config.clone());

    if let Some(path) = &cli.alerts {
        let rules: Vec<AlertRule> = load_json_file(path)?;
        info!(rules = rules.len(), "alert rules loaded");
        builder = builder.observer(Arc::new(AlertMonitor::new(rules)));
    }

    Ok(builder.build()?)
}

fn renderer(config: &StockConfig, format: ReportFormat) -> anyhow::Result<Box<dyn ReportRenderer>> {
    let renderer: Box<dyn ReportRenderer> = match format {
        ReportFormat::Md => Box::new(MarkdownRenderer::new(&config.report_dir)?),
        ReportFormat::Json => Box::new(JsonRenderer::new(&config.report_dir)),
    };
    Ok(renderer)
}

fn batch_requests(
    file: Option<&PathBuf>,
    tickers: &[String],
    depth: Depth,
) -> anyhow::Result<Vec<AnalysisRequest>> {
    let requests: Vec<AnalysisRequest> = match file {
        Some(path) => load_json_file(path)?,
        None => tickers
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(|t| AnalysisRequest::for_ticker(t).with_depth(depth))
            .collect(),
    };
    if requests.is_empty() {
        bail!("no tickers given; pass --tickers or --file");
    }
    Ok(requests)
}

async fn analyze(
    cli: &Cli,
    config: &StockConfig,
    request: AnalysisRequest,
    format: ReportFormat,
) -> anyhow::Result<()> {
    let workflow = build_workflow(cli, config).await?;
    let renderer = renderer(config, format)?;

    let report = workflow.run(&request).await;
    println!("{}", output::reports_table(std::slice::from_ref(&report)));

    let path = renderer
        .render_report(&report)
        .context("failed to write report")?;
    println!("Report written to {}", path.display());

    if !report.is_done() {
        bail!(
            "analysis of {} aborted: {}",
            report.ticker(),
            report.reason().unwrap_or("unknown reason")
        );
    }
    Ok(())
}

async fn batch(
    cli: &Cli,
    config: &StockConfig,
    requests: Vec<AnalysisRequest>,
    format: ReportFormat,
    summary_only: bool,
) -> anyhow::Result<()> {
    let workflow = Arc::new(build_workflow(cli, config).await?);
    let renderer = renderer(config, format)?;

    let progress: ProgressCallback = Arc::new(|p: &BatchProgress| {
        let eta = p
            .eta()
            .map_or_else(|| "-".to_string(), |eta| format!("{}s", eta.as_secs()));
        eprintln!(
            "[{}/{}] {:.0}% done, {} failed, {} running, eta {eta}",
            p.finished(),
            p.total,
            p.percentage,
            p.failed,
            p.in_progress
        );
    });
    let orchestrator = BatchOrchestrator::new(workflow, config).with_progress(progress);
    cancel_on_ctrl_c(orchestrator.cancellation_token());

    let summary = match orchestrator.run(requests).await {
        Ok(summary) => summary,
        Err(e) => {
            if let Some(summary) = e.summary() {
                println!("{}", output::failures_table(summary));
            }
            return Err(e.into());
        }
    };

    println!("{}", output::reports_table(summary.reports()));
    if !summary.failures().is_empty() {
        println!("{}", output::failures_table(&summary));
    }
    println!("{}", output::stats_table(&summary.stats()));

    if !summary_only {
        for report in summary.reports() {
            if let Err(e) = renderer.render_report(report) {
                warn!(ticker = report.ticker(), error = %e, "failed to write report");
            }
        }
    }
    let path = renderer
        .render_summary(&summary)
        .context("failed to write batch summary")?;
    println!("Summary written to {}", path.display());
    Ok(())
}

/// Stop dispatching new analyses on the first Ctrl-C
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, letting in-flight analyses finish");
            token.cancel();
        }
    });
}

async fn health(config: &StockConfig) -> anyhow::Result<()> {
    let collaborator = HttpCollaborator::from_config(config)?;
    let health = agent_core::AnalysisCollaborator::health(&collaborator).await;
    println!("{}: {health}", collaborator.base_url());
    Ok(())
}

async fn cache(config: &StockConfig, action: CacheAction) -> anyhow::Result<()> {
    let Some(path) = &config.cache_path else {
        bail!("no cache_path configured; only a file-backed cache outlives the process");
    };
    let cache = FileCache::open(path.clone()).await?;

    match action {
        CacheAction::Sweep => {
            let removed = cache.sweep().await?;
            println!("Removed {removed} expired entries, {} left", cache.len());
        }
        CacheAction::Clear => {
            cache.clear().await?;
            println!("Cache cleared");
        }
        CacheAction::Stats => {
            println!("{}", output::cache_table(path, &cache.stats()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_batch_tickers() {
        let cli = Cli::parse_from([
            "agent-cli",
            "batch",
            "--tickers",
            "aapl, msft,,NVDA",
            "--workers",
            "3",
            "--depth",
            "deep",
        ]);
        let Command::Batch {
            tickers,
            depth,
            workers,
            ..
        } = cli.command
        else {
            panic!("expected batch");
        };

        let requests = batch_requests(None, &tickers, depth).unwrap();
        let symbols: Vec<&str> = requests.iter().map(AnalysisRequest::ticker).collect();
        assert_eq!(symbols, vec!["AAPL", "MSFT", "NVDA"]);
        assert!(requests.iter().all(|r| r.depth() == Depth::Deep));
        assert_eq!(workers, Some(3));
    }

    #[test]
    fn test_empty_batch_is_refused() {
        assert!(batch_requests(None, &[], Depth::Standard).is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from([
            "agent-cli",
            "--endpoint",
            "http://localhost:9000",
            "--no-cache",
            "health",
        ]);
        let config = load_config(&cli).unwrap();
        assert_eq!(
            config.collaborator_endpoint.as_deref(),
            Some("http://localhost:9000")
        );
        assert!(!config.cache_enabled);
    }

    #[tokio::test]
    async fn test_corrupt_cache_file_falls_back_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports.json");
        std::fs::write(&path, "{not json").unwrap();
        let config = StockConfig {
            cache_path: Some(path),
            ..StockConfig::default()
        };

        let cache = open_cache(&config).await;

        assert!(cache.is_empty());
        let key = agent_stock::CacheKey::for_request(&AnalysisRequest::for_ticker("AAPL"));
        assert!(cache.get(&key).await.unwrap().is_none());
    }
}
