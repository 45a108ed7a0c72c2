use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use scout_client::llm::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use scout_client::{GoogleSearchClient, HtmdExtractor, OpenAiStructurer, ReqwestFetcher};
use scout_core::error::AppError;
use scout_core::job::{CrawlConfig, RetryConfig};
use scout_core::models::{AggregatedResponse, ItemResult, RawPage, SearchQuery};
use scout_core::pipeline::{Pipeline, PipelineConfig};
use scout_core::traits::Fetcher;

#[derive(Parser)]
#[command(name = "scout", version, about = "Search the web for a product and extract it")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search, crawl the top hits and extract structured product data
    Search {
        /// Free-text product query
        #[arg(short, long)]
        query: String,

        /// Number of search hits to crawl (capped at 10)
        #[arg(short = 'n', long, default_value_t = 5)]
        max_results: usize,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,

        /// Overall deadline for the whole request
        #[arg(long, default_value_t = 60)]
        deadline_secs: u64,

        /// Concurrent crawl workers
        #[arg(long, env = "SCOUT_MAX_WORKERS", default_value_t = 3)]
        workers: usize,

        /// Retries per URL after a transient failure
        #[arg(long, env = "SCOUT_MAX_ATTEMPTS", default_value_t = 2)]
        max_attempts: u32,

        /// Timeout for each fetch or model call
        #[arg(long, env = "SCOUT_ATTEMPT_TIMEOUT_SECS", default_value_t = 20)]
        attempt_timeout_secs: u64,

        /// Render pages in headless Chromium (requires the `browser` feature)
        #[arg(long, default_value_t = false)]
        browser: bool,

        /// Google Programmable Search API key
        #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
        google_api_key: String,

        /// Google Programmable Search engine id
        #[arg(long, env = "GOOGLE_SEARCH_ENGINE_ID")]
        google_engine_id: String,

        /// OpenAI-compatible API base URL
        #[arg(long, env = "SCOUT_LLM_BASE_URL", default_value = DEFAULT_BASE_URL)]
        llm_base_url: String,

        /// Model used for structuring
        #[arg(short, long, env = "SCOUT_LLM_MODEL", default_value = DEFAULT_MODEL)]
        model: String,

        /// API key for the model endpoint (not needed for local Ollama)
        #[arg(long, env = "SCOUT_LLM_API_KEY", hide_env_values = true)]
        llm_api_key: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
}

/// Page fetcher selected at startup.
#[derive(Clone)]
enum PageFetcher {
    Http(ReqwestFetcher),
    #[cfg(feature = "browser")]
    Browser(scout_client::BrowserFetcher),
}

impl PageFetcher {
    async fn build(browser: bool) -> Result<Self> {
        if !browser {
            return Ok(Self::Http(
                ReqwestFetcher::new().context("Failed to create HTTP client")?,
            ));
        }
        Self::launch_browser().await
    }

    #[cfg(feature = "browser")]
    async fn launch_browser() -> Result<Self> {
        let fetcher = scout_client::BrowserFetcher::launch()
            .await
            .context("Failed to launch headless browser")?;
        Ok(Self::Browser(fetcher))
    }

    #[cfg(not(feature = "browser"))]
    async fn launch_browser() -> Result<Self> {
        anyhow::bail!("--browser requires scout to be built with the `browser` feature")
    }
}

impl Fetcher for PageFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<RawPage, AppError> {
        match self {
            Self::Http(fetcher) => fetcher.fetch(url, timeout).await,
            #[cfg(feature = "browser")]
            Self::Browser(fetcher) => fetcher.fetch(url, timeout).await,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("scout=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Search {
            query,
            max_results,
            format,
            deadline_secs,
            workers,
            max_attempts,
            attempt_timeout_secs,
            browser,
            google_api_key,
            google_engine_id,
            llm_base_url,
            model,
            llm_api_key,
        } => {
            anyhow::ensure!(workers > 0, "--workers must be at least 1");
            anyhow::ensure!(attempt_timeout_secs > 0, "--attempt-timeout-secs must be at least 1");
            anyhow::ensure!(deadline_secs > 0, "--deadline-secs must be at least 1");

            let retry = RetryConfig {
                max_attempts,
                ..RetryConfig::default()
            };
            let config = PipelineConfig::default()
                .with_crawl(
                    CrawlConfig::default()
                        .with_max_workers(workers)
                        .with_attempt_timeout(Duration::from_secs(attempt_timeout_secs))
                        .with_retry(retry),
                )
                .with_request_deadline(Duration::from_secs(deadline_secs));

            let search = GoogleSearchClient::new(&google_api_key, &google_engine_id)?;
            let structurer = OpenAiStructurer::new(&llm_base_url, &model, llm_api_key.as_deref())?;
            let fetcher = PageFetcher::build(browser).await?;

            let response = cmd_search(
                Pipeline::new(search, fetcher, HtmdExtractor::new(), structurer, config),
                SearchQuery::new(query, max_results),
            )
            .await?;

            match format {
                OutputFormat::Json => print_json(&response)?,
                OutputFormat::Csv => print_csv(&response)?,
            }
        }
    }

    Ok(())
}

async fn cmd_search(
    pipeline: Pipeline<GoogleSearchClient, PageFetcher, HtmdExtractor, OpenAiStructurer>,
    query: SearchQuery,
) -> Result<AggregatedResponse> {
    let cancel = CancellationToken::new();
    let pipeline = pipeline.with_cancellation(cancel.clone());

    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; cancelling outstanding crawls");
            cancel.cancel();
        }
    });

    tracing::info!(terms = %query.terms, max_results = query.max_results, "Searching");
    let result = pipeline.run(query, pipeline.default_deadline()).await;
    watcher.abort();

    let response = result.map_err(|e| anyhow::anyhow!(e))?;
    tracing::info!(
        "Extracted {}/{} products in {} ms",
        response.total_succeeded,
        response.total_requested,
        response.elapsed_ms
    );
    Ok(response)
}

fn print_json(response: &AggregatedResponse) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, response)?;
    writeln!(stdout)?;
    Ok(())
}

#[derive(Serialize)]
struct CsvRow<'a> {
    rank: usize,
    status: &'static str,
    source_url: &'a str,
    name: Option<&'a str>,
    price: Option<&'a str>,
    description: Option<&'a str>,
    error_kind: Option<&'static str>,
    message: Option<&'a str>,
}

impl<'a> CsvRow<'a> {
    fn new(rank: usize, item: &'a ItemResult) -> Self {
        match item {
            ItemResult::Success(product) => Self {
                rank,
                status: "success",
                source_url: &product.source_url,
                name: Some(&product.name),
                price: product.price.as_deref(),
                description: product.description.as_deref(),
                error_kind: None,
                message: None,
            },
            ItemResult::Failure {
                source_url,
                kind,
                message,
            } => Self {
                rank,
                status: "failure",
                source_url,
                name: None,
                price: None,
                description: None,
                error_kind: Some(kind.as_str()),
                message: Some(message),
            },
        }
    }
}

fn print_csv(response: &AggregatedResponse) -> Result<()> {
    let mut writer = csv::Writer::from_writer(std::io::stdout().lock());
    for (rank, item) in response.items.iter().enumerate() {
        writer.serialize(CsvRow::new(rank, item))?;
    }
    writer.flush()?;
    Ok(())
}
