use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use scout_client::{GoogleSearchClient, HtmdExtractor, OpenAiStructurer, ReqwestFetcher};
use scout_core::{CachedStructurer, Pipeline};
use scout_server::config::ServerConfig;
use scout_server::routes;
use scout_server::state::AppState;

const CACHE_TTL: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("scout=info".parse()?))
        .with_target(false)
        .init();

    let config = ServerConfig::from_env()?;
    let shutdown = CancellationToken::new();

    let search = GoogleSearchClient::new(&config.google_api_key, &config.google_engine_id)?;
    let structurer = OpenAiStructurer::new(
        &config.llm_base_url,
        &config.llm_model,
        config.llm_api_key.as_deref(),
    )?;
    let pipeline = Pipeline::new(
        search,
        ReqwestFetcher::new()?,
        HtmdExtractor::new(),
        CachedStructurer::new(structurer, config.cache_capacity, CACHE_TTL),
        config.pipeline.clone(),
    )
    .with_cancellation(shutdown.clone());

    if config.api_key.is_none() {
        tracing::warn!("SCOUT_SERVER_API_KEY not set; /v1 endpoints accept unauthenticated requests");
    }
    tracing::info!(
        model = %config.llm_model,
        llm = %config.llm_base_url,
        workers = config.pipeline.crawl.max_workers,
        deadline_secs = config.pipeline.request_deadline.as_secs(),
        "Pipeline configured"
    );

    let state = Arc::new(AppState {
        searcher: Arc::new(pipeline),
        api_key: config.api_key.clone(),
        max_deadline: config.pipeline.request_deadline,
    });

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {addr}");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    Ok(())
}

/// Resolves on Ctrl-C and cancels every in-flight crawl.
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl-C handler: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
    shutdown.cancel();
}
