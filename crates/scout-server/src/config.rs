use std::str::FromStr;
use std::time::Duration;

use scout_client::llm::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use scout_core::AppError;
use scout_core::job::{CrawlConfig, RetryConfig};
use scout_core::pipeline::{MAX_RESULTS_CAP, PipelineConfig};

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_CACHE_CAPACITY: u64 = 1_000;

/// Server configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Bearer token for `/v1/*` (None = auth disabled).
    pub api_key: Option<String>,
    pub google_api_key: String,
    pub google_engine_id: String,
    pub llm_base_url: String,
    pub llm_model: String,
    pub llm_api_key: Option<String>,
    pub cache_capacity: u64,
    pub pipeline: PipelineConfig,
}

impl ServerConfig {
    /// Read configuration from environment variables.
    ///
    /// - `GOOGLE_API_KEY`, `GOOGLE_SEARCH_ENGINE_ID` (required)
    /// - `SCOUT_SERVER_PORT` (default 3000), `SCOUT_SERVER_API_KEY` (optional)
    /// - `SCOUT_LLM_BASE_URL`, `SCOUT_LLM_MODEL`, `SCOUT_LLM_API_KEY`
    /// - `SCOUT_MAX_WORKERS`, `SCOUT_ATTEMPT_TIMEOUT_SECS`, `SCOUT_MAX_ATTEMPTS`,
    ///   `SCOUT_BACKOFF_MS`, `SCOUT_REQUEST_DEADLINE_SECS`, `SCOUT_GRACE_MS`,
    ///   `SCOUT_MAX_SEARCH_RESULTS`, `SCOUT_CACHE_CAPACITY`
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let env = Env(lookup);

        let defaults = CrawlConfig::default();
        let mut retry = RetryConfig::default();
        retry.max_attempts = env.parse("SCOUT_MAX_ATTEMPTS", retry.max_attempts)?;
        let backoff_ms = env.parse("SCOUT_BACKOFF_MS", retry.base_delay.as_millis() as u64)?;
        retry.base_delay = Duration::from_millis(backoff_ms);
        retry.max_delay = retry.max_delay.max(retry.base_delay);

        let crawl = CrawlConfig::default()
            .with_max_workers(env.positive("SCOUT_MAX_WORKERS", defaults.max_workers)?)
            .with_attempt_timeout(Duration::from_secs(env.positive(
                "SCOUT_ATTEMPT_TIMEOUT_SECS",
                defaults.attempt_timeout.as_secs(),
            )?))
            .with_grace_period(Duration::from_millis(
                env.parse("SCOUT_GRACE_MS", defaults.grace_period.as_millis() as u64)?,
            ))
            .with_retry(retry);

        let base = PipelineConfig::default();
        let pipeline = PipelineConfig::default()
            .with_crawl(crawl)
            .with_max_results_cap(env.positive("SCOUT_MAX_SEARCH_RESULTS", MAX_RESULTS_CAP)?)
            .with_request_deadline(Duration::from_secs(env.positive(
                "SCOUT_REQUEST_DEADLINE_SECS",
                base.request_deadline.as_secs(),
            )?));

        Ok(Self {
            port: env.parse("SCOUT_SERVER_PORT", DEFAULT_PORT)?,
            api_key: env.optional("SCOUT_SERVER_API_KEY"),
            google_api_key: env.required("GOOGLE_API_KEY")?,
            google_engine_id: env.required("GOOGLE_SEARCH_ENGINE_ID")?,
            llm_base_url: env
                .optional("SCOUT_LLM_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            llm_model: env
                .optional("SCOUT_LLM_MODEL")
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            llm_api_key: env.optional("SCOUT_LLM_API_KEY"),
            cache_capacity: env.parse("SCOUT_CACHE_CAPACITY", DEFAULT_CACHE_CAPACITY)?,
            pipeline,
        })
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, AppError> {
        self.optional(key)
            .ok_or_else(|| AppError::ConfigError(format!("{key} not set. Required for search.")))
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T, AppError> {
        match self.optional(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|_| {
                AppError::ConfigError(format!("Invalid {key} '{raw}': must be a number"))
            }),
        }
    }

    fn positive<T: FromStr + PartialOrd + Default>(
        &self,
        key: &str,
        default: T,
    ) -> Result<T, AppError> {
        let value = self.parse(key, default)?;
        if value <= T::default() {
            return Err(AppError::ConfigError(format!("{key} must be at least 1")));
        }
        Ok(value)
    }
}
