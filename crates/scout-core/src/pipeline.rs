use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::coordinator::{CrawlCoordinator, CrawlReporter, TracingCrawlReporter};
use crate::error::AppError;
use crate::job::{CrawlConfig, CrawlJob};
use crate::models::{AggregatedResponse, SearchHit, SearchQuery};
use crate::traits::{ContentExtractor, Fetcher, ProductSearch, SearchProvider, Structurer};

/// Hard ceiling of the search provider.
pub const MAX_RESULTS_CAP: usize = 10;

/// Configuration for one [`Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub crawl: CrawlConfig,
    /// `max_results` above this is clamped, not rejected.
    pub max_results_cap: usize,
    /// Deadline applied when the caller does not supply one.
    pub request_deadline: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            crawl: CrawlConfig::default(),
            max_results_cap: MAX_RESULTS_CAP,
            request_deadline: Duration::from_secs(60),
        }
    }
}

impl PipelineConfig {
    pub fn with_crawl(mut self, crawl: CrawlConfig) -> Self {
        self.crawl = crawl;
        self
    }

    pub fn with_max_results_cap(mut self, cap: usize) -> Self {
        self.max_results_cap = cap.clamp(1, MAX_RESULTS_CAP);
        self
    }

    pub fn with_request_deadline(mut self, deadline: Duration) -> Self {
        self.request_deadline = deadline;
        self
    }
}

/// Search → crawl → aggregate for one query.
///
/// Only an invalid query or a failed search aborts a run. Every per-page
/// failure ends up as an item in an otherwise successful response.
pub struct Pipeline<P, F, X, S, R = TracingCrawlReporter> {
    search: P,
    coordinator: CrawlCoordinator<F, X, S, R>,
    config: PipelineConfig,
    cancel: CancellationToken,
}

impl<P, F, X, S> Pipeline<P, F, X, S>
where
    P: SearchProvider,
    F: Fetcher + 'static,
    X: ContentExtractor + 'static,
    S: Structurer + 'static,
{
    pub fn new(search: P, fetcher: F, extractor: X, structurer: S, config: PipelineConfig) -> Self {
        let coordinator = CrawlCoordinator::new(fetcher, extractor, structurer, config.crawl.clone());
        Self {
            search,
            coordinator,
            config,
            cancel: CancellationToken::new(),
        }
    }
}

impl<P, F, X, S, R> Pipeline<P, F, X, S, R>
where
    P: SearchProvider,
    F: Fetcher + 'static,
    X: ContentExtractor + 'static,
    S: Structurer + 'static,
    R: CrawlReporter + 'static,
{
    pub fn with_reporter<R2: CrawlReporter + 'static>(
        self,
        reporter: R2,
    ) -> Pipeline<P, F, X, S, R2> {
        Pipeline {
            search: self.search,
            coordinator: self.coordinator.with_reporter(reporter),
            config: self.config,
            cancel: self.cancel,
        }
    }

    /// Cancelling `token` stops every in-flight request as if its deadline passed.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.coordinator = self.coordinator.with_cancellation(token.clone());
        self.cancel = token;
        self
    }

    /// Deadline for a request that starts now and supplies no deadline of its own.
    pub fn default_deadline(&self) -> Instant {
        Instant::now() + self.config.request_deadline
    }

    /// Run one query to completion.
    ///
    /// `deadline` bounds both the search call and the crawl. The response holds
    /// one item per crawled hit, ordered by rank.
    pub async fn run(
        &self,
        query: SearchQuery,
        deadline: Instant,
    ) -> Result<AggregatedResponse, AppError> {
        query.validate()?;

        let started = Instant::now();
        let request_id = Uuid::new_v4();
        let limit = query.max_results.min(self.config.max_results_cap);
        let query = SearchQuery::new(query.terms, limit);
        tracing::info!(%request_id, terms = %query.terms, max_results = limit, "Search started");

        let hits = self.search_hits(&query, deadline).await.inspect_err(|e| {
            tracing::error!(%request_id, error = %e, "Search failed");
        })?;
        tracing::info!(%request_id, hits = hits.len(), "Search returned hits");

        let jobs = hits
            .into_iter()
            .map(|hit| CrawlJob::new(hit, deadline))
            .collect();
        let report = self.coordinator.run(jobs).await;

        let response =
            AggregatedResponse::build(request_id, query, report.into_items(), started.elapsed());
        tracing::info!(
            %request_id,
            total_requested = response.total_requested,
            total_succeeded = response.total_succeeded,
            elapsed_ms = response.elapsed_ms,
            "Search completed"
        );
        Ok(response)
    }

    async fn search_hits(
        &self,
        query: &SearchQuery,
        deadline: Instant,
    ) -> Result<Vec<SearchHit>, AppError> {
        let search = self.search.search(&query.terms, query.max_results);
        let outcome = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                return Err(AppError::SearchProviderError("search cancelled".into()));
            }
            outcome = tokio::time::timeout_at(deadline, search) => outcome,
        };

        let mut hits = match outcome {
            Ok(Ok(hits)) => hits,
            Ok(Err(AppError::SearchProviderError(msg))) => {
                return Err(AppError::SearchProviderError(msg));
            }
            Ok(Err(other)) => return Err(AppError::SearchProviderError(other.to_string())),
            Err(_) => {
                return Err(AppError::SearchProviderError(
                    "search did not complete before the request deadline".into(),
                ));
            }
        };

        hits.sort_by_key(|h| h.rank);
        hits.truncate(query.max_results);
        Ok(hits)
    }
}

impl<P, F, X, S, R> ProductSearch for Pipeline<P, F, X, S, R>
where
    P: SearchProvider,
    F: Fetcher + 'static,
    X: ContentExtractor + 'static,
    S: Structurer + 'static,
    R: CrawlReporter + 'static,
{
    fn search_products(
        &self,
        query: SearchQuery,
        deadline: Instant,
    ) -> Pin<Box<dyn Future<Output = Result<AggregatedResponse, AppError>> + Send + '_>> {
        Box::pin(self.run(query, deadline))
    }
}
