//! Bounded worker pool that drives crawl jobs to a terminal state.
//!
//! Each request gets its own [`JobQueue`]; `max_workers` tasks claim jobs in
//! rank order and run fetch → extract → structure for one attempt at a time.
//! Retryable failures go back on the queue with a backoff delay, so a job
//! waiting out its backoff never occupies a worker.
//!
//! The overall deadline bounds every network call. Once it passes, workers
//! stop claiming work, and anything still unfinished after the grace period
//! is aborted and reported as `DeadlineExceeded`.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::job::{CompletedJob, CrawlConfig, CrawlJob, CrawlState};
use crate::job_queue::{Claim, JobQueue};
use crate::models::{ExtractedProduct, ItemResult};
use crate::traits::{ContentExtractor, Fetcher, Structurer};

/// Events emitted by the coordinator for monitoring/logging.
#[derive(Debug, Clone)]
pub enum CrawlEvent<'a> {
    WorkerStarted {
        worker: usize,
    },
    JobClaimed {
        worker: usize,
        job: &'a CrawlJob,
    },
    JobRetrying {
        url: &'a str,
        attempt: u32,
        delay: Duration,
        error: &'a AppError,
    },
    JobSucceeded {
        url: &'a str,
        rank: usize,
        attempt: u32,
    },
    JobFailed {
        url: &'a str,
        rank: usize,
        attempt: u32,
        error: &'a AppError,
    },
    WorkerStopped {
        worker: usize,
    },
    DeadlineReached {
        unfinished: usize,
    },
}

/// Trait for receiving crawl events (decoupled logging).
pub trait CrawlReporter: Send + Sync {
    fn report(&self, event: CrawlEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingCrawlReporter;

impl CrawlReporter for TracingCrawlReporter {
    fn report(&self, event: CrawlEvent<'_>) {
        match event {
            CrawlEvent::WorkerStarted { worker } => {
                tracing::debug!(%worker, "Crawl worker started");
            }
            CrawlEvent::JobClaimed { worker, job } => {
                tracing::debug!(%worker, url = %job.hit.url, rank = job.hit.rank, attempt = job.attempt, "Job claimed");
            }
            CrawlEvent::JobRetrying {
                url,
                attempt,
                delay,
                error,
            } => {
                tracing::warn!(%url, %attempt, delay_ms = delay.as_millis() as u64, %error, "Retrying job");
            }
            CrawlEvent::JobSucceeded { url, rank, attempt } => {
                tracing::info!(%url, %rank, %attempt, "Job succeeded");
            }
            CrawlEvent::JobFailed {
                url,
                rank,
                attempt,
                error,
            } => {
                tracing::warn!(%url, %rank, %attempt, kind = %error.kind(), %error, "Job failed");
            }
            CrawlEvent::WorkerStopped { worker } => {
                tracing::debug!(%worker, "Crawl worker stopped");
            }
            CrawlEvent::DeadlineReached { unfinished } => {
                tracing::warn!(%unfinished, "Deadline reached with unfinished jobs");
            }
        }
    }
}

/// Terminal results of one crawl, ordered by rank.
#[derive(Debug, Default)]
pub struct CrawlReport {
    pub jobs: Vec<CompletedJob>,
}

impl CrawlReport {
    pub fn succeeded(&self) -> usize {
        self.jobs.iter().filter(|j| j.result.is_success()).count()
    }

    pub fn into_items(self) -> Vec<ItemResult> {
        self.jobs.into_iter().map(|j| j.result).collect()
    }
}

/// Runs crawl jobs through a fixed-size worker pool.
pub struct CrawlCoordinator<F, X, S, R = TracingCrawlReporter> {
    fetcher: F,
    extractor: X,
    structurer: S,
    config: CrawlConfig,
    reporter: Arc<R>,
    cancel: CancellationToken,
}

impl<F, X, S> CrawlCoordinator<F, X, S>
where
    F: Fetcher + 'static,
    X: ContentExtractor + 'static,
    S: Structurer + 'static,
{
    pub fn new(fetcher: F, extractor: X, structurer: S, config: CrawlConfig) -> Self {
        Self {
            fetcher,
            extractor,
            structurer,
            config,
            reporter: Arc::new(TracingCrawlReporter),
            cancel: CancellationToken::new(),
        }
    }
}

impl<F, X, S, R> CrawlCoordinator<F, X, S, R>
where
    F: Fetcher + 'static,
    X: ContentExtractor + 'static,
    S: Structurer + 'static,
    R: CrawlReporter + 'static,
{
    pub fn with_reporter<R2: CrawlReporter + 'static>(
        self,
        reporter: R2,
    ) -> CrawlCoordinator<F, X, S, R2> {
        CrawlCoordinator {
            fetcher: self.fetcher,
            extractor: self.extractor,
            structurer: self.structurer,
            config: self.config,
            reporter: Arc::new(reporter),
            cancel: self.cancel,
        }
    }

    /// Cancelling `token` ends every crawl early, as if its deadline had passed.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Drive every job to `Succeeded` or `Failed`.
    ///
    /// Returns one completed job per input job, ordered by rank, no later
    /// than the latest job deadline plus the grace period.
    pub async fn run(&self, jobs: Vec<CrawlJob>) -> CrawlReport {
        let Some(deadline) = jobs.iter().map(|j| j.deadline).max() else {
            return CrawlReport::default();
        };

        let hits: Vec<_> = jobs.iter().map(|j| j.hit.clone()).collect();
        let queue = Arc::new(JobQueue::new(jobs));
        let cancel = self.cancel.child_token();
        let (results_tx, mut results_rx) = mpsc::unbounded_channel();

        let pool_size = self.config.max_workers.max(1).min(hits.len());
        let mut workers = JoinSet::new();
        for id in 0..pool_size {
            let worker = Worker {
                id,
                fetcher: self.fetcher.clone(),
                extractor: self.extractor.clone(),
                structurer: self.structurer.clone(),
                config: self.config.clone(),
                queue: Arc::clone(&queue),
                reporter: Arc::clone(&self.reporter),
                cancel: cancel.clone(),
                results: results_tx.clone(),
            };
            workers.spawn(worker.run());
        }
        drop(results_tx);

        let hard_stop = deadline + self.config.grace_period;
        let joined = tokio::time::timeout_at(hard_stop, async {
            while workers.join_next().await.is_some() {}
        })
        .await;
        if joined.is_err() {
            cancel.cancel();
            workers.abort_all();
        }

        let mut completed = Vec::with_capacity(hits.len());
        while let Ok(done) = results_rx.try_recv() {
            completed.push(done);
        }
        for job in queue.drain() {
            completed.push(job.fail(AppError::DeadlineExceeded));
        }

        let seen: HashSet<(usize, String)> =
            completed.iter().map(|j| (j.rank, j.url.clone())).collect();
        let missing: Vec<_> = hits
            .iter()
            .filter(|hit| !seen.contains(&(hit.rank, hit.url.clone())))
            .map(CompletedJob::deadline_exceeded)
            .collect();
        if !missing.is_empty() {
            self.reporter.report(CrawlEvent::DeadlineReached {
                unfinished: missing.len(),
            });
        }
        completed.extend(missing);

        completed.sort_by_key(|j| j.rank);
        CrawlReport { jobs: completed }
    }
}

/// One member of the pool. Owns the job it is working on.
struct Worker<F, X, S, R> {
    id: usize,
    fetcher: F,
    extractor: X,
    structurer: S,
    config: CrawlConfig,
    queue: Arc<JobQueue>,
    reporter: Arc<R>,
    cancel: CancellationToken,
    results: mpsc::UnboundedSender<CompletedJob>,
}

impl<F, X, S, R> Worker<F, X, S, R>
where
    F: Fetcher,
    X: ContentExtractor,
    S: Structurer,
    R: CrawlReporter,
{
    async fn run(self) {
        self.reporter
            .report(CrawlEvent::WorkerStarted { worker: self.id });

        loop {
            if self.cancel.is_cancelled() {
                for job in self.queue.drain() {
                    self.complete(self.fail(job, AppError::DeadlineExceeded));
                }
                break;
            }

            match self.queue.claim(Instant::now()) {
                Claim::Ready(job) => {
                    if let Some(done) = self.process(job).await {
                        self.complete(done);
                    }
                }
                Claim::Wait(until) => {
                    tokio::select! {
                        () = tokio::time::sleep_until(until) => {}
                        () = self.queue.pushed() => {}
                        () = self.cancel.cancelled() => {}
                    }
                }
                Claim::Drained => break,
            }
        }

        self.reporter
            .report(CrawlEvent::WorkerStopped { worker: self.id });
    }

    fn complete(&self, done: CompletedJob) {
        // The receiver only disappears once the coordinator has given up on us.
        let _ = self.results.send(done);
    }

    /// Run one attempt. Returns `None` when the job was re-queued for retry.
    async fn process(&self, mut job: CrawlJob) -> Option<CompletedJob> {
        self.reporter.report(CrawlEvent::JobClaimed {
            worker: self.id,
            job: &job,
        });

        if Instant::now() >= job.deadline {
            return Some(self.fail(job, AppError::DeadlineExceeded));
        }

        match self.attempt(&mut job).await {
            Ok(product) => {
                self.reporter.report(CrawlEvent::JobSucceeded {
                    url: job.url(),
                    rank: job.rank(),
                    attempt: job.attempt,
                });
                Some(job.succeed(product))
            }
            Err(error) => self.handle_failure(job, error),
        }
    }

    async fn attempt(&self, job: &mut CrawlJob) -> Result<ExtractedProduct, AppError> {
        job.advance(CrawlState::Fetching);
        let timeout = self.step_timeout(job.deadline);
        let page = self
            .bounded(job.deadline, self.fetcher.fetch(job.url(), timeout))
            .await?;
        job.advance(CrawlState::Fetched);

        job.advance(CrawlState::Extracting);
        let content = self.extractor.extract(&page)?;
        tracing::debug!(
            url = %job.url(),
            final_url = %content.url,
            chars = content.cleaned_text.len(),
            fetch_ms = content.fetch_duration_ms,
            "Page cleaned"
        );

        job.advance(CrawlState::Structuring);
        self.bounded(
            job.deadline,
            self.structurer
                .structure_with_hint(&content.cleaned_text, job.url(), &job.hit.title),
        )
        .await
    }

    /// Per-call timeout: the attempt timeout, cut short by the deadline.
    fn step_timeout(&self, deadline: Instant) -> Duration {
        self.config
            .attempt_timeout
            .min(deadline.saturating_duration_since(Instant::now()))
    }

    /// Run one suspending step under the attempt timeout and the deadline.
    async fn bounded<T>(
        &self,
        deadline: Instant,
        step: impl Future<Output = Result<T, AppError>>,
    ) -> Result<T, AppError> {
        let step_deadline = (Instant::now() + self.config.attempt_timeout).min(deadline);
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(AppError::DeadlineExceeded),
            outcome = tokio::time::timeout_at(step_deadline, step) => match outcome {
                Ok(result) => result,
                Err(_) if Instant::now() >= deadline => Err(AppError::DeadlineExceeded),
                Err(_) => Err(AppError::Timeout(self.config.attempt_timeout.as_millis() as u64)),
            },
        }
    }

    fn handle_failure(&self, mut job: CrawlJob, error: AppError) -> Option<CompletedJob> {
        if !error.is_retryable() {
            return Some(self.fail(job, error));
        }
        // A collaborator honouring its own timeout fails on the same tick as the deadline.
        if Instant::now() >= job.deadline {
            job.last_error = Some(error);
            return Some(self.fail(job, AppError::DeadlineExceeded));
        }

        let retry = &self.config.retry;
        if !job.can_retry(retry) {
            return Some(self.fail(job, error));
        }

        let delay = retry.delay_for_attempt(job.attempt + 1);
        let ready_at = Instant::now() + delay;
        if ready_at >= job.deadline || self.cancel.is_cancelled() {
            // A retry that cannot start before the deadline is not worth scheduling.
            job.last_error = Some(error);
            return Some(self.fail(job, AppError::DeadlineExceeded));
        }

        self.reporter.report(CrawlEvent::JobRetrying {
            url: job.url(),
            attempt: job.attempt + 1,
            delay,
            error: &error,
        });
        job.schedule_retry(error);
        self.queue.push(job, ready_at);
        None
    }

    fn fail(&self, job: CrawlJob, error: AppError) -> CompletedJob {
        self.reporter.report(CrawlEvent::JobFailed {
            url: job.url(),
            rank: job.rank(),
            attempt: job.attempt,
            error: &error,
        });
        job.fail(error)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::error::ErrorKind;
    use crate::job::RetryConfig;
    use crate::testutil::*;

    fn coordinator(
        fetcher: MockFetcher,
        extractor: MockExtractor,
        structurer: MockStructurer,
        config: CrawlConfig,
    ) -> CrawlCoordinator<MockFetcher, MockExtractor, MockStructurer> {
        CrawlCoordinator::new(fetcher, extractor, structurer, config)
    }

    fn fast_config() -> CrawlConfig {
        CrawlConfig::default()
            .with_max_workers(3)
            .with_attempt_timeout(Duration::from_secs(1))
            .with_grace_period(Duration::from_millis(500))
            .with_retry(RetryConfig::fixed(2, Duration::from_millis(100)))
    }

    #[tokio::test(start_paused = true)]
    async fn results_are_ordered_by_rank_not_completion() {
        let hits = make_hits(3);
        let fetcher = MockFetcher::new(PRODUCT_HTML)
            .with_latency(&hits[0].url, Duration::from_millis(300))
            .with_latency(&hits[1].url, Duration::from_millis(200))
            .with_latency(&hits[2].url, Duration::from_millis(100));
        let coord = coordinator(
            fetcher,
            MockExtractor::passthrough(),
            MockStructurer::new(),
            fast_config(),
        );

        let report = coord
            .run(make_jobs(&hits, Instant::now() + Duration::from_secs(10)))
            .await;

        let ranks: Vec<_> = report.jobs.iter().map(|j| j.rank).collect();
        assert_eq!(ranks, vec![0, 1, 2]);
        assert_eq!(report.succeeded(), 3);
        assert!(report.jobs.iter().all(|j| j.state == CrawlState::Succeeded));
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_failure_exhausts_retry_budget() {
        let hits = make_hits(1);
        let fetcher = MockFetcher::new(PRODUCT_HTML).hanging(&hits[0].url);
        let coord = coordinator(
            fetcher.clone(),
            MockExtractor::passthrough(),
            MockStructurer::new(),
            fast_config(),
        );

        let report = coord
            .run(make_jobs(&hits, Instant::now() + Duration::from_secs(60)))
            .await;

        let job = &report.jobs[0];
        assert_eq!(job.attempt, 2);
        assert_eq!(job.result.error_kind(), Some(ErrorKind::TimeoutError));
        assert_eq!(fetcher.calls_for(&hits[0].url), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_then_success_records_one_retry() {
        let hits = make_hits(1);
        let structurer = MockStructurer::new()
            .with_errors(&hits[0].url, vec![AppError::RateLimited("429".into())]);
        let coord = coordinator(
            MockFetcher::new(PRODUCT_HTML),
            MockExtractor::passthrough(),
            structurer.clone(),
            fast_config(),
        );

        let report = coord
            .run(make_jobs(&hits, Instant::now() + Duration::from_secs(10)))
            .await;

        let job = &report.jobs[0];
        assert_eq!(job.state, CrawlState::Succeeded);
        assert_eq!(job.attempt, 1);
        assert_eq!(structurer.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn http_error_is_not_retried() {
        let hits = make_hits(1);
        let fetcher = MockFetcher::new(PRODUCT_HTML).failing(
            &hits[0].url,
            AppError::HttpError {
                status: 404,
                url: hits[0].url.clone(),
            },
        );
        let coord = coordinator(
            fetcher.clone(),
            MockExtractor::passthrough(),
            MockStructurer::new(),
            fast_config(),
        );

        let report = coord
            .run(make_jobs(&hits, Instant::now() + Duration::from_secs(10)))
            .await;

        assert_eq!(report.jobs[0].attempt, 0);
        assert_eq!(report.jobs[0].result.error_kind(), Some(ErrorKind::HttpError));
        assert_eq!(fetcher.calls_for(&hits[0].url), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_content_is_not_retried() {
        let hits = make_hits(2);
        let extractor = MockExtractor::passthrough().failing(
            &hits[1].url,
            AppError::EmptyContent {
                length: 12,
                minimum: 100,
            },
        );
        let fetcher = MockFetcher::new(PRODUCT_HTML);
        let coord = coordinator(
            fetcher.clone(),
            extractor,
            MockStructurer::new(),
            fast_config(),
        );

        let report = coord
            .run(make_jobs(&hits, Instant::now() + Duration::from_secs(10)))
            .await;

        assert!(report.jobs[0].result.is_success());
        assert_eq!(
            report.jobs[1].result.error_kind(),
            Some(ErrorKind::EmptyContentError)
        );
        assert_eq!(fetcher.calls_for(&hits[1].url), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unfinished_jobs_fail_with_deadline_exceeded() {
        let hits = make_hits(2);
        let fetcher = MockFetcher::new(PRODUCT_HTML).hanging(&hits[1].url);
        let config = fast_config().with_attempt_timeout(Duration::from_secs(30));
        let grace = config.grace_period;
        let coord = coordinator(
            fetcher,
            MockExtractor::passthrough(),
            MockStructurer::new(),
            config,
        );

        let start = Instant::now();
        let budget = Duration::from_secs(5);
        let report = coord.run(make_jobs(&hits, start + budget)).await;

        assert!(start.elapsed() <= budget + grace);
        assert!(report.jobs[0].result.is_success());
        assert_eq!(
            report.jobs[1].result.error_kind(),
            Some(ErrorKind::DeadlineExceeded)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_past_deadline_fails_immediately() {
        let hits = make_hits(1);
        let fetcher = MockFetcher::new(PRODUCT_HTML)
            .failing(&hits[0].url, AppError::ConnectionError("refused".into()));
        let config = fast_config().with_retry(RetryConfig::fixed(3, Duration::from_secs(10)));
        let coord = coordinator(
            fetcher.clone(),
            MockExtractor::passthrough(),
            MockStructurer::new(),
            config,
        );

        let start = Instant::now();
        let report = coord
            .run(make_jobs(&hits, start + Duration::from_secs(5)))
            .await;

        assert_eq!(
            report.jobs[0].result.error_kind(),
            Some(ErrorKind::DeadlineExceeded)
        );
        assert_eq!(report.jobs[0].attempt, 0);
        assert_eq!(fetcher.calls_for(&hits[0].url), 1);
        assert!(start.elapsed() < Duration::from_secs(1));
        let ItemResult::Failure { message, .. } = &report.jobs[0].result else {
            panic!("expected a failure");
        };
        assert!(message.contains("refused"), "{message}");
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_timeout_on_the_deadline_is_deadline_exceeded() {
        let hits = make_hits(1);
        let fetcher = MockFetcher::new(PRODUCT_HTML).timing_out(&hits[0].url);
        let config = fast_config()
            .with_attempt_timeout(Duration::from_secs(30))
            .with_retry(RetryConfig::fixed(0, Duration::from_millis(100)));
        let coord = coordinator(
            fetcher.clone(),
            MockExtractor::passthrough(),
            MockStructurer::new(),
            config,
        );

        let start = Instant::now();
        let report = coord
            .run(make_jobs(&hits, start + Duration::from_secs(5)))
            .await;

        assert_eq!(
            report.jobs[0].result.error_kind(),
            Some(ErrorKind::DeadlineExceeded)
        );
        assert_eq!(fetcher.calls_for(&hits[0].url), 1);
        assert!(start.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_timeout_before_the_deadline_stays_a_timeout() {
        let hits = make_hits(1);
        let fetcher = MockFetcher::new(PRODUCT_HTML).timing_out(&hits[0].url);
        let config = fast_config().with_retry(RetryConfig::fixed(0, Duration::from_millis(100)));
        let coord = coordinator(
            fetcher,
            MockExtractor::passthrough(),
            MockStructurer::new(),
            config,
        );

        let report = coord
            .run(make_jobs(&hits, Instant::now() + Duration::from_secs(60)))
            .await;

        assert_eq!(
            report.jobs[0].result,
            ItemResult::failure(&hits[0].url, &AppError::Timeout(1000))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cuts_off_structuring() {
        let hits = make_hits(1);
        let fetcher = MockFetcher::new(PRODUCT_HTML);
        let structurer = MockStructurer::new().hanging(&hits[0].url);
        let config = fast_config().with_attempt_timeout(Duration::from_secs(30));
        let grace = config.grace_period;
        let coord = coordinator(
            fetcher.clone(),
            MockExtractor::passthrough(),
            structurer.clone(),
            config,
        );

        let start = Instant::now();
        let budget = Duration::from_secs(5);
        let report = coord.run(make_jobs(&hits, start + budget)).await;

        assert!(start.elapsed() <= budget + grace);
        assert_eq!(report.jobs[0].state, CrawlState::Failed);
        assert_eq!(
            report.jobs[0].result.error_kind(),
            Some(ErrorKind::DeadlineExceeded)
        );
        assert_eq!(fetcher.calls_for(&hits[0].url), 1);
        assert_eq!(structurer.calls_for(&hits[0].url), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_model_is_retried() {
        let hits = make_hits(1);
        let fetcher = MockFetcher::new(PRODUCT_HTML);
        let structurer = MockStructurer::new()
            .with_errors(&hits[0].url, vec![AppError::Unavailable("503".into())]);
        let coord = coordinator(
            fetcher.clone(),
            MockExtractor::passthrough(),
            structurer.clone(),
            fast_config(),
        );

        let report = coord
            .run(make_jobs(&hits, Instant::now() + Duration::from_secs(10)))
            .await;

        assert_eq!(report.jobs[0].state, CrawlState::Succeeded);
        assert_eq!(report.jobs[0].attempt, 1);
        assert_eq!(structurer.calls_for(&hits[0].url), 2);
        assert_eq!(fetcher.calls_for(&hits[0].url), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_model_output_is_not_retried() {
        let hits = make_hits(1);
        let structurer = MockStructurer::new()
            .failing(&hits[0].url, AppError::Malformed("no JSON object".into()));
        let coord = coordinator(
            MockFetcher::new(PRODUCT_HTML),
            MockExtractor::passthrough(),
            structurer.clone(),
            fast_config(),
        );

        let report = coord
            .run(make_jobs(&hits, Instant::now() + Duration::from_secs(10)))
            .await;

        assert_eq!(report.jobs[0].attempt, 0);
        assert_eq!(report.jobs[0].result.error_kind(), Some(ErrorKind::Malformed));
        assert_eq!(structurer.calls_for(&hits[0].url), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hit_title_reaches_the_structurer() {
        let hits = make_hits(2);
        let structurer = MockStructurer::new();
        let coord = coordinator(
            MockFetcher::new(PRODUCT_HTML),
            MockExtractor::passthrough(),
            structurer.clone(),
            fast_config().with_max_workers(1),
        );

        coord
            .run(make_jobs(&hits, Instant::now() + Duration::from_secs(10)))
            .await;

        assert_eq!(
            *structurer.hints.lock().unwrap(),
            vec!["Product 0".to_string(), "Product 1".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pool_never_exceeds_max_workers() {
        let hits = make_hits(10);
        let mut fetcher = MockFetcher::new(PRODUCT_HTML);
        for hit in &hits {
            fetcher = fetcher.with_latency(&hit.url, Duration::from_millis(100));
        }
        let coord = coordinator(
            fetcher.clone(),
            MockExtractor::passthrough(),
            MockStructurer::new(),
            fast_config(),
        );

        let report = coord
            .run(make_jobs(&hits, Instant::now() + Duration::from_secs(30)))
            .await;

        assert_eq!(report.jobs.len(), 10);
        assert_eq!(report.succeeded(), 10);
        assert_eq!(fetcher.max_in_flight.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_fails_every_job() {
        let hits = make_hits(4);
        let token = CancellationToken::new();
        token.cancel();
        let fetcher = MockFetcher::new(PRODUCT_HTML);
        let coord = coordinator(
            fetcher.clone(),
            MockExtractor::passthrough(),
            MockStructurer::new(),
            fast_config(),
        )
        .with_cancellation(token);

        let report = coord
            .run(make_jobs(&hits, Instant::now() + Duration::from_secs(10)))
            .await;

        assert_eq!(report.jobs.len(), 4);
        assert!(
            report
                .jobs
                .iter()
                .all(|j| j.result.error_kind() == Some(ErrorKind::DeadlineExceeded))
        );
        assert_eq!(fetcher.calls.lock().unwrap().len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reporter_sees_retry_and_outcomes() {
        let hits = make_hits(2);
        let fetcher = MockFetcher::new(PRODUCT_HTML).with_responses(
            &hits[0].url,
            vec![Err(AppError::ConnectionError("reset".into()))],
        );
        let reporter = MockReporter::new();
        let events = Arc::clone(&reporter.events);
        let coord = coordinator(
            fetcher,
            MockExtractor::passthrough(),
            MockStructurer::new(),
            fast_config().with_max_workers(1),
        )
        .with_reporter(reporter);

        let report = coord
            .run(make_jobs(&hits, Instant::now() + Duration::from_secs(10)))
            .await;

        assert_eq!(report.succeeded(), 2);
        let events = events.lock().unwrap();
        assert_eq!(events.first().map(String::as_str), Some("WorkerStarted"));
        assert_eq!(events.iter().filter(|e| *e == "JobRetrying").count(), 1);
        assert_eq!(events.iter().filter(|e| *e == "JobSucceeded").count(), 2);
        assert_eq!(events.last().map(String::as_str), Some("WorkerStopped"));
    }

    #[tokio::test]
    async fn empty_job_list_returns_empty_report() {
        let coord = coordinator(
            MockFetcher::new(PRODUCT_HTML),
            MockExtractor::passthrough(),
            MockStructurer::new(),
            fast_config(),
        );
        let report = coord.run(Vec::new()).await;
        assert!(report.jobs.is_empty());
    }
}
