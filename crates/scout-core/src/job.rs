use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::AppError;
use crate::models::{ExtractedProduct, ItemResult, SearchHit};

/// Lifecycle state of a crawl job.
///
/// ```text
/// Pending -> Fetching -> Fetched -> Extracting -> Structuring -> Succeeded
///    ^          |                       |              |
///    +----------+-----------------------+--------------+   (retryable error)
///                                                          any non-terminal -> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlState {
    Pending,
    Fetching,
    Fetched,
    Extracting,
    Structuring,
    Succeeded,
    Failed,
}

impl CrawlState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlState::Pending => "pending",
            CrawlState::Fetching => "fetching",
            CrawlState::Fetched => "fetched",
            CrawlState::Extracting => "extracting",
            CrawlState::Structuring => "structuring",
            CrawlState::Succeeded => "succeeded",
            CrawlState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CrawlState::Succeeded | CrawlState::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: CrawlState) -> bool {
        use CrawlState::*;
        match (self, next) {
            (Succeeded | Failed, _) => false,
            (_, Failed) => true,
            (Pending, Fetching) => true,
            (Fetching, Fetched | Pending) => true,
            (Fetched, Extracting) => true,
            (Extracting, Structuring | Pending) => true,
            (Structuring, Succeeded | Pending) => true,
            _ => false,
        }
    }
}

impl fmt::Display for CrawlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Shape of the delay between retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    Exponential,
}

/// Retry policy shared by the fetch and structuring steps of a job.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retry budget: a job runs at most `max_attempts + 1` times.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(8),
            backoff: Backoff::Exponential,
        }
    }
}

impl RetryConfig {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            backoff: Backoff::Fixed,
        }
    }

    /// Calculate the delay before retry number `attempt` (1-indexed).
    ///
    /// Exponential: base, 2×base, 4×base, ... capped by `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Exponential => {
                let exp = attempt.saturating_sub(1).min(16);
                self.base_delay.saturating_mul(1 << exp)
            }
        };
        delay.min(self.max_delay)
    }
}

/// Configuration for the crawl worker pool.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub max_workers: usize,
    /// Timeout for a single fetch or structuring call.
    pub attempt_timeout: Duration,
    /// How long in-flight work may linger after the overall deadline.
    pub grace_period: Duration,
    pub retry: RetryConfig,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_workers: 3,
            attempt_timeout: Duration::from_secs(20),
            grace_period: Duration::from_secs(2),
            retry: RetryConfig::default(),
        }
    }
}

impl CrawlConfig {
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// One hit being driven through fetch → extract → structure.
#[derive(Debug, Clone)]
pub struct CrawlJob {
    pub hit: SearchHit,
    /// Number of retries already scheduled; starts at 0.
    pub attempt: u32,
    pub state: CrawlState,
    pub deadline: Instant,
    pub last_error: Option<AppError>,
}

impl CrawlJob {
    pub fn new(hit: SearchHit, deadline: Instant) -> Self {
        Self {
            hit,
            attempt: 0,
            state: CrawlState::Pending,
            deadline,
            last_error: None,
        }
    }

    pub fn rank(&self) -> usize {
        self.hit.rank
    }

    pub fn url(&self) -> &str {
        &self.hit.url
    }

    pub fn can_retry(&self, config: &RetryConfig) -> bool {
        self.attempt < config.max_attempts
    }

    pub(crate) fn advance(&mut self, next: CrawlState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal crawl transition {} -> {}",
            self.state,
            next
        );
        self.state = next;
    }

    /// Moves back to `Pending` for another attempt.
    pub(crate) fn schedule_retry(&mut self, error: AppError) {
        self.attempt += 1;
        self.last_error = Some(error);
        self.advance(CrawlState::Pending);
    }

    pub(crate) fn succeed(self, product: ExtractedProduct) -> CompletedJob {
        let mut job = self;
        job.advance(CrawlState::Succeeded);
        CompletedJob {
            rank: job.hit.rank,
            url: job.hit.url,
            attempt: job.attempt,
            state: job.state,
            result: ItemResult::Success(product),
        }
    }

    /// A deadline failure keeps the last attempt's error in its message.
    pub(crate) fn fail(self, error: AppError) -> CompletedJob {
        let mut job = self;
        job.advance(CrawlState::Failed);
        let message = match (&error, &job.last_error) {
            (AppError::DeadlineExceeded, Some(last)) => format!("{error} (last error: {last})"),
            _ => error.to_string(),
        };
        CompletedJob {
            rank: job.hit.rank,
            result: ItemResult::Failure {
                source_url: job.hit.url.clone(),
                kind: error.kind(),
                message,
            },
            url: job.hit.url,
            attempt: job.attempt,
            state: job.state,
        }
    }
}

/// A job that reached a terminal state.
#[derive(Debug, Clone)]
pub struct CompletedJob {
    pub rank: usize,
    pub url: String,
    pub attempt: u32,
    pub state: CrawlState,
    pub result: ItemResult,
}

impl CompletedJob {
    /// Failure record for a job that never reported back before the deadline.
    pub(crate) fn deadline_exceeded(hit: &SearchHit) -> Self {
        Self {
            rank: hit.rank,
            url: hit.url.clone(),
            attempt: 0,
            state: CrawlState::Failed,
            result: ItemResult::failure(&hit.url, &AppError::DeadlineExceeded),
        }
    }
}
