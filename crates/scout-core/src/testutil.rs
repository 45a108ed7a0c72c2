//! Test utilities: mock implementations of the pipeline traits.
//!
//! Mocks are scripted per URL. A URL can have a queue of one-shot replies
//! (popped in order) and a sticky reply used once the queue is empty.
//! Everything is shared through `Arc<Mutex<_>>` so clones handed to the
//! coordinator record into the same state the test asserts on.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::coordinator::{CrawlEvent, CrawlReporter};
use crate::error::AppError;
use crate::job::CrawlJob;
use crate::models::{ExtractedProduct, PageContent, RawPage, SearchHit};
use crate::traits::{ContentExtractor, Fetcher, SearchProvider, Structurer};

pub const PRODUCT_HTML: &str = "<html><head><title>Espresso Machine Pro</title></head>\
<body><h1>Espresso Machine Pro</h1><p>Price: $199.00</p>\
<p>Stainless steel 15-bar espresso machine with milk frother.</p></body></html>";

/// `n` hits on distinct hosts, ranked 0..n.
pub fn make_hits(n: usize) -> Vec<SearchHit> {
    (0..n)
        .map(|rank| SearchHit {
            url: format!("https://shop{rank}.example.com/product/{rank}"),
            title: format!("Product {rank}"),
            snippet: format!("Snippet for product {rank}"),
            rank,
        })
        .collect()
}

pub fn make_jobs(hits: &[SearchHit], deadline: Instant) -> Vec<CrawlJob> {
    hits.iter()
        .cloned()
        .map(|hit| CrawlJob::new(hit, deadline))
        .collect()
}

pub fn make_product(url: &str, name: &str) -> ExtractedProduct {
    ExtractedProduct {
        source_url: url.to_string(),
        name: name.to_string(),
        price: Some("$199.00".into()),
        description: None,
        attributes: BTreeMap::new(),
    }
}

// ---------------------------------------------------------------------------
// Scripts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Step<T> {
    Reply(Result<T, AppError>),
    Hang,
    /// Wait out the caller's timeout, then fail with `Timeout`.
    Expire,
}

#[derive(Debug)]
struct Script<T> {
    queued: HashMap<String, VecDeque<Step<T>>>,
    sticky: HashMap<String, Step<T>>,
}

impl<T> Default for Script<T> {
    fn default() -> Self {
        Self {
            queued: HashMap::new(),
            sticky: HashMap::new(),
        }
    }
}

impl<T: Clone> Script<T> {
    fn next(&mut self, url: &str) -> Option<Step<T>> {
        self.queued
            .get_mut(url)
            .and_then(VecDeque::pop_front)
            .or_else(|| self.sticky.get(url).cloned())
    }

    fn queue(&mut self, url: &str, replies: Vec<Result<T, AppError>>) {
        self.queued
            .entry(url.to_string())
            .or_default()
            .extend(replies.into_iter().map(Step::Reply));
    }

    fn stick(&mut self, url: &str, step: Step<T>) {
        self.sticky.insert(url.to_string(), step);
    }
}

async fn play<T>(
    step: Option<Step<T>>,
    timeout: Option<Duration>,
    default: impl FnOnce() -> T,
) -> Result<T, AppError> {
    match (step, timeout) {
        (None, _) => Ok(default()),
        (Some(Step::Reply(reply)), _) => reply,
        (Some(Step::Expire), Some(timeout)) => {
            tokio::time::sleep(timeout).await;
            Err(AppError::Timeout(timeout.as_millis() as u64))
        }
        (Some(Step::Hang | Step::Expire), _) => std::future::pending().await,
    }
}

fn count_calls(calls: &Mutex<Vec<String>>, url: &str) -> usize {
    calls.lock().unwrap().iter().filter(|c| *c == url).count()
}

// ---------------------------------------------------------------------------
// MockSearch
// ---------------------------------------------------------------------------

/// Mock search provider returning a fixed hit list or a fixed error.
#[derive(Clone)]
pub struct MockSearch {
    result: Result<Vec<SearchHit>, AppError>,
    pub calls: Arc<AtomicUsize>,
    pub last_request: Arc<Mutex<Option<(String, usize)>>>,
}

impl MockSearch {
    pub fn with_hits(hits: Vec<SearchHit>) -> Self {
        Self {
            result: Ok(hits),
            calls: Arc::new(AtomicUsize::new(0)),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_error(error: AppError) -> Self {
        Self {
            result: Err(error),
            ..Self::with_hits(Vec::new())
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SearchProvider for MockSearch {
    async fn search(&self, terms: &str, max_results: usize) -> Result<Vec<SearchHit>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some((terms.to_string(), max_results));
        self.result.clone()
    }
}

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher with per-URL scripts, latency, and an in-flight high-water mark.
#[derive(Clone)]
pub struct MockFetcher {
    default_html: Arc<String>,
    script: Arc<Mutex<Script<String>>>,
    latency: Arc<Mutex<HashMap<String, Duration>>>,
    pub calls: Arc<Mutex<Vec<String>>>,
    in_flight: Arc<AtomicUsize>,
    pub max_in_flight: Arc<AtomicUsize>,
}

impl MockFetcher {
    /// Every URL returns `html` unless scripted otherwise.
    pub fn new(html: &str) -> Self {
        Self {
            default_html: Arc::new(html.to_string()),
            script: Arc::default(),
            latency: Arc::default(),
            calls: Arc::default(),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// One-shot replies for `url`, consumed in order before any sticky reply.
    pub fn with_responses(self, url: &str, responses: Vec<Result<String, AppError>>) -> Self {
        self.script.lock().unwrap().queue(url, responses);
        self
    }

    /// Every call for `url` fails with `error`.
    pub fn failing(self, url: &str, error: AppError) -> Self {
        self.script
            .lock()
            .unwrap()
            .stick(url, Step::Reply(Err(error)));
        self
    }

    /// Every call for `url` never completes.
    pub fn hanging(self, url: &str) -> Self {
        self.script.lock().unwrap().stick(url, Step::Hang);
        self
    }

    /// Every call for `url` hangs until the timeout it was given, like a real
    /// HTTP client would.
    pub fn timing_out(self, url: &str) -> Self {
        self.script.lock().unwrap().stick(url, Step::Expire);
        self
    }

    pub fn with_latency(self, url: &str, latency: Duration) -> Self {
        self.latency
            .lock()
            .unwrap()
            .insert(url.to_string(), latency);
        self
    }

    pub fn calls_for(&self, url: &str) -> usize {
        count_calls(&self.calls, url)
    }
}

struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>, high_water: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        high_water.fetch_max(now, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<RawPage, AppError> {
        self.calls.lock().unwrap().push(url.to_string());
        let _guard = InFlight::enter(&self.in_flight, &self.max_in_flight);

        let latency = self.latency.lock().unwrap().get(url).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let step = self.script.lock().unwrap().next(url);
        let body = play(step, Some(timeout), || self.default_html.as_str().to_string()).await?;
        Ok(RawPage {
            url: url.to_string(),
            final_url: url.to_string(),
            status: 200,
            body,
            fetch_duration: latency.unwrap_or_default(),
        })
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

/// Mock extractor that passes the body through unchanged.
#[derive(Clone, Default)]
pub struct MockExtractor {
    errors: Arc<Mutex<HashMap<String, AppError>>>,
}

impl MockExtractor {
    pub fn passthrough() -> Self {
        Self::default()
    }

    /// Pages fetched from `url` fail extraction with `error`.
    pub fn failing(self, url: &str, error: AppError) -> Self {
        self.errors.lock().unwrap().insert(url.to_string(), error);
        self
    }
}

impl ContentExtractor for MockExtractor {
    fn extract(&self, page: &RawPage) -> Result<PageContent, AppError> {
        if let Some(error) = self.errors.lock().unwrap().get(&page.url) {
            return Err(error.clone());
        }
        Ok(PageContent {
            url: page.final_url.clone(),
            cleaned_text: page.body.clone(),
            fetch_duration_ms: page.fetch_duration.as_millis() as u64,
        })
    }
}

// ---------------------------------------------------------------------------
// MockStructurer
// ---------------------------------------------------------------------------

/// Mock structurer. Unscripted calls return a product named "Mock Product".
#[derive(Clone, Default)]
pub struct MockStructurer {
    script: Arc<Mutex<Script<ExtractedProduct>>>,
    pub calls: Arc<Mutex<Vec<String>>>,
    /// Hints received through `structure_with_hint`, in call order.
    pub hints: Arc<Mutex<Vec<String>>>,
}

impl MockStructurer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses(
        self,
        url: &str,
        responses: Vec<Result<ExtractedProduct, AppError>>,
    ) -> Self {
        self.script.lock().unwrap().queue(url, responses);
        self
    }

    /// One-shot errors for `url`, followed by the default product.
    pub fn with_errors(self, url: &str, errors: Vec<AppError>) -> Self {
        let responses = errors.into_iter().map(Err).collect();
        self.with_responses(url, responses)
    }

    pub fn failing(self, url: &str, error: AppError) -> Self {
        self.script
            .lock()
            .unwrap()
            .stick(url, Step::Reply(Err(error)));
        self
    }

    pub fn hanging(self, url: &str) -> Self {
        self.script.lock().unwrap().stick(url, Step::Hang);
        self
    }

    pub fn calls_for(&self, url: &str) -> usize {
        count_calls(&self.calls, url)
    }
}

impl Structurer for MockStructurer {
    async fn structure(&self, cleaned_text: &str, url: &str) -> Result<ExtractedProduct, AppError> {
        self.calls.lock().unwrap().push(url.to_string());
        let step = self.script.lock().unwrap().next(url);
        play(step, None, || {
            let mut product = make_product(url, "Mock Product");
            product
                .attributes
                .insert("text_length".into(), cleaned_text.len().to_string());
            product
        })
        .await
    }

    async fn structure_with_hint(
        &self,
        cleaned_text: &str,
        url: &str,
        hint: &str,
    ) -> Result<ExtractedProduct, AppError> {
        self.hints.lock().unwrap().push(hint.to_string());
        self.structure(cleaned_text, url).await
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Reporter that records the variant name of every event.
#[derive(Clone, Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CrawlReporter for MockReporter {
    fn report(&self, event: CrawlEvent<'_>) {
        let name = match event {
            CrawlEvent::WorkerStarted { .. } => "WorkerStarted",
            CrawlEvent::JobClaimed { .. } => "JobClaimed",
            CrawlEvent::JobRetrying { .. } => "JobRetrying",
            CrawlEvent::JobSucceeded { .. } => "JobSucceeded",
            CrawlEvent::JobFailed { .. } => "JobFailed",
            CrawlEvent::WorkerStopped { .. } => "WorkerStopped",
            CrawlEvent::DeadlineReached { .. } => "DeadlineReached",
        };
        self.events.lock().unwrap().push(name.to_string());
    }
}
