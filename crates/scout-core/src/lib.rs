pub mod cache;
pub mod coordinator;
pub mod error;
pub mod job;
pub mod job_queue;
pub mod models;
pub mod pipeline;
pub mod traits;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use cache::CachedStructurer;
pub use coordinator::{
    CrawlCoordinator, CrawlEvent, CrawlReport, CrawlReporter, TracingCrawlReporter,
};
pub use error::{AppError, ErrorKind};
pub use job::{Backoff, CompletedJob, CrawlConfig, CrawlJob, CrawlState, RetryConfig};
pub use job_queue::{Claim, JobQueue};
pub use models::{
    AggregatedResponse, ExtractedProduct, ItemResult, PageContent, RawPage, SearchHit,
    SearchQuery, compute_hash,
};
pub use pipeline::{MAX_RESULTS_CAP, Pipeline, PipelineConfig};
pub use traits::{ContentExtractor, Fetcher, ProductSearch, SearchProvider, Structurer};
