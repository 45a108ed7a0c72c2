use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::AppError;
use crate::models::{AggregatedResponse, ExtractedProduct, PageContent, RawPage, SearchHit, SearchQuery};

/// Issues a query against a web search provider.
pub trait SearchProvider: Send + Sync + Clone {
    /// Returns hits in provider order. Any failure is a `SearchProviderError`.
    fn search(
        &self,
        terms: &str,
        max_results: usize,
    ) -> impl Future<Output = Result<Vec<SearchHit>, AppError>> + Send;
}

/// Retrieves raw content for one URL.
///
/// Implementations never retry; retry policy belongs to the crawl coordinator.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(
        &self,
        url: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<RawPage, AppError>> + Send;
}

/// Converts a fetched page into cleaned text. Must be deterministic.
pub trait ContentExtractor: Send + Sync + Clone {
    fn extract(&self, page: &RawPage) -> Result<PageContent, AppError>;
}

/// Turns cleaned page text into a product record via a language model.
pub trait Structurer: Send + Sync + Clone {
    fn structure(
        &self,
        cleaned_text: &str,
        url: &str,
    ) -> impl Future<Output = Result<ExtractedProduct, AppError>> + Send;

    /// Same as [`structure`](Self::structure), with the search result title
    /// offered as a guess at the product name. Ignored unless overridden.
    fn structure_with_hint(
        &self,
        cleaned_text: &str,
        url: &str,
        hint: &str,
    ) -> impl Future<Output = Result<ExtractedProduct, AppError>> + Send {
        let _ = hint;
        self.structure(cleaned_text, url)
    }
}

/// Object-safe entry point used by the RPC layer.
pub trait ProductSearch: Send + Sync {
    fn search_products(
        &self,
        query: SearchQuery,
        deadline: Instant,
    ) -> Pin<Box<dyn Future<Output = Result<AggregatedResponse, AppError>> + Send + '_>>;
}
