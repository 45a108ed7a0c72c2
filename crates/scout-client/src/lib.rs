pub mod cleaner;
pub mod fetcher;
pub mod llm;
pub mod search;

#[cfg(feature = "browser")]
pub mod browser_fetcher;

#[cfg(feature = "browser")]
pub use browser_fetcher::BrowserFetcher;
pub use cleaner::HtmdExtractor;
pub use fetcher::ReqwestFetcher;
pub use llm::OpenAiStructurer;
pub use search::GoogleSearchClient;
