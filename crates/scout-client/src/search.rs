use std::time::Duration;

use reqwest::Client;
use scout_core::error::AppError;
use scout_core::models::SearchHit;
use scout_core::traits::SearchProvider;
use serde::Deserialize;
use url::Url;

pub const GOOGLE_SEARCH_ENDPOINT: &str = "https://customsearch.googleapis.com/customsearch/v1";

/// Google returns at most this many results per call.
pub const GOOGLE_MAX_RESULTS: usize = 10;

const SEARCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Google Programmable Search (Custom Search JSON API) client.
#[derive(Clone)]
pub struct GoogleSearchClient {
    client: Client,
    endpoint: String,
    api_key: String,
    engine_id: String,
}

impl GoogleSearchClient {
    pub fn new(api_key: &str, engine_id: &str) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(SEARCH_TIMEOUT)
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to build search client: {e}")))?;
        Ok(Self::with_client(client, api_key, engine_id))
    }

    pub fn with_client(client: Client, api_key: &str, engine_id: &str) -> Self {
        Self {
            client,
            endpoint: GOOGLE_SEARCH_ENDPOINT.to_string(),
            api_key: api_key.to_string(),
            engine_id: engine_id.to_string(),
        }
    }

    /// Point the client at a different endpoint (proxies, tests).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn request_url(&self, terms: &str, max_results: usize) -> Result<Url, AppError> {
        let num = max_results.clamp(1, GOOGLE_MAX_RESULTS).to_string();
        Url::parse_with_params(
            &self.endpoint,
            &[
                ("key", self.api_key.as_str()),
                ("cx", self.engine_id.as_str()),
                ("q", terms),
                ("num", num.as_str()),
            ],
        )
        .map_err(|e| AppError::SearchProviderError(format!("Invalid search endpoint: {e}")))
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Deserialize)]
struct SearchItem {
    link: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
}

#[derive(Deserialize)]
struct GoogleError {
    error: GoogleErrorDetail,
}

#[derive(Deserialize)]
struct GoogleErrorDetail {
    message: String,
}

fn into_hits(response: SearchResponse, max_results: usize) -> Vec<SearchHit> {
    response
        .items
        .into_iter()
        .filter_map(|item| {
            let link = item.link.filter(|l| !l.trim().is_empty())?;
            Some((link, item.title, item.snippet))
        })
        .take(max_results)
        .enumerate()
        .map(|(rank, (url, title, snippet))| SearchHit {
            url,
            title,
            snippet,
            rank,
        })
        .collect()
}

impl SearchProvider for GoogleSearchClient {
    async fn search(&self, terms: &str, max_results: usize) -> Result<Vec<SearchHit>, AppError> {
        let url = self.request_url(terms, max_results)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::SearchProviderError(format!("Search request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<GoogleError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(AppError::SearchProviderError(format!(
                "HTTP {}: {message}",
                status.as_u16()
            )));
        }

        let parsed: SearchResponse = response.json().await.map_err(|e| {
            AppError::SearchProviderError(format!("Failed to decode search response: {e}"))
        })?;

        let hits = into_hits(parsed, max_results.min(GOOGLE_MAX_RESULTS));
        tracing::debug!(%terms, hits = hits.len(), "Search completed");
        Ok(hits)
    }
}
