use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{AppError, ErrorKind};

/// A product search request: free-text terms plus a result ceiling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub terms: String,
    pub max_results: usize,
}

impl SearchQuery {
    pub fn new(terms: impl Into<String>, max_results: usize) -> Self {
        Self {
            terms: terms.into(),
            max_results,
        }
    }

    /// Rejects empty terms and a zero result ceiling.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.terms.trim().is_empty() {
            return Err(AppError::ValidationError(
                "query terms must not be empty".into(),
            ));
        }
        if self.max_results == 0 {
            return Err(AppError::ValidationError(
                "max_results must be a positive integer".into(),
            ));
        }
        Ok(())
    }
}

/// One ranked entry returned by the search provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
    /// 0-based position in the provider's ordering.
    pub rank: usize,
}

/// Raw fetch output for one URL.
#[derive(Debug, Clone)]
pub struct RawPage {
    /// URL that was requested.
    pub url: String,
    /// URL after following redirects.
    pub final_url: String,
    pub status: u16,
    pub body: String,
    pub fetch_duration: Duration,
}

/// Cleaned page text, ready for structuring.
#[derive(Debug, Clone)]
pub struct PageContent {
    pub url: String,
    pub cleaned_text: String,
    pub fetch_duration_ms: u64,
}

/// A structured product record produced by the language model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedProduct {
    pub source_url: String,
    pub name: String,
    pub price: Option<String>,
    pub description: Option<String>,
    /// Extra attributes such as brand or part number. Keys are unique.
    pub attributes: BTreeMap<String, String>,
}

/// Outcome of one crawl job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemResult {
    Success(ExtractedProduct),
    Failure {
        source_url: String,
        #[serde(rename = "error_kind")]
        kind: ErrorKind,
        message: String,
    },
}

impl ItemResult {
    pub fn failure(source_url: impl Into<String>, error: &AppError) -> Self {
        ItemResult::Failure {
            source_url: source_url.into(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ItemResult::Success(_))
    }

    pub fn source_url(&self) -> &str {
        match self {
            ItemResult::Success(product) => &product.source_url,
            ItemResult::Failure { source_url, .. } => source_url,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            ItemResult::Success(_) => None,
            ItemResult::Failure { kind, .. } => Some(*kind),
        }
    }
}

/// Final result of one `SearchProducts` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedResponse {
    pub request_id: Uuid,
    pub query: SearchQuery,
    /// One entry per crawled hit, ordered by the hit's rank.
    pub items: Vec<ItemResult>,
    pub total_requested: usize,
    pub total_succeeded: usize,
    pub elapsed_ms: u64,
    pub completed_at: DateTime<Utc>,
}

impl AggregatedResponse {
    pub fn build(
        request_id: Uuid,
        query: SearchQuery,
        items: Vec<ItemResult>,
        elapsed: Duration,
    ) -> Self {
        let total_succeeded = items.iter().filter(|i| i.is_success()).count();
        Self {
            request_id,
            query,
            total_requested: items.len(),
            total_succeeded,
            items,
            elapsed_ms: elapsed.as_millis() as u64,
            completed_at: Utc::now(),
        }
    }
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
