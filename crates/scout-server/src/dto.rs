use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use scout_core::models::{AggregatedResponse, ExtractedProduct, ItemResult};

// ---------------------------------------------------------------------------
// SearchProducts
// ---------------------------------------------------------------------------

fn default_max_results() -> usize {
    5
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SearchProductsRequest {
    /// Free-text product query.
    pub query: String,
    /// Number of search hits to crawl (clamped to the server's cap).
    #[serde(default = "default_max_results")]
    #[schema(default = 5, minimum = 1)]
    pub max_results: usize,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SearchProductsResponse {
    pub request_id: Uuid,
    pub query: String,
    pub max_results: usize,
    pub total_requested: usize,
    pub total_succeeded: usize,
    pub elapsed_ms: u64,
    pub completed_at: DateTime<Utc>,
    /// One entry per crawled hit, in search-rank order.
    pub items: Vec<ItemResponse>,
}

impl From<AggregatedResponse> for SearchProductsResponse {
    fn from(response: AggregatedResponse) -> Self {
        Self {
            request_id: response.request_id,
            query: response.query.terms,
            max_results: response.query.max_results,
            total_requested: response.total_requested,
            total_succeeded: response.total_succeeded,
            elapsed_ms: response.elapsed_ms,
            completed_at: response.completed_at,
            items: response.items.into_iter().map(ItemResponse::from).collect(),
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ItemResponse {
    /// `success` or `failure`.
    pub status: String,
    pub source_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<ProductResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<ItemResult> for ItemResponse {
    fn from(item: ItemResult) -> Self {
        match item {
            ItemResult::Success(product) => Self {
                status: "success".to_string(),
                source_url: product.source_url.clone(),
                product: Some(product.into()),
                error_kind: None,
                message: None,
            },
            ItemResult::Failure {
                source_url,
                kind,
                message,
            } => Self {
                status: "failure".to_string(),
                source_url,
                product: None,
                error_kind: Some(kind.as_str().to_string()),
                message: Some(message),
            },
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ProductResponse {
    pub name: String,
    pub price: Option<String>,
    pub description: Option<String>,
    pub attributes: BTreeMap<String, String>,
}

impl From<ExtractedProduct> for ProductResponse {
    fn from(product: ExtractedProduct) -> Self {
        Self {
            name: product.name,
            price: product.price,
            description: product.description,
            attributes: product.attributes,
        }
    }
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use scout_core::error::AppError;

    use super::*;

    #[test]
    fn failure_item_omits_product() {
        let item = ItemResponse::from(ItemResult::failure(
            "https://shop.example.com/p",
            &AppError::Timeout(20_000),
        ));
        let json = serde_json::to_value(item).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["error_kind"], "timeout_error");
        assert!(json.get("product").is_none());
    }

    #[test]
    fn success_item_omits_error_fields() {
        let product = ExtractedProduct {
            source_url: "https://shop.example.com/p".into(),
            name: "Espresso Pro".into(),
            price: None,
            description: None,
            attributes: BTreeMap::from([("brand".to_string(), "Brewmaster".to_string())]),
        };
        let json = serde_json::to_value(ItemResponse::from(ItemResult::Success(product))).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["product"]["attributes"]["brand"], "Brewmaster");
        assert!(json.get("error_kind").is_none());
        assert!(json.get("message").is_none());
    }
}
