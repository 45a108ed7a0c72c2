use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use tokio::time::Instant;
use tower_http::limit::RequestBodyLimitLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use scout_core::error::AppError;
use scout_core::models::SearchQuery;

use crate::auth::require_api_key;
use crate::dto::{HealthResponse, SearchProductsRequest, SearchProductsResponse};
use crate::error::ApiError;
use crate::openapi::ApiDoc;
use crate::state::AppState;

/// Caller-supplied deadline for one request, in milliseconds.
pub const REQUEST_TIMEOUT_HEADER: &str = "x-request-timeout-ms";

pub const MAX_BODY_BYTES: usize = 16 * 1024;

/// Build the full router with all routes and middleware.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/v1/search-products", post(search_products))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    let public = Router::new()
        .route("/health", get(health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    public
        .merge(api)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

/// Deadline budget for this request: the header value clamped to `max`, else `max`.
fn request_budget(headers: &HeaderMap, max: Duration) -> Result<Duration, AppError> {
    let Some(raw) = headers.get(REQUEST_TIMEOUT_HEADER) else {
        return Ok(max);
    };

    let millis = raw
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .ok_or_else(|| {
            AppError::ValidationError(format!(
                "{REQUEST_TIMEOUT_HEADER} must be a positive integer number of milliseconds"
            ))
        })?;

    Ok(Duration::from_millis(millis).min(max))
}

// ---------------------------------------------------------------------------
// SearchProducts
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/v1/search-products",
    request_body = SearchProductsRequest,
    params(
        ("x-request-timeout-ms" = Option<u64>, Header, description = "Request deadline in milliseconds, clamped to the server maximum"),
    ),
    responses(
        (status = 200, description = "Aggregated results, including per-item failures", body = SearchProductsResponse),
        (status = 400, description = "Invalid query or deadline header", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::dto::ErrorResponse),
        (status = 502, description = "Search provider failed", body = crate::dto::ErrorResponse),
    ),
    security(("bearer" = [])),
    tag = "search"
)]
pub async fn search_products(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<SearchProductsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let budget = request_budget(&headers, state.max_deadline)?;
    let deadline = Instant::now() + budget;
    let query = SearchQuery::new(body.query, body.max_results);

    tracing::debug!(
        terms = %query.terms,
        max_results = query.max_results,
        budget_ms = budget.as_millis() as u64,
        "SearchProducts received"
    );
    let response = state.searcher.search_products(query, deadline).await?;

    Ok(axum::Json(SearchProductsResponse::from(response)))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse),
    ),
    tag = "system"
)]
pub async fn health() -> impl IntoResponse {
    axum::Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}
