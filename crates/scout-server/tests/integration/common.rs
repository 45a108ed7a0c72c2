use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use http_body_util::BodyExt;

use scout_core::job::{CrawlConfig, RetryConfig};
use scout_core::pipeline::{Pipeline, PipelineConfig};
use scout_core::testutil::{
    MockExtractor, MockFetcher, MockSearch, MockStructurer, PRODUCT_HTML, make_hits,
};
use scout_server::routes;
use scout_server::state::AppState;

pub const TEST_API_KEY: &str = "test-secret-key";

pub struct TestApp {
    pub router: Router,
    pub search: MockSearch,
    pub fetcher: MockFetcher,
}

fn pipeline_config() -> PipelineConfig {
    PipelineConfig::default().with_crawl(
        CrawlConfig::default()
            .with_max_workers(3)
            .with_attempt_timeout(Duration::from_secs(1))
            .with_grace_period(Duration::from_millis(100))
            .with_retry(RetryConfig::fixed(1, Duration::from_millis(10))),
    )
}

/// Router over mock collaborators.
pub fn build_app(
    search: MockSearch,
    fetcher: MockFetcher,
    structurer: MockStructurer,
    api_key: Option<&str>,
) -> TestApp {
    let pipeline = Pipeline::new(
        search.clone(),
        fetcher.clone(),
        MockExtractor::passthrough(),
        structurer,
        pipeline_config(),
    );
    let state = Arc::new(AppState {
        searcher: Arc::new(pipeline),
        api_key: api_key.map(str::to_string),
        max_deadline: Duration::from_secs(5),
    });

    TestApp {
        router: routes::router(state),
        search,
        fetcher,
    }
}

/// Three healthy hits, auth enabled.
pub fn setup_test_app() -> TestApp {
    build_app(
        MockSearch::with_hits(make_hits(3)),
        MockFetcher::new(PRODUCT_HTML),
        MockStructurer::new(),
        Some(TEST_API_KEY),
    )
}

/// Three healthy hits, no API key configured.
pub fn setup_test_app_no_auth() -> TestApp {
    build_app(
        MockSearch::with_hits(make_hits(3)),
        MockFetcher::new(PRODUCT_HTML),
        MockStructurer::new(),
        None,
    )
}

pub fn search_request(body: serde_json::Value) -> Request<Body> {
    Request::post("/v1/search-products")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {TEST_API_KEY}"))
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}
