use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use scout_core::error::AppError;
use scout_core::testutil::{MockFetcher, MockSearch, MockStructurer, PRODUCT_HTML, make_hits};

use crate::integration::common::{
    TEST_API_KEY, body_json, build_app, search_request, setup_test_app, setup_test_app_no_auth,
};

#[tokio::test]
async fn health_returns_200() {
    let app = setup_test_app();

    let response = app
        .router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
}

#[tokio::test]
async fn openapi_document_lists_search_products() {
    let app = setup_test_app();

    let response = app
        .router
        .oneshot(
            Request::get("/api-docs/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert!(json["paths"]["/v1/search-products"]["post"].is_object());
    assert!(json["components"]["securitySchemes"]["bearer"].is_object());
}

#[tokio::test]
async fn unauthenticated_request_returns_401() {
    let app = setup_test_app();

    let response = app
        .router
        .oneshot(
            Request::post("/v1/search-products")
                .header("content-type", "application/json")
                .body(Body::from(json!({"query": "espresso machine"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["error"], "unauthorized");
    assert_eq!(app.search.call_count(), 0);
}

#[tokio::test]
async fn wrong_api_key_returns_401() {
    let app = setup_test_app();

    let response = app
        .router
        .oneshot(
            Request::post("/v1/search-products")
                .header("content-type", "application/json")
                .header("authorization", "Bearer wrong-key")
                .body(Body::from(json!({"query": "espresso machine"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn no_api_key_configured_allows_requests() {
    let app = setup_test_app_no_auth();

    let response = app
        .router
        .oneshot(
            Request::post("/v1/search-products")
                .header("content-type", "application/json")
                .body(
                    Body::from(json!({"query": "espresso machine", "max_results": 1}).to_string()),
                )
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn search_products_returns_ranked_items() {
    let app = setup_test_app();

    let response = app
        .router
        .oneshot(search_request(
            json!({"query": "espresso machine", "max_results": 3}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["query"], "espresso machine");
    assert_eq!(json["max_results"], 3);
    assert_eq!(json["total_requested"], 3);
    assert_eq!(json["total_succeeded"], 3);
    assert!(json["request_id"].is_string());

    let hits = make_hits(3);
    let items = json["items"].as_array().unwrap();
    assert_eq!(items.len(), 3);
    for (item, hit) in items.iter().zip(&hits) {
        assert_eq!(item["status"], "success");
        assert_eq!(item["source_url"], hit.url.as_str());
        assert_eq!(item["product"]["name"], "Mock Product");
        assert!(item.get("error_kind").is_none());
    }
}

#[tokio::test]
async fn partial_failure_is_reported_per_item() {
    let hits = make_hits(3);
    let fetcher = MockFetcher::new(PRODUCT_HTML).failing(
        &hits[1].url,
        AppError::HttpError {
            status: 404,
            url: hits[1].url.clone(),
        },
    );
    let app = build_app(
        MockSearch::with_hits(hits.clone()),
        fetcher,
        MockStructurer::new(),
        Some(TEST_API_KEY),
    );

    let response = app
        .router
        .oneshot(search_request(
            json!({"query": "espresso machine", "max_results": 3}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["total_requested"], 3);
    assert_eq!(json["total_succeeded"], 2);

    let failed = &json["items"][1];
    assert_eq!(failed["status"], "failure");
    assert_eq!(failed["error_kind"], "http_error");
    assert_eq!(failed["source_url"], hits[1].url.as_str());
    assert!(failed["message"].as_str().unwrap().contains("404"));
    assert!(failed.get("product").is_none());
}

#[tokio::test]
async fn zero_max_results_returns_400() {
    let app = setup_test_app();

    let response = app
        .router
        .oneshot(search_request(
            json!({"query": "espresso machine", "max_results": 0}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "validation_error");
    assert_eq!(app.search.call_count(), 0);
}

#[tokio::test]
async fn search_outage_returns_502() {
    let app = build_app(
        MockSearch::with_error(AppError::SearchProviderError("quota exceeded".into())),
        MockFetcher::new(PRODUCT_HTML),
        MockStructurer::new(),
        Some(TEST_API_KEY),
    );

    let response = app
        .router
        .oneshot(search_request(json!({"query": "espresso machine"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let json = body_json(response).await;
    assert_eq!(json["error"], "search_provider_error");
    assert!(app.fetcher.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn malformed_timeout_header_returns_400() {
    let app = setup_test_app();

    let mut request = search_request(json!({"query": "espresso machine"}));
    request
        .headers_mut()
        .insert("x-request-timeout-ms", "soon".parse().unwrap());

    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.search.call_count(), 0);
}

#[tokio::test]
async fn short_deadline_marks_unfinished_items() {
    let hits = make_hits(2);
    let fetcher = MockFetcher::new(PRODUCT_HTML).hanging(&hits[1].url);
    let app = build_app(
        MockSearch::with_hits(hits),
        fetcher,
        MockStructurer::new(),
        Some(TEST_API_KEY),
    );

    let mut request = search_request(json!({"query": "espresso machine", "max_results": 2}));
    request
        .headers_mut()
        .insert("x-request-timeout-ms", "300".parse().unwrap());

    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["total_requested"], 2);
    assert_eq!(json["total_succeeded"], 1);
    assert_eq!(json["items"][0]["status"], "success");
    assert_eq!(json["items"][1]["error_kind"], "deadline_exceeded");
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let app = setup_test_app();
    let huge = "espresso ".repeat(4096);

    let response = app
        .router
        .oneshot(search_request(json!({"query": huge})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(app.search.call_count(), 0);
}
