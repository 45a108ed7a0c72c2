use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::openapi::{ComponentsBuilder, OpenApi as OpenApiDocument};
use utoipa::{Modify, OpenApi};

use crate::dto::{
    ErrorResponse, HealthResponse, ItemResponse, ProductResponse, SearchProductsRequest,
    SearchProductsResponse,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Scout API",
        description = "SearchProducts: web search, page crawl and LLM structuring in one call."
    ),
    paths(crate::routes::search_products, crate::routes::health),
    components(schemas(
        SearchProductsRequest,
        SearchProductsResponse,
        ItemResponse,
        ProductResponse,
        HealthResponse,
        ErrorResponse,
    )),
    tags(
        (name = "search", description = "Product search"),
        (name = "system", description = "Liveness"),
    ),
    modifiers(&BearerAuth)
)]
pub struct ApiDoc;

/// Registers the `bearer` scheme referenced by `/v1/*` operations.
struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, doc: &mut OpenApiDocument) {
        let scheme = SecurityScheme::Http(
            HttpBuilder::new()
                .scheme(HttpAuthScheme::Bearer)
                .description(Some("Value of SCOUT_SERVER_API_KEY"))
                .build(),
        );
        doc.components
            .get_or_insert_with(|| ComponentsBuilder::new().build())
            .add_security_scheme("bearer", scheme);
    }
}
