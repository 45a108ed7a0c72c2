use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use jsonschema::Validator;
use reqwest::Client;
use scout_core::error::AppError;
use scout_core::models::ExtractedProduct;
use scout_core::traits::Structurer;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434/v1";
pub const DEFAULT_MODEL: &str = "mistral:latest";
pub const DEFAULT_MAX_CONTENT_CHARS: usize = 12_000;
const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(120);
const NOT_FOUND: &str = "not found";
const SYSTEM_PROMPT: &str = "You are a product data extraction assistant. \
Extract the product described on the given web page. Respond ONLY with a JSON object \
with the keys product_name, price, description, brand, sku_id, part_number and attributes. \
Use \"Not found\" for any field that is not present on the page. Keep description under \
200 characters. Do not include explanations.";

/// JSON schema every model reply must satisfy.
pub static PRODUCT_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "type": "object",
        "properties": {
            "product_name": { "type": "string" },
            "price": { "type": ["string", "number", "null"] },
            "description": { "type": ["string", "null"] },
            "brand": { "type": ["string", "null"] },
            "sku_id": { "type": ["string", "number", "null"] },
            "part_number": { "type": ["string", "number", "null"] },
            "attributes": {
                "type": "object",
                "additionalProperties": { "type": ["string", "number", "boolean", "null"] }
            }
        },
        "required": ["product_name"]
    })
});

/// OpenAI-compatible structuring client.
///
/// Works with any OpenAI-compatible chat API, including:
/// - Ollama (`http://localhost:11434/v1`, the default)
/// - OpenAI directly (`https://api.openai.com/v1`)
///
/// The client never retries; `RateLimited` and `Unavailable` are left to the
/// crawl coordinator's retry budget.
#[derive(Clone)]
pub struct OpenAiStructurer {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_content_chars: usize,
    validator: Arc<Validator>,
}

impl OpenAiStructurer {
    pub fn new(base_url: &str, model: &str, api_key: Option<&str>) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(DEFAULT_LLM_TIMEOUT)
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to build LLM client: {e}")))?;
        Self::with_client(client, base_url, model, api_key)
    }

    pub fn with_client(
        client: Client,
        base_url: &str,
        model: &str,
        api_key: Option<&str>,
    ) -> Result<Self, AppError> {
        let validator = jsonschema::validator_for(&PRODUCT_SCHEMA)
            .map_err(|e| AppError::ConfigError(format!("Invalid product schema: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()).map(str::to_string),
            model: model.to_string(),
            max_content_chars: DEFAULT_MAX_CONTENT_CHARS,
            validator: Arc::new(validator),
        })
    }

    pub fn with_max_content_chars(mut self, max: usize) -> Self {
        self.max_content_chars = max;
        self
    }

    /// `hint` is the search result title, passed on as a likely product name.
    fn build_request(&self, cleaned_text: &str, url: &str, hint: Option<&str>) -> ChatRequest {
        let content = truncate_chars(cleaned_text, self.max_content_chars);
        let hint = hint
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(|h| format!("The product is likely: {h}\n"))
            .unwrap_or_default();
        ChatRequest {
            model: self.model.clone(),
            temperature: 0.0,
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: format!("Page URL: {url}\n{hint}\nPage content:\n\n{content}"),
                },
            ],
            response_format: ResponseFormat {
                format_type: "json_schema".to_string(),
                json_schema: JsonSchemaWrapper {
                    name: "product".to_string(),
                    strict: false,
                    schema: PRODUCT_SCHEMA.clone(),
                },
            },
        }
    }

    /// Turn the raw assistant message into a product record.
    fn parse_reply(&self, reply: &str, url: &str) -> Result<ExtractedProduct, AppError> {
        let value = first_json_object(reply).ok_or_else(|| {
            AppError::Malformed(format!("no JSON object in model reply: {}", preview(reply)))
        })?;

        if !self.validator.is_valid(&value) {
            let reasons: Vec<String> = self
                .validator
                .iter_errors(&value)
                .map(|e| e.to_string())
                .collect();
            return Err(AppError::Malformed(format!(
                "model reply does not match product schema: {}",
                reasons.join("; ")
            )));
        }

        to_product(&value, url)
    }
}

// ---- OpenAI API types ----

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    temperature: f32,
    messages: Vec<Message>,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
    json_schema: JsonSchemaWrapper,
}

#[derive(Serialize)]
struct JsonSchemaWrapper {
    name: String,
    strict: bool,
    schema: Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl OpenAiStructurer {
    async fn complete(&self, request: ChatRequest, url: &str) -> Result<ExtractedProduct, AppError> {
        let endpoint = format!("{}/chat/completions", self.base_url);

        let mut builder = self.client.post(&endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Unavailable(format!("LLM request timed out: {e}"))
            } else if e.is_connect() {
                AppError::Unavailable(format!("Connection failed: {e}"))
            } else {
                AppError::Unavailable(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("HTTP {status_code}: {}", preview(&body)));

            return Err(match status_code {
                429 => AppError::RateLimited(message),
                500.. => AppError::Unavailable(message),
                _ => AppError::Malformed(message),
            });
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::Malformed(format!("Failed to parse LLM response: {e}")))?;

        let reply = chat_response
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .ok_or_else(|| AppError::Malformed("Empty response from LLM".into()))?;

        let product = self.parse_reply(reply, url)?;
        tracing::debug!(%url, name = %product.name, model = %self.model, "Product structured");
        Ok(product)
    }
}

impl Structurer for OpenAiStructurer {
    async fn structure(&self, cleaned_text: &str, url: &str) -> Result<ExtractedProduct, AppError> {
        self.complete(self.build_request(cleaned_text, url, None), url).await
    }

    async fn structure_with_hint(
        &self,
        cleaned_text: &str,
        url: &str,
        hint: &str,
    ) -> Result<ExtractedProduct, AppError> {
        self.complete(self.build_request(cleaned_text, url, Some(hint)), url).await
    }
}

// ---------------------------------------------------------------------------
// Reply parsing
// ---------------------------------------------------------------------------

/// Locate and parse the first JSON object in `text`, ignoring surrounding prose.
fn first_json_object(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
    if let Some(Ok(value @ Value::Object(_))) = stream.next() {
        return Some(value);
    }

    let end = text.rfind('}')?;
    (end > start)
        .then(|| serde_json::from_str::<Value>(&text[start..=end]).ok())
        .flatten()
        .filter(Value::is_object)
}

/// A field's text, unless empty or the "Not found" sentinel.
fn present(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty() && !text.eq_ignore_ascii_case(NOT_FOUND)).then_some(text)
}

fn to_product(value: &Value, url: &str) -> Result<ExtractedProduct, AppError> {
    let name = present(value.get("product_name"))
        .ok_or_else(|| AppError::Malformed("model reply has no product name".into()))?;

    let mut attributes = BTreeMap::new();
    if let Some(Value::Object(extra)) = value.get("attributes") {
        for (key, v) in extra {
            if let Some(text) = present(Some(v)) {
                attributes.insert(key.clone(), text);
            }
        }
    }
    for key in ["brand", "sku_id", "part_number"] {
        if let Some(text) = present(value.get(key)) {
            attributes.insert(key.to_string(), text);
        }
    }

    Ok(ExtractedProduct {
        source_url: url.to_string(),
        name,
        price: present(value.get("price")),
        description: present(value.get("description")),
        attributes,
    })
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn preview(text: &str) -> &str {
    truncate_chars(text, 200)
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const URL: &str = "https://shop.example.com/espresso";

    fn structurer(base_url: &str) -> OpenAiStructurer {
        let client = Client::builder().no_proxy().build().unwrap();
        OpenAiStructurer::with_client(client, base_url, "test-model", Some("sk-test")).unwrap()
    }

    fn chat_reply(content: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(
            json!({ "choices": [{ "message": { "role": "assistant", "content": content } }] }),
        )
    }

    /// A model endpoint answering every completion with `response`.
    async fn model_server(response: ResponseTemplate) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(response)
            .mount(&server)
            .await;
        server
    }

    #[test]
    fn test_first_json_object_tolerates_prose_and_fences() {
        let reply = "Sure! Here it is:\n```json\n{\"product_name\": \"Espresso Pro\"}\n```\nAnything else? {}";
        let value = first_json_object(reply).unwrap();
        assert_eq!(value["product_name"], "Espresso Pro");
        assert!(first_json_object("no json here").is_none());
        assert!(first_json_object("[1, 2, 3]").is_none());
    }

    #[test]
    fn test_maps_fields_and_drops_not_found() {
        let s = structurer(DEFAULT_BASE_URL);
        let reply = r#"{"product_name": " Espresso Pro 3000 ", "price": "$199.00",
            "description": "Not found", "brand": "Brewmaster", "sku_id": "EP-3000",
            "part_number": "NOT FOUND", "attributes": {"color": "silver", "weight": 7.5, "size": ""}}"#;

        let product = s.parse_reply(reply, URL).unwrap();
        assert_eq!(product.source_url, URL);
        assert_eq!(product.name, "Espresso Pro 3000");
        assert_eq!(product.price.as_deref(), Some("$199.00"));
        assert_eq!(product.description, None);
        assert_eq!(product.attributes.get("brand").map(String::as_str), Some("Brewmaster"));
        assert_eq!(product.attributes.get("sku_id").map(String::as_str), Some("EP-3000"));
        assert_eq!(product.attributes.get("weight").map(String::as_str), Some("7.5"));
        assert!(!product.attributes.contains_key("part_number"));
        assert!(!product.attributes.contains_key("size"));
    }

    #[test]
    fn test_missing_name_is_malformed() {
        let s = structurer(DEFAULT_BASE_URL);
        assert!(matches!(
            s.parse_reply(r#"{"product_name": "Not found"}"#, URL),
            Err(AppError::Malformed(_))
        ));
        assert!(matches!(
            s.parse_reply(r#"{"price": "10"}"#, URL),
            Err(AppError::Malformed(_))
        ));
    }

    #[test]
    fn test_schema_violation_is_malformed() {
        let s = structurer(DEFAULT_BASE_URL);
        let err = s
            .parse_reply(r#"{"product_name": ["not", "a", "string"]}"#, URL)
            .unwrap_err();
        assert!(err.to_string().contains("product schema"));
    }

    #[test]
    fn test_request_is_truncated_and_deterministic() {
        let s = structurer(DEFAULT_BASE_URL).with_max_content_chars(5);
        let request = s.build_request("ééééééééé", URL, None);
        assert_eq!(request.temperature, 0.0);
        assert!(request.messages[1].content.ends_with("ééééé"));
        assert!(!request.messages[1].content.ends_with("éééééé"));
        assert!(!request.messages[1].content.contains("likely"));
        assert_eq!(request.response_format.format_type, "json_schema");
    }

    #[test]
    fn test_hint_names_the_likely_product() {
        let s = structurer(DEFAULT_BASE_URL);
        let request = s.build_request("text", URL, Some(" Espresso Pro 3000 | Brewmaster "));
        assert!(
            request.messages[1]
                .content
                .contains("The product is likely: Espresso Pro 3000 | Brewmaster\n")
        );

        let blank = s.build_request("text", URL, Some("  "));
        assert!(!blank.messages[1].content.contains("likely"));
    }

    #[tokio::test]
    async fn test_request_carries_auth_model_and_schema() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "test-model",
                "response_format": {
                    "type": "json_schema",
                    "json_schema": { "name": "product", "schema": { "required": ["product_name"] } }
                }
            })))
            .respond_with(chat_reply(r#"{"product_name": "Espresso Pro"}"#))
            .expect(1)
            .mount(&server)
            .await;

        let product = structurer(&server.uri())
            .structure_with_hint("text", URL, "Espresso Pro")
            .await
            .unwrap();
        assert_eq!(product.name, "Espresso Pro");

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        let user = body["messages"][1]["content"].as_str().unwrap();
        assert!(user.contains("Page URL: https://shop.example.com/espresso"));
        assert!(user.contains("The product is likely: Espresso Pro"));
    }

    #[tokio::test]
    async fn test_no_key_sends_no_authorization() {
        let server = model_server(chat_reply(r#"{"product_name": "Espresso Pro"}"#)).await;
        let client = Client::builder().no_proxy().build().unwrap();
        let s = OpenAiStructurer::with_client(client, &server.uri(), "test-model", Some("")).unwrap();

        s.structure("text", URL).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert!(!requests[0].headers.contains_key("authorization"));
    }

    #[tokio::test]
    async fn test_successful_reply() {
        let server =
            model_server(chat_reply(r#"{"product_name": "Espresso Pro", "price": 199}"#)).await;

        let product = structurer(&server.uri()).structure("text", URL).await.unwrap();
        assert_eq!(product.name, "Espresso Pro");
        assert_eq!(product.price.as_deref(), Some("199"));
    }

    #[tokio::test]
    async fn test_429_is_rate_limited() {
        let server = model_server(
            ResponseTemplate::new(429).set_body_json(json!({ "error": { "message": "slow down" } })),
        )
        .await;

        let err = structurer(&server.uri()).structure("text", URL).await.unwrap_err();
        assert_eq!(err, AppError::RateLimited("slow down".into()));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_5xx_is_unavailable() {
        let server =
            model_server(ResponseTemplate::new(503).set_body_string("overloaded")).await;
        let err = structurer(&server.uri()).structure("text", URL).await.unwrap_err();
        assert!(matches!(err, AppError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_4xx_is_malformed() {
        let server = model_server(
            ResponseTemplate::new(400).set_body_json(json!({ "error": { "message": "bad schema" } })),
        )
        .await;
        let err = structurer(&server.uri()).structure("text", URL).await.unwrap_err();
        assert_eq!(err, AppError::Malformed("bad schema".into()));
    }

    #[tokio::test]
    async fn test_unreachable_model_is_unavailable() {
        let err = structurer("http://127.0.0.1:1")
            .structure("text", URL)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_prose_only_reply_is_malformed() {
        let server = model_server(chat_reply("I could not find a product on this page.")).await;
        let err = structurer(&server.uri()).structure("text", URL).await.unwrap_err();
        assert!(matches!(err, AppError::Malformed(_)));
        assert!(!err.is_retryable());
    }
}
