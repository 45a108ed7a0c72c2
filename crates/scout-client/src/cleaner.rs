use std::collections::HashSet;
use std::sync::Arc;

use htmd::HtmlToMarkdown;
use scout_core::error::AppError;
use scout_core::models::{PageContent, RawPage};
use scout_core::traits::ContentExtractor;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use url::Url;

/// Pages whose cleaned text is shorter than this are not worth structuring.
pub const DEFAULT_MIN_CHARS: usize = 100;

const LD_JSON_SELECTOR: &str = r#"script[type="application/ld+json"]"#;
const META_SKU_SELECTOR: &str = r#"meta[property="product:sku"], meta[name="product:sku"]"#;
const IDENTIFIER_SELECTOR: &str = "[data-sku], [data-product-id], [data-item-number], \
[data-part-number], [data-model], [itemprop=\"sku\"], [itemprop=\"productID\"]";
const LABELLED_TEXT_SELECTOR: &str = "li, p, span, div, td, dd";

/// `data-*` attribute and the line key it is reported under.
const IDENTIFIER_ATTRS: [(&str, &str); 5] = [
    ("data-sku", "sku"),
    ("data-part-number", "part_number"),
    ("data-model", "model"),
    ("data-product-id", "product_id"),
    ("data-item-number", "item_number"),
];

/// Text labels and the line key each maps to.
const IDENTIFIER_LABELS: [(&str, &str); 8] = [
    ("Part Number", "part_number"),
    ("Part No.", "part_number"),
    ("Part #", "part_number"),
    ("Item #", "part_number"),
    ("Article #", "part_number"),
    ("SKU", "sku"),
    ("MPN", "mpn"),
    ("Model", "model"),
];

/// Listing pages show many products, so their identifiers are not collected.
const CATEGORY_PATH_MARKERS: [&str; 3] = ["/c/", "/category/", "/collection/"];

/// HTML-to-text extractor using htmd.
///
/// Converts raw HTML into compact Markdown, stripping non-content elements
/// (script, style, nav, etc.) to minimize LLM token usage. Product JSON-LD,
/// `product:sku` meta tags, microdata, `data-*` identifiers and labelled
/// text ("SKU: EP-3000") are read from the raw HTML and appended as a
/// `Structured data:` section so SKUs and prices survive cleaning.
#[derive(Clone)]
pub struct HtmdExtractor {
    converter: Arc<HtmlToMarkdown>,
    min_chars: usize,
}

impl HtmdExtractor {
    pub fn new() -> Self {
        let converter = HtmlToMarkdown::builder()
            .skip_tags(vec![
                "script", "style", "nav", "footer", "header", "aside", "noscript", "iframe", "svg",
                "form",
            ])
            .build();

        Self {
            converter: Arc::new(converter),
            min_chars: DEFAULT_MIN_CHARS,
        }
    }

    pub fn with_min_chars(mut self, min_chars: usize) -> Self {
        self.min_chars = min_chars;
        self
    }

    /// Convert and normalise `html` without applying the length threshold.
    ///
    /// `url` is the page's final URL; category pages get no identifier lines.
    pub fn clean(&self, html: &str, url: &str) -> Result<String, AppError> {
        let markdown = self.converter.convert(html).map_err(|e| {
            tracing::warn!(error = %e, "HTML conversion failed");
            AppError::EmptyContent {
                length: 0,
                minimum: self.min_chars,
            }
        })?;

        let mut text = normalize_whitespace(&markdown);
        let document = Html::parse_document(html);
        let mut structured = product_structured_data(&document);
        if is_category_page(url) {
            tracing::debug!(%url, "Category page, skipping product identifiers");
        } else {
            structured.extend(page_identifiers(&document));
        }
        dedup_lines(&mut structured);
        if !structured.is_empty() {
            if !text.is_empty() {
                text.push_str("\n\n");
            }
            text.push_str("Structured data:\n");
            text.push_str(&structured.join("\n"));
        }
        Ok(text)
    }
}

impl Default for HtmdExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentExtractor for HtmdExtractor {
    fn extract(&self, page: &RawPage) -> Result<PageContent, AppError> {
        let cleaned_text = self.clean(&page.body, &page.final_url)?;
        let length = cleaned_text.chars().count();
        if length < self.min_chars {
            return Err(AppError::EmptyContent {
                length,
                minimum: self.min_chars,
            });
        }

        Ok(PageContent {
            url: page.final_url.clone(),
            cleaned_text,
            fetch_duration_ms: page.fetch_duration.as_millis() as u64,
        })
    }
}

/// Trim lines, collapse inner whitespace runs, and keep at most one blank line in a row.
fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = false;

    for line in text.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            blank_run = !out.is_empty();
            continue;
        }
        if blank_run {
            out.push('\n');
            blank_run = false;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&line);
    }
    out
}

// ---------------------------------------------------------------------------
// JSON-LD product data
// ---------------------------------------------------------------------------

/// `key: value` lines for every product described in the page's JSON-LD.
fn product_structured_data(document: &Html) -> Vec<String> {
    let Ok(selector) = Selector::parse(LD_JSON_SELECTOR) else {
        return Vec::new();
    };

    let mut lines = Vec::new();
    for script in document.select(&selector) {
        let raw: String = script.text().collect();
        let Ok(value) = serde_json::from_str::<Value>(raw.trim()) else {
            continue;
        };
        let mut nodes = Vec::new();
        flatten_nodes(&value, &mut nodes);
        for node in nodes.into_iter().filter(|n| is_product(n)) {
            lines.extend(describe_product(node));
        }
    }
    lines
}

/// Drop repeated lines, keeping the first occurrence of each.
fn dedup_lines(lines: &mut Vec<String>) {
    let mut seen = HashSet::new();
    lines.retain(|line| seen.insert(line.clone()));
}

fn flatten_nodes<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Array(items) => items.iter().for_each(|v| flatten_nodes(v, out)),
        Value::Object(map) => {
            out.push(value);
            if let Some(graph) = map.get("@graph") {
                flatten_nodes(graph, out);
            }
        }
        _ => {}
    }
}

fn is_product(node: &Value) -> bool {
    let typed = match node.get("@type") {
        Some(Value::String(t)) => t == "Product",
        Some(Value::Array(types)) => types.iter().any(|t| t == "Product"),
        _ => false,
    };
    typed || ["sku", "mpn", "offers"].iter().any(|k| node.get(k).is_some())
}

fn describe_product(node: &Value) -> Vec<String> {
    let mut lines = Vec::new();
    for key in ["name", "sku", "mpn", "gtin13", "gtin", "description"] {
        if let Some(text) = scalar(node.get(key)) {
            lines.push(format!("{key}: {text}"));
        }
    }

    let brand = node
        .get("brand")
        .and_then(|b| scalar(Some(b)).or_else(|| scalar(b.get("name"))));
    if let Some(brand) = brand {
        lines.push(format!("brand: {brand}"));
    }

    let offer = match node.get("offers") {
        Some(Value::Array(offers)) => offers.first(),
        other => other,
    };
    if let Some(offer) = offer {
        let price = scalar(offer.get("price")).or_else(|| scalar(offer.get("lowPrice")));
        if let Some(price) = price {
            match scalar(offer.get("priceCurrency")) {
                Some(currency) => lines.push(format!("price: {price} {currency}")),
                None => lines.push(format!("price: {price}")),
            }
        }
    }
    lines
}

fn scalar(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Product identifiers outside JSON-LD
// ---------------------------------------------------------------------------

fn is_category_page(url: &str) -> bool {
    let path = Url::parse(url).map_or_else(|_| url.to_string(), |u| u.path().to_string());
    CATEGORY_PATH_MARKERS.iter().any(|marker| path.contains(marker))
}

/// `key: value` lines from meta tags, microdata, `data-*` attributes and
/// labelled text.
fn page_identifiers(document: &Html) -> Vec<String> {
    let mut lines = Vec::new();

    if let Ok(selector) = Selector::parse(META_SKU_SELECTOR) {
        let metas = document.select(&selector);
        lines.extend(
            metas
                .filter_map(|meta| meta.value().attr("content").and_then(identifier))
                .map(|sku| format!("sku: {sku}")),
        );
    }

    if let Ok(selector) = Selector::parse(IDENTIFIER_SELECTOR) {
        lines.extend(
            document
                .select(&selector)
                .filter_map(attribute_identifier)
                .map(|(key, value)| format!("{key}: {value}")),
        );
    }

    if let Ok(selector) = Selector::parse(LABELLED_TEXT_SELECTOR) {
        lines.extend(
            document
                .select(&selector)
                .filter_map(|element| labelled_identifier(&element_text(element)))
                .map(|(key, value)| format!("{key}: {value}")),
        );
    }
    lines
}

fn attribute_identifier(element: ElementRef<'_>) -> Option<(&'static str, String)> {
    let attrs = element.value();
    for (attr, key) in IDENTIFIER_ATTRS {
        if let Some(value) = attrs.attr(attr).and_then(identifier) {
            return Some((key, value));
        }
    }

    let key = match attrs.attr("itemprop") {
        Some("sku") => "sku",
        Some("productID") => "product_id",
        _ => return None,
    };
    let value = match attrs.attr("content") {
        Some(content) => identifier(content),
        None => identifier(&element_text(element)),
    };
    value.map(|v| (key, v))
}

/// "SKU: EP-3000" style text. The label must be followed by `:` or whitespace.
fn labelled_identifier(text: &str) -> Option<(&'static str, String)> {
    IDENTIFIER_LABELS.iter().find_map(|(label, key)| {
        let rest = text.strip_prefix(label)?;
        if !rest.starts_with(|c: char| c == ':' || c.is_whitespace()) {
            return None;
        }
        identifier(rest.trim_start_matches(|c: char| c == ':' || c.is_whitespace()))
            .map(|value| (*key, value))
    })
}

/// Identifier text with whitespace collapsed, if 3 to 30 characters long.
fn identifier(raw: &str) -> Option<String> {
    let value = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    (3..=30).contains(&value.chars().count()).then_some(value)
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
