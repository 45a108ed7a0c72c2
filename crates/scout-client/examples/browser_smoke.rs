/// Smoke-test for `BrowserFetcher`.
///
/// Launches a headless Chromium, renders <https://example.com>, and runs the
/// page through the extractor the pipeline uses, then checks that a 404
/// page is reported as an HTTP error.
///
/// Run with:
///   cargo run -p scout-client --example browser_smoke --features browser
use std::time::Duration;

use scout_client::{BrowserFetcher, HtmdExtractor};
use scout_core::error::AppError;
use scout_core::traits::{ContentExtractor, Fetcher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    println!("Launching headless browser…");
    let fetcher = BrowserFetcher::launch().await?;

    let url = "https://example.com";
    println!("Fetching {url} …");
    let page = fetcher.fetch(url, Duration::from_secs(20)).await?;

    anyhow::ensure!(
        page.body.contains("<h1>Example Domain</h1>"),
        "Expected <h1> not found in rendered HTML"
    );

    let content = HtmdExtractor::new().with_min_chars(20).extract(&page)?;
    println!(
        "OK: {} bytes of HTML, {} chars of cleaned text from {}",
        page.body.len(),
        content.cleaned_text.chars().count(),
        page.final_url
    );
    println!("{}", content.cleaned_text);

    let missing = "https://httpbin.org/status/404";
    println!("Fetching {missing} …");
    match fetcher.fetch(missing, Duration::from_secs(20)).await {
        Err(AppError::HttpError { status: 404, .. }) => println!("OK: 404 reported as HttpError"),
        other => anyhow::bail!("Expected HttpError 404, got {other:?}"),
    }
    Ok(())
}
