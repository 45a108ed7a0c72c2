use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventResponseReceived, ResourceType,
};
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use scout_core::error::AppError;
use scout_core::models::RawPage;
use scout_core::traits::Fetcher;

use crate::fetcher::{check_public_host, parse_page_url};

/// Headless-browser fetcher using Chromium via the Chrome DevTools Protocol.
///
/// Unlike [`super::ReqwestFetcher`], this renders JavaScript before returning
/// the HTML, which many shop front-ends need before prices appear.
///
/// A single Chromium process is shared across all clones of this struct;
/// each [`Fetcher::fetch`] call opens a new tab, grabs the rendered HTML,
/// and closes the tab, also when the call fails or times out. The status of
/// the main document response is read from the Network domain; non-2xx
/// pages become [`AppError::HttpError`].
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use scout_client::BrowserFetcher;
/// use scout_core::traits::Fetcher;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let fetcher = BrowserFetcher::launch().await?;
/// let page = fetcher.fetch("https://example.com", Duration::from_secs(20)).await?;
/// println!("{}", &page.body[..200]);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BrowserFetcher {
    browser: Arc<Browser>,
    ssrf_protection: bool,
}

impl BrowserFetcher {
    /// Launches headless Chromium.
    ///
    /// Requires a Chromium / Chrome binary reachable via `$PATH`, `CHROME_BIN`,
    /// or one of the well-known install locations.
    pub async fn launch() -> Result<Self, AppError> {
        let mut builder = BrowserConfig::builder().no_sandbox().disable_default_args();

        // The snap wrapper strips headless flags, so prefer the real binary.
        if let Some(bin) = find_chrome_binary() {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }

        let config = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--no-first-run")
            .build()
            .map_err(|e| AppError::ConfigError(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::ConfigError(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
            ssrf_protection: true,
        })
    }

    /// Disable SSRF protection, allowing navigation to private/reserved IPs.
    pub fn allow_private_urls(mut self) -> Self {
        self.ssrf_protection = false;
        self
    }

    async fn render(&self, url: &str) -> Result<(u16, String, String), AppError> {
        let tab = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| AppError::ConnectionError(format!("Failed to open tab: {e}")))?;
        let tab = TabGuard::new(tab);
        let page = tab.page()?;

        page.execute(EnableParams::default())
            .await
            .map_err(|e| AppError::ConnectionError(format!("Failed to enable network events: {e}")))?;
        let mut responses = page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(|e| AppError::ConnectionError(format!("Failed to watch responses: {e}")))?;

        page.goto(url)
            .await
            .map_err(|e| AppError::ConnectionError(format!("Failed to navigate to {url}: {e}")))?;

        // Redirect hops never surface as Document responses, so the first one is the final page.
        let status = tokio::time::timeout(STATUS_WAIT, async {
            while let Some(event) = responses.next().await {
                if event.r#type == ResourceType::Document {
                    return Some(event.response.status);
                }
            }
            None
        })
        .await
        .ok()
        .flatten();
        let status = document_status(status, url)?;

        page.find_element("body")
            .await
            .map_err(|e| AppError::ConnectionError(format!("Page did not render body: {e}")))?;

        let html = page
            .content()
            .await
            .map_err(|e| AppError::ConnectionError(format!("Failed to read page content: {e}")))?;
        let final_url = page.url().await.ok().flatten().unwrap_or_else(|| url.to_string());

        tab.close().await;
        Ok((status, html, final_url))
    }
}

/// How long to wait for the main document's response event after navigation.
const STATUS_WAIT: Duration = Duration::from_secs(2);

/// Map the main document's status to a fetch outcome.
///
/// A navigation that produced no response event is treated as `200`.
fn document_status(status: Option<i64>, url: &str) -> Result<u16, AppError> {
    let Some(status) = status else {
        tracing::debug!(%url, "No document response seen; assuming 200");
        return Ok(200);
    };
    let status = u16::try_from(status).unwrap_or(0);
    if (200..300).contains(&status) {
        Ok(status)
    } else {
        Err(AppError::HttpError {
            status,
            url: url.to_string(),
        })
    }
}

/// Closes its tab when dropped, so timeouts and errors do not leak tabs.
struct TabGuard {
    page: Option<Page>,
    runtime: tokio::runtime::Handle,
}

impl TabGuard {
    fn new(page: Page) -> Self {
        Self {
            page: Some(page),
            runtime: tokio::runtime::Handle::current(),
        }
    }

    fn page(&self) -> Result<&Page, AppError> {
        self.page
            .as_ref()
            .ok_or_else(|| AppError::ConnectionError("tab already closed".into()))
    }

    async fn close(mut self) {
        if let Some(page) = self.page.take()
            && let Err(e) = page.close().await
        {
            tracing::debug!("Failed to close tab: {e}");
        }
    }
}

impl Drop for TabGuard {
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            self.runtime.spawn(async move {
                if let Err(e) = page.close().await {
                    tracing::debug!("Failed to close abandoned tab: {e}");
                }
            });
        }
    }
}

/// Tries to locate the real Chrome/Chromium binary.
///
/// `CHROME_BIN` wins; otherwise well-known paths are checked. `None` lets
/// chromiumoxide do its own lookup.
fn find_chrome_binary() -> Option<PathBuf> {
    const CANDIDATES: &[&str] = &[
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ];

    std::env::var("CHROME_BIN")
        .ok()
        .map(PathBuf::from)
        .into_iter()
        .chain(CANDIDATES.iter().map(PathBuf::from))
        .find(|p| p.exists())
}

impl Fetcher for BrowserFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<RawPage, AppError> {
        let parsed = parse_page_url(url)?;
        if self.ssrf_protection {
            check_public_host(&parsed).await?;
        }

        let started = Instant::now();
        let (status, body, final_url) = tokio::time::timeout(timeout, self.render(url))
            .await
            .map_err(|_| AppError::Timeout(timeout.as_millis() as u64))??;

        Ok(RawPage {
            url: url.to_string(),
            final_url,
            status,
            body,
            fetch_duration: started.elapsed(),
        })
    }
}
