use std::net::IpAddr;
use std::time::{Duration, Instant};

use reqwest::{Client, redirect};
use scout_core::error::AppError;
use scout_core::models::RawPage;
use scout_core::traits::Fetcher;
use url::{Host, Url};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; ScoutBot/0.1; product search)";

/// Redirect hops followed before a fetch gives up.
pub const MAX_REDIRECTS: usize = 10;

/// HTTP page fetcher using reqwest.
///
/// Follows redirects (bounded), applies the caller's timeout to the whole
/// request including the body, and never retries. SSRF protection is
/// **enabled** by default: requests to private/reserved IP ranges are
/// rejected before any connection is made, and redirects to private IP
/// literals are refused. Use [`allow_private_urls`](Self::allow_private_urls)
/// for local tooling.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    ssrf_protection: bool,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, AppError> {
        Self::with_user_agent(DEFAULT_USER_AGENT)
    }

    pub fn with_user_agent(user_agent: &str) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .redirect(redirect_policy(true))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self::from_client(client))
    }

    /// Wrap a preconfigured client. SSRF protection stays on for the
    /// requested URL; redirect hops are checked only if `client` was built
    /// with [`redirect_policy`].
    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            ssrf_protection: true,
        }
    }

    /// Disable the SSRF check on the requested URL.
    ///
    /// Only use this for CLI usage where the user controls the machine.
    pub fn allow_private_urls(mut self) -> Self {
        self.ssrf_protection = false;
        self
    }
}

/// Redirect policy: at most [`MAX_REDIRECTS`] hops, http(s) targets only and,
/// with `ssrf_protection`, no private/reserved IP literals.
///
/// Host names are not resolved here.
pub fn redirect_policy(ssrf_protection: bool) -> redirect::Policy {
    redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() > MAX_REDIRECTS {
            return attempt.error(format!("more than {MAX_REDIRECTS} redirects"));
        }
        let rejected = rejected_redirect(attempt.url(), ssrf_protection);
        match rejected {
            Some(reason) => attempt.error(reason),
            None => attempt.follow(),
        }
    })
}

fn rejected_redirect(target: &Url, ssrf_protection: bool) -> Option<String> {
    if !matches!(target.scheme(), "http" | "https") {
        return Some(format!("redirect to scheme '{}' is not allowed", target.scheme()));
    }
    let ip = match target.host()? {
        Host::Ipv4(v4) => IpAddr::V4(v4),
        Host::Ipv6(v6) => IpAddr::V6(v6),
        Host::Domain(_) => return None,
    };
    (ssrf_protection && is_private_ip(ip))
        .then(|| format!("SSRF blocked: redirect to private/reserved address {ip}"))
}

fn map_request_error(e: reqwest::Error, timeout: Duration) -> AppError {
    if e.is_timeout() {
        AppError::Timeout(timeout.as_millis() as u64)
    } else if e.is_redirect() {
        let reason = std::error::Error::source(&e)
            .map(ToString::to_string)
            .unwrap_or_else(|| e.to_string());
        AppError::ValidationError(format!("Redirect rejected: {reason}"))
    } else if e.is_builder() {
        AppError::ValidationError(format!("Invalid request: {e}"))
    } else {
        AppError::ConnectionError(e.to_string())
    }
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<RawPage, AppError> {
        let parsed = parse_page_url(url)?;
        if self.ssrf_protection {
            check_public_host(&parsed).await?;
        }

        let started = Instant::now();
        let response = self
            .client
            .get(parsed)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_request_error(e, timeout))?;

        let status = response.status();
        let final_url = response.url().to_string();
        if !status.is_success() {
            return Err(AppError::HttpError {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| map_request_error(e, timeout))?;
        let fetch_duration = started.elapsed();

        tracing::debug!(%url, %final_url, status = status.as_u16(), bytes = body.len(), "Page fetched");
        Ok(RawPage {
            url: url.to_string(),
            final_url,
            status: status.as_u16(),
            body,
            fetch_duration,
        })
    }
}

// ---------------------------------------------------------------------------
// URL guard / SSRF protection
// ---------------------------------------------------------------------------

/// Accept only absolute `http`/`https` URLs that name a host.
pub fn parse_page_url(url: &str) -> Result<Url, AppError> {
    let parsed =
        Url::parse(url).map_err(|e| AppError::ValidationError(format!("Invalid URL {url}: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(AppError::ValidationError(format!(
                "URL scheme '{scheme}' is not allowed (only http/https)"
            )));
        }
    }

    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(AppError::ValidationError(format!("URL has no host: {url}")));
    }
    Ok(parsed)
}

/// Resolve the host and reject it if any address is private/reserved.
pub(crate) async fn check_public_host(url: &Url) -> Result<(), AppError> {
    let host = url
        .host_str()
        .ok_or_else(|| AppError::ValidationError("URL has no host".to_string()))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');

    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_private_ip(ip) {
            return Err(AppError::ValidationError(format!(
                "SSRF blocked: {host} is a private/reserved address"
            )));
        }
        return Ok(());
    }

    let port = url.port_or_known_default().unwrap_or(80);
    let addrs: Vec<_> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| AppError::ConnectionError(format!("DNS resolution failed for {host}: {e}")))?
        .collect();

    if addrs.is_empty() {
        return Err(AppError::ConnectionError(format!(
            "DNS resolution returned no addresses for {host}"
        )));
    }

    if let Some(blocked) = addrs.iter().find(|a| is_private_ip(a.ip())) {
        return Err(AppError::ValidationError(format!(
            "SSRF blocked: {host} resolves to private/reserved IP {}",
            blocked.ip()
        )));
    }
    Ok(())
}

/// Check if an IP address is in a private/reserved/link-local range.
fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, ..] = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local() // 169.254/16, cloud metadata
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                || (a == 100 && (b & 0xC0) == 64) // 100.64/10 CGN
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xFFC0) == 0xFE80 // fe80::/10
                || (first & 0xFE00) == 0xFC00 // fc00::/7
                || v6.to_ipv4_mapped().is_some_and(|v4| is_private_ip(IpAddr::V4(v4)))
        }
    }
}
