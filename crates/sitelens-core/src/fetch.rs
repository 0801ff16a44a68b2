//! Time-bounded page fetching.
//!
//! Two interchangeable strategies sit behind [`PageFetcher`]: a direct HTML
//! fetch and a rendering proxy that executes client-side scripts and returns
//! markdown. Both wrap the whole request in a wall-clock timeout; when it
//! fires the request future is dropped, which closes the connection.

use std::net::Ipv4Addr;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, header};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::{Host, Url};

use crate::error::FetchFailure;
use crate::types::{FetchedPage, PageFormat};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Bodies shorter than this are treated as unusable, not as an empty page
pub const MIN_CONTENT_LEN: usize = 100;
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;
pub const DEFAULT_RENDER_PROXY_URL: &str = "https://r.jina.ai/";
const MAX_REDIRECTS: usize = 5;

const BROWSER_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Knobs shared by every fetch strategy
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub min_content_len: usize,
    pub max_body_bytes: usize,
    pub user_agent: String,
    /// Permit loopback and private-network targets. Only for local testing:
    /// addresses come from untrusted chat text.
    pub allow_private_hosts: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            min_content_len: MIN_CONTENT_LEN,
            max_body_bytes: MAX_BODY_BYTES,
            user_agent: format!(
                "Mozilla/5.0 (compatible; sitelens/{})",
                env!("CARGO_PKG_VERSION")
            ),
            allow_private_hosts: false,
        }
    }
}

/// Which strategy the analyzer fetches pages with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchStrategy {
    /// GET the page and parse its HTML
    #[default]
    Direct,
    /// Ask a rendering proxy for pre-rendered markdown
    RenderProxy,
}

/// Everything needed to build the configured fetcher
#[derive(Debug, Clone, Default)]
pub struct FetchConfig {
    pub strategy: FetchStrategy,
    pub options: FetchOptions,
    /// Base URL the target address is appended to, e.g. `https://r.jina.ai/`
    pub render_proxy_url: Option<String>,
    pub render_proxy_key: Option<String>,
}

/// A way of turning a URL into page content
#[async_trait]
pub trait PageFetcher: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchFailure>;
}

/// Build the fetcher selected by configuration
pub fn build_fetcher(config: &FetchConfig) -> Result<Box<dyn PageFetcher>> {
    match config.strategy {
        FetchStrategy::Direct => Ok(Box::new(DirectFetcher::new(config.options.clone())?)),
        FetchStrategy::RenderProxy => {
            let base = config
                .render_proxy_url
                .clone()
                .unwrap_or_else(|| DEFAULT_RENDER_PROXY_URL.to_string());
            let fetcher = RenderProxyFetcher::new(base, config.options.clone())?;
            Ok(Box::new(match config.render_proxy_key.as_deref() {
                Some(key) if !key.trim().is_empty() => fetcher.with_api_key(key),
                _ => fetcher,
            }))
        }
    }
}

fn build_client(options: &FetchOptions) -> Result<Client> {
    let allow_private = options.allow_private_hosts;
    let redirects = reqwest::redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            attempt.error("too many redirects")
        } else if !allow_private && is_non_public(attempt.url()) {
            attempt.error("redirect to a non-public address")
        } else {
            attempt.follow()
        }
    });

    Client::builder()
        .user_agent(options.user_agent.clone())
        .redirect(redirects)
        .build()
        .context("failed to build HTTP client")
}

/// Whether `url` points at loopback, private, link-local or otherwise
/// non-routable space, or at a name that only resolves inside a network
pub fn is_non_public(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            domain == "localhost"
                || domain.ends_with(".localhost")
                || domain.ends_with(".local")
                || domain.ends_with(".internal")
        }
        Some(Host::Ipv4(ip)) => non_public_v4(ip),
        Some(Host::Ipv6(ip)) => {
            let first = ip.segments()[0];
            ip.is_loopback()
                || ip.is_unspecified()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80
                || ip.to_ipv4_mapped().is_some_and(non_public_v4)
        }
        None => true,
    }
}

fn non_public_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || a == 0
        || (a == 100 && (b & 0xc0) == 64)
}

/// Refuse targets outside public address space unless explicitly allowed
fn ensure_fetchable(url: &str, options: &FetchOptions) -> Result<(), FetchFailure> {
    if options.allow_private_hosts {
        return Ok(());
    }
    let parsed = Url::parse(url)
        .map_err(|e| FetchFailure::NetworkError(format!("invalid address: {e}")))?;
    if is_non_public(&parsed) {
        warn!(url, "refusing to fetch non-public address");
        return Err(FetchFailure::NetworkError(format!(
            "refusing to fetch non-public address {}",
            parsed.host_str().unwrap_or_default()
        )));
    }
    Ok(())
}

/// Fetches the page itself
#[derive(Debug, Clone)]
pub struct DirectFetcher {
    client: Client,
    options: FetchOptions,
}

impl DirectFetcher {
    pub fn new(options: FetchOptions) -> Result<Self> {
        Ok(Self {
            client: build_client(&options)?,
            options,
        })
    }
}

#[async_trait]
impl PageFetcher for DirectFetcher {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchFailure> {
        ensure_fetchable(url, &self.options)?;
        let request = self
            .client
            .get(url)
            .header(header::ACCEPT, BROWSER_ACCEPT)
            .header(header::ACCEPT_LANGUAGE, "en-US,en;q=0.9");

        let (content, content_type) = bounded(&self.options, async {
            let response = request.send().await.map_err(network_failure)?;
            read_success(response, self.options.max_body_bytes).await
        })
        .await?;

        ensure_substantial(&content, self.options.min_content_len)?;

        let format = match content_type.as_deref() {
            Some(ct) if ct.to_ascii_lowercase().contains("markdown") => PageFormat::Markdown,
            _ => PageFormat::Html,
        };
        debug!(url, bytes = content.len(), ?format, "fetched page directly");

        Ok(FetchedPage {
            url: url.to_string(),
            content,
            content_type,
            format,
        })
    }
}

/// Fetches the page through a rendering proxy that returns markdown
#[derive(Debug, Clone)]
pub struct RenderProxyFetcher {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    options: FetchOptions,
}

impl RenderProxyFetcher {
    pub fn new(base_url: impl Into<String>, options: FetchOptions) -> Result<Self> {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Ok(Self {
            client: build_client(&options)?,
            base_url,
            api_key: None,
            options,
        })
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    fn proxy_url(&self, target: &str) -> String {
        format!("{}{}", self.base_url, target)
    }
}

#[async_trait]
impl PageFetcher for RenderProxyFetcher {
    fn name(&self) -> &'static str {
        "render-proxy"
    }

    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchFailure> {
        ensure_fetchable(url, &self.options)?;
        let mut request = self
            .client
            .get(self.proxy_url(url))
            .header(header::ACCEPT, "text/markdown, text/plain;q=0.9")
            .header("X-Return-Format", "markdown");
        if let Some(key) = self.api_key.as_deref() {
            request = request.bearer_auth(key);
        }

        let (content, content_type) = bounded(&self.options, async {
            let response = request.send().await.map_err(network_failure)?;
            read_success(response, self.options.max_body_bytes).await
        })
        .await?;

        ensure_substantial(&content, self.options.min_content_len)?;
        debug!(url, bytes = content.len(), "fetched page through rendering proxy");

        Ok(FetchedPage {
            url: url.to_string(),
            content,
            content_type,
            format: PageFormat::Markdown,
        })
    }
}

/// Run `work` under the wall-clock budget
async fn bounded<T, F>(options: &FetchOptions, work: F) -> Result<T, FetchFailure>
where
    F: std::future::Future<Output = Result<T, FetchFailure>>,
{
    match tokio::time::timeout(options.timeout, work).await {
        Ok(result) => result,
        Err(_) => {
            warn!(timeout_secs = options.timeout.as_secs_f32(), "page fetch timed out");
            Err(FetchFailure::Timeout(options.timeout))
        }
    }
}

fn network_failure(err: reqwest::Error) -> FetchFailure {
    FetchFailure::NetworkError(err.to_string())
}

/// Reject non-2xx responses and read at most `max_bytes` of the body
async fn read_success(
    mut response: Response,
    max_bytes: usize,
) -> Result<(String, Option<String>), FetchFailure> {
    let status = response.status();
    if !status.is_success() {
        return Err(FetchFailure::HttpError(status.as_u16()));
    }

    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let mut body: Vec<u8> = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(network_failure)? {
        let room = max_bytes.saturating_sub(body.len());
        body.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if body.len() >= max_bytes {
            debug!(max_bytes, "response body capped");
            break;
        }
    }

    Ok((String::from_utf8_lossy(&body).into_owned(), content_type))
}

/// Fail with `TooShort` unless the content plausibly is a real page
pub fn ensure_substantial(content: &str, min_len: usize) -> Result<(), FetchFailure> {
    let len = content.trim().len();
    if len < min_len {
        Err(FetchFailure::TooShort(len))
    } else {
        Ok(())
    }
}
