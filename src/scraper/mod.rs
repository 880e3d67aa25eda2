pub mod http_client;
pub mod parsers;

use crate::config::ScraperConfig;
use crate::models::{CatalogLink, SpecRecord};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use self::http_client::{FetchError, HttpClient};
use self::parsers::PageParser;

/// The source told us to stop sending requests.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("rate limited at {url}")]
pub struct RateLimited {
    pub url: String,
}

/// Shared by concurrent fetches. The first rate-limit signal trips it and
/// later ones are ignored; fetches that have not sent yet stay unsent.
#[derive(Debug, Default)]
pub struct StopSignal(OnceLock<RateLimited>);

impl StopSignal {
    /// Returns false when the signal was already tripped.
    pub fn trip(&self, signal: RateLimited) -> bool {
        self.0.set(signal).is_ok()
    }

    pub fn is_tripped(&self) -> bool {
        self.0.get().is_some()
    }

    pub fn get(&self) -> Option<&RateLimited> {
        self.0.get()
    }

    pub fn into_inner(self) -> Option<RateLimited> {
        self.0.into_inner()
    }
}

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable catalog source. Transient failures are absorbed (logged, empty
/// result); only a rate-limit signal comes back as an error.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Detail-page links on one search-result page.
    async fn collect_links(&self, page_url: &str) -> Result<Vec<CatalogLink>, RateLimited>;

    /// `Ok(None)` when the page is not a valid item page or could not be fetched.
    /// Once `stop` is tripped no request goes out and the tripping signal is
    /// returned instead.
    async fn fetch_detail(
        &self,
        link: &CatalogLink,
        stop: &StopSignal,
    ) -> Result<Option<SpecRecord>, RateLimited>;
}

// ── GSMArena scraper ──────────────────────────────────────────────────────────

pub struct GsmArenaScraper {
    client: HttpClient,
    parser: PageParser,
    base_url: Url,
}

impl GsmArenaScraper {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        Ok(Self {
            client: HttpClient::new(config)?,
            parser: PageParser::new()?,
            base_url: Url::parse(&config.base_url)
                .with_context(|| format!("Invalid base URL {}", config.base_url))?,
        })
    }

    /// Fetch a page, separating the rate-limit signal from everything else.
    async fn fetch(
        &self,
        url: &str,
        stop: Option<&StopSignal>,
    ) -> Result<Option<String>, RateLimited> {
        match self.client.get_text(url, stop).await {
            Ok(html) => Ok(Some(html)),
            Err(FetchError::RateLimited(url)) => Err(RateLimited { url }),
            Err(FetchError::Cancelled(url)) => {
                debug!("Not sending {}", url);
                Err(stop.and_then(StopSignal::get).cloned().unwrap_or(RateLimited { url }))
            }
            Err(e) => {
                warn!("{}", e);
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl CatalogSource for GsmArenaScraper {
    async fn collect_links(&self, page_url: &str) -> Result<Vec<CatalogLink>, RateLimited> {
        info!("Fetching search page {}", page_url);
        let Some(html) = self.fetch(page_url, None).await? else {
            return Ok(Vec::new());
        };
        let links = self.parser.parse_links(&html, &self.base_url);
        if links.is_empty() {
            warn!("No detail links found on {}", page_url);
        }
        Ok(links)
    }

    async fn fetch_detail(
        &self,
        link: &CatalogLink,
        stop: &StopSignal,
    ) -> Result<Option<SpecRecord>, RateLimited> {
        debug!("Fetching detail page: {}", link);
        let Some(html) = self.fetch(link.as_str(), Some(stop)).await? else {
            return Ok(None);
        };
        let record = self.parser.parse_detail(&html);
        if record.is_none() {
            warn!("No name or specs found for {}", link);
        }
        Ok(record)
    }
}
