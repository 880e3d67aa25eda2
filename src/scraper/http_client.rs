use crate::config::ScraperConfig;
use anyhow::{Context, Result};
use rand::Rng;
use rand::seq::IndexedRandom;
use reqwest::StatusCode;
use reqwest::header::USER_AGENT;
use std::time::Duration;
use thiserror::Error;

use super::StopSignal;
use tokio::time::sleep;
use tracing::debug;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("rate limited at {0}")]
    RateLimited(String),

    /// Another request was rate limited while this one waited its turn.
    #[error("request to {0} not sent, crawl is stopping")]
    Cancelled(String),

    #[error("HTTP {status} for {url}")]
    Status { status: StatusCode, url: String },

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Polite GET client. Requests are spread over one client per configured
/// proxy and carry a rotating user agent.
pub struct HttpClient {
    clients: Vec<reqwest::Client>,
    user_agents: Vec<String>,
    delay_ms: u64,
    jitter_ms: u64,
}

impl HttpClient {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let builder = || {
            reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .gzip(true)
                // Accept cookies so session-based pages work
                .cookie_store(true)
        };

        let clients = if config.proxies.is_empty() {
            vec![builder().no_proxy().build().context("Failed to build HTTP client")?]
        } else {
            config
                .proxies
                .iter()
                .map(|proxy| {
                    let proxy = reqwest::Proxy::all(proxy)
                        .with_context(|| format!("Invalid proxy {}", proxy))?;
                    builder()
                        .proxy(proxy)
                        .build()
                        .context("Failed to build proxied HTTP client")
                })
                .collect::<Result<Vec<_>>>()?
        };

        Ok(Self {
            clients,
            user_agents: config.user_agents.clone(),
            delay_ms: config.request_delay_ms,
            jitter_ms: config.jitter_ms,
        })
    }

    /// Fetch a URL as text. A 429 response maps to `FetchError::RateLimited`;
    /// nothing is retried. A tripped `stop` is checked after the polite delay,
    /// right before the request would go out.
    pub async fn get_text(&self, url: &str, stop: Option<&StopSignal>) -> Result<String, FetchError> {
        self.polite_delay().await;
        if stop.is_some_and(StopSignal::is_tripped) {
            return Err(FetchError::Cancelled(url.to_string()));
        }

        let (client, agent) = self.pick();
        debug!("GET {}", url);

        let mut request = client.get(url);
        if let Some(agent) = agent {
            request = request.header(USER_AGENT, agent);
        }

        let resp = request.send().await.map_err(|source| FetchError::Request {
            url: url.to_string(),
            source,
        })?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited(url.to_string()));
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status,
                url: url.to_string(),
            });
        }

        resp.text().await.map_err(|source| FetchError::Request {
            url: url.to_string(),
            source,
        })
    }

    fn pick(&self) -> (&reqwest::Client, Option<&str>) {
        let mut rng = rand::rng();
        let client = self.clients.choose(&mut rng).unwrap_or(&self.clients[0]);
        let agent = self.user_agents.choose(&mut rng).map(String::as_str);
        (client, agent)
    }

    /// Sleep for the configured delay + random jitter.
    async fn polite_delay(&self) {
        let jitter = rand::rng().random_range(0..=self.jitter_ms);
        let total = Duration::from_millis(self.delay_ms + jitter);
        if !total.is_zero() {
            sleep(total).await;
        }
    }
}
