//! Price strings → USD.

use crate::config::RatesConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio_retry::Retry;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, info, warn};

/// Currency code → USD multiplier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateTable(HashMap<String, f64>);

impl RateTable {
    pub fn usd_only() -> Self {
        Self(HashMap::from([("USD".to_string(), 1.0)]))
    }

    pub fn from_fallback(fallback: &BTreeMap<String, f64>) -> Self {
        Self(fallback.iter().map(|(k, v)| (k.to_uppercase(), *v)).collect())
    }

    /// Invert a USD → code table, skipping non-positive rates.
    pub fn from_usd_quotes(quotes: &HashMap<String, f64>) -> Self {
        Self(
            quotes
                .iter()
                .filter(|(_, rate)| **rate > 0.0 && rate.is_finite())
                .map(|(code, rate)| (code.to_uppercase(), 1.0 / rate))
                .collect(),
        )
    }

    pub fn get(&self, code: &str) -> Option<f64> {
        self.0.get(code).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ── Rate source ───────────────────────────────────────────────────────────────

#[async_trait]
pub trait RateSource: Send + Sync {
    /// Live USD → code quotes.
    async fn usd_quotes(&self) -> Result<HashMap<String, f64>>;
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    rates: HashMap<String, f64>,
}

/// open.er-api.com style endpoint: `{"rates": {"EUR": 0.92, ...}}`.
pub struct ErApiRates {
    client: reqwest::Client,
    endpoint: String,
    max_retries: usize,
}

impl ErApiRates {
    pub fn new(config: &RatesConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .build()
            .context("Failed to build rates HTTP client")?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            max_retries: config.max_retries,
        })
    }

    async fn fetch_once(&self) -> Result<HashMap<String, f64>> {
        debug!("GET {}", self.endpoint);
        let body: QuoteResponse = self
            .client
            .get(&self.endpoint)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(body.rates)
    }
}

#[async_trait]
impl RateSource for ErApiRates {
    async fn usd_quotes(&self) -> Result<HashMap<String, f64>> {
        // 200ms, 400ms, 800ms ... capped at 5s
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(100)
            .max_delay(Duration::from_secs(5))
            .map(jitter)
            .take(self.max_retries);
        Retry::start(strategy, || self.fetch_once())
            .await
            .with_context(|| format!("Exchange rates unavailable from {}", self.endpoint))
    }
}

/// Live rates when the source answers with something usable, the fallback
/// table otherwise.
pub async fn resolve_rates(source: &dyn RateSource, fallback: &BTreeMap<String, f64>) -> RateTable {
    match source.usd_quotes().await {
        Ok(quotes) => {
            let table = RateTable::from_usd_quotes(&quotes);
            if table.is_empty() {
                warn!("Rate source returned no usable rates; using fallback table");
                RateTable::from_fallback(fallback)
            } else {
                info!("Loaded {} exchange rates", table.len());
                table
            }
        }
        Err(e) => {
            warn!("{:#}; using fallback table", e);
            RateTable::from_fallback(fallback)
        }
    }
}

// ── Normalizer ────────────────────────────────────────────────────────────────

pub struct CurrencyNormalizer {
    pattern: Regex,
    symbols: HashMap<&'static str, &'static str>,
    rates: RateTable,
}

impl CurrencyNormalizer {
    pub fn new(rates: RateTable) -> Result<Self> {
        Ok(Self {
            pattern: Regex::new(
                r"([$€£₹])?\s?([0-9][0-9,]*(?:\.[0-9]{2})?)\s?(?:([A-Z]{3})\b)?",
            )?,
            symbols: HashMap::from([("$", "USD"), ("€", "EUR"), ("£", "GBP"), ("₹", "INR")]),
            rates,
        })
    }

    /// First amount in `text`, converted to USD and rounded to cents.
    ///
    /// The currency comes from a leading symbol, else a trailing code, else
    /// USD. A code without a known rate converts at 1.
    pub fn to_usd(&self, text: &str) -> Option<f64> {
        let caps = self.pattern.captures(text)?;
        let amount: f64 = caps.get(2)?.as_str().replace(',', "").parse().ok()?;

        let code = caps
            .get(1)
            .and_then(|m| self.symbols.get(m.as_str()).copied())
            .or_else(|| caps.get(3).map(|m| m.as_str()));

        let rate = match code {
            Some(code) => self.rates.get(code).unwrap_or_else(|| {
                debug!("No rate for {}, assuming 1", code);
                1.0
            }),
            None => 1.0,
        };

        Some((amount * rate * 100.0).round() / 100.0)
    }
}
