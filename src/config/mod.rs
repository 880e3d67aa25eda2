use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub rates: RatesConfig,
    #[serde(default)]
    pub enrich: EnrichConfig,
}

/// Catalog scraper configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_search_urls")]
    pub search_urls: Vec<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    #[serde(default = "default_user_agents")]
    pub user_agents: Vec<String>,

    /// e.g. "http://10.0.0.2:8080". Empty means direct connections.
    #[serde(default)]
    pub proxies: Vec<String>,
}

/// Crawl coordinator configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CrawlConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Persist after this many new records. 1 flushes after every record.
    #[serde(default = "default_flush_every")]
    pub flush_every: usize,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_corpus_path")]
    pub corpus_path: PathBuf,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Exchange-rate source configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RatesConfig {
    #[serde(default = "default_rates_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_rates_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_rates_retries")]
    pub max_retries: usize,

    /// Currency code → USD multiplier used when the live source is down.
    #[serde(default = "default_fallback_rates")]
    pub fallback: BTreeMap<String, f64>,
}

/// Normalization & enrichment configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnrichConfig {
    #[serde(default = "default_kmeans_seed")]
    pub kmeans_seed: u64,

    #[serde(default = "default_kmeans_restarts")]
    pub kmeans_restarts: usize,

    #[serde(default = "default_knn_neighbors")]
    pub knn_neighbors: usize,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "https://www.gsmarena.com".to_string()
}
fn default_search_urls() -> Vec<String> {
    const FILTER: &str = "nDisplayResMin=2073600&chkReview=selected&sAvailabilities=1";
    [
        "nPriceMin=900",
        "nPriceMin=700&nPriceMax=900",
        "nPriceMin=600&nPriceMax=700",
        "nPriceMin=450&nPriceMax=600",
        "nPriceMin=350&nPriceMax=450",
        "nPriceMin=300&nPriceMax=350",
        "nPriceMin=250&nPriceMax=300",
        "nPriceMin=200&nPriceMax=250",
        "nYearMin=2022&nPriceMin=150&nPriceMax=200",
        "nYearMax=2022&nPriceMin=150&nPriceMax=200",
        "nPriceMax=150",
    ]
    .iter()
    .map(|range| format!("https://www.gsmarena.com/results.php3?{}&{}", range, FILTER))
    .collect()
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_request_delay_ms() -> u64 {
    3000
}
fn default_jitter_ms() -> u64 {
    3000
}
fn default_user_agents() -> Vec<String> {
    vec![
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36".to_string(),
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.0.3 Safari/605.1.15".to_string(),
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/92.0.4515.107 Safari/537.36".to_string(),
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:89.0) Gecko/20100101 Firefox/89.0".to_string(),
    ]
}
fn default_max_concurrent() -> usize {
    2
}
fn default_flush_every() -> usize {
    1
}
fn default_corpus_path() -> PathBuf {
    PathBuf::from("data/phones.json")
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/phones.duckdb")
}
fn default_true() -> bool {
    true
}
fn default_rates_endpoint() -> String {
    "https://open.er-api.com/v6/latest/USD".to_string()
}
fn default_rates_timeout_secs() -> u64 {
    5
}
fn default_rates_retries() -> usize {
    2
}
fn default_fallback_rates() -> BTreeMap<String, f64> {
    [("USD", 1.0), ("EUR", 1.08), ("GBP", 1.27), ("INR", 0.012)]
        .into_iter()
        .map(|(code, rate)| (code.to_string(), rate))
        .collect()
}
fn default_kmeans_seed() -> u64 {
    42
}
fn default_kmeans_restarts() -> usize {
    10
}
fn default_knn_neighbors() -> usize {
    5
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            search_urls: default_search_urls(),
            timeout_secs: default_timeout_secs(),
            request_delay_ms: default_request_delay_ms(),
            jitter_ms: default_jitter_ms(),
            user_agents: default_user_agents(),
            proxies: Vec::new(),
        }
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            flush_every: default_flush_every(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            corpus_path: default_corpus_path(),
            db_path: default_db_path(),
            run_migrations: true,
        }
    }
}

impl Default for RatesConfig {
    fn default() -> Self {
        Self {
            endpoint: default_rates_endpoint(),
            timeout_secs: default_rates_timeout_secs(),
            max_retries: default_rates_retries(),
            fallback: default_fallback_rates(),
        }
    }
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            kmeans_seed: default_kmeans_seed(),
            kmeans_restarts: default_kmeans_restarts(),
            knn_neighbors: default_knn_neighbors(),
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::Environment::with_prefix("PHONE_ETL")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("scraper.search_urls")
                    .with_list_parse_key("scraper.user_agents")
                    .with_list_parse_key("scraper.proxies")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration sources")?;

        let mut app_cfg: AppConfig = cfg
            .try_deserialize()
            .context("Invalid configuration")?;
        app_cfg.crawl.max_concurrent = app_cfg.crawl.max_concurrent.max(1);
        app_cfg.crawl.flush_every = app_cfg.crawl.flush_every.max(1);
        Ok(app_cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg: AppConfig = config::Config::builder()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.crawl.max_concurrent, 2);
        assert_eq!(cfg.crawl.flush_every, 1);
        assert_eq!(cfg.enrich.kmeans_seed, 42);
        assert_eq!(cfg.scraper.search_urls.len(), 11);
        assert_eq!(cfg.rates.fallback.get("USD"), Some(&1.0));
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(
                "[crawl]\nflush_every = 5\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.crawl.flush_every, 5);
        assert_eq!(cfg.crawl.max_concurrent, 2);
        assert_eq!(cfg.storage.corpus_path, PathBuf::from("data/phones.json"));
    }
}
