//! Crawl coordinator: ties catalog source → corpus store together.
//!
//! ## Phases
//!
//! `Idle → CollectingLinks → FetchingDetails → Completed | RateLimited`
//!
//!   1. Load the stored corpus before any request goes out.
//!   2. Walk every search page and collect the full, de-duplicated link list.
//!   3. Fetch detail pages with at most `max_concurrent` in flight. Results are
//!      consumed here in link order; workers never touch the corpus.
//!   4. New names are appended and flushed every `flush_every` records.
//!
//! A rate-limit response anywhere stops new requests, flushes, and ends the
//! run with [`CrawlOutcome::RateLimited`]. Nothing is retried.

use crate::config::CrawlConfig;
use crate::corpus::{Corpus, CorpusStore};
use crate::models::{CatalogLink, SpecRecord};
use crate::scraper::{CatalogSource, RateLimited, StopSignal};
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlPhase {
    Idle,
    CollectingLinks,
    FetchingDetails,
    Completed,
    RateLimited,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlOutcome {
    Completed,
    RateLimited { url: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlReport {
    /// Records in the corpus at the end of the run.
    pub stored: usize,
    pub newly_added: usize,
    /// Fetched records whose name was already known.
    pub skipped: usize,
    /// Detail pages that did not yield a record.
    pub invalid: usize,
    pub outcome: CrawlOutcome,
}

impl CrawlReport {
    pub fn exit_code(&self) -> i32 {
        match self.outcome {
            CrawlOutcome::Completed => 0,
            CrawlOutcome::RateLimited { .. } => 2,
        }
    }
}

pub struct CrawlCoordinator<S> {
    source: S,
    store: CorpusStore,
    search_urls: Vec<String>,
    max_concurrent: usize,
    flush_every: usize,
}

/// Corpus plus the bookkeeping for batched flushes.
struct Ledger<'a> {
    store: &'a CorpusStore,
    corpus: Corpus,
    unflushed: usize,
    flush_every: usize,
    newly_added: usize,
    skipped: usize,
    invalid: usize,
}

impl Ledger<'_> {
    fn accept(&mut self, record: Option<SpecRecord>) {
        let Some(record) = record else {
            self.invalid += 1;
            return;
        };
        if self.corpus.contains(&record.name) {
            self.skipped += 1;
            return;
        }
        let name = record.name.clone();
        if !self.corpus.insert(record) {
            self.invalid += 1;
            return;
        }
        self.newly_added += 1;
        self.unflushed += 1;
        info!("+ {} ({} stored)", name, self.corpus.len());

        if self.unflushed >= self.flush_every {
            // A failed flush keeps the records in memory; the next flush retries.
            if let Err(e) = self.store.save(&self.corpus) {
                error!("Persisting corpus failed, will retry: {:#}", e);
            } else {
                self.unflushed = 0;
            }
        }
    }

    fn finish(self, outcome: CrawlOutcome) -> Result<CrawlReport> {
        self.store
            .save(&self.corpus)
            .with_context(|| format!("Final save of {:?} failed", self.store.path()))?;

        Ok(CrawlReport {
            stored: self.corpus.len(),
            newly_added: self.newly_added,
            skipped: self.skipped,
            invalid: self.invalid,
            outcome,
        })
    }
}

fn enter(from: CrawlPhase, to: CrawlPhase) -> CrawlPhase {
    info!("=== {:?} → {:?} ===", from, to);
    to
}

/// Drop repeated links, keeping first occurrence order.
fn dedup_links(links: Vec<CatalogLink>) -> Vec<CatalogLink> {
    let mut seen = HashSet::new();
    links
        .into_iter()
        .filter(|link| seen.insert(link.clone()))
        .collect()
}

impl<S: CatalogSource> CrawlCoordinator<S> {
    pub fn new(source: S, store: CorpusStore, search_urls: Vec<String>, config: &CrawlConfig) -> Self {
        Self {
            source,
            store,
            search_urls,
            max_concurrent: config.max_concurrent.max(1),
            flush_every: config.flush_every.max(1),
        }
    }

    pub async fn run(&self) -> Result<CrawlReport> {
        let mut phase = CrawlPhase::Idle;

        let corpus = self.store.load().context("Failed to load corpus")?;
        info!("{} records already stored", corpus.len());
        let mut ledger = Ledger {
            store: &self.store,
            corpus,
            unflushed: 0,
            flush_every: self.flush_every,
            newly_added: 0,
            skipped: 0,
            invalid: 0,
        };

        // ── 1. Collect the full candidate list ────────────────────────────────
        phase = enter(phase, CrawlPhase::CollectingLinks);
        let mut all_links = Vec::new();
        for url in &self.search_urls {
            match self.source.collect_links(url).await {
                Ok(links) => {
                    info!("{} links from {}", links.len(), url);
                    all_links.extend(links);
                }
                Err(signal) => {
                    enter(phase, CrawlPhase::RateLimited);
                    return self.stop(ledger, signal);
                }
            }
        }

        let links = dedup_links(all_links);
        if links.is_empty() {
            warn!("No detail links found across {} search pages", self.search_urls.len());
            enter(phase, CrawlPhase::Completed);
            return ledger.finish(CrawlOutcome::Completed);
        }

        // ── 2. Fetch details under the concurrency bound ──────────────────────
        phase = enter(phase, CrawlPhase::FetchingDetails);
        info!("{} unique detail pages, {} at a time", links.len(), self.max_concurrent);

        let signal = StopSignal::default();
        let mut results = stream::iter(links.iter())
            .map(|link| {
                let signal = &signal;
                let source = &self.source;
                async move {
                    // Nothing new goes out once any worker has seen a rate limit.
                    // Workers already waiting re-check before they send.
                    if signal.is_tripped() {
                        return None;
                    }
                    let result = source.fetch_detail(link, signal).await;
                    if let Err(limited) = &result {
                        signal.trip(limited.clone());
                    }
                    Some(result)
                }
            })
            .buffered(self.max_concurrent);

        while let Some(result) = results.next().await {
            match result {
                Some(Ok(record)) => ledger.accept(record),
                Some(Err(_)) | None => break,
            }
            if signal.is_tripped() {
                break;
            }
        }
        drop(results);

        if let Some(limited) = signal.into_inner() {
            enter(phase, CrawlPhase::RateLimited);
            return self.stop(ledger, limited);
        }

        enter(phase, CrawlPhase::Completed);
        let report = ledger.finish(CrawlOutcome::Completed)?;
        info!(
            "=== Done: {} stored | {} new | {} skipped | {} invalid ===",
            report.stored, report.newly_added, report.skipped, report.invalid
        );
        Ok(report)
    }

    fn stop(&self, ledger: Ledger<'_>, signal: RateLimited) -> Result<CrawlReport> {
        warn!("Rate limited at {}; saving progress and stopping", signal.url);
        let report = ledger.finish(CrawlOutcome::RateLimited { url: signal.url })?;
        warn!(
            "=== Stopped: {} stored | {} new | {} skipped | {} invalid ===",
            report.stored, report.newly_added, report.skipped, report.invalid
        );
        Ok(report)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CategoryMap, FieldValue};
    use async_trait::async_trait;
    use indexmap::IndexMap;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct StubSource {
        pages: HashMap<String, Vec<CatalogLink>>,
        details: HashMap<CatalogLink, Option<SpecRecord>>,
        /// 1-based detail call that answers with a rate limit.
        limit_detail_at: Option<usize>,
        limit_page: Option<String>,
        /// Links answered with a rate limit whenever they are requested.
        limited_links: HashSet<CatalogLink>,
        /// Wait before sending, like the polite delay of the real client.
        delays: HashMap<CatalogLink, u64>,
        detail_calls: AtomicUsize,
        requested: Mutex<Vec<String>>,
    }

    impl StubSource {
        fn with_phones(pages: &[(&str, &[&str])]) -> Self {
            let mut stub = StubSource::default();
            for (page, names) in pages {
                let links = names.iter().map(|n| link(n)).collect();
                stub.pages.insert(page.to_string(), links);
                for name in names.iter() {
                    stub.details.insert(link(name), Some(phone(name)));
                }
            }
            stub
        }

        fn calls(&self) -> usize {
            self.detail_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CatalogSource for StubSource {
        async fn collect_links(&self, page_url: &str) -> Result<Vec<CatalogLink>, RateLimited> {
            if self.limit_page.as_deref() == Some(page_url) {
                return Err(RateLimited { url: page_url.to_string() });
            }
            Ok(self.pages.get(page_url).cloned().unwrap_or_default())
        }

        async fn fetch_detail(
            &self,
            link: &CatalogLink,
            stop: &StopSignal,
        ) -> Result<Option<SpecRecord>, RateLimited> {
            if let Some(ms) = self.delays.get(link) {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
            }
            if let Some(signal) = stop.get() {
                return Err(signal.clone());
            }
            let n = self.detail_calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.requested.lock().unwrap().push(link.0.clone());
            if self.limit_detail_at == Some(n) || self.limited_links.contains(link) {
                return Err(RateLimited { url: link.0.clone() });
            }
            Ok(self.details.get(link).cloned().flatten())
        }
    }

    fn link(name: &str) -> CatalogLink {
        CatalogLink(format!("https://example.test/{}.php", name.to_lowercase().replace(' ', "_")))
    }

    fn phone(name: &str) -> SpecRecord {
        let mut misc = CategoryMap::new();
        misc.insert("price".into(), FieldValue::Scalar("$ 199".into()));
        let mut categories = IndexMap::new();
        categories.insert("Misc".to_string(), misc);
        SpecRecord::new(name, categories)
    }

    fn config(max_concurrent: usize, flush_every: usize) -> CrawlConfig {
        CrawlConfig { max_concurrent, flush_every }
    }

    fn stored_names(store: &CorpusStore) -> Vec<String> {
        store.load().unwrap().records().iter().map(|r| r.name.clone()).collect()
    }

    fn coordinator(
        source: StubSource,
        dir: &TempDir,
        pages: &[&str],
        cfg: CrawlConfig,
    ) -> CrawlCoordinator<StubSource> {
        CrawlCoordinator::new(
            source,
            CorpusStore::new(dir.path().join("phones.json")),
            pages.iter().map(|p| p.to_string()).collect(),
            &cfg,
        )
    }

    #[tokio::test]
    async fn test_links_deduplicated_before_fetching() {
        let dir = TempDir::new().unwrap();
        let stub = StubSource::with_phones(&[("p1", &["A", "B"][..]), ("p2", &["B", "C"][..])]);
        let crawler = coordinator(stub, &dir, &["p1", "p2"], config(2, 1));

        let report = crawler.run().await.unwrap();
        assert_eq!(crawler.source.calls(), 3);
        assert_eq!(report.newly_added, 3);
        assert_eq!(report.stored, 3);
        assert_eq!(report.outcome, CrawlOutcome::Completed);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(stored_names(&crawler.store), vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_second_run_adds_nothing() {
        let dir = TempDir::new().unwrap();
        let pages = [("p1", &["A", "B", "C"][..])];

        let first = coordinator(StubSource::with_phones(&pages), &dir, &["p1"], config(3, 1));
        assert_eq!(first.run().await.unwrap().newly_added, 3);

        let second = coordinator(StubSource::with_phones(&pages), &dir, &["p1"], config(3, 1));
        let report = second.run().await.unwrap();
        assert_eq!(report.newly_added, 0);
        assert_eq!(report.skipped, 3);
        assert_eq!(report.stored, 3);
        assert_eq!(stored_names(&second.store), vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_same_name_from_two_urls_is_skipped() {
        let dir = TempDir::new().unwrap();
        let mut stub = StubSource::with_phones(&[("p1", &["A"][..])]);
        let alias = CatalogLink("https://example.test/a_alias.php".into());
        stub.pages.get_mut("p1").unwrap().push(alias.clone());
        stub.details.insert(alias, Some(phone("A")));
        let broken = CatalogLink("https://example.test/broken.php".into());
        stub.pages.get_mut("p1").unwrap().push(broken.clone());
        stub.details.insert(broken, None);

        let crawler = coordinator(stub, &dir, &["p1"], config(1, 1));
        let report = crawler.run().await.unwrap();
        assert_eq!(report.newly_added, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.invalid, 1);
        assert_eq!(stored_names(&crawler.store), vec!["A"]);
    }

    #[tokio::test]
    async fn test_rate_limit_on_nth_detail_persists_first_n_minus_one() {
        let dir = TempDir::new().unwrap();
        let mut stub = StubSource::with_phones(&[("p1", &["A", "B", "C", "D", "E"][..])]);
        stub.limit_detail_at = Some(3);

        let crawler = coordinator(stub, &dir, &["p1"], config(1, 1));
        let report = crawler.run().await.unwrap();

        assert_eq!(crawler.source.calls(), 3);
        assert_eq!(report.newly_added, 2);
        assert_eq!(report.exit_code(), 2);
        assert_eq!(
            report.outcome,
            CrawlOutcome::RateLimited { url: link("C").0 }
        );
        assert_eq!(stored_names(&crawler.store), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_rate_limit_with_batched_flush_still_persists_everything() {
        let dir = TempDir::new().unwrap();
        let mut stub = StubSource::with_phones(&[("p1", &["A", "B", "C", "D", "E", "F"][..])]);
        stub.limit_detail_at = Some(5);

        let crawler = coordinator(stub, &dir, &["p1"], config(1, 3));
        let report = crawler.run().await.unwrap();

        assert_eq!(report.newly_added, 4);
        assert_eq!(report.stored, 4);
        assert_eq!(stored_names(&crawler.store), vec!["A", "B", "C", "D"]);
    }

    #[tokio::test]
    async fn test_batched_flush_writes_partial_progress() {
        let dir = TempDir::new().unwrap();
        let stub = StubSource::with_phones(&[("p1", &["A", "B", "C", "D", "E"][..])]);
        let crawler = coordinator(stub, &dir, &["p1"], config(2, 2));

        let report = crawler.run().await.unwrap();
        assert_eq!(report.newly_added, 5);
        assert_eq!(stored_names(&crawler.store).len(), 5);
    }

    #[tokio::test]
    async fn test_no_new_requests_after_signal_with_concurrency() {
        let dir = TempDir::new().unwrap();
        let names: Vec<String> = (0..20).map(|i| format!("P{}", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut stub = StubSource::with_phones(&[("p1", &refs[..])]);
        stub.limit_detail_at = Some(4);

        let crawler = coordinator(stub, &dir, &["p1"], config(3, 1));
        let report = crawler.run().await.unwrap();

        // at most the requests already in flight when the signal arrived
        assert!(crawler.source.calls() <= 4 + 2);
        assert!(report.newly_added <= 3);
        assert_eq!(report.exit_code(), 2);

        let stored = crawler.store.load().unwrap();
        assert_eq!(stored.len(), report.newly_added);
        for r in stored.records() {
            assert!(stored.contains(&r.name));
        }
    }

    #[tokio::test]
    async fn test_waiting_workers_do_not_send_after_signal() {
        let dir = TempDir::new().unwrap();
        let mut stub = StubSource::with_phones(&[("p1", &["L1", "L2", "L3", "L4"][..])]);
        stub.delays.insert(link("L1"), 80);
        stub.delays.insert(link("L3"), 20);
        stub.delays.insert(link("L4"), 20);
        stub.limited_links.insert(link("L2"));

        let crawler = coordinator(stub, &dir, &["p1"], config(3, 1));
        let report = crawler.run().await.unwrap();

        // L2 answers 429 at once; L1 and L3 wake up after it and stay unsent.
        assert_eq!(*crawler.source.requested.lock().unwrap(), vec![link("L2").0]);
        assert_eq!(report.outcome, CrawlOutcome::RateLimited { url: link("L2").0 });
        assert_eq!(report.newly_added, 0);
        assert_eq!(report.exit_code(), 2);
        assert!(crawler.store.path().exists());
    }

    #[tokio::test]
    async fn test_rate_limit_during_link_collection() {
        let dir = TempDir::new().unwrap();
        let mut stub = StubSource::with_phones(&[("p1", &["A"][..]), ("p2", &["B"][..])]);
        stub.limit_page = Some("p2".into());

        let crawler = coordinator(stub, &dir, &["p1", "p2"], config(2, 1));
        let report = crawler.run().await.unwrap();

        assert_eq!(crawler.source.calls(), 0);
        assert_eq!(report.newly_added, 0);
        assert_eq!(report.exit_code(), 2);
        assert!(crawler.store.path().exists());
    }

    #[tokio::test]
    async fn test_malformed_corpus_aborts_before_network() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("phones.json"), "garbage").unwrap();
        let stub = StubSource::with_phones(&[("p1", &["A"][..])]);

        let crawler = coordinator(stub, &dir, &["p1"], config(1, 1));
        assert!(crawler.run().await.is_err());
        assert_eq!(crawler.source.calls(), 0);
        assert!(crawler.source.requested.lock().unwrap().is_empty());
    }

    #[test]
    fn test_dedup_links_keeps_first_order() {
        let links = vec![link("B"), link("A"), link("B"), link("C"), link("A")];
        assert_eq!(dedup_links(links), vec![link("B"), link("A"), link("C")]);
    }
}
