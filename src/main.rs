mod config;
mod corpus;
mod crawler;
mod enrich;
mod loader;
mod models;
mod scraper;
mod storage;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::AppConfig;
use crate::corpus::CorpusStore;
use crate::crawler::{CrawlCoordinator, CrawlOutcome};
use crate::enrich::currency::{ErApiRates, resolve_rates};
use crate::enrich::{Enricher, EnrichmentSummary};
use crate::models::AnalyticRow;
use crate::scraper::GsmArenaScraper;
use crate::storage::Repository;

#[derive(Parser)]
#[command(name = "phone-etl", about = "Phone spec crawler and enrichment pipeline", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Crawl the catalog and append new phones to the corpus file
    Crawl,

    /// Normalize and enrich the corpus, print a per-tier summary
    Process {
        /// Write the enriched table to this CSV file
        #[arg(short, long)]
        export: Option<PathBuf>,
    },

    /// Enrich the corpus and upsert it into the analytic store
    Store,

    /// Show corpus and analytic store statistics
    Stats,

    /// Apply schema migrations without loading data
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "phone_specs_etl=info,warn",
        1 => "phone_specs_etl=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Crawl => {
            let code = crawl(&config).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }

        Command::Process { export } => {
            let _t = utils::Timer::start("Enrichment");
            let (rows, summary) = enrich_corpus(&config).await?;
            print_summary(&summary);
            if let Some(path) = export {
                export_csv(&path, &rows)?;
                info!("Exported {} rows to {:?}", rows.len(), path);
            }
        }

        Command::Store => {
            let _t = utils::Timer::start("Enrich + store");
            let (rows, summary) = enrich_corpus(&config).await?;
            let repo = open_repo(&config)?;
            let n = repo.upsert_phones(&rows)?;
            print_summary(&summary);
            info!("Upserted {} phones into {:?}", n, config.storage.db_path);
        }

        Command::Stats => {
            let corpus = CorpusStore::new(config.storage.corpus_path.clone()).load()?;
            let stats = open_repo(&config)?.stats().context("Failed to read store statistics")?;
            println!("─────────────────────────────────");
            println!("  Phone ETL — Stats");
            println!("─────────────────────────────────");
            if corpus.is_empty() {
                println!("  Corpus   : empty, run `phone-etl crawl` first");
            } else {
                println!("  Corpus   : {}", utils::fmt_number(corpus.len() as i64));
            }
            println!("  Stored   : {}", utils::fmt_number(stats.phones));
            for (tier, n) in &stats.tiers {
                println!("  {:<9}: {}", tier.as_str(), utils::fmt_number(*n));
            }
            println!(
                "  Price    : {} .. {}",
                utils::fmt_usd(stats.min_price),
                utils::fmt_usd(stats.max_price)
            );
            match &stats.last_run {
                Some((status, added, at)) => {
                    println!("  Last run : {} (+{}) at {}", status, utils::fmt_number(*added), at)
                }
                None => println!("  Last run : —"),
            }
            println!("─────────────────────────────────");
        }

        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}

fn open_repo(config: &AppConfig) -> Result<Repository> {
    let repo = Repository::open(&config.storage.db_path).context("Failed to open DuckDB")?;
    if config.storage.run_migrations {
        repo.run_migrations()?;
    }
    Ok(repo)
}

/// Runs one crawl and returns the process exit code.
async fn crawl(config: &AppConfig) -> Result<i32> {
    let timer = utils::Timer::start("Crawl");

    // Run logging is best-effort.
    let run_log = match open_repo(config).and_then(|repo| Ok((repo.begin_crawl_run()?, repo))) {
        Ok(log) => Some(log),
        Err(e) => {
            warn!("Crawl run will not be logged: {:#}", e);
            None
        }
    };

    let scraper = GsmArenaScraper::new(&config.scraper).context("Failed to build scraper")?;
    let store = CorpusStore::new(config.storage.corpus_path.clone());
    let coordinator =
        CrawlCoordinator::new(scraper, store, config.scraper.search_urls.clone(), &config.crawl);
    let result = coordinator.run().await;

    if let Some((id, repo)) = &run_log {
        let logged = match &result {
            Ok(report) => repo.finish_crawl_run(*id, Ok(report)),
            Err(e) => repo.finish_crawl_run(*id, Err(format!("{:#}", e).as_str())),
        };
        if let Err(e) = logged {
            warn!("Failed to record crawl run {}: {:#}", id, e);
        }
    }

    let report = result?;
    println!("─────────────────────────────────");
    println!("  Stored      : {}", utils::fmt_number(report.stored as i64));
    println!("  Newly added : {}", utils::fmt_number(report.newly_added as i64));
    println!("  Skipped     : {}", utils::fmt_number(report.skipped as i64));
    println!("  Invalid     : {}", utils::fmt_number(report.invalid as i64));
    println!("  Elapsed     : {:.1?}", timer.elapsed());
    if let CrawlOutcome::RateLimited { url } = &report.outcome {
        println!("  RATE LIMITED at {}; progress saved, run again later", url);
    }
    println!("─────────────────────────────────");
    Ok(report.exit_code())
}

/// Corpus file → enriched table.
async fn enrich_corpus(config: &AppConfig) -> Result<(Vec<AnalyticRow>, EnrichmentSummary)> {
    let table = loader::load_corpus_file(&config.storage.corpus_path)?;
    let rates = resolve_rates(&ErApiRates::new(&config.rates)?, &config.rates.fallback).await;
    let enricher = Enricher::new(&config.enrich, rates)?;
    enricher.run(&table)
}

fn print_summary(summary: &EnrichmentSummary) {
    println!("─────────────────────────────────");
    println!("{}", summary);
    println!("─────────────────────────────────");
}

fn export_csv(path: &Path, rows: &[AnalyticRow]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Could not create dir {:?}", parent))?;
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {:?}", path))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}
