use crate::crawler::{CrawlOutcome, CrawlReport};
use crate::models::{AnalyticRow, Tier};
use anyhow::{Context, Result};
use chrono::Utc;
use duckdb::{Connection, params};
use std::path::Path;
use tracing::info;

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS phones (
    name              VARCHAR PRIMARY KEY,
    chipset           VARCHAR,
    battery_capacity  INTEGER NOT NULL,
    charging_speed    INTEGER NOT NULL,
    price_usd         DOUBLE,
    benchmark_score   BIGINT,
    display_family    VARCHAR NOT NULL,
    refresh_rate      INTEGER,
    brightness        DOUBLE,
    tier              VARCHAR NOT NULL,
    enriched_at       TIMESTAMP NOT NULL
);

CREATE SEQUENCE IF NOT EXISTS crawl_run_ids START 1;

CREATE TABLE IF NOT EXISTS crawl_runs (
    id            INTEGER PRIMARY KEY DEFAULT nextval('crawl_run_ids'),
    started_at    TIMESTAMP NOT NULL,
    finished_at   TIMESTAMP,
    -- running | completed | rate_limited | error
    status        VARCHAR NOT NULL DEFAULT 'running',
    stored        INTEGER DEFAULT 0,
    newly_added   INTEGER DEFAULT 0,
    skipped       INTEGER DEFAULT 0,
    invalid       INTEGER DEFAULT 0,
    error_msg     VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_phones_tier    ON phones (tier);
CREATE INDEX IF NOT EXISTS idx_phones_chipset ON phones (chipset);
"#;

/// What the `stats` command prints from the analytic store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreStats {
    pub phones: i64,
    pub tiers: Vec<(Tier, i64)>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    /// (status, newly_added, finished_at)
    pub last_run: Option<(String, i64, chrono::NaiveDateTime)>,
}

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        self.conn.execute_batch(DDL).context("DDL failed")?;
        self.conn.execute_batch(INDEXES).context("Index creation failed")?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Phones ────────────────────────────────────────────────────────────────

    /// Upsert keyed by name. The enriched table is recomputed wholesale, so
    /// every column is overwritten.
    pub fn upsert_phones(&self, rows: &[AnalyticRow]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().naive_utc();
        let tx = self.conn.unchecked_transaction()?;
        let sql = r#"
            INSERT INTO phones
                (name, chipset, battery_capacity, charging_speed, price_usd, benchmark_score,
                 display_family, refresh_rate, brightness, tier, enriched_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (name) DO UPDATE SET
                chipset          = excluded.chipset,
                battery_capacity = excluded.battery_capacity,
                charging_speed   = excluded.charging_speed,
                price_usd        = excluded.price_usd,
                benchmark_score  = excluded.benchmark_score,
                display_family   = excluded.display_family,
                refresh_rate     = excluded.refresh_rate,
                brightness       = excluded.brightness,
                tier             = excluded.tier,
                enriched_at      = excluded.enriched_at
        "#;

        for row in rows {
            tx.execute(
                sql,
                params![
                    row.name,
                    row.chipset,
                    row.battery_capacity,
                    row.charging_speed,
                    row.price,
                    row.benchmark_score,
                    row.display_family.as_str(),
                    row.refresh_rate,
                    row.brightness,
                    row.tier.as_str(),
                    now,
                ],
            )
            .with_context(|| format!("upsert phone {}", row.name))?;
        }

        tx.commit()?;
        Ok(rows.len())
    }

    pub fn phone_count(&self) -> Result<i64> {
        let mut s = self.conn.prepare("SELECT COUNT(*) FROM phones")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    /// Phones per tier, in tier order. Tiers with no phones report 0.
    pub fn tier_counts(&self) -> Result<Vec<(Tier, i64)>> {
        let mut stmt = self.conn.prepare("SELECT COUNT(*) FROM phones WHERE tier = ?")?;
        Tier::ALL
            .iter()
            .map(|tier| -> Result<(Tier, i64)> {
                let n: i64 = stmt.query_row(params![tier.as_str()], |r| r.get(0))?;
                Ok((*tier, n))
            })
            .collect()
    }

    pub fn price_range(&self) -> Result<(Option<f64>, Option<f64>)> {
        let mut s = self.conn.prepare("SELECT MIN(price_usd), MAX(price_usd) FROM phones")?;
        Ok(s.query_row([], |r| Ok((r.get(0)?, r.get(1)?)))?)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let (min_price, max_price) = self.price_range().context("price range query failed")?;
        Ok(StoreStats {
            phones: self.phone_count().context("phone count query failed")?,
            tiers: self.tier_counts().context("tier count query failed")?,
            min_price,
            max_price,
            last_run: self.last_crawl_run().context("crawl run query failed")?,
        })
    }

    // ── Crawl run log ─────────────────────────────────────────────────────────

    pub fn begin_crawl_run(&self) -> Result<i64> {
        let id: i64 = self.conn.query_row(
            "INSERT INTO crawl_runs (started_at, status) VALUES (?, 'running') RETURNING id",
            params![Utc::now().naive_utc()],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn finish_crawl_run(&self, run_id: i64, result: Result<&CrawlReport, &str>) -> Result<()> {
        let (status, report, error) = match result {
            Ok(r) => match r.outcome {
                CrawlOutcome::Completed => ("completed", Some(r), None),
                CrawlOutcome::RateLimited { .. } => ("rate_limited", Some(r), None),
            },
            Err(msg) => ("error", None, Some(msg)),
        };
        let count = |f: fn(&CrawlReport) -> usize| report.map(f).unwrap_or(0) as i64;

        self.conn.execute(
            r#"UPDATE crawl_runs SET
               finished_at = ?, status = ?,
               stored = ?, newly_added = ?, skipped = ?, invalid = ?, error_msg = ?
               WHERE id = ?"#,
            params![
                Utc::now().naive_utc(),
                status,
                count(|r| r.stored),
                count(|r| r.newly_added),
                count(|r| r.skipped),
                count(|r| r.invalid),
                error,
                run_id,
            ],
        )?;
        Ok(())
    }

    /// (status, newly_added, finished_at) of the most recent finished run.
    pub fn last_crawl_run(&self) -> Result<Option<(String, i64, chrono::NaiveDateTime)>> {
        let mut s = self.conn.prepare(
            "SELECT status, newly_added, finished_at FROM crawl_runs
             WHERE finished_at IS NOT NULL ORDER BY id DESC LIMIT 1",
        )?;
        let mut rows = s.query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?;
        Ok(rows.next().transpose()?)
    }
}
