//! Normalization & enrichment: raw table → typed, tiered, imputed rows.

pub mod currency;
pub mod extract;
pub mod impute;
pub mod tiers;

use crate::config::EnrichConfig;
use crate::loader::RawTable;
use crate::models::{AnalyticRow, PhoneFeatures, Tier};
use anyhow::Result;
use currency::{CurrencyNormalizer, RateTable};
use extract::FieldExtractor;
use impute::FillCounts;
use std::collections::BTreeMap;
use std::fmt;
use tiers::{ClusterStrategy, KMeans};
use tracing::info;

pub struct Enricher {
    extractor: FieldExtractor,
    currency: CurrencyNormalizer,
    clustering: Box<dyn ClusterStrategy + Send + Sync>,
    knn_neighbors: usize,
}

impl Enricher {
    pub fn new(config: &EnrichConfig, rates: RateTable) -> Result<Self> {
        Ok(Self {
            extractor: FieldExtractor::new()?,
            currency: CurrencyNormalizer::new(rates)?,
            clustering: Box::new(KMeans::from_config(config)),
            knn_neighbors: config.knn_neighbors.max(1),
        })
    }

    /// Whole-table pass. Row order and count follow the input table.
    pub fn run(&self, table: &RawTable) -> Result<(Vec<AnalyticRow>, EnrichmentSummary)> {
        let features: Vec<PhoneFeatures> = table
            .rows()
            .iter()
            .map(|row| self.extractor.extract(row, &self.currency))
            .collect();

        let prices: Vec<Option<f64>> = features.iter().map(|f| f.price).collect();
        let tiers = tiers::assign_tiers(&prices, self.clustering.as_ref())?;

        let mut rows: Vec<AnalyticRow> = features
            .into_iter()
            .zip(tiers)
            .map(|(f, tier)| AnalyticRow::from_features(f, tier))
            .collect();

        let filled = impute::impute(&mut rows, self.knn_neighbors);
        let summary = EnrichmentSummary::from_rows(&rows, filled);
        info!(
            "Enriched {} rows ({} prices, {} benchmark scores imputed)",
            summary.rows, filled.price, filled.benchmark_score
        );
        Ok((rows, summary))
    }
}

// ── Summary ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentSummary {
    pub rows: usize,
    pub tiers: BTreeMap<Tier, usize>,
    pub filled: FillCounts,
    /// Cells still empty after every fill step, per column.
    pub missing: BTreeMap<&'static str, usize>,
}

impl EnrichmentSummary {
    pub fn from_rows(rows: &[AnalyticRow], filled: FillCounts) -> Self {
        let mut tiers: BTreeMap<Tier, usize> = Tier::ALL.iter().map(|t| (*t, 0)).collect();
        for row in rows {
            *tiers.entry(row.tier).or_default() += 1;
        }

        let count = |pred: fn(&AnalyticRow) -> bool| rows.iter().filter(|r| pred(r)).count();
        let missing = BTreeMap::from([
            ("chipset", count(|r| r.chipset.is_none())),
            ("price", count(|r| r.price.is_none())),
            ("benchmark_score", count(|r| r.benchmark_score.is_none())),
            ("refresh_rate", count(|r| r.refresh_rate.is_none())),
            ("brightness", count(|r| r.brightness.is_none())),
        ]);

        Self {
            rows: rows.len(),
            tiers,
            filled,
            missing,
        }
    }
}

impl fmt::Display for EnrichmentSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Rows: {}", self.rows)?;
        for (tier, n) in &self.tiers {
            writeln!(f, "  {:<10} {:>6}", tier.as_str(), n)?;
        }
        writeln!(
            f,
            "  Imputed: price={}, refresh_rate={}, brightness={}, benchmark_score={}",
            self.filled.price,
            self.filled.refresh_rate,
            self.filled.brightness,
            self.filled.benchmark_score
        )?;
        let gaps: Vec<String> = self
            .missing
            .iter()
            .filter(|(_, n)| **n > 0)
            .map(|(col, n)| format!("{}={}", col, n))
            .collect();
        if gaps.is_empty() {
            write!(f, "  No missing values")
        } else {
            write!(f, "  Still missing: {}", gaps.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_table;
    use crate::models::{CategoryMap, DisplayFamily, FieldValue, SpecRecord};
    use indexmap::IndexMap;

    fn phone(name: &str, price: &str, chipset: &str, bench: &str, display: &str) -> SpecRecord {
        let mut categories: IndexMap<String, CategoryMap> = IndexMap::new();
        let mut put = |cat: &str, key: &str, value: &str| {
            if !value.is_empty() {
                categories
                    .entry(cat.to_string())
                    .or_default()
                    .insert(key.to_string(), FieldValue::Scalar(value.to_string()));
            }
        };
        put("Misc", "price", price);
        put("Platform", "chipset", chipset);
        put("Tests", "tbench", bench);
        put("Display", "displaytype", display);
        put("Battery", "batdescription1", "Li-Po 5000 mAh");
        SpecRecord::new(name, categories)
    }

    fn enricher() -> Enricher {
        Enricher::new(&EnrichConfig::default(), RateTable::usd_only()).unwrap()
    }

    #[test]
    fn test_end_to_end_rows() {
        let records = vec![
            phone("Low A", "$ 100", "Helio G85 (12 nm)", "AnTuTu: 250000 (v9)", "IPS LCD, 90Hz, 450 nits"),
            phone("Low B", "$ 110", "Helio G85 (12 nm)", "", "IPS LCD, 90Hz"),
            phone("Low C", "$ 120", "Helio G99 (6 nm)", "AnTuTu: 400000 (v10)", "IPS LCD, 90Hz, 500 nits"),
            phone("Mid A", "$ 500", "Snapdragon 7 Gen 3 (4 nm)", "AnTuTu: 800000 (v10)", "AMOLED, 120Hz, 1200 nits"),
            phone("Mid B", "$ 510", "Snapdragon 7 Gen 3 (4 nm)", "AnTuTu: 820000 (v10)", "AMOLED, 120Hz"),
            phone("Mid C", "$ 520", "Dimensity 7300 (4 nm)", "AnTuTu: 700000 (v10)", "AMOLED, 120Hz, 1400 nits"),
            phone("Top A", "$ 2000", "Snapdragon 8 Gen 3 (4 nm)", "AnTuTu: 2000000 (v10)", "LTPO AMOLED, 120Hz, 2600 nits"),
            phone("Top B", "$ 2010", "Snapdragon 8 Gen 3 (4 nm)", "AnTuTu: 2100000 (v10)", "LTPO AMOLED, 120Hz"),
            phone("Top C", "$ 2020", "Tensor G4 (4 nm)", "AnTuTu: 1200000 (v10)", "LTPO OLED, 120Hz, 2700 nits"),
            phone("Concept", "$ 50000", "Tensor G4 (4 nm)", "AnTuTu: 1300000 (v10)", "LTPO OLED, 120Hz"),
            phone("Unpriced", "", "", "", "Foldable LTPO AMOLED"),
        ];
        let table = load_table(&records);
        let (rows, summary) = enricher().run(&table).unwrap();

        assert_eq!(rows.len(), records.len());
        let by_name = |n: &str| rows.iter().find(|r| r.name == n).unwrap();

        assert_eq!(by_name("Low A").tier, Tier::Budget);
        assert_eq!(by_name("Mid B").tier, Tier::MidRange);
        assert_eq!(by_name("Top C").tier, Tier::Premium);
        assert_eq!(by_name("Concept").tier, Tier::Flagship);
        assert_eq!(by_name("Unpriced").tier, Tier::Flagship);

        // Flagship mean price is the outlier's
        assert_eq!(by_name("Unpriced").price, Some(50000.0));
        // chipset group mean
        assert_eq!(by_name("Low B").benchmark_score, Some(250_000));
        // display family mean among LCD rows
        assert_eq!(by_name("Low B").brightness, Some(475.0));
        assert_eq!(by_name("Unpriced").refresh_rate, Some(120));
        assert_eq!(by_name("Unpriced").display_family, DisplayFamily::Oled);
        assert!(by_name("Unpriced").benchmark_score.is_some());

        assert_eq!(summary.rows, 11);
        assert_eq!(summary.tiers[&Tier::Flagship], 2);
        assert_eq!(summary.missing["chipset"], 1);
        assert_eq!(summary.missing["price"], 0);
    }

    #[test]
    fn test_empty_table() {
        let (rows, summary) = enricher().run(&load_table(&[])).unwrap();
        assert!(rows.is_empty());
        assert_eq!(summary.rows, 0);
        assert_eq!(summary.tiers.values().sum::<usize>(), 0);
    }

    struct AllOneCluster;

    impl ClusterStrategy for AllOneCluster {
        fn cluster(&self, values: &[f64], _k: usize) -> Result<Vec<usize>> {
            Ok(vec![0; values.len()])
        }
    }

    #[test]
    fn test_clustering_is_pluggable() {
        let records = vec![
            phone("A", "$ 100", "", "", "IPS LCD"),
            phone("B", "$ 900", "", "", "IPS LCD"),
        ];
        let mut enricher = enricher();
        enricher.clustering = Box::new(AllOneCluster);
        let (rows, _) = enricher.run(&load_table(&records)).unwrap();
        assert!(rows.iter().all(|r| r.tier == Tier::Budget));
    }
}
