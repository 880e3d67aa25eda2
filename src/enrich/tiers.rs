//! Price tiers: IQR outliers become Flagship, the rest are split into three
//! clusters ordered by mean price.

use crate::config::EnrichConfig;
use crate::models::Tier;
use anyhow::{Context, Result};
use smartcore::api::{Transformer, UnsupervisedEstimator};
use smartcore::cluster::kmeans::{KMeans as KMeansModel, KMeansParameters};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::preprocessing::numerical::{StandardScaler, StandardScalerParameters};
use std::collections::BTreeMap;
use tracing::debug;

/// Pluggable 1-D clustering. Returns one label per value; label numbers
/// carry no order.
pub trait ClusterStrategy {
    fn cluster(&self, values: &[f64], k: usize) -> Result<Vec<usize>>;
}

// ── k-means ───────────────────────────────────────────────────────────────────

/// smartcore k-means over standardized prices. Restart `i` seeds its
/// k-means++ initialisation with `seed + i`; the lowest inertia wins.
#[derive(Debug, Clone)]
pub struct KMeans {
    pub seed: u64,
    pub restarts: usize,
    pub max_iter: usize,
}

impl KMeans {
    pub fn from_config(config: &EnrichConfig) -> Self {
        Self {
            seed: config.kmeans_seed,
            restarts: config.kmeans_restarts.max(1),
            max_iter: 300,
        }
    }
}

impl ClusterStrategy for KMeans {
    fn cluster(&self, values: &[f64], k: usize) -> Result<Vec<usize>> {
        if values.is_empty() || k <= 1 {
            return Ok(vec![0; values.len()]);
        }

        let column: Vec<Vec<f64>> = values.iter().map(|v| vec![*v]).collect();
        let raw = DenseMatrix::from_2d_vec(&column);
        let scaler: StandardScaler<f64> =
            StandardScaler::fit(&raw, StandardScalerParameters::default())
                .context("Failed to fit price scaler")?;
        let scaled = scaler.transform(&raw).context("Failed to scale prices")?;

        let mut best: Option<(Vec<usize>, f64)> = None;
        for restart in 0..self.restarts.max(1) {
            let mut params = KMeansParameters::default().with_k(k).with_max_iter(self.max_iter);
            params.seed = Some(self.seed.wrapping_add(restart as u64));

            let model: KMeansModel<f64, i32, DenseMatrix<f64>, Vec<i32>> =
                KMeansModel::fit(&scaled, params).context("k-means fit failed")?;
            let labels: Vec<usize> = model
                .predict(&scaled)
                .context("k-means predict failed")?
                .into_iter()
                .map(|label| label.max(0) as usize)
                .collect();

            let score = inertia(values, &labels);
            if best.as_ref().is_none_or(|(_, b)| score < *b) {
                best = Some((labels, score));
            }
        }

        Ok(best.map(|(labels, _)| labels).unwrap_or_default())
    }
}

/// Sum of squared distances to each label's mean.
fn inertia(values: &[f64], labels: &[usize]) -> f64 {
    let mut groups: BTreeMap<usize, (f64, usize)> = BTreeMap::new();
    for (label, v) in labels.iter().zip(values) {
        let entry = groups.entry(*label).or_default();
        entry.0 += v;
        entry.1 += 1;
    }
    labels
        .iter()
        .zip(values)
        .map(|(label, v)| {
            let (sum, count) = groups[label];
            (v - sum / count as f64).powi(2)
        })
        .sum()
}

// ── Statistics ────────────────────────────────────────────────────────────────

/// Linear-interpolated quantile of an ascending slice.
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

// ── Tier assignment ───────────────────────────────────────────────────────────

/// One tier per price, over the whole column at once.
///
/// Missing prices and prices outside `[Q1 − 1.5·IQR, Q3 + 1.5·IQR]` are
/// Flagship. In-range prices are clustered into at most three groups (fewer
/// when there are fewer distinct prices) and labelled Budget, Mid-Range,
/// Premium by ascending mean price.
pub fn assign_tiers(prices: &[Option<f64>], strategy: &dyn ClusterStrategy) -> Result<Vec<Tier>> {
    let mut tiers = vec![Tier::Flagship; prices.len()];

    let mut known: Vec<f64> = prices.iter().flatten().copied().filter(|p| p.is_finite()).collect();
    if known.is_empty() {
        return Ok(tiers);
    }
    known.sort_by(f64::total_cmp);

    let q1 = quantile(&known, 0.25);
    let q3 = quantile(&known, 0.75);
    let iqr = q3 - q1;
    let (lo, hi) = (q1 - 1.5 * iqr, q3 + 1.5 * iqr);
    debug!("Price IQR bounds: {:.2} .. {:.2}", lo, hi);

    let in_range: Vec<(usize, f64)> = prices
        .iter()
        .enumerate()
        .filter_map(|(i, p)| p.filter(|v| v.is_finite() && *v >= lo && *v <= hi).map(|v| (i, v)))
        .collect();
    if in_range.is_empty() {
        return Ok(tiers);
    }

    let values: Vec<f64> = in_range.iter().map(|(_, v)| *v).collect();
    let mut distinct = values.clone();
    distinct.sort_by(f64::total_cmp);
    distinct.dedup();
    let k = distinct.len().min(Tier::CLUSTERED.len());

    let labels = strategy.cluster(&values, k)?;

    // label → (sum, count) of original prices
    let mut groups: BTreeMap<usize, (f64, usize)> = BTreeMap::new();
    for (label, price) in labels.iter().zip(&values) {
        let entry = groups.entry(*label).or_default();
        entry.0 += price;
        entry.1 += 1;
    }
    let mut order: Vec<(usize, f64)> = groups
        .into_iter()
        .map(|(label, (sum, count))| (label, sum / count as f64))
        .collect();
    order.sort_by(|a, b| a.1.total_cmp(&b.1));

    let rank: BTreeMap<usize, Tier> = order
        .iter()
        .enumerate()
        .map(|(r, (label, _))| (*label, Tier::CLUSTERED[r.min(Tier::CLUSTERED.len() - 1)]))
        .collect();

    for ((i, _), label) in in_range.iter().zip(&labels) {
        if let Some(tier) = rank.get(label) {
            tiers[*i] = *tier;
        }
    }
    Ok(tiers)
}
