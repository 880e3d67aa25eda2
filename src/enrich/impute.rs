//! Missing-value fills, applied in a fixed order over the whole table.

use crate::models::AnalyticRow;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use tracing::debug;

/// Mean of the present values per group key. Groups with no values are
/// absent from the map.
fn group_means<K, F, V>(rows: &[AnalyticRow], key: F, value: V) -> HashMap<K, f64>
where
    K: Eq + Hash,
    F: Fn(&AnalyticRow) -> Option<K>,
    V: Fn(&AnalyticRow) -> Option<f64>,
{
    let mut acc: HashMap<K, (f64, usize)> = HashMap::new();
    for row in rows {
        if let (Some(k), Some(v)) = (key(row), value(row)) {
            let e = acc.entry(k).or_default();
            e.0 += v;
            e.1 += 1;
        }
    }
    acc.into_iter()
        .map(|(k, (sum, n))| (k, sum / n as f64))
        .collect()
}

pub fn fill_price_by_tier(rows: &mut [AnalyticRow]) -> usize {
    let means = group_means(rows, |r| Some(r.tier), |r| r.price);
    let mut filled = 0;
    for row in rows.iter_mut().filter(|r| r.price.is_none()) {
        if let Some(mean) = means.get(&row.tier) {
            row.price = Some(*mean);
            filled += 1;
        }
    }
    filled
}

/// Most frequent refresh rate; ties go to the smallest value.
pub fn fill_refresh_by_mode(rows: &mut [AnalyticRow]) -> usize {
    let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
    for rate in rows.iter().filter_map(|r| r.refresh_rate) {
        *counts.entry(rate).or_default() += 1;
    }
    let Some(mode) = counts
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
        .map(|(rate, _)| *rate)
    else {
        return 0;
    };

    let mut filled = 0;
    for row in rows.iter_mut().filter(|r| r.refresh_rate.is_none()) {
        row.refresh_rate = Some(mode);
        filled += 1;
    }
    filled
}

pub fn fill_brightness_by_display(rows: &mut [AnalyticRow]) -> usize {
    let means = group_means(rows, |r| Some(r.display_family), |r| r.brightness);
    let mut filled = 0;
    for row in rows.iter_mut().filter(|r| r.brightness.is_none()) {
        if let Some(mean) = means.get(&row.display_family) {
            row.brightness = Some(*mean);
            filled += 1;
        }
    }
    filled
}

/// Benchmark 0 means "not measured". Fill from the chipset group mean,
/// then from nearest neighbours over (price, tier, score).
pub fn fill_benchmark(rows: &mut [AnalyticRow], neighbors: usize) -> usize {
    for row in rows.iter_mut() {
        if row.benchmark_score == Some(0) {
            row.benchmark_score = None;
        }
    }

    let means = group_means(
        rows,
        |r| r.chipset.clone(),
        |r| r.benchmark_score.map(|s| s as f64),
    );
    let mut filled = 0;
    for row in rows.iter_mut().filter(|r| r.benchmark_score.is_none()) {
        if let Some(mean) = row.chipset.as_ref().and_then(|c| means.get(c)) {
            row.benchmark_score = Some(*mean as i64);
            filled += 1;
        }
    }

    filled + knn_fill(rows, neighbors)
}

// ── Nearest neighbours ────────────────────────────────────────────────────────

fn features(row: &AnalyticRow) -> [Option<f64>; 3] {
    [
        row.price,
        Some(row.tier.encoded()),
        row.benchmark_score.map(|s| s as f64),
    ]
}

/// Euclidean distance over the coordinates both sides have, scaled up by
/// the share of coordinates that were missing. `None` when nothing overlaps.
fn nan_euclidean(a: &[Option<f64>; 3], b: &[Option<f64>; 3]) -> Option<f64> {
    let mut sum = 0.0;
    let mut present = 0;
    for (x, y) in a.iter().zip(b) {
        if let (Some(x), Some(y)) = (x, y) {
            sum += (x - y).powi(2);
            present += 1;
        }
    }
    (present > 0).then(|| (sum * a.len() as f64 / present as f64).sqrt())
}

/// Rows with a score donate to rows without one. Receivers with no
/// comparable donor take the donor mean; with no donors at all they stay
/// missing.
fn knn_fill(rows: &mut [AnalyticRow], neighbors: usize) -> usize {
    let donors: Vec<([Option<f64>; 3], f64)> = rows
        .iter()
        .filter_map(|r| r.benchmark_score.map(|s| (features(r), s as f64)))
        .collect();
    if donors.is_empty() {
        return 0;
    }
    let donor_mean = donors.iter().map(|(_, s)| s).sum::<f64>() / donors.len() as f64;

    let mut filled = 0;
    for row in rows.iter_mut().filter(|r| r.benchmark_score.is_none()) {
        let target = features(row);
        let mut ranked: Vec<(f64, f64)> = donors
            .iter()
            .filter_map(|(f, score)| nan_euclidean(&target, f).map(|d| (d, *score)))
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0));
        ranked.truncate(neighbors.max(1));

        let value = if ranked.is_empty() {
            donor_mean
        } else {
            ranked.iter().map(|(_, s)| s).sum::<f64>() / ranked.len() as f64
        };
        row.benchmark_score = Some(value as i64);
        filled += 1;
    }
    debug!("{} benchmark scores filled by nearest neighbours", filled);
    filled
}

// ── Chain ─────────────────────────────────────────────────────────────────────

/// Cells filled per column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillCounts {
    pub price: usize,
    pub refresh_rate: usize,
    pub brightness: usize,
    pub benchmark_score: usize,
}

pub fn impute(rows: &mut [AnalyticRow], neighbors: usize) -> FillCounts {
    FillCounts {
        price: fill_price_by_tier(rows),
        refresh_rate: fill_refresh_by_mode(rows),
        brightness: fill_brightness_by_display(rows),
        benchmark_score: fill_benchmark(rows, neighbors),
    }
}
