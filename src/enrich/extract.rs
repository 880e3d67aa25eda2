//! Typed columns from the free-text spec cells.

use super::currency::CurrencyNormalizer;
use crate::loader::RawRow;
use crate::models::{DisplayFamily, FieldValue, PhoneFeatures};
use anyhow::Result;
use regex::Regex;

// ── Field locations ───────────────────────────────────────────────────────────

const CHIPSET: (&str, &str) = ("platform", "chipset");
const BATTERY: (&str, &str) = ("battery", "batdescription1");
const CHARGING: (&str, &str) = ("battery", "Charging");
const PRICE: (&str, &str) = ("misc", "price");
const BENCHMARK: (&str, &str) = ("tests", "tbench");
const TESTED_DISPLAY: (&str, &str) = ("tests", "Display");
const DISPLAY_TYPE: (&str, &str) = ("display", "displaytype");

fn field<'a>(row: &'a RawRow, (column, key): (&str, &str)) -> Option<&'a FieldValue> {
    row.field(column, key)
}

/// Items of a value in page order.
fn texts(value: &FieldValue) -> Vec<&str> {
    match value {
        FieldValue::Scalar(s) => vec![s.as_str()],
        FieldValue::List(items) => items.iter().map(String::as_str).collect(),
    }
}

/// Chipset names without their parenthesised process node, joined for
/// multi-variant phones. "Exynos 2400 (4 nm)" → "Exynos 2400".
pub fn chipset_name(value: &FieldValue) -> Option<String> {
    let joined = texts(value)
        .into_iter()
        .map(|t| t.split('(').next().unwrap_or_default().trim())
        .collect::<Vec<_>>()
        .join(", ");
    if joined.trim_matches([',', ' ']).is_empty() {
        None
    } else {
        Some(joined)
    }
}

/// First segment of the display type, classified by whether it names OLED.
pub fn display_family(value: Option<&FieldValue>) -> DisplayFamily {
    let first = value
        .and_then(FieldValue::primary_text)
        .and_then(|t| t.trim().split(',').next())
        .map(str::trim)
        .unwrap_or_default();
    if first.to_uppercase().contains("OLED") {
        DisplayFamily::Oled
    } else {
        DisplayFamily::Lcd
    }
}

pub struct FieldExtractor {
    digits: Regex,
    antutu: Regex,
    refresh: Regex,
    nits: Regex,
}

impl FieldExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            digits: Regex::new(r"([0-9]+)")?,
            antutu: Regex::new(r"AnTuTu:\s*([0-9]+)")?,
            refresh: Regex::new(r"([0-9]+)\s*Hz")?,
            nits: Regex::new(r"([0-9]+)\s*nits")?,
        })
    }

    /// First capture of `re` across the value's items, as a number.
    fn capture(re: &Regex, value: Option<&FieldValue>) -> Option<u64> {
        texts(value?)
            .into_iter()
            .find_map(|t| re.captures(t))
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }

    pub fn extract(&self, row: &RawRow, currency: &CurrencyNormalizer) -> PhoneFeatures {
        let display_type = field(row, DISPLAY_TYPE);

        let brightness = Self::capture(&self.nits, field(row, TESTED_DISPLAY))
            .or_else(|| Self::capture(&self.nits, display_type));

        PhoneFeatures {
            name: row.name.clone(),
            chipset: field(row, CHIPSET).and_then(chipset_name),
            battery_capacity: Self::capture(&self.digits, field(row, BATTERY))
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(0),
            charging_speed: Self::capture(&self.digits, field(row, CHARGING))
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(0),
            price: field(row, PRICE)
                .and_then(FieldValue::primary_text)
                .and_then(|t| currency.to_usd(t)),
            benchmark_score: Self::capture(&self.antutu, field(row, BENCHMARK))
                .and_then(|v| i64::try_from(v).ok())
                .unwrap_or(0),
            display_family: display_family(display_type),
            refresh_rate: Self::capture(&self.refresh, display_type)
                .and_then(|v| u32::try_from(v).ok()),
            brightness: brightness.map(|v| v as f64),
        }
    }
}
