use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Catalog link ──────────────────────────────────────────────────────────────

/// Absolute URL of one item's detail page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CatalogLink(pub String);

impl CatalogLink {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CatalogLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Spec record ───────────────────────────────────────────────────────────────

/// A field value inside a category. Keys seen more than once in the same
/// category become a `List`, in the order they appeared on the page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    Scalar(String),
    List(Vec<String>),
}

impl FieldValue {
    /// Append another occurrence of the same key.
    pub fn coalesce(&mut self, value: String) {
        match self {
            FieldValue::Scalar(first) => {
                let first = std::mem::take(first);
                *self = FieldValue::List(vec![first, value]);
            }
            FieldValue::List(items) => items.push(value),
        }
    }

    /// Text used by single-value extraction rules: the scalar itself, or the
    /// first element of a list.
    pub fn primary_text(&self) -> Option<&str> {
        match self {
            FieldValue::Scalar(s) => Some(s.as_str()),
            FieldValue::List(items) => items.first().map(String::as_str),
        }
    }
}

pub type CategoryMap = IndexMap<String, FieldValue>;

/// One ingested item: its name plus category → key → value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpecRecord {
    #[serde(rename = "Phone Name")]
    pub name: String,
    #[serde(flatten)]
    pub categories: IndexMap<String, CategoryMap>,
}

impl SpecRecord {
    pub fn new(name: impl Into<String>, categories: IndexMap<String, CategoryMap>) -> Self {
        Self {
            name: name.into(),
            categories,
        }
    }
}

// ── Analytic row ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tier {
    Budget,
    #[serde(rename = "Mid-Range")]
    MidRange,
    Premium,
    Flagship,
}

impl Tier {
    /// Cluster labels in ascending price order.
    pub const CLUSTERED: [Tier; 3] = [Tier::Budget, Tier::MidRange, Tier::Premium];
    pub const ALL: [Tier; 4] = [Tier::Budget, Tier::MidRange, Tier::Premium, Tier::Flagship];

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Budget => "Budget",
            Tier::MidRange => "Mid-Range",
            Tier::Premium => "Premium",
            Tier::Flagship => "Flagship",
        }
    }

    /// Ordinal used as a nearest-neighbour feature.
    pub fn encoded(self) -> f64 {
        match self {
            Tier::Budget => 0.0,
            Tier::MidRange => 1.0,
            Tier::Premium => 2.0,
            Tier::Flagship => 3.0,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DisplayFamily {
    #[serde(rename = "OLED-Based")]
    Oled,
    #[serde(rename = "LCD-Based")]
    Lcd,
}

impl DisplayFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            DisplayFamily::Oled => "OLED-Based",
            DisplayFamily::Lcd => "LCD-Based",
        }
    }
}

/// Typed columns projected from one record, before tiering.
#[derive(Debug, Clone, PartialEq)]
pub struct PhoneFeatures {
    pub name: String,
    pub chipset: Option<String>,
    pub battery_capacity: u32,
    pub charging_speed: u32,
    pub price: Option<f64>,
    /// 0 when the benchmark text is absent.
    pub benchmark_score: i64,
    pub display_family: DisplayFamily,
    pub refresh_rate: Option<u32>,
    pub brightness: Option<f64>,
}

/// One row of the enriched table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalyticRow {
    pub name: String,
    pub chipset: Option<String>,
    pub battery_capacity: u32,
    pub charging_speed: u32,
    pub price: Option<f64>,
    pub benchmark_score: Option<i64>,
    pub display_family: DisplayFamily,
    pub refresh_rate: Option<u32>,
    pub brightness: Option<f64>,
    pub tier: Tier,
}

impl AnalyticRow {
    pub fn from_features(f: PhoneFeatures, tier: Tier) -> Self {
        Self {
            name: f.name,
            chipset: f.chipset,
            battery_capacity: f.battery_capacity,
            charging_speed: f.charging_speed,
            price: f.price,
            benchmark_score: Some(f.benchmark_score),
            display_family: f.display_family,
            refresh_rate: f.refresh_rate,
            brightness: f.brightness,
            tier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coalesce_keeps_order() {
        let mut v = FieldValue::Scalar("a".into());
        v.coalesce("b".into());
        v.coalesce("c".into());
        assert_eq!(v, FieldValue::List(vec!["a".into(), "b".into(), "c".into()]));
        assert_eq!(v.primary_text(), Some("a"));
    }

    #[test]
    fn test_record_json_shape() {
        let json = r#"{"Phone Name":"Pixel 9","Platform":{"chipset":"Tensor G4 (4 nm)","cpu":["a","b"]}}"#;
        let rec: SpecRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.name, "Pixel 9");
        assert_eq!(
            rec.categories["Platform"]["cpu"],
            FieldValue::List(vec!["a".into(), "b".into()])
        );
        assert_eq!(serde_json::to_string(&rec).unwrap(), json);
    }

    #[test]
    fn test_tier_labels() {
        assert_eq!(serde_json::to_string(&Tier::MidRange).unwrap(), "\"Mid-Range\"");
        assert!(Tier::Budget < Tier::Flagship);
    }
}
