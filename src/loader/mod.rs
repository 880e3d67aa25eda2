//! Raw loader: reshapes the stored record list into one row per phone and
//! one column per category.

use crate::corpus::CorpusStore;
use crate::models::{CategoryMap, FieldValue, SpecRecord};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Columns every table carries, even when built from an empty corpus.
pub const EXPECTED_COLUMNS: [&str; 6] =
    ["phone_name", "platform", "battery", "misc", "tests", "display"];

/// Category name → column name. "Main Camera" → "main_camera".
pub fn column_key(category: &str) -> String {
    category.trim().to_lowercase().replace(' ', "_")
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub name: String,
    cells: HashMap<String, CategoryMap>,
}

impl RawRow {
    pub fn cell(&self, column: &str) -> Option<&CategoryMap> {
        self.cells.get(column)
    }

    pub fn field(&self, column: &str, key: &str) -> Option<&FieldValue> {
        self.cell(column)?.get(key)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    columns: Vec<String>,
    rows: Vec<RawRow>,
}

impl RawTable {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[RawRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Build the table from records, in corpus order.
pub fn load_table(records: &[SpecRecord]) -> RawTable {
    let mut columns: Vec<String> = EXPECTED_COLUMNS.iter().map(|c| c.to_string()).collect();
    let mut rows = Vec::with_capacity(records.len());

    for record in records {
        let mut cells = HashMap::new();
        for (category, fields) in &record.categories {
            let key = column_key(category);
            if !columns.contains(&key) {
                columns.push(key.clone());
            }
            cells.entry(key).or_insert_with(|| fields.clone());
        }
        rows.push(RawRow {
            name: record.name.clone(),
            cells,
        });
    }

    debug!("Raw table: {} rows × {} columns", rows.len(), columns.len());
    RawTable { columns, rows }
}

/// Read the corpus file and build the table.
pub fn load_corpus_file(path: &Path) -> Result<RawTable> {
    let corpus = CorpusStore::new(path)
        .load()
        .with_context(|| format!("Failed to read corpus {:?}", path))?;
    let table = load_table(corpus.records());
    if table.is_empty() {
        warn!("Corpus {:?} holds no phones; run `crawl` first", path);
    } else {
        info!("{} phones × {} columns loaded from {:?}", table.len(), table.columns().len(), path);
    }
    Ok(table)
}
