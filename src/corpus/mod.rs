//! The ingested record list and its name index, plus the JSON file it lives in.

use crate::models::SpecRecord;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("cannot read corpus {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corpus {path:?} is not a valid record list: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot serialize corpus: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("cannot write corpus {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ── Corpus ────────────────────────────────────────────────────────────────────

/// Ordered records plus the set of their names. The two are only changed
/// together, through [`Corpus::insert`].
#[derive(Debug, Default, Clone)]
pub struct Corpus {
    records: Vec<SpecRecord>,
    seen: HashSet<String>,
}

impl Corpus {
    /// Build from a raw record list, dropping blank names and repeats.
    pub fn from_records(records: Vec<SpecRecord>) -> Self {
        let mut corpus = Corpus::default();
        for record in records {
            let name = record.name.clone();
            if !corpus.insert(record) {
                warn!("Dropping stored record {:?}: blank or duplicate name", name);
            }
        }
        corpus
    }

    /// Append a record whose name is new. Returns false (and leaves the corpus
    /// untouched) for blank or already-seen names.
    pub fn insert(&mut self, record: SpecRecord) -> bool {
        if record.name.trim().is_empty() || self.seen.contains(&record.name) {
            return false;
        }
        self.seen.insert(record.name.clone());
        self.records.push(record);
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.seen.contains(name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[SpecRecord] {
        &self.records
    }
}

// ── JSON store ────────────────────────────────────────────────────────────────

pub struct CorpusStore {
    path: PathBuf,
}

impl CorpusStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is an empty corpus; an unreadable or malformed one is
    /// an error so it never gets overwritten.
    pub fn load(&self) -> Result<Corpus, CorpusError> {
        if !self.path.exists() {
            info!("No corpus at {:?}, starting empty", self.path);
            return Ok(Corpus::default());
        }

        let bytes = std::fs::read(&self.path).map_err(|source| CorpusError::Read {
            path: self.path.clone(),
            source,
        })?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Corpus::default());
        }

        let records: Vec<SpecRecord> =
            serde_json::from_slice(&bytes).map_err(|source| CorpusError::Malformed {
                path: self.path.clone(),
                source,
            })?;
        let corpus = Corpus::from_records(records);
        info!("Loaded {} records from {:?}", corpus.len(), self.path);
        Ok(corpus)
    }

    /// Write the whole corpus to a temp file, then rename it over the target.
    pub fn save(&self, corpus: &Corpus) -> Result<(), CorpusError> {
        let write_err = |source| CorpusError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }

        let json = serde_json::to_vec_pretty(corpus.records())?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(write_err)?;
        std::fs::rename(&tmp, &self.path).map_err(write_err)?;

        debug!("Saved {} records to {:?}", corpus.len(), self.path);
        Ok(())
    }
}
