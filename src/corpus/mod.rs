//! Record store for the reference code corpora
//!
//! Two corpora are held side by side: diagnosis codes (ICD) and procedure
//! codes (HCPCS). Each is an ordered table of `(code, description)` rows, and
//! row order is the addressing scheme into the vector index.

mod store;

pub use store::{EntryRef, RecordStore};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("Corpus file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Corpus {corpus} is empty: {path}")]
    Empty { corpus: CorpusId, path: PathBuf },

    #[error("Malformed record in {path} at row {row}: {message}")]
    MalformedRecord {
        path: PathBuf,
        row: usize,
        message: String,
    },

    #[error("Expected {expected} corpus, got {actual}")]
    WrongCorpus { expected: CorpusId, actual: CorpusId },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },
}

/// Identifies which reference table a record belongs to
///
/// The declaration order is the order of the corpora in the combined index
/// space: every diagnosis entry precedes every procedure entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorpusId {
    /// ICD diagnosis codes
    Diagnosis,
    /// HCPCS procedure codes
    Procedure,
}

impl CorpusId {
    /// Both corpora in combined-index order
    pub const ALL: [CorpusId; 2] = [CorpusId::Diagnosis, CorpusId::Procedure];

    pub fn as_u8(self) -> u8 {
        match self {
            CorpusId::Diagnosis => 0,
            CorpusId::Procedure => 1,
        }
    }

    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(CorpusId::Diagnosis),
            1 => Some(CorpusId::Procedure),
            _ => None,
        }
    }
}

impl fmt::Display for CorpusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorpusId::Diagnosis => write!(f, "diagnosis"),
            CorpusId::Procedure => write!(f, "procedure"),
        }
    }
}

/// A single coded entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub code: String,
    pub description: String,
}

impl Record {
    pub fn new(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
        }
    }

    /// The same record with surrounding whitespace removed from both fields
    pub fn trimmed(self) -> Self {
        Self::new(self.code.trim(), self.description.trim())
    }
}

/// An ordered table of records
#[derive(Debug, Clone)]
pub struct Corpus {
    id: CorpusId,
    records: Vec<Record>,
}

impl Corpus {
    /// Fields are trimmed the same way `load_csv` trims them, so a corpus
    /// written with `write_csv` reloads unchanged.
    pub fn new(id: CorpusId, records: Vec<Record>) -> Self {
        let records = records.into_iter().map(Record::trimmed).collect();
        Self { id, records }
    }

    /// Load a corpus from a CSV file with a `code,description` header
    ///
    /// Row order is preserved. Rows with a blank code or description are
    /// rejected, as is a file without any rows.
    pub fn load_csv(id: CorpusId, path: &Path) -> Result<Self, CorpusError> {
        if !path.exists() {
            return Err(CorpusError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)?;

        let mut records = Vec::new();
        for (row, result) in reader.deserialize::<Record>().enumerate() {
            let record = result.map_err(|e| CorpusError::MalformedRecord {
                path: path.to_path_buf(),
                row: row + 1,
                message: e.to_string(),
            })?;

            if record.code.is_empty() {
                return Err(CorpusError::MalformedRecord {
                    path: path.to_path_buf(),
                    row: row + 1,
                    message: "empty code".to_string(),
                });
            }
            if record.description.is_empty() {
                return Err(CorpusError::MalformedRecord {
                    path: path.to_path_buf(),
                    row: row + 1,
                    message: format!("empty description for code {}", record.code),
                });
            }

            records.push(record);
        }

        if records.is_empty() {
            return Err(CorpusError::Empty {
                corpus: id,
                path: path.to_path_buf(),
            });
        }

        tracing::debug!("Loaded {} {} records from {:?}", records.len(), id, path);

        Ok(Self { id, records })
    }

    /// Write the corpus back out as CSV, in the same row order
    pub fn write_csv(&self, path: &Path) -> Result<(), CorpusError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CorpusError::Io {
                source: e,
                context: format!("Failed to create corpus directory: {}", parent.display()),
            })?;
        }

        let mut writer = csv::Writer::from_path(path)?;
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush().map_err(|e| CorpusError::Io {
            source: e,
            context: format!("Failed to flush corpus file: {}", path.display()),
        })?;
        Ok(())
    }

    pub fn id(&self) -> CorpusId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&Record> {
        self.records.get(position)
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Descriptions in row order, ready for embedding
    pub fn descriptions(&self) -> Vec<String> {
        self.records.iter().map(|r| r.description.clone()).collect()
    }

    /// BLAKE3 digest over every (code, description) pair in order
    ///
    /// Stored in index metadata so a loaded index can tell whether the corpus
    /// it was built from is still the one on disk.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for record in &self.records {
            hasher.update(record.code.as_bytes());
            hasher.update(&[0x1f]);
            hasher.update(record.description.as_bytes());
            hasher.update(&[0x1e]);
        }
        hasher.finalize().to_hex().to_string()
    }
}
