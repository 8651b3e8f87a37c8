//! Exact nearest-neighbour index over the combined corpus embeddings
//!
//! Every vector is stored together with the provenance tag of the record it
//! was embedded from, so a search hit resolves to its corpus without any
//! boundary arithmetic. Search is an exhaustive scan under squared Euclidean
//! distance; there is no approximation or pruning.

mod persist;

pub use persist::{FORMAT_VERSION, INDEX_MAGIC};

use crate::corpus::{CorpusId, EntryRef, RecordStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Cannot build an index from zero vectors")]
    EmptyIndex,

    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Vector {position} has dimension {actual}, expected {expected}")]
    InconsistentDimension {
        position: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Vector {position} contains a non-finite component")]
    NonFiniteVector { position: usize },

    #[error("Query vector contains a non-finite component")]
    NonFiniteQuery,

    #[error("Entry {corpus}:{local_position} appears more than once")]
    DuplicateEntry {
        corpus: CorpusId,
        local_position: usize,
    },

    #[error("Position {position} is outside the index ({len} entries)")]
    PositionOutOfRange { position: usize, len: usize },

    #[error("Index metadata does not match its contents: {0}")]
    MetadataMismatch(String),

    #[error("Index not found: {0}")]
    NotFound(String),

    #[error("Index file is corrupt: {0}")]
    Corrupt(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One hit from [`VectorIndex::search`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchResult {
    /// Position of the hit in the combined index space
    pub combined_position: usize,
    /// Corpus and row the hit was embedded from
    pub entry: EntryRef,
    /// Squared Euclidean distance to the query; lower is more similar
    pub distance: f64,
}

/// Size and content digest of one corpus at build time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusSnapshot {
    pub corpus: CorpusId,
    pub records: usize,
    pub fingerprint: String,
}

/// Facts recorded about an index when it is built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    /// Embedding model the vectors came from
    pub model: String,
    /// Corpora the index was built from, in combined order
    pub corpora: Vec<CorpusSnapshot>,
    pub built_at: DateTime<Utc>,
}

impl IndexMetadata {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            corpora: Vec::new(),
            built_at: Utc::now(),
        }
    }

    /// Metadata describing an index built from every record in `store`
    pub fn for_store(model: impl Into<String>, store: &RecordStore) -> Self {
        let corpora = CorpusId::ALL
            .into_iter()
            .map(|id| {
                let corpus = store.corpus(id);
                CorpusSnapshot {
                    corpus: id,
                    records: corpus.len(),
                    fingerprint: corpus.fingerprint(),
                }
            })
            .collect();

        Self {
            model: model.into(),
            corpora,
            built_at: Utc::now(),
        }
    }

    /// Record count of a corpus at build time
    pub fn corpus_size(&self, id: CorpusId) -> Option<usize> {
        self.corpora
            .iter()
            .find(|s| s.corpus == id)
            .map(|s| s.records)
    }

    /// Number of diagnosis records at build time (the first procedure position)
    pub fn boundary(&self) -> Option<usize> {
        self.corpus_size(CorpusId::Diagnosis)
    }

    /// Describe every way `store` differs from the corpora this index was built from
    pub fn staleness(&self, store: &RecordStore) -> Vec<String> {
        let mut problems = Vec::new();
        for snapshot in &self.corpora {
            let current = store.corpus(snapshot.corpus);
            if current.len() != snapshot.records {
                problems.push(format!(
                    "{} corpus has {} records, index was built with {}",
                    snapshot.corpus,
                    current.len(),
                    snapshot.records
                ));
            } else if current.fingerprint() != snapshot.fingerprint {
                problems.push(format!(
                    "{} corpus contents changed since the index was built",
                    snapshot.corpus
                ));
            }
        }
        problems
    }
}

/// Heap element ordered by (distance, position) so ties break deterministically
#[derive(Debug, Clone, Copy)]
struct Neighbor {
    distance: f64,
    position: usize,
}

impl PartialEq for Neighbor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Neighbor {}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.position.cmp(&other.position))
    }
}

/// Flat (brute-force) L2 vector index
///
/// Vectors are stored row-major in one contiguous buffer. The index is
/// immutable once built; a rebuild produces a new value.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dimension: usize,
    data: Vec<f32>,
    entries: Vec<EntryRef>,
    metadata: IndexMetadata,
}

impl VectorIndex {
    /// Build an index from tagged vectors
    ///
    /// The combined position of each vector is its position in `items`.
    /// Fails on empty input, mixed dimensions, non-finite components,
    /// duplicate provenance tags, or metadata whose corpus sizes do not add
    /// up to the number of vectors.
    pub fn build(
        items: Vec<(EntryRef, Vec<f32>)>,
        metadata: IndexMetadata,
    ) -> Result<Self, IndexError> {
        let dimension = match items.first() {
            Some((_, v)) => v.len(),
            None => return Err(IndexError::EmptyIndex),
        };
        if dimension == 0 {
            return Err(IndexError::InvalidDimension {
                expected: 1,
                actual: 0,
            });
        }

        let mut data = Vec::with_capacity(items.len() * dimension);
        let mut entries = Vec::with_capacity(items.len());
        let mut seen = HashSet::with_capacity(items.len());

        for (position, (entry, vector)) in items.into_iter().enumerate() {
            if vector.len() != dimension {
                return Err(IndexError::InconsistentDimension {
                    position,
                    expected: dimension,
                    actual: vector.len(),
                });
            }
            if vector.iter().any(|x| !x.is_finite()) {
                return Err(IndexError::NonFiniteVector { position });
            }
            if !seen.insert(entry) {
                return Err(IndexError::DuplicateEntry {
                    corpus: entry.corpus,
                    local_position: entry.local_position,
                });
            }
            data.extend_from_slice(&vector);
            entries.push(entry);
        }

        let index = Self {
            dimension,
            data,
            entries,
            metadata,
        };
        index.check_metadata()?;
        Ok(index)
    }

    /// Tags must be exactly `A_0..A_{|A|-1}, B_0..B_{|B|-1}` in the corpus
    /// order recorded in the metadata, so the stored boundary and the tags
    /// always agree
    fn check_metadata(&self) -> Result<(), IndexError> {
        let corpora = &self.metadata.corpora;
        if corpora.is_empty() {
            return Ok(());
        }

        if corpora.windows(2).any(|w| w[0].corpus >= w[1].corpus) {
            return Err(IndexError::MetadataMismatch(
                "corpora are not recorded in combined order".to_string(),
            ));
        }

        let recorded: usize = corpora.iter().map(|s| s.records).sum();
        if recorded != self.entries.len() {
            return Err(IndexError::MetadataMismatch(format!(
                "metadata records {} rows but the index holds {} vectors",
                recorded,
                self.entries.len()
            )));
        }

        let expected = corpora
            .iter()
            .flat_map(|s| (0..s.records).map(move |i| EntryRef::new(s.corpus, i)));
        for (position, (actual, wanted)) in self.entries.iter().zip(expected).enumerate() {
            if *actual != wanted {
                return Err(IndexError::MetadataMismatch(format!(
                    "position {} is tagged {}:{} but the metadata places {}:{} there",
                    position,
                    actual.corpus,
                    actual.local_position,
                    wanted.corpus,
                    wanted.local_position
                )));
            }
        }
        Ok(())
    }

    /// Find the `k` nearest vectors to `query`
    ///
    /// Results are sorted by ascending squared distance, ties broken by
    /// ascending combined position. Returns at most `len()` results and an
    /// empty list for `k == 0`.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>, IndexError> {
        if query.len() != self.dimension {
            return Err(IndexError::InvalidDimension {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if query.iter().any(|x| !x.is_finite()) {
            return Err(IndexError::NonFiniteQuery);
        }

        let k = k.min(self.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut heap: BinaryHeap<Neighbor> = BinaryHeap::with_capacity(k + 1);
        for (position, vector) in self.data.chunks_exact(self.dimension).enumerate() {
            let candidate = Neighbor {
                distance: squared_l2(query, vector),
                position,
            };

            if heap.len() < k {
                heap.push(candidate);
            } else if let Some(worst) = heap.peek() {
                if candidate < *worst {
                    heap.pop();
                    heap.push(candidate);
                }
            }
        }

        Ok(heap
            .into_sorted_vec()
            .into_iter()
            .map(|n| SearchResult {
                combined_position: n.position,
                entry: self.entries[n.position],
                distance: n.distance,
            })
            .collect())
    }

    /// Provenance tag of a combined position
    pub fn entry(&self, combined_position: usize) -> Option<EntryRef> {
        self.entries.get(combined_position).copied()
    }

    /// Stored vector at a combined position
    pub fn vector(&self, combined_position: usize) -> Option<&[f32]> {
        if combined_position >= self.len() {
            return None;
        }
        let start = combined_position * self.dimension;
        Some(&self.data[start..start + self.dimension])
    }

    pub fn entries(&self) -> &[EntryRef] {
        &self.entries
    }

    /// Number of indexed vectors
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }
}

/// Squared Euclidean distance, accumulated in f64
fn squared_l2(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = *x as f64 - *y as f64;
            d * d
        })
        .sum()
}
