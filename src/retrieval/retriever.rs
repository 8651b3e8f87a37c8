//! Query-time retrieval: embed, search, resolve

use super::RetrievedCandidate;
use crate::corpus::{EntryRef, RecordStore};
use crate::embedding::EmbeddingProvider;
use crate::error::{MedcodeError, Result};
use crate::index::{IndexError, SearchResult, VectorIndex};
use std::sync::{Arc, RwLock};

/// An index together with the record store it resolves against
///
/// The pair is always replaced as a unit, so a query never mixes an index
/// from one build with corpora from another.
#[derive(Debug)]
pub struct RetrievalSnapshot {
    index: Arc<VectorIndex>,
    store: Arc<RecordStore>,
}

impl RetrievalSnapshot {
    pub fn new(index: Arc<VectorIndex>, store: Arc<RecordStore>) -> Self {
        for problem in index.metadata().staleness(&store) {
            tracing::warn!("Index may be stale: {}", problem);
        }
        Self { index, store }
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Turn a search hit into the record it was embedded from
    ///
    /// Fails with `Desync` when the hit's row no longer exists in its corpus.
    pub fn resolve(&self, hit: &SearchResult) -> Result<RetrievedCandidate> {
        let EntryRef {
            corpus,
            local_position,
        } = hit.entry;

        let table = self.store.corpus(corpus);
        let record = table.get(local_position).ok_or(MedcodeError::Desync {
            corpus,
            combined_position: hit.combined_position,
            local_position,
            corpus_len: table.len(),
        })?;

        Ok(RetrievedCandidate {
            code: record.code.clone(),
            description: record.description.clone(),
            similarity_score: hit.distance,
            corpus,
            combined_position: hit.combined_position,
        })
    }
}

/// Semantic retriever over the combined corpora
///
/// Shareable across concurrent query handlers. A rebuild installs a new
/// snapshot via [`Retriever::swap`]; queries already running keep the
/// snapshot they started with.
pub struct Retriever {
    provider: Arc<dyn EmbeddingProvider>,
    snapshot: RwLock<Arc<RetrievalSnapshot>>,
}

impl Retriever {
    /// Create a retriever over a built index and the store it was built from
    ///
    /// The provider must produce vectors of the index's dimension.
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        index: VectorIndex,
        store: RecordStore,
    ) -> Result<Self> {
        let snapshot = Self::prepare(provider.as_ref(), index, store)?;
        Ok(Self {
            provider,
            snapshot: RwLock::new(snapshot),
        })
    }

    fn prepare(
        provider: &dyn EmbeddingProvider,
        index: VectorIndex,
        store: RecordStore,
    ) -> Result<Arc<RetrievalSnapshot>> {
        if provider.dimension() != index.dimension() {
            return Err(IndexError::InvalidDimension {
                expected: index.dimension(),
                actual: provider.dimension(),
            }
            .into());
        }
        if provider.model_name() != index.metadata().model {
            tracing::warn!(
                "Index was built with model {} but queries use {}",
                index.metadata().model,
                provider.model_name()
            );
        }

        Ok(Arc::new(RetrievalSnapshot::new(
            Arc::new(index),
            Arc::new(store),
        )))
    }

    /// Current (index, store) pair
    pub fn snapshot(&self) -> Arc<RetrievalSnapshot> {
        // The lock only ever guards an Arc assignment, so a poisoned lock still
        // holds a complete snapshot.
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replace the index and store with a freshly built pair
    pub fn swap(&self, index: VectorIndex, store: RecordStore) -> Result<()> {
        let next = Self::prepare(self.provider.as_ref(), index, store)?;
        let mut guard = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        *guard = next;

        tracing::info!(
            "Installed new index snapshot: {} vectors",
            guard.index().len()
        );
        Ok(())
    }

    /// Retrieve the `top_k` candidates nearest to `query`
    ///
    /// Candidates come back in ascending distance order (ties by combined
    /// position). `top_k == 0` yields an empty list; `top_k` larger than the
    /// index yields every entry.
    pub fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedCandidate>> {
        if query.trim().is_empty() {
            return Err(MedcodeError::InvalidQuery(
                "Query text cannot be empty".to_string(),
            ));
        }

        let snapshot = self.snapshot();
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let query_embedding = self.provider.embed(query)?;
        let hits = snapshot.index().search(&query_embedding, top_k)?;

        tracing::debug!(
            "Query {:?}: {} hits (top_k={})",
            query,
            hits.len(),
            top_k
        );

        hits.iter().map(|hit| snapshot.resolve(hit)).collect()
    }

    /// Resolve a combined position directly, without searching
    pub fn resolve(&self, combined_position: usize) -> Result<RetrievedCandidate> {
        let snapshot = self.snapshot();
        let index = snapshot.index();
        let entry = index
            .entry(combined_position)
            .ok_or(IndexError::PositionOutOfRange {
                position: combined_position,
                len: index.len(),
            })?;

        snapshot.resolve(&SearchResult {
            combined_position,
            entry,
            distance: 0.0,
        })
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }
}
