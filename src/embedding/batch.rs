/// Batch processor that embeds both corpora and assembles the vector index
use super::provider::check_embeddings;
use super::{EmbeddingError, EmbeddingProvider};
use crate::corpus::{Corpus, CorpusId, EntryRef, RecordStore};
use crate::error::Result;
use crate::index::{IndexMetadata, VectorIndex};
use std::sync::Arc;
use tracing::{debug, info};

/// Result of an index build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchResult {
    pub processed: usize,
    pub batches: usize,
    pub duration_ms: u64,
}

/// Batch processor for offline index construction
///
/// Embeds every record description in combined-index order, `batch_size`
/// texts per model call, and tags each vector with its corpus and row.
/// Batching only affects throughput; the resulting index is identical for
/// any batch size.
pub struct BatchProcessor {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
}

impl BatchProcessor {
    /// Create a new batch processor
    ///
    /// # Arguments
    /// * `provider` - Embedding provider
    /// * `batch_size` - Number of texts to embed in one call (clamped to at least 1)
    pub fn new(provider: Arc<dyn EmbeddingProvider>, batch_size: usize) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
        }
    }

    /// Embed every description of one corpus, in row order
    pub fn embed_corpus(
        &self,
        corpus: &Corpus,
    ) -> std::result::Result<(Vec<Vec<f32>>, usize), EmbeddingError> {
        let texts = corpus.descriptions();
        let mut vectors = Vec::with_capacity(texts.len());
        let mut batches = 0;

        for chunk in texts.chunks(self.batch_size) {
            let embeddings = self.provider.embed_batch(chunk)?;
            check_embeddings(chunk.len(), &embeddings, self.provider.dimension())?;
            vectors.extend(embeddings);
            batches += 1;

            debug!(
                "Embedded {}/{} {} records",
                vectors.len(),
                texts.len(),
                corpus.id()
            );
        }

        Ok((vectors, batches))
    }

    /// Embed both corpora and build the combined index
    pub fn build_index(&self, store: &RecordStore) -> Result<(VectorIndex, BatchResult)> {
        let start = std::time::Instant::now();

        info!(
            "Building index over {} records with {} ({}D)",
            store.total_len(),
            self.provider.model_name(),
            self.provider.dimension()
        );

        let mut items = Vec::with_capacity(store.total_len());
        let mut batches = 0;

        for id in CorpusId::ALL {
            let corpus = store.corpus(id);
            let (vectors, corpus_batches) = self.embed_corpus(corpus)?;
            batches += corpus_batches;

            items.extend(
                vectors
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| (EntryRef::new(id, i), v)),
            );

            info!("Embedded {} {} records", corpus.len(), id);
        }

        let metadata = IndexMetadata::for_store(self.provider.model_name(), store);
        let index = VectorIndex::build(items, metadata)?;

        let result = BatchResult {
            processed: index.len(),
            batches,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            "Index build complete: {} vectors, {} batches, {}ms",
            result.processed, result.batches, result.duration_ms
        );

        Ok((index, result))
    }

    /// Build the index on the blocking thread pool without stalling the runtime
    pub fn build_background(
        self: Arc<Self>,
        store: Arc<RecordStore>,
    ) -> tokio::task::JoinHandle<Result<(VectorIndex, BatchResult)>> {
        tokio::task::spawn_blocking(move || self.build_index(&store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Record;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Maps each text to [len, first byte, 1.0] and counts model calls
    struct CountingProvider {
        calls: AtomicUsize,
    }

    impl EmbeddingProvider for CountingProvider {
        fn embed_batch(
            &self,
            texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32, t.as_bytes()[0] as f32, 1.0])
                .collect())
        }

        fn dimension(&self) -> usize {
            3
        }

        fn model_name(&self) -> &str {
            "counting"
        }
    }

    /// Returns one vector too few
    struct LossyProvider;

    impl EmbeddingProvider for LossyProvider {
        fn embed_batch(
            &self,
            texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().skip(1).map(|_| vec![0.0; 3]).collect())
        }

        fn dimension(&self) -> usize {
            3
        }

        fn model_name(&self) -> &str {
            "lossy"
        }
    }

    fn store() -> RecordStore {
        RecordStore::from_records(
            vec![
                Record::new("A01", "Cholera"),
                Record::new("A02", "Typhoid fever"),
                Record::new("A03", "Shigellosis"),
            ],
            vec![
                Record::new("H1", "Hearing aid"),
                Record::new("E0100", "Cane"),
            ],
        )
    }

    #[test]
    fn test_build_index_tags_and_order() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let processor = BatchProcessor::new(provider.clone(), 2);

        let (index, result) = processor.build_index(&store()).unwrap();
        assert_eq!(index.len(), 5);
        assert_eq!(result.processed, 5);
        // 3 diagnosis records in batches of 2, 2 procedure records in one batch
        assert_eq!(result.batches, 3);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);

        assert_eq!(index.entry(2), Some(EntryRef::new(CorpusId::Diagnosis, 2)));
        assert_eq!(index.entry(3), Some(EntryRef::new(CorpusId::Procedure, 0)));
        // "Hearing aid" has 11 bytes
        assert_eq!(index.vector(3).unwrap()[0], 11.0);
        assert_eq!(index.metadata().model, "counting");
        assert_eq!(index.metadata().boundary(), Some(3));
    }

    #[test]
    fn test_batch_size_does_not_change_index() {
        let provider: Arc<dyn EmbeddingProvider> = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let (small, _) = BatchProcessor::new(provider.clone(), 1)
            .build_index(&store())
            .unwrap();
        let (large, _) = BatchProcessor::new(provider, 64)
            .build_index(&store())
            .unwrap();

        assert_eq!(small.entries(), large.entries());
        for p in 0..small.len() {
            assert_eq!(small.vector(p), large.vector(p));
        }
    }

    #[test]
    fn test_count_mismatch_fails() {
        let processor = BatchProcessor::new(Arc::new(LossyProvider), 8);
        assert!(processor.build_index(&store()).is_err());
    }

    #[test]
    fn test_empty_store_fails() {
        let processor = BatchProcessor::new(
            Arc::new(CountingProvider {
                calls: AtomicUsize::new(0),
            }),
            8,
        );
        let empty = RecordStore::from_records(Vec::new(), Vec::new());
        assert!(processor.build_index(&empty).is_err());
    }

    #[tokio::test]
    async fn test_background_build() {
        let processor = Arc::new(BatchProcessor::new(
            Arc::new(CountingProvider {
                calls: AtomicUsize::new(0),
            }),
            4,
        ));

        let handle = processor.build_background(Arc::new(store()));
        let (index, result) = handle.await.unwrap().unwrap();
        assert_eq!(index.len(), 5);
        assert_eq!(result.processed, 5);
    }
}
