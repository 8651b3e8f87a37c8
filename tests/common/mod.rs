//! Shared fixtures for integration tests
#![allow(dead_code)]

use medcode::corpus::{Record, RecordStore};
use medcode::embedding::{BatchProcessor, EmbeddingError, EmbeddingProvider};
use medcode::index::VectorIndex;
use medcode::retrieval::Retriever;
use std::collections::HashMap;
use std::sync::Arc;

/// Deterministic provider: known texts map to fixed vectors, anything else
/// is folded from its bytes
pub struct TableProvider {
    table: HashMap<String, Vec<f32>>,
    dimension: usize,
}

impl TableProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            table: HashMap::new(),
            dimension,
        }
    }

    pub fn with(mut self, text: &str, vector: &[f32]) -> Self {
        assert_eq!(vector.len(), self.dimension);
        self.table.insert(text.to_string(), vector.to_vec());
        self
    }

    /// Give every text its own axis, so each one is nearest to itself
    pub fn one_hot(texts: &[&str]) -> Self {
        let mut provider = Self::new(texts.len());
        for (i, text) in texts.iter().enumerate() {
            let mut v = vec![0.0; texts.len()];
            v[i] = 1.0;
            provider = provider.with(text, &v);
        }
        provider
    }

    fn fold(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0; self.dimension];
        for (i, b) in text.bytes().enumerate() {
            v[i % self.dimension] += b as f32 / 255.0;
        }
        v
    }
}

impl EmbeddingProvider for TableProvider {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts
            .iter()
            .map(|t| self.table.get(t).cloned().unwrap_or_else(|| self.fold(t)))
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "table"
    }
}

pub fn records(pairs: &[(&str, &str)]) -> Vec<Record> {
    pairs.iter().map(|(c, d)| Record::new(*c, *d)).collect()
}

pub fn store(diagnosis: &[(&str, &str)], procedure: &[(&str, &str)]) -> RecordStore {
    RecordStore::from_records(records(diagnosis), records(procedure))
}

pub fn build(provider: &Arc<dyn EmbeddingProvider>, store: &RecordStore) -> VectorIndex {
    let (index, _) = BatchProcessor::new(provider.clone(), 2)
        .build_index(store)
        .expect("index build");
    index
}

/// Build an index over `store` and wrap both in a retriever
pub fn retriever(provider: Arc<dyn EmbeddingProvider>, store: RecordStore) -> Retriever {
    let index = build(&provider, &store);
    Retriever::new(provider, index, store).expect("retriever")
}

pub const DIAGNOSIS: [(&str, &str); 3] = [
    ("A00", "Cholera due to Vibrio cholerae"),
    ("A01", "Typhoid fever"),
    ("J45", "Asthma"),
];

pub const PROCEDURE: [(&str, &str); 2] = [
    ("V5030", "Hearing aid, monaural, body worn"),
    ("E0100", "Cane, includes canes of all materials"),
];
