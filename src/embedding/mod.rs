//! Embedding generation
//!
//! - `EmbeddingProvider` trait for abstraction over embedding backends
//! - `FastEmbedProvider` for local embedding (all-MiniLM-L6-v2, 384-dim)
//! - `BatchProcessor` for offline index construction over both corpora

mod batch;
mod provider;

pub use batch::{BatchProcessor, BatchResult};
pub use provider::{
    canonical_model_name, check_embeddings, model_dimension, EmbeddingError, EmbeddingProvider,
    FastEmbedProvider, SUPPORTED_MODELS,
};
