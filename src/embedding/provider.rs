/// Embedding provider trait and FastEmbed implementation
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitializationError(String),

    #[error("Embedding generation failed: {0}")]
    GenerationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Trait for embedding providers
///
/// Implementations must be deterministic: the same text always maps to the
/// same vector, and `embed_batch` returns exactly one vector per input, in
/// input order, each of length `dimension()`.
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for multiple texts (batched for efficiency)
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Generate embedding for a single text
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("Empty text".to_string()));
        }

        self.embed_batch(&[text.to_string()])?
            .pop()
            .ok_or_else(|| EmbeddingError::GenerationError("No embeddings generated".to_string()))
    }
}

/// Verify a provider's output against the 1:1 and fixed-dimension contract
pub fn check_embeddings(
    inputs: usize,
    embeddings: &[Vec<f32>],
    dimension: usize,
) -> Result<(), EmbeddingError> {
    if embeddings.len() != inputs {
        return Err(EmbeddingError::GenerationError(format!(
            "Embedding count mismatch: expected {}, got {}",
            inputs,
            embeddings.len()
        )));
    }

    for embedding in embeddings {
        if embedding.len() != dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: dimension,
                actual: embedding.len(),
            });
        }
    }

    Ok(())
}

/// Models this crate knows how to load, with their output dimension
pub const SUPPORTED_MODELS: [(&str, usize); 3] = [
    ("all-MiniLM-L6-v2", 384),
    ("bge-small-en-v1.5", 384),
    ("bge-base-en-v1.5", 768),
];

/// FastEmbed provider for local embedding generation
///
/// Uses all-MiniLM-L6-v2 model (384 dimensions) by default.
/// Runs fully offline once the model is cached.
pub struct FastEmbedProvider {
    model: Arc<TextEmbedding>,
    model_name: String,
    dimension: usize,
}

impl FastEmbedProvider {
    /// Create a new FastEmbed provider with the specified model
    ///
    /// **Important**: Models are downloaded on-demand on first use, either to
    /// `cache_dir` or to fastembed's default cache location.
    /// - all-MiniLM-L6-v2: 90MB (384 dims) - recommended for most use cases
    /// - bge-small-en-v1.5: 130MB (384 dims) - better accuracy
    /// - bge-base-en-v1.5: 440MB (768 dims) - highest accuracy
    pub fn new(model_name: &str, cache_dir: Option<PathBuf>) -> Result<Self, EmbeddingError> {
        // Index metadata records the canonical spelling, whatever the config used
        let (model_name, dimension) = canonical_model(model_name).ok_or_else(|| {
            EmbeddingError::InitializationError(format!(
                "Unsupported model: {}. Supported: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5",
                model_name
            ))
        })?;

        let (embedding_model, model_size_mb) = match model_name {
            "all-MiniLM-L6-v2" => (EmbeddingModel::AllMiniLML6V2, 90),
            "bge-small-en-v1.5" => (EmbeddingModel::BGESmallENV15, 130),
            "bge-base-en-v1.5" => (EmbeddingModel::BGEBaseENV15, 440),
            other => {
                return Err(EmbeddingError::InitializationError(format!(
                    "No fastembed model for {}",
                    other
                )));
            }
        };

        tracing::info!(
            "Initializing embedding model: {} ({}D, ~{}MB download if not cached)",
            model_name,
            dimension,
            model_size_mb
        );

        let mut init_options =
            InitOptions::new(embedding_model).with_show_download_progress(true);
        if let Some(dir) = cache_dir {
            init_options = init_options.with_cache_dir(dir);
        }

        let model = TextEmbedding::try_new(init_options)
            .map_err(|e| EmbeddingError::InitializationError(e.to_string()))?;

        Ok(Self {
            model: Arc::new(model),
            model_name: model_name.to_string(),
            dimension,
        })
    }

    /// Create provider with default model (all-MiniLM-L6-v2)
    pub fn with_default_model() -> Result<Self, EmbeddingError> {
        Self::new("all-MiniLM-L6-v2", None)
    }
}

fn canonical_model(model_name: &str) -> Option<(&'static str, usize)> {
    SUPPORTED_MODELS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(model_name))
        .copied()
}

/// Supported model name in its canonical spelling (lookup ignores case)
pub fn canonical_model_name(model_name: &str) -> Option<&'static str> {
    canonical_model(model_name).map(|(name, _)| name)
}

/// Output dimension of a supported model name
pub fn model_dimension(model_name: &str) -> Option<usize> {
    canonical_model(model_name).map(|(_, dim)| dim)
}

impl EmbeddingProvider for FastEmbedProvider {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        // Dropping blank inputs would shift every later vector onto the wrong record
        if let Some(pos) = texts.iter().position(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::InvalidInput(format!(
                "Empty text at batch position {}",
                pos
            )));
        }

        let inputs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let embeddings = self
            .model
            .embed(inputs, None)
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?;

        check_embeddings(texts.len(), &embeddings, self.dimension)?;

        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_dimension_lookup() {
        assert_eq!(model_dimension("all-MiniLM-L6-v2"), Some(384));
        assert_eq!(model_dimension("all-minilm-l6-v2"), Some(384));
        assert_eq!(model_dimension("bge-base-en-v1.5"), Some(768));
        assert_eq!(model_dimension("word2vec"), None);
    }

    #[test]
    fn test_canonical_model_name() {
        assert_eq!(canonical_model_name("all-minilm-l6-v2"), Some("all-MiniLM-L6-v2"));
        assert_eq!(canonical_model_name("ALL-MINILM-L6-V2"), Some("all-MiniLM-L6-v2"));
        assert_eq!(canonical_model_name("BGE-Small-EN-v1.5"), Some("bge-small-en-v1.5"));
        assert_eq!(canonical_model_name("all-MiniLM-L6"), None);
    }

    #[test]
    fn test_unsupported_model() {
        let result = FastEmbedProvider::new("word2vec", None);
        assert!(matches!(
            result,
            Err(EmbeddingError::InitializationError(_))
        ));
    }

    #[test]
    fn test_check_embeddings() {
        let ok = vec![vec![0.0; 4], vec![1.0; 4]];
        assert!(check_embeddings(2, &ok, 4).is_ok());
        assert!(matches!(
            check_embeddings(3, &ok, 4),
            Err(EmbeddingError::GenerationError(_))
        ));
        assert!(matches!(
            check_embeddings(2, &ok, 8),
            Err(EmbeddingError::DimensionMismatch {
                expected: 8,
                actual: 4
            })
        ));
    }

    #[test]
    #[ignore] // Requires model download (~90MB) - run with: cargo test -- --ignored
    fn test_provider_creation() {
        let provider = FastEmbedProvider::with_default_model().unwrap();
        assert_eq!(provider.dimension(), 384);
        assert_eq!(provider.model_name(), "all-MiniLM-L6-v2");
    }

    #[test]
    #[ignore] // Requires model download (~90MB) - run with: cargo test -- --ignored
    fn test_lowercase_name_is_recorded_canonically() {
        let provider = FastEmbedProvider::new("all-minilm-l6-v2", None).unwrap();
        assert_eq!(provider.model_name(), "all-MiniLM-L6-v2");
    }

    #[test]
    #[ignore] // Requires model download (~90MB) - run with: cargo test -- --ignored
    fn test_embedding_is_deterministic() {
        let provider = FastEmbedProvider::with_default_model().unwrap();
        let text = "fever and headache";

        let first = provider.embed(text).unwrap();
        let second = provider.embed(text).unwrap();
        assert_eq!(first.len(), 384);
        assert_eq!(first, second);
    }

    #[test]
    #[ignore] // Requires model download (~90MB) - run with: cargo test -- --ignored
    fn test_batch_preserves_order() {
        let provider = FastEmbedProvider::with_default_model().unwrap();
        let texts = vec![
            "Cholera".to_string(),
            "Hearing aid".to_string(),
            "Typhoid fever".to_string(),
        ];

        let batch = provider.embed_batch(&texts).unwrap();
        assert_eq!(batch.len(), 3);

        for (text, vector) in texts.iter().zip(batch.iter()) {
            let single = provider.embed(text).unwrap();
            let drift: f32 = single
                .iter()
                .zip(vector.iter())
                .map(|(a, b)| (a - b).abs())
                .sum();
            assert!(drift < 1e-3, "batch vector for {:?} drifted by {}", text, drift);
        }
    }

    #[test]
    #[ignore] // Requires model download (~90MB) - run with: cargo test -- --ignored
    fn test_blank_text_in_batch_rejected() {
        let provider = FastEmbedProvider::with_default_model().unwrap();
        let texts = vec!["Cholera".to_string(), "   ".to_string()];
        assert!(matches!(
            provider.embed_batch(&texts),
            Err(EmbeddingError::InvalidInput(_))
        ));
    }
}
