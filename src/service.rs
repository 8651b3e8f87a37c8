//! The coding service: retrieval plus optional generation behind one handle
//!
//! Everything long-lived (embedding model, index, corpora, HTTP client) is
//! built once here and shared by reference afterwards. Dropping the service
//! releases all of it.

use crate::config::Config;
use crate::corpus::RecordStore;
use crate::embedding::{BatchProcessor, BatchResult, EmbeddingProvider, FastEmbedProvider};
use crate::error::{MedcodeError, Result};
use crate::generation::{GeminiClient, GenerationClient, GenerationOutcome, GenerationRequest};
use crate::index::VectorIndex;
use crate::retrieval::{RetrievedCandidate, Retriever, DEFAULT_TOP_K};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Candidates for a query, plus the generated answer when one was requested
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub query: String,
    pub top_k: usize,
    pub candidates: Vec<RetrievedCandidate>,
    /// `None` when the service has no generation client
    pub outcome: Option<GenerationOutcome>,
}

impl Prediction {
    /// The generated code, if the model produced one
    pub fn code(&self) -> Option<&str> {
        self.outcome.as_ref().and_then(GenerationOutcome::text)
    }
}

pub struct CodingService {
    retriever: Arc<Retriever>,
    generator: Option<Arc<dyn GenerationClient>>,
    default_top_k: usize,
    batch_size: usize,
}

impl CodingService {
    pub fn new(retriever: Arc<Retriever>, generator: Option<Arc<dyn GenerationClient>>) -> Self {
        Self {
            retriever,
            generator,
            default_top_k: DEFAULT_TOP_K,
            batch_size: 256,
        }
    }

    pub fn with_default_top_k(mut self, top_k: usize) -> Self {
        self.default_top_k = top_k.max(1);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Load the model, corpora and persisted index named by `config`
    ///
    /// The generation client is only constructed when generation is enabled.
    pub fn from_config(config: &Config) -> Result<Self> {
        let config = config.expanded()?;

        let store = load_store(&config)?;
        let index = VectorIndex::load(&config.index.path)?;

        let provider = embedding_provider(&config)?;
        let retriever = Retriever::new(provider, index, store)?;
        let generator = generation_client(&config)?;

        Ok(Self::new(Arc::new(retriever), generator)
            .with_default_top_k(config.retrieval.top_k)
            .with_batch_size(config.embedding.batch_size))
    }

    pub fn retriever(&self) -> &Arc<Retriever> {
        &self.retriever
    }

    pub fn default_top_k(&self) -> usize {
        self.default_top_k
    }

    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }

    /// Ranked candidates for `query`; `top_k` falls back to the configured default
    pub fn retrieve(&self, query: &str, top_k: Option<usize>) -> Result<Vec<RetrievedCandidate>> {
        self.retriever
            .retrieve(query, top_k.unwrap_or(self.default_top_k))
    }

    /// Retrieve candidates, then ask the generation service to choose a code
    ///
    /// Generation failures surface as `Upstream` errors naming the query and
    /// the `top_k` that was attempted. Embedding the query and scanning the
    /// index run on the blocking pool.
    pub async fn predict(&self, query: &str, top_k: Option<usize>) -> Result<Prediction> {
        let top_k = top_k.unwrap_or(self.default_top_k);

        let retriever = self.retriever.clone();
        let owned_query = query.to_string();
        let candidates = tokio::task::spawn_blocking(move || retriever.retrieve(&owned_query, top_k))
            .await
            .map_err(|e| MedcodeError::Other(anyhow::anyhow!("Retrieval task failed: {}", e)))??;

        let outcome = match &self.generator {
            None => None,
            Some(_) if candidates.is_empty() => Some(GenerationOutcome::NoAnswer {
                reason: "no candidates retrieved".to_string(),
            }),
            Some(generator) => {
                let request = GenerationRequest::new(query, &candidates);
                let outcome = generator.generate(&request).await.map_err(|source| {
                    tracing::warn!("{} generation failed: {}", generator.name(), source);
                    MedcodeError::Upstream {
                        query: query.to_string(),
                        top_k,
                        source,
                    }
                })?;

                if let GenerationOutcome::NoAnswer { reason } = &outcome {
                    tracing::warn!("{} returned no answer: {}", generator.name(), reason);
                }
                Some(outcome)
            }
        };

        Ok(Prediction {
            query: query.to_string(),
            top_k,
            candidates,
            outcome,
        })
    }

    /// Re-embed `store` and swap the new index in
    ///
    /// Queries keep using the previous snapshot until the build finishes.
    pub async fn rebuild(&self, store: RecordStore) -> Result<BatchResult> {
        let processor = Arc::new(BatchProcessor::new(
            self.retriever.provider().clone(),
            self.batch_size,
        ));
        let store = Arc::new(store);

        let (index, result) = processor
            .build_background(store.clone())
            .await
            .map_err(|e| MedcodeError::Other(anyhow::anyhow!("Index build task failed: {}", e)))??;

        let store = Arc::try_unwrap(store).unwrap_or_else(|shared| (*shared).clone());
        self.retriever.swap(index, store)?;
        Ok(result)
    }
}

/// Load both corpora named in `config`
pub fn load_store(config: &Config) -> Result<RecordStore> {
    let store = RecordStore::load(&config.corpus.diagnosis_file, &config.corpus.procedure_file)?;
    tracing::info!(
        "Loaded corpora: {} diagnosis, {} procedure records",
        store.boundary(),
        store.total_len() - store.boundary()
    );
    Ok(store)
}

/// The configured local embedding model
pub fn embedding_provider(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    let provider = FastEmbedProvider::new(&config.embedding.model, config.embedding.cache_dir.clone())?;
    Ok(Arc::new(provider))
}

/// The configured generation client, or `None` when generation is disabled
pub fn generation_client(config: &Config) -> Result<Option<Arc<dyn GenerationClient>>> {
    let generation = &config.generation;
    if !generation.enabled {
        return Ok(None);
    }

    let api_key = std::env::var(&generation.api_key_env).map_err(|_| {
        MedcodeError::Config(format!(
            "Environment variable {} is not set",
            generation.api_key_env
        ))
    })?;

    let client = GeminiClient::new(
        &generation.base_url,
        &generation.model,
        &api_key,
        generation.temperature,
        Duration::from_secs(generation.timeout_secs),
    )
    .map_err(|e| MedcodeError::Config(e.to_string()))?;

    tracing::debug!("Generation enabled via {}", client.endpoint());
    Ok(Some(Arc::new(client)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Record;
    use crate::embedding::EmbeddingError;
    use crate::error::ErrorKind;
    use crate::generation::GenerationError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Embeds each text as [len, vowel count]
    struct ShapeProvider;

    impl EmbeddingProvider for ShapeProvider {
        fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts
                .iter()
                .map(|t| {
                    let vowels = t.chars().filter(|c| "aeiouAEIOU".contains(*c)).count();
                    vec![t.len() as f32, vowels as f32]
                })
                .collect())
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "shape"
        }
    }

    /// Records the prompt it was sent and replays a canned reply
    struct ScriptedClient {
        reply: Mutex<Option<std::result::Result<GenerationOutcome, GenerationError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn new(reply: std::result::Result<GenerationOutcome, GenerationError>) -> Self {
            Self {
                reply: Mutex::new(Some(reply)),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl GenerationClient for ScriptedClient {
        async fn generate(
            &self,
            request: &GenerationRequest<'_>,
        ) -> std::result::Result<GenerationOutcome, GenerationError> {
            self.prompts.lock().unwrap().push(request.prompt());
            self.reply
                .lock()
                .unwrap()
                .take()
                .unwrap_or(Err(GenerationError::Unreachable("no more replies".into())))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    /// Remembers which threads it embedded on
    struct ThreadRecordingProvider {
        threads: Mutex<Vec<std::thread::ThreadId>>,
    }

    impl EmbeddingProvider for ThreadRecordingProvider {
        fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            self.threads.lock().unwrap().push(std::thread::current().id());
            ShapeProvider.embed_batch(texts)
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "shape"
        }
    }

    fn store() -> RecordStore {
        RecordStore::from_records(
            vec![Record::new("A01", "Cholera"), Record::new("A02", "Typhoid fever")],
            vec![Record::new("H1", "Hearing aid")],
        )
    }

    fn retriever() -> Arc<Retriever> {
        let provider: Arc<dyn EmbeddingProvider> = Arc::new(ShapeProvider);
        let (index, _) = BatchProcessor::new(provider.clone(), 8)
            .build_index(&store())
            .unwrap();
        Arc::new(Retriever::new(provider, index, store()).unwrap())
    }

    #[tokio::test]
    async fn test_predict_without_generator() {
        let service = CodingService::new(retriever(), None).with_default_top_k(2);
        let prediction = service.predict("Cholera", None).await.unwrap();

        assert_eq!(prediction.top_k, 2);
        assert_eq!(prediction.candidates.len(), 2);
        assert_eq!(prediction.candidates[0].code, "A01");
        assert!(prediction.outcome.is_none());
        assert_eq!(prediction.code(), None);
    }

    #[tokio::test]
    async fn test_predict_passes_candidates_to_generator() {
        let client = Arc::new(ScriptedClient::new(Ok(GenerationOutcome::Generated {
            text: "A01".to_string(),
        })));
        let service = CodingService::new(retriever(), Some(client.clone()));

        let prediction = service.predict("Cholera", Some(1)).await.unwrap();
        assert_eq!(prediction.code(), Some("A01"));

        let prompts = client.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].ends_with("Context: Code: A01, Description: Cholera"));
    }

    #[tokio::test]
    async fn test_predict_embeds_off_the_runtime_thread() {
        let provider = Arc::new(ThreadRecordingProvider {
            threads: Mutex::new(Vec::new()),
        });
        let (index, _) = BatchProcessor::new(provider.clone(), 8)
            .build_index(&store())
            .unwrap();
        let retriever = Retriever::new(provider.clone(), index, store()).unwrap();
        provider.threads.lock().unwrap().clear();

        let service = CodingService::new(Arc::new(retriever), None);
        let prediction = service.predict("Cholera", Some(1)).await.unwrap();
        assert_eq!(prediction.candidates[0].code, "A01");

        // The current-thread test runtime polls this future on the test thread
        let threads = provider.threads.lock().unwrap();
        assert_eq!(threads.len(), 1);
        assert_ne!(threads[0], std::thread::current().id());
    }

    #[tokio::test]
    async fn test_generation_failure_is_upstream() {
        let client = Arc::new(ScriptedClient::new(Err(GenerationError::Timeout)));
        let service = CodingService::new(retriever(), Some(client));

        let err = service.predict("Cholera", Some(3)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Upstream);
        match err {
            MedcodeError::Upstream { query, top_k, source } => {
                assert_eq!(query, "Cholera");
                assert_eq!(top_k, 3);
                assert!(matches!(source, GenerationError::Timeout));
            }
            other => panic!("expected upstream error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_zero_top_k_skips_generation() {
        let client = Arc::new(ScriptedClient::new(Err(GenerationError::Timeout)));
        let service = CodingService::new(retriever(), Some(client.clone()));

        let prediction = service.predict("Cholera", Some(0)).await.unwrap();
        assert!(prediction.candidates.is_empty());
        assert!(matches!(
            prediction.outcome,
            Some(GenerationOutcome::NoAnswer { .. })
        ));
        assert!(client.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rebuild_swaps_in_new_corpora() {
        let service = CodingService::new(retriever(), None);

        let bigger = RecordStore::from_records(
            vec![Record::new("A01", "Cholera"), Record::new("A02", "Typhoid fever")],
            vec![Record::new("H1", "Hearing aid"), Record::new("H2", "Wheelchair")],
        );
        let result = service.rebuild(bigger).await.unwrap();
        assert_eq!(result.processed, 4);

        let all = service.retrieve("Wheelchair", Some(10)).unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].code, "H2");
    }
}
