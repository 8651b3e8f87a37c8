use crate::corpus::{CorpusError, CorpusId};
use crate::embedding::EmbeddingError;
use crate::generation::GenerationError;
use crate::index::IndexError;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for medcode
#[derive(Error, Debug)]
pub enum MedcodeError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// Query rejected before retrieval
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Corpus loading or writing errors
    #[error(transparent)]
    Corpus(#[from] CorpusError),

    /// Embedding generation errors
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    /// Vector index errors
    #[error(transparent)]
    Index(#[from] IndexError),

    /// An indexed entry points past the end of its corpus
    #[error(
        "Index out of sync with {corpus} corpus: combined position {combined_position} \
         resolves to local position {local_position}, but the corpus holds {corpus_len} records; \
         rebuild the index"
    )]
    Desync {
        corpus: CorpusId,
        combined_position: usize,
        local_position: usize,
        corpus_len: usize,
    },

    /// Generation service failed for a query
    #[error("Generation failed for query {query:?} (top_k={top_k}): {source}")]
    Upstream {
        query: String,
        top_k: usize,
        #[source]
        source: GenerationError,
    },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse classification callers use to decide how to react to a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input data: dimension mismatch, empty corpus, malformed record
    Validation,
    /// Index artifact, corpus file or config file missing
    NotFound,
    /// Index and corpora disagree; the index must be rebuilt
    Desync,
    /// Generation service unreachable or returned garbage; caller may retry
    Upstream,
    /// IO and serialization plumbing
    Internal,
}

impl MedcodeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MedcodeError::Config(_)
            | MedcodeError::ConfigValidation { .. }
            | MedcodeError::InvalidConfigValue { .. }
            | MedcodeError::InvalidQuery(_) => ErrorKind::Validation,
            MedcodeError::ConfigNotFound { .. } => ErrorKind::NotFound,
            MedcodeError::Corpus(e) => match e {
                CorpusError::NotFound { .. } => ErrorKind::NotFound,
                CorpusError::Io { .. } => ErrorKind::Internal,
                _ => ErrorKind::Validation,
            },
            MedcodeError::Embedding(e) => match e {
                EmbeddingError::InitializationError(_) | EmbeddingError::GenerationError(_) => {
                    ErrorKind::Internal
                }
                _ => ErrorKind::Validation,
            },
            MedcodeError::Index(e) => match e {
                IndexError::NotFound(_) => ErrorKind::NotFound,
                IndexError::Io(_) | IndexError::Corrupt(_) | IndexError::Serialization(_) => {
                    ErrorKind::Internal
                }
                _ => ErrorKind::Validation,
            },
            MedcodeError::Desync { .. } => ErrorKind::Desync,
            MedcodeError::Upstream { .. } => ErrorKind::Upstream,
            MedcodeError::Io { .. }
            | MedcodeError::Toml(_)
            | MedcodeError::TomlSerialization(_)
            | MedcodeError::Json { .. }
            | MedcodeError::Other(_) => ErrorKind::Internal,
        }
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for medcode operations
pub type Result<T> = std::result::Result<T, MedcodeError>;
