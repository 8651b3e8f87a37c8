//! Corpus-resolved retrieval results

use crate::corpus::CorpusId;
use serde::{Deserialize, Serialize};

/// A code suggested for a query, with the distance that ranked it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedCandidate {
    pub code: String,

    pub description: String,

    /// Squared Euclidean distance between query and description embeddings
    /// (lower is more similar)
    pub similarity_score: f64,

    /// Corpus the code was drawn from
    pub corpus: CorpusId,

    /// Position of the entry in the combined index space
    pub combined_position: usize,
}

impl RetrievedCandidate {
    /// The line this candidate contributes to a generation prompt's context
    pub fn context_line(&self) -> String {
        format!("Code: {}, Description: {}", self.code, self.description)
    }

    /// Get a short preview of the description (first N characters)
    pub fn preview(&self, max_chars: usize) -> String {
        match self.description.char_indices().nth(max_chars) {
            Some((cut, _)) => format!("{}...", &self.description[..cut]),
            None => self.description.clone(),
        }
    }
}
