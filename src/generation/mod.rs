//! Generation step: turn retrieved candidates into a single proposed code
//!
//! The generative model itself is an external service. This module owns the
//! request shape (query plus candidates), the context/prompt rendering, and a
//! typed outcome that separates "the model answered" from "the model returned
//! nothing usable". Transport and decoding failures are errors, not outcomes.

mod gemini;

pub use gemini::{GeminiClient, DEFAULT_GEMINI_BASE_URL};

use crate::retrieval::RetrievedCandidate;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Generation client misconfigured: {0}")]
    Config(String),

    #[error("Generation service unreachable: {0}")]
    Unreachable(String),

    #[error("Generation request timed out")]
    Timeout,

    #[error("Generation service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unparsable generation response: {0}")]
    InvalidResponse(String),
}

/// What the generation service is asked
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub query: &'a str,
    pub candidates: &'a [RetrievedCandidate],
}

impl<'a> GenerationRequest<'a> {
    pub fn new(query: &'a str, candidates: &'a [RetrievedCandidate]) -> Self {
        Self { query, candidates }
    }

    /// Candidates flattened into one line of context
    pub fn context(&self) -> String {
        self.candidates
            .iter()
            .map(RetrievedCandidate::context_line)
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn prompt(&self) -> String {
        format!(
            "Given the following context, predict the code for the description: '{}'.\n\nContext: {}",
            self.query,
            self.context()
        )
    }
}

/// What the generation service answered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GenerationOutcome {
    /// The model produced text (trimmed, never empty)
    Generated { text: String },
    /// The service responded but carried no text, e.g. a blocked prompt
    NoAnswer { reason: String },
}

impl GenerationOutcome {
    pub fn text(&self) -> Option<&str> {
        match self {
            GenerationOutcome::Generated { text } => Some(text),
            GenerationOutcome::NoAnswer { .. } => None,
        }
    }
}

/// Client for an external generative model
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Ask the model to pick a code for the request
    async fn generate(
        &self,
        request: &GenerationRequest<'_>,
    ) -> Result<GenerationOutcome, GenerationError>;

    /// Provider name for logs
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::CorpusId;

    fn candidates() -> Vec<RetrievedCandidate> {
        vec![
            RetrievedCandidate {
                code: "A01".to_string(),
                description: "Cholera".to_string(),
                similarity_score: 0.1,
                corpus: CorpusId::Diagnosis,
                combined_position: 0,
            },
            RetrievedCandidate {
                code: "H1".to_string(),
                description: "Hearing aid".to_string(),
                similarity_score: 0.9,
                corpus: CorpusId::Procedure,
                combined_position: 1,
            },
        ]
    }

    #[test]
    fn test_context_joins_candidates_in_order() {
        let candidates = candidates();
        let request = GenerationRequest::new("fever", &candidates);
        assert_eq!(
            request.context(),
            "Code: A01, Description: Cholera Code: H1, Description: Hearing aid"
        );
    }

    #[test]
    fn test_prompt_embeds_query_and_context() {
        let candidates = candidates();
        let request = GenerationRequest::new("fever and headache", &candidates);
        let prompt = request.prompt();
        assert!(prompt.starts_with(
            "Given the following context, predict the code for the description: 'fever and headache'."
        ));
        assert!(prompt.ends_with("Context: Code: A01, Description: Cholera Code: H1, Description: Hearing aid"));
    }

    #[test]
    fn test_empty_candidates_give_empty_context() {
        let request = GenerationRequest::new("fever", &[]);
        assert_eq!(request.context(), "");
    }

    #[test]
    fn test_outcome_text() {
        let ok = GenerationOutcome::Generated {
            text: "A01".to_string(),
        };
        let none = GenerationOutcome::NoAnswer {
            reason: "blocked".to_string(),
        };
        assert_eq!(ok.text(), Some("A01"));
        assert_eq!(none.text(), None);

        let json = serde_json::to_value(&none).unwrap();
        assert_eq!(json["status"], "no_answer");
    }
}
