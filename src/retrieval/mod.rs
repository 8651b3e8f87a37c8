//! Retrieval over the combined code corpora
//!
//! Embeds the query, runs an exact nearest-neighbour search and resolves
//! each hit back to the `(code, description)` record it came from.

mod candidate;
mod retriever;

pub use candidate::RetrievedCandidate;
pub use retriever::{RetrievalSnapshot, Retriever};

/// Number of candidates returned when the caller does not ask for a count
pub const DEFAULT_TOP_K: usize = 5;
