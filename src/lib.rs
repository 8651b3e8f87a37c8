//! medcode - Medical Code Prediction
//!
//! Embeds the ICD diagnosis and HCPCS procedure corpora into one exact
//! nearest-neighbour index, retrieves the codes closest to a free-text
//! description, and optionally asks a generative model to choose among them.

pub mod cli;
pub mod config;
pub mod corpus;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod index;
pub mod retrieval;
pub mod service;

pub use error::{ErrorKind, MedcodeError, Result};
