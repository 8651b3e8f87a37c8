//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "medcode",
    version,
    author = "neur0map",
    about = "Predict ICD and HCPCS codes from free-text medical descriptions",
    long_about = "medcode embeds the ICD diagnosis and HCPCS procedure corpora into one exact \
                  nearest-neighbour index, retrieves the closest codes for a description, and can \
                  ask a generative model to pick the final code from those candidates."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/medcode/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Embed both corpora and write the index artifact
    Build {
        /// Diagnosis (ICD) corpus CSV, overrides corpus.diagnosis_file
        #[arg(long, value_name = "FILE")]
        diagnosis: Option<PathBuf>,

        /// Procedure (HCPCS) corpus CSV, overrides corpus.procedure_file
        #[arg(long, value_name = "FILE")]
        procedure: Option<PathBuf>,

        /// Where to write the index, overrides index.path
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Show the codes nearest to a description
    Query {
        /// Free-text description
        query: String,

        /// Number of candidates (defaults to retrieval.top_k)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Retrieve candidates and ask the generation service for a code
    Predict {
        /// Free-text description
        query: String,

        /// Number of candidates passed as context (defaults to retrieval.top_k)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Force offline mode (skip generation even if configured)
        #[arg(long)]
        offline: bool,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Print index metadata and check it against the current corpora
    Inspect {
        /// Index file (defaults to index.path)
        #[arg(short, long, value_name = "FILE")]
        index: Option<PathBuf>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
