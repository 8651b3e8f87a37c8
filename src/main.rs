use medcode::cli::{Cli, Commands, ConfigAction};
use medcode::config::Config;
use medcode::corpus::RecordStore;
use medcode::embedding::BatchProcessor;
use medcode::error::{MedcodeError, Result};
use medcode::generation::GenerationOutcome;
use medcode::index::VectorIndex;
use medcode::retrieval::RetrievedCandidate;
use medcode::service::{self, CodingService};
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    // Handle commands
    match cli.command {
        Commands::Build {
            diagnosis,
            procedure,
            output,
        } => {
            cmd_build(cli.config, diagnosis, procedure, output).await?;
        }
        Commands::Query { query, top_k, json } => {
            cmd_query(cli.config, &query, top_k, json)?;
        }
        Commands::Predict {
            query,
            top_k,
            offline,
            json,
        } => {
            cmd_predict(cli.config, &query, top_k, offline, json).await?;
        }
        Commands::Inspect { index } => {
            cmd_inspect(cli.config, index)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "medcode=debug" } else { "medcode=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt().with_env_filter(filter).with_target(false).init();
}

async fn cmd_build(
    config_path: Option<PathBuf>,
    diagnosis: Option<PathBuf>,
    procedure: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(path) = diagnosis {
        config.corpus.diagnosis_file = path;
    }
    if let Some(path) = procedure {
        config.corpus.procedure_file = path;
    }
    if let Some(path) = output {
        config.index.path = path;
    }
    let config = config.expanded()?;

    let store = service::load_store(&config)?;
    let provider = service::embedding_provider(&config)?;
    let processor = Arc::new(BatchProcessor::new(provider, config.embedding.batch_size));

    println!(
        "Embedding {} records with {}...",
        store.total_len(),
        config.embedding.model
    );

    let (index, result) = processor
        .build_background(Arc::new(store))
        .await
        .map_err(|e| MedcodeError::Other(anyhow::anyhow!("Index build task failed: {}", e)))??;

    index.save(&config.index.path, config.index.compress)?;

    println!("✓ Index built: {} vectors ({}D)", index.len(), index.dimension());
    println!("  Batches: {}", result.batches);
    println!("  Took: {}ms", result.duration_ms);
    println!("  Written to: {}", config.index.path.display());

    Ok(())
}

fn cmd_query(config_path: Option<PathBuf>, query: &str, top_k: Option<usize>, json: bool) -> Result<()> {
    let mut config = load_config(config_path)?;
    config.generation.enabled = false;

    let service = CodingService::from_config(&config)?;
    let candidates = service.retrieve(query, top_k)?;

    if json {
        println!("{}", to_json(&candidates)?);
    } else {
        print_candidates(&candidates);
    }

    Ok(())
}

async fn cmd_predict(
    config_path: Option<PathBuf>,
    query: &str,
    top_k: Option<usize>,
    offline: bool,
    json: bool,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if offline {
        config.generation.enabled = false;
    }

    let service = CodingService::from_config(&config)?;
    let prediction = service.predict(query, top_k).await?;

    if json {
        println!("{}", to_json(&prediction)?);
        return Ok(());
    }

    print_candidates(&prediction.candidates);
    println!();
    match &prediction.outcome {
        Some(GenerationOutcome::Generated { text }) => println!("✓ Predicted code: {}", text),
        Some(GenerationOutcome::NoAnswer { reason }) => println!("✗ No answer: {}", reason),
        None => println!("Generation disabled; showing retrieved candidates only"),
    }

    Ok(())
}

fn cmd_inspect(config_path: Option<PathBuf>, index_path: Option<PathBuf>) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(path) = index_path {
        config.index.path = path;
    }
    let config = config.expanded()?;

    let index = VectorIndex::load(&config.index.path)?;
    let meta = index.metadata();

    println!("Index: {}", config.index.path.display());
    println!("  Model: {}", meta.model);
    println!("  Built: {}", meta.built_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Vectors: {} ({}D)", index.len(), index.dimension());
    for snapshot in &meta.corpora {
        println!(
            "  {}: {} records (fingerprint {})",
            snapshot.corpus,
            snapshot.records,
            &snapshot.fingerprint[..snapshot.fingerprint.len().min(16)]
        );
    }

    println!();
    match RecordStore::load(&config.corpus.diagnosis_file, &config.corpus.procedure_file) {
        Ok(store) => {
            let problems = meta.staleness(&store);
            if problems.is_empty() {
                println!("✓ Index matches the current corpora");
            } else {
                println!("⚠ Index is stale, rebuild with `medcode build`:");
                for problem in problems {
                    println!("  - {}", problem);
                }
            }
        }
        Err(e) => println!("⚠ Could not load corpora to compare: {}", e),
    }

    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path)?;
            let toml = toml::to_string_pretty(&config)?;
            println!("{}", toml);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            let config = Config::default();
            config.save(&path)?;

            println!("✓ Configuration initialized at: {}", path.display());
            println!("  Corpora: {}", config.corpus.diagnosis_file.display());
            println!("           {}", config.corpus.procedure_file.display());
            println!("  Index: {}", config.index.path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'medcode config init' to create one."
        );
    }
    Config::load_or_default(&path)
}

fn print_candidates(candidates: &[RetrievedCandidate]) {
    if candidates.is_empty() {
        println!("No candidates");
        return;
    }

    for (rank, candidate) in candidates.iter().enumerate() {
        println!(
            "{:>2}. {:<10} [{}] d={:.4}  {}",
            rank + 1,
            candidate.code,
            candidate.corpus,
            candidate.similarity_score,
            candidate.preview(80)
        );
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| MedcodeError::Json {
        source: e,
        context: "Failed to serialize output".to_string(),
    })
}
