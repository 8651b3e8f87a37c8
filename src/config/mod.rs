//! Configuration management for medcode
//!
//! Settings live in one TOML file. Values can be overridden from the
//! environment with `MEDCODE_SECTION__KEY=value`, and the result is
//! validated as a whole before anything uses it.

use crate::error::{MedcodeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

pub const SCHEMA_VERSION: &str = "1.0.0";
const ENV_PREFIX: &str = "MEDCODE_";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub corpus: CorpusConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub retrieval: RetrievalConfig,
    pub generation: GenerationConfig,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Locations of the two reference corpora (CSV, `code,description`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusConfig {
    pub diagnosis_file: PathBuf,
    pub procedure_file: PathBuf,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    pub batch_size: usize,
    /// Where downloaded model files are cached; fastembed's default if unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

/// Persisted index artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub path: PathBuf,
    pub compress: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub top_k: usize,
}

/// Generation service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub enabled: bool,
    pub provider: String,
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(MedcodeError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| MedcodeError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Load the config at `path` if it exists, otherwise the defaults
    ///
    /// Environment overrides and validation apply either way.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }

        tracing::debug!("No config at {:?}, using defaults", path);
        let mut config = Config::default();
        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Save configuration to a file, creating its directory
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| MedcodeError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| MedcodeError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: MEDCODE_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix(ENV_PREFIX) {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "CORPUS__DIAGNOSIS_FILE" => self.corpus.diagnosis_file = PathBuf::from(value),
            "CORPUS__PROCEDURE_FILE" => self.corpus.procedure_file = PathBuf::from(value),
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "EMBEDDING__BATCH_SIZE" => self.embedding.batch_size = parse_env(path, value)?,
            "EMBEDDING__CACHE_DIR" => self.embedding.cache_dir = Some(PathBuf::from(value)),
            "INDEX__PATH" => self.index.path = PathBuf::from(value),
            "INDEX__COMPRESS" => self.index.compress = parse_env(path, value)?,
            "RETRIEVAL__TOP_K" => self.retrieval.top_k = parse_env(path, value)?,
            "GENERATION__ENABLED" => self.generation.enabled = parse_env(path, value)?,
            "GENERATION__BASE_URL" => self.generation.base_url = value.to_string(),
            "GENERATION__MODEL" => self.generation.model = value.to_string(),
            "GENERATION__API_KEY_ENV" => self.generation.api_key_env = value.to_string(),
            "GENERATION__TEMPERATURE" => self.generation.temperature = parse_env(path, value)?,
            "GENERATION__TIMEOUT_SECS" => self.generation.timeout_secs = parse_env(path, value)?,
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| MedcodeError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("medcode").join("config.toml"))
    }

    /// Copy of this config with every `~/` path expanded
    pub fn expanded(&self) -> Result<Self> {
        let mut config = self.clone();
        config.corpus.diagnosis_file = expand_path(&config.corpus.diagnosis_file)?;
        config.corpus.procedure_file = expand_path(&config.corpus.procedure_file)?;
        config.index.path = expand_path(&config.index.path)?;
        if let Some(dir) = &config.embedding.cache_dir {
            config.embedding.cache_dir = Some(expand_path(dir)?);
        }
        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| MedcodeError::InvalidConfigValue {
            path: path.to_string(),
            message: format!(
                "Cannot parse '{}' as {}",
                value,
                std::any::type_name::<T>()
            ),
        })
}

/// Expand a leading `~/` to the home directory
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    let Some(path_str) = path.to_str() else {
        return Ok(path.to_path_buf());
    };

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| MedcodeError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(rest))
    } else {
        Ok(path.to_path_buf())
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = PathBuf::from("~/.medcode");

        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            corpus: CorpusConfig {
                diagnosis_file: data_dir.join("corpus").join("icd.csv"),
                procedure_file: data_dir.join("corpus").join("hcpcs.csv"),
            },
            embedding: EmbeddingConfig {
                model: "all-MiniLM-L6-v2".to_string(),
                batch_size: 256,
                cache_dir: None,
            },
            index: IndexConfig {
                path: data_dir.join("index").join("codes.mcix"),
                compress: true,
            },
            retrieval: RetrievalConfig {
                top_k: crate::retrieval::DEFAULT_TOP_K,
            },
            generation: GenerationConfig {
                enabled: false,
                provider: "gemini".to_string(),
                base_url: crate::generation::DEFAULT_GEMINI_BASE_URL.to_string(),
                model: "gemini-pro".to_string(),
                api_key_env: "GEMINI_API_KEY".to_string(),
                temperature: 0.2,
                timeout_secs: 60,
            },
        }
    }
}
