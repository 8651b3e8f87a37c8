use crate::config::{Config, SCHEMA_VERSION};
use crate::embedding::model_dimension;
use crate::error::{MedcodeError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, reporting every problem at once
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_corpus(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_index(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_generation(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(MedcodeError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_corpus(config: &Config, errors: &mut Vec<ValidationError>) {
        // Existence is checked when the corpora are loaded; paths may still
        // carry `~/` here.
        if config.corpus.diagnosis_file.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "corpus.diagnosis_file",
                "Diagnosis corpus path cannot be empty",
            ));
        }

        if config.corpus.procedure_file.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "corpus.procedure_file",
                "Procedure corpus path cannot be empty",
            ));
        }

        if !config.corpus.diagnosis_file.as_os_str().is_empty()
            && config.corpus.diagnosis_file == config.corpus.procedure_file
        {
            errors.push(ValidationError::new(
                "corpus.procedure_file",
                "Diagnosis and procedure corpora must be different files",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        let model = &config.embedding.model;
        if model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        } else if model_dimension(model).is_none() {
            errors.push(ValidationError::new(
                "embedding.model",
                format!("Unsupported embedding model: {}", model),
            ));
        }

        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }
    }

    fn validate_index(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.index.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "index.path",
                "Index path cannot be empty",
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.retrieval.top_k == 0 {
            errors.push(ValidationError::new(
                "retrieval.top_k",
                "top_k must be greater than 0",
            ));
        }
    }

    fn validate_generation(config: &Config, errors: &mut Vec<ValidationError>) {
        let generation = &config.generation;

        // The API key itself is read only when a client is built, so
        // retrieval-only commands work without it.
        if generation.api_key_env.trim().is_empty() {
            errors.push(ValidationError::new(
                "generation.api_key_env",
                "API key environment variable name cannot be empty",
            ));
        }

        let temp = generation.temperature;
        if !(0.0..=2.0).contains(&temp) {
            errors.push(ValidationError::new(
                "generation.temperature",
                format!("Temperature must be between 0.0 and 2.0, got {}", temp),
            ));
        }

        let valid_providers = ["gemini"];
        if !valid_providers.contains(&generation.provider.as_str()) {
            errors.push(ValidationError::new(
                "generation.provider",
                format!(
                    "Provider must be one of {:?}, got '{}'",
                    valid_providers, generation.provider
                ),
            ));
        }

        if !generation.base_url.starts_with("http://") && !generation.base_url.starts_with("https://")
        {
            errors.push(ValidationError::new(
                "generation.base_url",
                format!("Base URL must be http(s), got '{}'", generation.base_url),
            ));
        }

        if generation.model.trim().is_empty() {
            errors.push(ValidationError::new(
                "generation.model",
                "Model name cannot be empty",
            ));
        }

        if generation.timeout_secs == 0 {
            errors.push(ValidationError::new(
                "generation.timeout_secs",
                "Timeout must be greater than 0",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn errors_of(config: &Config) -> Vec<ValidationError> {
        match ConfigValidator::validate(config) {
            Err(MedcodeError::ConfigValidation { errors }) => errors,
            other => panic!("expected validation errors, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_empty_corpus_path() {
        let mut config = Config::default();
        config.corpus.diagnosis_file = PathBuf::new();
        let errors = errors_of(&config);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "corpus.diagnosis_file");
    }

    #[test]
    fn test_same_corpus_file_twice() {
        let mut config = Config::default();
        config.corpus.procedure_file = config.corpus.diagnosis_file.clone();
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_unknown_model() {
        let mut config = Config::default();
        config.embedding.model = "word2vec".to_string();
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_collects_every_problem() {
        let mut config = Config::default();
        config.retrieval.top_k = 0;
        config.embedding.batch_size = 0;
        config.generation.temperature = 5.0;
        config.generation.timeout_secs = 0;

        let paths: Vec<String> = errors_of(&config).into_iter().map(|e| e.path).collect();
        assert!(paths.contains(&"retrieval.top_k".to_string()));
        assert!(paths.contains(&"embedding.batch_size".to_string()));
        assert!(paths.contains(&"generation.temperature".to_string()));
        assert!(paths.contains(&"generation.timeout_secs".to_string()));
    }

    #[test]
    fn test_enabled_generation_without_key_is_valid() {
        let mut config = Config::default();
        config.generation.enabled = true;
        config.generation.api_key_env = "MEDCODE_TEST_KEY_THAT_IS_NEVER_SET".to_string();
        assert!(ConfigValidator::validate(&config).is_ok());

        config.generation.api_key_env = String::new();
        let errors = errors_of(&config);
        assert_eq!(errors[0].path, "generation.api_key_env");
    }
}
