use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::processing::{Granularity, SchemaVariant};

const DEFAULT_DATABASE_QUERY: &str = "SELECT id, sourcetext FROM records";
const DEFAULT_LOG_FILE: &str = "logs/processing.log";

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
    /// The file passed as `--env-file` could not be loaded.
    #[error("Failed to load environment file {}: {message}", path.display())]
    EnvFile {
        /// File that failed.
        path: PathBuf,
        /// Parser or I/O error reported by dotenvy.
        message: String,
    },
}

/// Runtime configuration for a batch run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory scanned for `.txt` and `.xml` sources in file mode.
    pub input_dir: PathBuf,
    /// Root directory receiving mirrored output files in file mode.
    pub output_dir: PathBuf,
    /// Database connection and query settings.
    pub database: DatabaseConfig,
    /// Remote model endpoint and retry settings.
    pub model: ModelConfig,
    /// Path of the system instruction template.
    pub prompt_file: PathBuf,
    /// Output schema variant produced by the configured prompt.
    pub schema_variant: SchemaVariant,
    /// Top-level keys every model response must carry.
    pub required_keys: Vec<String>,
    /// Whether triple references are checked against the entity and predicate maps.
    pub validate_references: bool,
    /// Entity types offered to the model, in configuration order.
    pub entity_types: Vec<String>,
    /// Granularity used when the CLI does not override it.
    pub default_granularity: Granularity,
    /// External program called with each persisted output path.
    pub graph_render_command: Option<String>,
    /// Destination of the file log layer.
    pub log_file: PathBuf,
}

/// Settings for the database-backed record source.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// SQLite database file; only required in database mode.
    pub path: Option<PathBuf>,
    /// Query projecting at least `id` and `sourcetext`.
    pub query: String,
    /// Flat output directory for database records.
    pub output_dir: PathBuf,
    /// Optional `(column, language)` pairs copied into the record's original texts.
    pub language_columns: Vec<(String, String)>,
}

/// Settings for the remote model endpoint.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Wire protocol spoken by the endpoint.
    pub provider: ModelProvider,
    /// Base URL of the API host.
    pub base_url: String,
    /// Path appended to the base URL.
    pub endpoint: String,
    /// Model identifier passed to the provider.
    pub model: String,
    /// Optional API key.
    pub api_key: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Total attempts per record, including the first.
    pub max_retries: u32,
    /// Delay before the second attempt; doubled after each further failure.
    pub retry_base_delay: Duration,
    /// Sampling temperature.
    pub temperature: f64,
    /// Output token budget; provider default when unset.
    pub max_output_tokens: Option<u32>,
}

impl ModelConfig {
    /// Joined request URL without trailing slash duplication.
    pub fn full_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.endpoint)
    }
}

/// Supported model wire protocols.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelProvider {
    /// OpenAI-compatible chat completions (OpenWebUI, Ollama, vLLM, ...).
    OpenAI,
    /// Gemini `generateContent` envelope with a separate system instruction.
    Gemini,
}

impl std::str::FromStr for ModelProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            _ => Err(()),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// Blank values are treated as unset so that `.env` templates with empty entries fall back
    /// to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let output_dir = PathBuf::from(get("OUTPUT_DIR").unwrap_or_else(|| "output".into()));
        let schema_variant = match get("SCHEMA_VARIANT") {
            Some(value) => value
                .parse()
                .map_err(|()| ConfigError::InvalidValue("SCHEMA_VARIANT".into()))?,
            None => SchemaVariant::Triples,
        };
        let required_keys = get("REQUIRED_KEYS")
            .map(|value| split_list(&value))
            .unwrap_or_else(|| {
                schema_variant
                    .default_required_keys()
                    .iter()
                    .map(|key| key.to_string())
                    .collect()
            });

        let max_retries: u32 = parse_or("MODEL_MAX_RETRIES", get("MODEL_MAX_RETRIES"), 3)?;
        if max_retries == 0 {
            return Err(ConfigError::InvalidValue("MODEL_MAX_RETRIES".into()));
        }

        let default_granularity = parse_or("DEFAULT_GRANULARITY", get("DEFAULT_GRANULARITY"), 3u8)
            .and_then(|level| {
                Granularity::new(level)
                    .ok_or_else(|| ConfigError::InvalidValue("DEFAULT_GRANULARITY".into()))
            })?;

        let model = ModelConfig {
            provider: match get("MODEL_PROVIDER") {
                Some(value) => value
                    .parse()
                    .map_err(|()| ConfigError::InvalidValue("MODEL_PROVIDER".into()))?,
                None => ModelProvider::OpenAI,
            },
            base_url: get("MODEL_BASE_URL").unwrap_or_else(|| "http://localhost:11434".into()),
            endpoint: get("MODEL_ENDPOINT").unwrap_or_else(|| "/api/chat/completions".into()),
            model: get("MODEL_NAME")
                .ok_or_else(|| ConfigError::MissingVariable("MODEL_NAME".into()))?,
            api_key: get("MODEL_API_KEY"),
            timeout: Duration::from_secs(parse_or(
                "MODEL_TIMEOUT_SECONDS",
                get("MODEL_TIMEOUT_SECONDS"),
                60,
            )?),
            max_retries,
            retry_base_delay: Duration::from_secs(parse_or(
                "MODEL_RETRY_DELAY_SECONDS",
                get("MODEL_RETRY_DELAY_SECONDS"),
                3,
            )?),
            temperature: parse_or("MODEL_TEMPERATURE", get("MODEL_TEMPERATURE"), 0.1)?,
            max_output_tokens: get("MODEL_MAX_OUTPUT_TOKENS")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("MODEL_MAX_OUTPUT_TOKENS".into()))
                })
                .transpose()?,
        };

        let database = DatabaseConfig {
            path: get("DATABASE_PATH").map(PathBuf::from),
            query: get("DATABASE_QUERY").unwrap_or_else(|| DEFAULT_DATABASE_QUERY.into()),
            output_dir: get("DATABASE_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| output_dir.clone()),
            language_columns: get("DATABASE_LANGUAGE_COLUMNS")
                .map(|value| parse_language_columns(&value))
                .transpose()?
                .unwrap_or_default(),
        };

        Ok(Self {
            input_dir: PathBuf::from(get("INPUT_DIR").unwrap_or_else(|| "input".into())),
            output_dir,
            database,
            model,
            prompt_file: PathBuf::from(get("PROMPT_FILE").unwrap_or_else(|| "prompt.txt".into())),
            schema_variant,
            required_keys,
            validate_references: parse_bool(
                "VALIDATE_REFERENCES",
                get("VALIDATE_REFERENCES"),
                true,
            )?,
            entity_types: get("ENTITY_TYPES")
                .map(|value| split_list(&value))
                .unwrap_or_default(),
            default_granularity,
            graph_render_command: get("GRAPH_RENDER_COMMAND"),
            log_file: get("EXTRACT_LOG_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    key: &str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

fn parse_bool(key: &str, value: Option<String>, default: bool) -> Result<bool, ConfigError> {
    match value.as_deref().map(|raw| raw.trim().to_lowercase()) {
        None => Ok(default),
        Some(raw) => match raw.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue(key.to_string())),
        },
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_language_columns(value: &str) -> Result<Vec<(String, String)>, ConfigError> {
    split_list(value)
        .into_iter()
        .map(|pair| {
            let (column, language) = pair
                .split_once('=')
                .ok_or_else(|| ConfigError::InvalidValue("DATABASE_LANGUAGE_COLUMNS".into()))?;
            let (column, language) = (column.trim(), language.trim());
            if column.is_empty() || language.is_empty() {
                return Err(ConfigError::InvalidValue("DATABASE_LANGUAGE_COLUMNS".into()));
            }
            Ok((column.to_string(), language.to_string()))
        })
        .collect()
}

/// Load an optional `.env` file, then read the configuration from the environment.
pub fn load(env_file: Option<&Path>) -> Result<Config, ConfigError> {
    match env_file {
        Some(path) => {
            dotenvy::from_path(path).map_err(|error| ConfigError::EnvFile {
                path: path.to_path_buf(),
                message: error.to_string(),
            })?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }
    Config::from_env()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_model_name_is_set() {
        let config = Config::from_lookup(lookup(&[("MODEL_NAME", "llama3")])).unwrap();
        assert_eq!(config.model.provider, ModelProvider::OpenAI);
        assert_eq!(config.model.max_retries, 3);
        assert_eq!(config.model.retry_base_delay, Duration::from_secs(3));
        assert_eq!(config.required_keys, vec!["entities", "praedikate", "triples"]);
        assert_eq!(config.default_granularity.level(), 3);
        assert!(config.validate_references);
        assert_eq!(config.database.output_dir, PathBuf::from("output"));
    }

    #[test]
    fn missing_model_name_is_reported() {
        let error = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(error, ConfigError::MissingVariable(key) if key == "MODEL_NAME"));
    }

    #[test]
    fn concepts_variant_changes_default_required_keys() {
        let config = Config::from_lookup(lookup(&[
            ("MODEL_NAME", "m"),
            ("SCHEMA_VARIANT", "concepts"),
        ]))
        .unwrap();
        assert_eq!(config.required_keys, vec!["konzepte", "vergleich"]);
    }

    #[test]
    fn explicit_required_keys_override_variant() {
        let config = Config::from_lookup(lookup(&[
            ("MODEL_NAME", "m"),
            ("REQUIRED_KEYS", " a, b ,,c "),
        ]))
        .unwrap();
        assert_eq!(config.required_keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn rejects_out_of_range_granularity_and_zero_retries() {
        let granularity = Config::from_lookup(lookup(&[
            ("MODEL_NAME", "m"),
            ("DEFAULT_GRANULARITY", "7"),
        ]))
        .unwrap_err();
        assert!(matches!(
            granularity,
            ConfigError::InvalidValue(key) if key == "DEFAULT_GRANULARITY"
        ));

        let retries = Config::from_lookup(lookup(&[
            ("MODEL_NAME", "m"),
            ("MODEL_MAX_RETRIES", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(retries, ConfigError::InvalidValue(key) if key == "MODEL_MAX_RETRIES"));
    }

    #[test]
    fn parses_language_columns() {
        let config = Config::from_lookup(lookup(&[
            ("MODEL_NAME", "m"),
            ("DATABASE_LANGUAGE_COLUMNS", "field1=de, field2=en"),
        ]))
        .unwrap();
        assert_eq!(
            config.database.language_columns,
            vec![
                ("field1".to_string(), "de".to_string()),
                ("field2".to_string(), "en".to_string())
            ]
        );

        let error = Config::from_lookup(lookup(&[
            ("MODEL_NAME", "m"),
            ("DATABASE_LANGUAGE_COLUMNS", "field1"),
        ]))
        .unwrap_err();
        assert!(matches!(error, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn unreadable_env_file_keeps_the_cause() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("fehlt.env");
        let error = load(Some(missing.as_path())).unwrap_err();
        match &error {
            ConfigError::EnvFile { path, message } => {
                assert_eq!(path, &missing);
                assert!(!message.is_empty());
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(error.to_string().contains("fehlt.env"));
    }

    #[test]
    fn full_url_trims_trailing_slash() {
        let config = Config::from_lookup(lookup(&[
            ("MODEL_NAME", "m"),
            ("MODEL_BASE_URL", "http://host:3000/"),
            ("MODEL_PROVIDER", "Gemini"),
        ]))
        .unwrap();
        assert_eq!(config.model.full_url(), "http://host:3000/api/chat/completions");
        assert_eq!(config.model.provider, ModelProvider::Gemini);
    }
}
