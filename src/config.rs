//! Application settings.
//!
//! Sources, lowest priority first: built-in defaults, an optional
//! `copilot.toml` in the working directory, then `COPILOT__*` environment
//! variables (e.g. `COPILOT__RAG__CHUNK_SIZE=800`). `OPENAI_API_KEY` is used
//! when no completion key is configured.

use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rag::embeddings::DEFAULT_MODEL_DIR;
use crate::rag::pipeline::{RagConfig, DEFAULT_CHUNK_SIZE, DEFAULT_TOP_K};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub completion: CompletionSettings,
    #[serde(default)]
    pub embedding: EmbeddingSettings,
    #[serde(default)]
    pub rag: RagSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Idle sessions are dropped after this many seconds; 0 keeps them forever
    pub session_ttl_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            session_ttl_secs: 3600,
        }
    }
}

impl ServerSettings {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn session_ttl(&self) -> Option<Duration> {
        (self.session_ttl_secs > 0).then(|| Duration::from_secs(self.session_ttl_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionSettings {
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// HTTP timeout for a single completion request
    pub timeout_secs: u64,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4".to_string(),
            api_key: None,
            temperature: None,
            max_tokens: None,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub model_dir: String,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model_dir: DEFAULT_MODEL_DIR.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagSettings {
    pub chunk_size: usize,
    pub top_k: usize,
    pub embed_timeout_secs: Option<u64>,
    pub completion_timeout_secs: Option<u64>,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            top_k: DEFAULT_TOP_K,
            embed_timeout_secs: None,
            completion_timeout_secs: None,
        }
    }
}

impl RagSettings {
    pub fn to_config(&self) -> RagConfig {
        RagConfig {
            chunk_size: self.chunk_size,
            top_k: self.top_k,
            embed_timeout: self.embed_timeout_secs.map(Duration::from_secs),
            completion_timeout: self.completion_timeout_secs.map(Duration::from_secs),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("copilot").required(false))
            .add_source(
                Environment::with_prefix("COPILOT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut settings: Settings = config.try_deserialize()?;
        if settings.completion.api_key.is_none() {
            settings.completion.api_key = std::env::var("OPENAI_API_KEY").ok();
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rag.chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "rag.chunk_size".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.rag.top_k == 0 {
            return Err(ConfigError::InvalidValue {
                field: "rag.top_k".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.completion.api_key.is_none() {
            tracing::warn!("No completion API key configured; set OPENAI_API_KEY");
        }
        Ok(())
    }
}
