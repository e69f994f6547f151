//! Runtime configuration.
//!
//! Stored as JSON under the user's config directory. A missing file means
//! defaults; secrets may also come from the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::DEFAULT_SNIPPET_LENGTH;
use crate::search::{DEFAULT_MIN_SIMILARITY, DEFAULT_TOP_K};
use crate::{Error, Result};

/// Application directory name under the platform config/data dirs.
pub const APP_DIR: &str = "inboxsync";

/// Default search debounce interval in milliseconds.
pub const DEFAULT_QUIET_INTERVAL_MS: u64 = 300;

const ENV_VECTOR_URL: &str = "UPSTASH_VECTOR_REST_URL";
const ENV_VECTOR_TOKEN: &str = "UPSTASH_VECTOR_REST_TOKEN";
const ENV_PROVIDER_URL: &str = "INBOXSYNC_PROVIDER_URL";
const ENV_PROVIDER_TOKEN: &str = "INBOXSYNC_PROVIDER_TOKEN";

/// Mail gateway endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the gateway.
    pub base_url: String,
    /// Bearer token.
    pub token: Option<String>,
}

/// Vector index endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    /// REST URL of the index.
    pub url: String,
    /// Bearer token.
    pub token: Option<String>,
}

/// Embedding endpoint (OpenAI-compatible).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Base URL.
    pub url: String,
    /// Model name.
    pub model: String,
    /// API key.
    pub api_key: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: "https://api.openai.com".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key: None,
        }
    }
}

/// Compose enhancement endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhancerConfig {
    /// Base URL; empty means the provider's gateway.
    pub url: String,
}

/// Subsystem configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Search debounce quiet interval in milliseconds (0 disables debouncing).
    pub quiet_interval_ms: u64,
    /// Neighbors requested per semantic search.
    pub semantic_top_k: usize,
    /// Minimum similarity of a semantic hit (inclusive).
    pub min_similarity: f32,
    /// Length of derived snippets in characters.
    pub snippet_length: usize,
    /// Sender of locally created sent emails.
    pub sender_address: String,
    /// Snapshot database; `None` uses the default data directory.
    pub database_path: Option<PathBuf>,
    /// Mail gateway.
    pub provider: ProviderConfig,
    /// Vector index.
    pub vector: VectorConfig,
    /// Embeddings.
    pub embedding: EmbeddingConfig,
    /// Compose enhancement.
    pub enhancer: EnhancerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            quiet_interval_ms: DEFAULT_QUIET_INTERVAL_MS,
            semantic_top_k: DEFAULT_TOP_K,
            min_similarity: DEFAULT_MIN_SIMILARITY,
            snippet_length: DEFAULT_SNIPPET_LENGTH,
            sender_address: String::new(),
            database_path: None,
            provider: ProviderConfig::default(),
            vector: VectorConfig::default(),
            embedding: EmbeddingConfig::default(),
            enhancer: EnhancerConfig::default(),
        }
    }
}

impl Config {
    /// Default location of the config file.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.json")
    }

    /// Loads the config at `path`, falling back to defaults if it does not
    /// exist, then applies environment overrides and validates.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if a value
    /// is out of range.
    pub async fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = tokio::fs::read_to_string(path).await?;
            Self::from_json(&contents)?
        } else {
            tracing::debug!("No config at {:?}, using defaults", path);
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Writes the config to `path` as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, contents).await?;
        tracing::info!("Config saved to {:?}", path);
        Ok(())
    }

    /// Parses a config; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serde`] for malformed JSON.
    pub fn from_json(contents: &str) -> Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Overrides endpoints and secrets from variables looked up by `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var(ENV_VECTOR_URL) {
            self.vector.url = url;
        }
        if let Some(token) = var(ENV_VECTOR_TOKEN) {
            self.vector.token = Some(token);
        }
        if let Some(url) = var(ENV_PROVIDER_URL) {
            self.provider.base_url = url;
        }
        if let Some(token) = var(ENV_PROVIDER_TOKEN) {
            self.provider.token = Some(token);
        }
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.semantic_top_k == 0 {
            return Err(Error::Config("semantic_top_k must be at least 1".to_string()));
        }
        if self.snippet_length == 0 {
            return Err(Error::Config("snippet_length must be at least 1".to_string()));
        }
        if !(-1.0..=1.0).contains(&self.min_similarity) {
            return Err(Error::Config(format!(
                "min_similarity must be within [-1, 1], got {}",
                self.min_similarity
            )));
        }
        Ok(())
    }

    /// The debounce quiet interval.
    #[must_use]
    pub const fn quiet_interval(&self) -> Duration {
        Duration::from_millis(self.quiet_interval_ms)
    }

    /// Snapshot database path, defaulting to the user's data directory.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.database_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR)
                .join("inboxsync.db")
        })
    }

    /// Enhancer base URL, defaulting to the gateway.
    #[must_use]
    pub fn enhancer_url(&self) -> &str {
        if self.enhancer.url.is_empty() {
            &self.provider.base_url
        } else {
            &self.enhancer.url
        }
    }
}
