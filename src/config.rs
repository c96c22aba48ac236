use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OliviaConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub memory: MemoryConfig,
    pub generation: GenerationConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    /// Origins allowed to open a socket. A handshake without an `Origin` header is
    /// always admitted.
    pub allowed_origins: Vec<String>,
    pub socket_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub cookie_name: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub cache_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MemoryConfig {
    pub max_fragments: usize,
    pub min_conversation_id_len: usize,
    pub preamble: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GenerationConfig {
    pub provider: String,
    pub model: String,
    pub api_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub system_instruction: String,
}

impl Default for OliviaConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            memory: MemoryConfig::default(),
            generation: GenerationConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            log_level: "info".into(),
            allowed_origins: vec!["http://localhost:5173".into()],
            socket_path: "/socket".into(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            cookie_name: "token".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_olivia_dir()
            .join("olivia.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = default_olivia_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            provider: "local".into(),
            model: crate::embedding::local::MODEL_NAME.into(),
            cache_dir,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_fragments: 5,
            min_conversation_id_len: 20,
            preamble: "Relevant past messages:".into(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".into(),
            model: "gemini-2.0-flash".into(),
            api_key: String::new(),
            base_url: "https://generativelanguage.googleapis.com/v1beta/models".into(),
            timeout_secs: 30,
            system_instruction: "You are Olivia, a warm and concise assistant. \
                                 Use the relevant past messages only when they help answer."
                .into(),
        }
    }
}

/// Returns `~/.olivia/`
pub fn default_olivia_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".olivia")
}

/// Returns the default config file path: `~/.olivia/config.toml`
pub fn default_config_path() -> PathBuf {
    default_olivia_dir().join("config.toml")
}

impl OliviaConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            OliviaConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// `FRONTEND_URLS` is a comma-separated list and replaces the configured
    /// origin allow-list entirely.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("OLIVIA_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("OLIVIA_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("PORT") {
            match val.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!(value = %val, "ignoring unparseable PORT"),
            }
        }
        if let Ok(val) = std::env::var("JWT_SECRET") {
            self.auth.jwt_secret = val;
        }
        if let Ok(val) = std::env::var("FRONTEND_URLS") {
            self.server.allowed_origins = split_origins(&val);
        }
        if let Ok(val) = std::env::var("GEMINI_API_KEY") {
            self.generation.api_key = val;
        }
    }

    /// Reject configurations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.auth.jwt_secret.is_empty(),
            "auth.jwt_secret is empty; set it in config.toml or JWT_SECRET"
        );
        anyhow::ensure!(
            self.server.allowed_origins.iter().all(|o| !o.trim().is_empty()),
            "server.allowed_origins contains an empty entry"
        );
        anyhow::ensure!(
            self.memory.max_fragments > 0,
            "memory.max_fragments must be at least 1"
        );
        if self.embedding.provider == "local" {
            anyhow::ensure!(
                self.embedding.model == crate::embedding::local::MODEL_NAME,
                "embedding.model {:?} is not supported by the local provider; use {:?}",
                self.embedding.model,
                crate::embedding::local::MODEL_NAME
            );
        }
        anyhow::ensure!(
            self.generation.timeout_secs > 0,
            "generation.timeout_secs must be at least 1"
        );
        Ok(())
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
