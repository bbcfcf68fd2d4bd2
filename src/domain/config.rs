//! Application configuration model.
//!
//! Every field carries a serde default so a partial `config.toml`
//! still parses.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Environment variable that overrides the database location.
pub const DB_PATH_ENV: &str = "PROMPT_GALLERY_DB";

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum accepted JSON body size. Inline data URLs are large.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl ServerConfig {
    /// Socket address string the server binds to.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    3080
}

const fn default_max_body_bytes() -> u64 {
    16 * 1024 * 1024
}

/// Configuration for the HTTP store client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of a running server.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_client_timeout")]
    pub timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_client_timeout(),
        }
    }
}

fn default_base_url() -> String {
    format!("http://{}:{}", default_host(), default_port())
}

const fn default_client_timeout() -> u64 {
    15
}

impl ClientConfig {
    /// Request timeout as a `Duration`.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Configuration for the ordering store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Apply bulk reorders inside one transaction.
    #[serde(default = "default_atomic_reorder")]
    pub atomic_reorder: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            atomic_reorder: default_atomic_reorder(),
        }
    }
}

const fn default_atomic_reorder() -> bool {
    true
}

/// Configuration for the external image generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Base URL of the generation API.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Model used when a request names none.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Name of the env var holding the API token.
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Overall deadline for one generation, in seconds.
    #[serde(default = "default_generator_timeout")]
    pub timeout_secs: u64,

    /// Extra model inputs merged over the built-in ones. `prompt` is
    /// always taken from the request.
    #[serde(default)]
    pub input: Map<String, Value>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            default_model: default_model(),
            token_env: default_token_env(),
            timeout_secs: default_generator_timeout(),
            input: Map::new(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.replicate.com/v1".to_string()
}

fn default_model() -> String {
    "black-forest-labs/flux-schnell".to_string()
}

fn default_token_env() -> String {
    "REPLICATE_API_TOKEN".to_string()
}

const fn default_generator_timeout() -> u64 {
    120
}

impl GeneratorConfig {
    /// Generation deadline as a `Duration`.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Path configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathConfig {
    /// Base data directory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

/// Complete application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub generator: GeneratorConfig,

    #[serde(default)]
    pub paths: PathConfig,
}

impl AppConfig {
    /// Get the data directory, using default if not configured.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.paths
            .data_dir
            .clone()
            .unwrap_or_else(Self::default_data_dir)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".prompt-gallery")
    }

    /// Get the image database path. `PROMPT_GALLERY_DB` wins if set.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        std::env::var_os(DB_PATH_ENV)
            .map_or_else(|| self.data_dir().join("images.db"), PathBuf::from)
    }

    /// Get the config file path.
    #[must_use]
    pub fn config_file_path(&self) -> PathBuf {
        self.data_dir().join("config.toml")
    }
}
