//! Configuration file management.
//!
//! Handles loading and saving TOML configuration files.

use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::{AppConfig, AppError, Result};

/// Default configuration file content.
const DEFAULT_CONFIG: &str = r#"# Prompt Gallery Configuration
# Auto-generated - edit as needed

[server]
host = "127.0.0.1"
port = 3080
# Inline data URLs make request bodies large
max_body_bytes = 16777216

[client]
# Server used by CLI commands unless --local is given
base_url = "http://127.0.0.1:3080"
timeout_secs = 15

[store]
# Apply drag reorders in a single transaction (false = per-row updates)
atomic_reorder = true

[generator]
api_base = "https://api.replicate.com/v1"
default_model = "black-forest-labs/flux-schnell"
token_env = "REPLICATE_API_TOKEN"
timeout_secs = 120

# Extra model inputs, merged over the built-in ones (num_outputs = 1,
# aspect_ratio = "1:1", output_format = "webp", output_quality = 80).
# Example for a pinned LoRA model:
#   default_model = "benwestdev/test-jess-img:3a00387e871f62dbb58f7cd19cddc5656ac338b19d0926d8943105f05405f468"
[generator.input]
# model = "dev"
# go_fast = false
# lora_scale = 1
# megapixels = "1"
# guidance_scale = 3
# prompt_strength = 0.8
# extra_lora_scale = 1
# num_inference_steps = 28
# disable_safety_checker = true

[paths]
# Custom data directory (optional, defaults to ~/.prompt-gallery)
# data_dir = "/custom/path"
"#;

/// Load configuration from `path`, or from the default location.
///
/// A missing default file yields the default configuration; a missing
/// explicit file is an error.
///
/// # Errors
/// Returns error if file exists but cannot be read or parsed.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = path {
        return load_config_from_file(path);
    }

    let config_path = config_file_path();
    if config_path.exists() {
        load_config_from_file(&config_path)
    } else {
        Ok(AppConfig::default())
    }
}

/// Load configuration from a specific file.
///
/// # Errors
/// Returns error if file cannot be read or parsed.
pub fn load_config_from_file(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .map_err(|e| AppError::io(format!("Failed to read config file: {}", path.display()), e))?;

    let config = toml::from_str(&content).map_err(|e| AppError::Config {
        message: format!("Failed to parse config file: {e}"),
    })?;

    tracing::debug!(path = %path.display(), "Configuration loaded");
    Ok(config)
}

/// Render configuration as TOML.
///
/// # Errors
/// Returns error if serialization fails.
pub fn render_config(config: &AppConfig) -> Result<String> {
    toml::to_string_pretty(config).map_err(|e| AppError::Config {
        message: format!("Failed to serialize config: {e}"),
    })
}

/// Create the default configuration file at `path` if it doesn't exist.
///
/// Returns whether a file was written.
///
/// # Errors
/// Returns error if file cannot be created.
pub fn ensure_config_exists(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AppError::io("Failed to create config directory", e))?;
    }

    fs::write(path, DEFAULT_CONFIG)
        .map_err(|e| AppError::io("Failed to create default config", e))?;

    tracing::info!(path = %path.display(), "Created default configuration");
    Ok(true)
}

/// Get the path to the default configuration file.
#[must_use]
pub fn config_file_path() -> PathBuf {
    AppConfig::default_data_dir().join("config.toml")
}
