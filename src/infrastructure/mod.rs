//! Infrastructure layer - external adapters (database, HTTP, config files).
//!
//! This layer handles all I/O operations and external dependencies.

pub mod config;
pub mod generator;
pub mod http_store;
pub mod image_store;
pub mod server;

pub use config::{config_file_path, ensure_config_exists, load_config, render_config};
pub use generator::{ImageGenerator, ReplicateGenerator};
pub use http_store::HttpImageStore;
pub use image_store::SqliteImageStore;
pub use server::{serve, AppState};
