//! Domain layer - core types and ordering rules.
//!
//! This layer contains pure domain models and error types
//! without any external dependencies (DB, IO, etc.).

pub mod config;
pub mod error;
pub mod models;
pub mod ordering;
pub mod store;

pub use config::{AppConfig, ClientConfig, GeneratorConfig, ServerConfig, StoreConfig};
pub use error::{AppError, Result};
pub use models::{ImageRecord, NewImage, Scope};
pub use store::ImageStore;
