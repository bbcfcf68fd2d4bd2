//! Domain-level error types for prompt-gallery.
//!
//! All errors are typed with `thiserror`. The first four variants form the
//! store taxonomy that both the server and the reconciling client reason
//! about; the rest are local plumbing failures.

use thiserror::Error;

/// Application-level errors with HTTP status mapping.
#[derive(Error, Debug)]
pub enum AppError {
    /// A required field is missing or malformed. Client-correctable.
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// The referenced image id does not exist.
    #[error("Image not found: {id}")]
    NotFound { id: String },

    /// The store could not be reached or answered unexpectedly.
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A bulk reorder was applied to some rows but not to others.
    #[error("Partial reorder: {} applied, {} missing", .applied.len(), .missing.len())]
    PartialReorder {
        applied: Vec<String>,
        missing: Vec<String>,
    },

    /// Failed to open or query the database.
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// JSON parsing failed.
    #[error("JSON parse error: {message}")]
    JsonParse {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    /// The external image generator failed.
    #[error("Generation error: {message}")]
    Generation { message: String },

    /// Configuration or environment error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// IO operation failed.
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },
}

impl AppError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a not-found error for an id.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Create a transport error from any underlying failure.
    pub fn transport(
        message: impl Into<String>,
        err: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(Box::new(err)),
        }
    }

    /// Create a database error from rusqlite error.
    pub fn database(err: rusqlite::Error) -> Self {
        Self::Database {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    /// Create a JSON parse error.
    pub fn json_parse(err: serde_json::Error) -> Self {
        Self::JsonParse {
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// Create an IO error with context.
    pub fn io(message: impl Into<String>, err: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source: Some(err),
        }
    }

    /// Short machine-readable name used in HTTP error bodies.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Transport { .. } => "transport",
            Self::PartialReorder { .. } => "partial_reorder",
            Self::Database { .. } => "database",
            Self::JsonParse { .. } => "json",
            Self::Generation { .. } => "generation",
            Self::Config { .. } => "config",
            Self::Io { .. } => "io",
        }
    }

    /// HTTP status code this error is surfaced with.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } | Self::JsonParse { .. } => 400,
            Self::NotFound { .. } => 404,
            Self::PartialReorder { .. } => 409,
            _ => 500,
        }
    }
}

/// Result type alias using `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::validation("prompt is required").status_code(), 400);
        assert_eq!(AppError::not_found("abc").status_code(), 404);
        assert_eq!(
            AppError::PartialReorder {
                applied: vec!["a".into()],
                missing: vec!["b".into()],
            }
            .status_code(),
            409
        );
        assert_eq!(
            AppError::Config {
                message: "x".into()
            }
            .status_code(),
            500
        );
    }

    #[test]
    fn test_partial_reorder_message() {
        let err = AppError::PartialReorder {
            applied: vec!["a".into(), "b".into()],
            missing: vec!["c".into()],
        };
        assert_eq!(err.to_string(), "Partial reorder: 2 applied, 1 missing");
        assert_eq!(err.kind(), "partial_reorder");
    }
}
