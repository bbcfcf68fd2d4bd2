//! Domain models for saved images.
//!
//! These models mirror the rows of the `images` table and the JSON shapes
//! exchanged over the `/images` API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{AppError, Result};

/// One saved generated image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Store-assigned identifier, immutable.
    pub id: String,
    /// Remote URL or inline `data:` URL.
    pub image_url: String,
    /// Prompt the image was generated from.
    pub prompt: String,
    /// Position among records; global across scopes.
    pub order_index: i64,
    /// Whether the record is shown in the gallery view.
    #[serde(default)]
    pub is_gallery: bool,
    /// Creation time, only used to break `order_index` ties.
    pub created_at: DateTime<Utc>,
}

impl ImageRecord {
    /// Whether this record is visible under `scope`.
    #[must_use]
    pub const fn in_scope(&self, scope: Scope) -> bool {
        match scope {
            Scope::All => true,
            Scope::GalleryOnly => self.is_gallery,
        }
    }
}

/// Visibility scope for listing records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Every record.
    #[default]
    All,
    /// Only records with `is_gallery = true`.
    GalleryOnly,
}

impl Scope {
    /// Build a scope from the `gallery` query flag.
    #[must_use]
    pub const fn from_gallery_flag(gallery_only: bool) -> Self {
        if gallery_only {
            Self::GalleryOnly
        } else {
            Self::All
        }
    }

    /// Whether this scope filters on the gallery flag.
    #[must_use]
    pub const fn is_gallery_only(self) -> bool {
        matches!(self, Self::GalleryOnly)
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::GalleryOnly => write!(f, "gallery-only"),
        }
    }
}

/// Payload for creating a record (`POST /images`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewImage {
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub is_gallery: bool,
}

impl NewImage {
    /// Create a non-gallery payload.
    pub fn new(image_url: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            image_url: image_url.into(),
            prompt: prompt.into(),
            is_gallery: false,
        }
    }

    /// Mark the payload for the gallery.
    #[must_use]
    pub const fn in_gallery(mut self, is_gallery: bool) -> Self {
        self.is_gallery = is_gallery;
        self
    }

    /// Reject empty url or prompt.
    ///
    /// # Errors
    /// Returns `Validation` if either field is blank.
    pub fn validate(&self) -> Result<()> {
        if self.image_url.trim().is_empty() || self.prompt.trim().is_empty() {
            return Err(AppError::validation("Image URL and prompt are required"));
        }
        Ok(())
    }
}
