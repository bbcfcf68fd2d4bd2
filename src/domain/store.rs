//! The ordering store seam.

use async_trait::async_trait;

use super::error::Result;
use super::models::{ImageRecord, NewImage, Scope};

/// Durable, order-preserving image storage.
///
/// Implemented by the local `SQLite` store and by the HTTP client that talks
/// to a running server, so the reconciling client works over either.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// All records in `scope`, ascending by `order_index`.
    async fn list(&self, scope: Scope) -> Result<Vec<ImageRecord>>;

    /// Insert a record at the end of the global order.
    async fn create(&self, image: NewImage) -> Result<ImageRecord>;

    /// Assign `order_index = position` to each id.
    async fn reorder(&self, ids: &[String]) -> Result<()>;

    /// Set the gallery flag on one record.
    async fn set_gallery_flag(&self, id: &str, flag: bool) -> Result<ImageRecord>;

    /// Permanently remove one record.
    async fn delete(&self, id: &str) -> Result<()>;
}
