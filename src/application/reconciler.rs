//! Optimistic client-side mirror of the ordering store.
//!
//! Every user mutation is applied to the local list first, then confirmed
//! against the store. A failed reorder discards the local list and reloads
//! the store's order; a failed delete or flag toggle restores the snapshot
//! taken before the mutation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::ordering::{ensure_unique_ids, ids_of, move_item};
use crate::domain::{AppError, ImageRecord, ImageStore, NewImage, Result, Scope};

/// A user gesture against the local list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Replace the list with this arrangement.
    Reorder(Vec<ImageRecord>),
    /// Drag the item at `from` to `to`.
    Move { from: usize, to: usize },
    /// Remove one record.
    Delete(String),
    /// Set the gallery flag on one record.
    ToggleGallery { id: String, flag: bool },
}

/// Store mutation that confirms an applied action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    None,
    Reorder(Vec<String>),
    Delete(String),
    SetGalleryFlag { id: String, flag: bool },
}

/// Owned snapshot of the client's view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GalleryState {
    scope: Scope,
    images: Vec<ImageRecord>,
    last_error: Option<String>,
}

impl GalleryState {
    /// Empty state for a scope.
    #[must_use]
    pub const fn new(scope: Scope) -> Self {
        Self {
            scope,
            images: Vec::new(),
            last_error: None,
        }
    }

    /// State holding a freshly fetched list.
    #[must_use]
    pub const fn loaded(scope: Scope, images: Vec<ImageRecord>) -> Self {
        Self {
            scope,
            images,
            last_error: None,
        }
    }

    #[must_use]
    pub const fn scope(&self) -> Scope {
        self.scope
    }

    #[must_use]
    pub fn images(&self) -> &[ImageRecord] {
        &self.images
    }

    /// Message of the last failed confirmation, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// The one shown image whose id starts with `prefix`.
    ///
    /// # Errors
    /// Returns `NotFound` if nothing matches and `Validation` if the prefix
    /// is empty or ambiguous.
    pub fn find(&self, prefix: &str) -> Result<&ImageRecord> {
        if prefix.is_empty() {
            return Err(AppError::validation("Image ID is required"));
        }
        let mut matches = self.images.iter().filter(|image| image.id.starts_with(prefix));
        match (matches.next(), matches.next()) {
            (Some(image), None) => Ok(image),
            (None, _) => Err(AppError::not_found(prefix)),
            (Some(_), Some(_)) => Err(AppError::validation(format!(
                "Image ID prefix '{prefix}' is ambiguous"
            ))),
        }
    }

    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }

    /// Apply an action locally and name the store mutation that confirms it.
    ///
    /// # Errors
    /// Returns `Validation` if a reorder is not a permutation of the current
    /// list or a move position is out of range, and `NotFound` when toggling
    /// an image that is not shown.
    pub fn apply(&self, action: Action) -> Result<(Self, Effect)> {
        let mut next = self.clone();
        next.last_error = None;

        let effect = match action {
            Action::Reorder(images) => {
                self.check_permutation(&images)?;
                next.images = images;
                next.renumber();
                Effect::Reorder(ids_of(&next.images))
            }
            Action::Move { from, to } => {
                move_item(&mut next.images, from, to)?;
                next.renumber();
                Effect::Reorder(ids_of(&next.images))
            }
            Action::Delete(id) => {
                next.images.retain(|image| image.id != id);
                Effect::Delete(id)
            }
            Action::ToggleGallery { id, flag } => {
                let Some(image) = next.images.iter_mut().find(|image| image.id == id) else {
                    return Err(AppError::not_found(&id));
                };
                if image.is_gallery == flag {
                    return Ok((next, Effect::None));
                }
                image.is_gallery = flag;
                let scope = next.scope;
                next.images.retain(|image| image.in_scope(scope));
                Effect::SetGalleryFlag { id, flag }
            }
        };

        Ok((next, effect))
    }

    /// Mirror what the store does on reorder: positions become indexes.
    fn renumber(&mut self) {
        for (image, position) in self.images.iter_mut().zip(0_i64..) {
            image.order_index = position;
        }
    }

    fn check_permutation(&self, images: &[ImageRecord]) -> Result<()> {
        let ids = ids_of(images);
        ensure_unique_ids(&ids)?;

        let mut proposed = ids;
        let mut current = ids_of(&self.images);
        proposed.sort_unstable();
        current.sort_unstable();
        if proposed != current {
            return Err(AppError::validation(
                "Reorder must contain exactly the images currently shown",
            ));
        }
        Ok(())
    }

    /// Replace a record with the store's copy, dropping it if it left scope.
    fn merge_confirmed(&mut self, record: ImageRecord) {
        let scope = self.scope;
        if let Some(slot) = self.images.iter_mut().find(|image| image.id == record.id) {
            *slot = record;
        }
        self.images.retain(|image| image.in_scope(scope));
    }
}

/// Drives `GalleryState` against an `ImageStore`.
pub struct Reconciler {
    store: Arc<dyn ImageStore>,
    state: GalleryState,
    timeout: Duration,
}

impl Reconciler {
    /// Create a reconciler with an empty view of `scope`.
    #[must_use]
    pub fn new(store: Arc<dyn ImageStore>, scope: Scope, timeout: Duration) -> Self {
        Self {
            store,
            state: GalleryState::new(scope),
            timeout,
        }
    }

    #[must_use]
    pub const fn state(&self) -> &GalleryState {
        &self.state
    }

    #[must_use]
    pub fn images(&self) -> &[ImageRecord] {
        self.state.images()
    }

    /// Fetch `scope` from the store and replace local state wholesale.
    ///
    /// # Errors
    /// Returns the store error; local state is left untouched.
    pub async fn load(&mut self, scope: Scope) -> Result<()> {
        let images = self.with_timeout(self.store.list(scope)).await?;
        tracing::debug!(scope = %scope, count = images.len(), "Gallery loaded");
        self.state = GalleryState::loaded(scope, images);
        Ok(())
    }

    /// Show `new_order` immediately, then persist it.
    ///
    /// # Errors
    /// Returns `Validation` without touching anything if `new_order` is not
    /// a permutation of the current list; otherwise returns the store error
    /// after reloading.
    pub async fn apply_reorder(&mut self, new_order: Vec<ImageRecord>) -> Result<()> {
        self.dispatch(Action::Reorder(new_order)).await
    }

    /// Drag the image at `from` to `to` (0-based), then persist.
    ///
    /// # Errors
    /// Same as [`Self::apply_reorder`].
    pub async fn move_image(&mut self, from: usize, to: usize) -> Result<()> {
        self.dispatch(Action::Move { from, to }).await
    }

    /// Remove an image locally, then delete it from the store.
    ///
    /// # Errors
    /// Returns the store error after restoring the image locally. A
    /// `NotFound` answer counts as success.
    pub async fn apply_delete(&mut self, id: &str) -> Result<()> {
        self.dispatch(Action::Delete(id.to_string())).await
    }

    /// Flip the gallery flag locally, then persist it.
    ///
    /// # Errors
    /// Returns the store error after restoring the previous flag.
    pub async fn apply_gallery_toggle(&mut self, id: &str, flag: bool) -> Result<()> {
        self.dispatch(Action::ToggleGallery {
            id: id.to_string(),
            flag,
        })
        .await
    }

    /// Create a record and append it to the view if it belongs there.
    ///
    /// # Errors
    /// Returns the store error; local state is left untouched.
    pub async fn save(&mut self, image: NewImage) -> Result<ImageRecord> {
        image.validate()?;
        let record = self.with_timeout(self.store.create(image)).await?;
        if record.in_scope(self.state.scope) {
            self.state.images.push(record.clone());
        }
        Ok(record)
    }

    async fn dispatch(&mut self, action: Action) -> Result<()> {
        let snapshot = self.state.clone();
        let (optimistic, effect) = self.state.apply(action)?;
        self.state = optimistic;

        match effect {
            Effect::None => Ok(()),
            Effect::Reorder(ids) => {
                let result = self.with_timeout(self.store.reorder(&ids)).await;
                match result {
                    Ok(()) => Ok(()),
                    Err(err) => Err(self.reload_after(err).await),
                }
            }
            Effect::Delete(id) => {
                let result = self.with_timeout(self.store.delete(&id)).await;
                match result {
                    Ok(()) => Ok(()),
                    Err(AppError::NotFound { .. }) => {
                        tracing::debug!(id = %id, "Image already gone");
                        Ok(())
                    }
                    Err(err) => Err(self.roll_back(snapshot, err)),
                }
            }
            Effect::SetGalleryFlag { id, flag } => {
                let result = self
                    .with_timeout(self.store.set_gallery_flag(&id, flag))
                    .await;
                match result {
                    Ok(record) => {
                        self.state.merge_confirmed(record);
                        Ok(())
                    }
                    Err(err) => Err(self.roll_back(snapshot, err)),
                }
            }
        }
    }

    /// Discard optimistic order and resynchronize from the store.
    async fn reload_after(&mut self, err: AppError) -> AppError {
        tracing::warn!(error = %err, "Reorder failed, reloading");
        let scope = self.state.scope;

        match self.load(scope).await {
            Ok(()) => {
                self.state.last_error = Some(err.to_string());
            }
            Err(reload_err) => {
                tracing::warn!(error = %reload_err, "Reload after failed reorder also failed");
                self.state.last_error = Some(format!("{err}; reload failed: {reload_err}"));
            }
        }
        err
    }

    fn roll_back(&mut self, snapshot: GalleryState, err: AppError) -> AppError {
        tracing::warn!(error = %err, "Store rejected mutation, rolling back");
        self.state = snapshot.with_error(err.to_string());
        err
    }

    async fn with_timeout<T>(&self, fut: impl Future<Output = Result<T>> + Send) -> Result<T> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|e| AppError::transport("Store request timed out", e))?
    }
}
