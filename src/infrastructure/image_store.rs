//! `SQLite`-backed ordering store.
//!
//! Holds the `images` table and serves records in the caller-controlled
//! order. All statements run on a blocking thread behind one connection
//! guarded by a mutex.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::ordering::{ensure_unique_ids, next_order_index};
use crate::domain::{AppError, ImageRecord, ImageStore, NewImage, Result, Scope, StoreConfig};

const SELECT_COLUMNS: &str =
    "SELECT id, image_url, prompt, order_index, is_gallery, created_at FROM images";

const ORDER_CLAUSE: &str = "ORDER BY order_index ASC, created_at ASC, id ASC";

/// Image store repository using `SQLite`.
#[derive(Clone)]
pub struct SqliteImageStore {
    conn: Arc<Mutex<Connection>>,
    atomic_reorder: bool,
}

impl SqliteImageStore {
    /// Opens or creates the image database.
    ///
    /// # Errors
    /// Returns error if database cannot be opened or schema creation fails.
    pub fn open(path: &Path, config: &StoreConfig) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AppError::io("Failed to create storage directory", e))?;
        }

        let conn = Connection::open(path).map_err(AppError::database)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(AppError::database)?;

        tracing::debug!(path = %path.display(), "Opened image store");

        Self::from_connection(conn, config)
    }

    /// Opens a private in-memory store.
    ///
    /// # Errors
    /// Returns error if schema creation fails.
    pub fn open_in_memory(config: &StoreConfig) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(AppError::database)?;
        Self::from_connection(conn, config)
    }

    fn from_connection(conn: Connection, config: &StoreConfig) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            atomic_reorder: config.atomic_reorder,
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| AppError::Database {
                message: "Connection lock poisoned".into(),
                source: None,
            })?;
            f(&mut guard)
        })
        .await
        .map_err(|e| AppError::Database {
            message: format!("Store task failed: {e}"),
            source: Some(Box::new(e)),
        })?
    }
}

#[async_trait]
impl ImageStore for SqliteImageStore {
    async fn list(&self, scope: Scope) -> Result<Vec<ImageRecord>> {
        self.with_conn(move |conn| list_images(conn, scope)).await
    }

    async fn create(&self, image: NewImage) -> Result<ImageRecord> {
        image.validate()?;
        self.with_conn(move |conn| insert_image(conn, &image)).await
    }

    async fn reorder(&self, ids: &[String]) -> Result<()> {
        ensure_unique_ids(ids)?;
        if ids.is_empty() {
            return Ok(());
        }
        let ids = ids.to_vec();
        if self.atomic_reorder {
            self.with_conn(move |conn| reorder_atomic(conn, &ids)).await
        } else {
            self.with_conn(move |conn| reorder_independent(conn, &ids))
                .await
        }
    }

    async fn set_gallery_flag(&self, id: &str, flag: bool) -> Result<ImageRecord> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE images SET is_gallery = ?1 WHERE id = ?2",
                    params![flag, &id],
                )
                .map_err(AppError::database)?;
            if changed == 0 {
                return Err(AppError::not_found(id));
            }
            tracing::debug!(id = %id, is_gallery = flag, "Gallery flag updated");
            get_image(conn, &id)?.ok_or_else(|| AppError::not_found(id))
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let changed = conn
                .execute("DELETE FROM images WHERE id = ?1", [&id])
                .map_err(AppError::database)?;
            if changed == 0 {
                return Err(AppError::not_found(id));
            }
            tracing::debug!(id = %id, "Image deleted");
            Ok(())
        })
        .await
    }
}

/// Initialize database schema.
fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS images (
            id TEXT PRIMARY KEY,
            image_url TEXT NOT NULL,
            prompt TEXT NOT NULL,
            order_index INTEGER NOT NULL,
            is_gallery INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_images_order
            ON images(order_index);
        CREATE INDEX IF NOT EXISTS idx_images_gallery
            ON images(is_gallery);
        ",
    )
    .map_err(AppError::database)
}

fn list_images(conn: &Connection, scope: Scope) -> Result<Vec<ImageRecord>> {
    let query = if scope.is_gallery_only() {
        format!("{SELECT_COLUMNS} WHERE is_gallery = 1 {ORDER_CLAUSE}")
    } else {
        format!("{SELECT_COLUMNS} {ORDER_CLAUSE}")
    };

    let mut stmt = conn.prepare(&query).map_err(AppError::database)?;
    let rows = stmt
        .query_map([], row_to_record)
        .map_err(AppError::database)?;

    let images = rows
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(AppError::database)?;

    tracing::debug!(scope = %scope, count = images.len(), "Listed images");
    Ok(images)
}

fn get_image(conn: &Connection, id: &str) -> Result<Option<ImageRecord>> {
    conn.query_row(&format!("{SELECT_COLUMNS} WHERE id = ?1"), [id], row_to_record)
        .optional()
        .map_err(AppError::database)
}

fn insert_image(conn: &mut Connection, image: &NewImage) -> Result<ImageRecord> {
    let tx = conn.transaction().map_err(AppError::database)?;

    let current_max: Option<i64> = tx
        .query_row("SELECT MAX(order_index) FROM images", [], |row| row.get(0))
        .map_err(AppError::database)?;

    let record = ImageRecord {
        id: uuid::Uuid::new_v4().to_string(),
        image_url: image.image_url.clone(),
        prompt: image.prompt.clone(),
        order_index: next_order_index(current_max),
        is_gallery: image.is_gallery,
        // Stored with microsecond precision.
        created_at: Utc::now().trunc_subsecs(6),
    };

    tx.execute(
        r"
        INSERT INTO images (id, image_url, prompt, order_index, is_gallery, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ",
        params![
            &record.id,
            &record.image_url,
            &record.prompt,
            record.order_index,
            record.is_gallery,
            format_timestamp(record.created_at),
        ],
    )
    .map_err(AppError::database)?;

    tx.commit().map_err(AppError::database)?;

    tracing::debug!(id = %record.id, order_index = record.order_index, "Image created");
    Ok(record)
}

/// Apply the whole reorder or nothing.
fn reorder_atomic(conn: &mut Connection, ids: &[String]) -> Result<()> {
    let tx = conn.transaction().map_err(AppError::database)?;
    {
        let mut stmt = tx
            .prepare("UPDATE images SET order_index = ?1 WHERE id = ?2")
            .map_err(AppError::database)?;
        for (position, id) in (0_i64..).zip(ids) {
            let changed = stmt
                .execute(params![position, id])
                .map_err(AppError::database)?;
            if changed == 0 {
                // Dropping the transaction rolls every row back.
                return Err(AppError::not_found(id.clone()));
            }
        }
    }
    tx.commit().map_err(AppError::database)?;

    tracing::debug!(count = ids.len(), "Reorder committed");
    Ok(())
}

/// Apply each row on its own; report which ids did not land.
fn reorder_independent(conn: &Connection, ids: &[String]) -> Result<()> {
    let mut applied = Vec::with_capacity(ids.len());
    let mut missing = Vec::new();
    let mut last_error = None;

    for (position, id) in (0_i64..).zip(ids) {
        match conn.execute(
            "UPDATE images SET order_index = ?1 WHERE id = ?2",
            params![position, id],
        ) {
            Ok(0) => missing.push(id.clone()),
            Ok(_) => applied.push(id.clone()),
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "Row reorder failed");
                missing.push(id.clone());
                last_error = Some(e);
            }
        }
    }

    if missing.is_empty() {
        tracing::debug!(count = applied.len(), "Reorder applied");
        return Ok(());
    }

    if applied.is_empty() {
        return Err(match last_error {
            Some(e) => AppError::database(e),
            None => AppError::not_found(missing.swap_remove(0)),
        });
    }

    tracing::warn!(
        applied = applied.len(),
        missing = missing.len(),
        "Reorder partially applied"
    );
    Err(AppError::PartialReorder { applied, missing })
}

/// Convert a row to an `ImageRecord`.
fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<ImageRecord> {
    let created_at_str: String = row.get(5)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;

    Ok(ImageRecord {
        id: row.get(0)?,
        image_url: row.get(1)?,
        prompt: row.get(2)?,
        order_index: row.get(3)?,
        is_gallery: row.get(4)?,
        created_at,
    })
}

/// Fixed-width RFC 3339 so text ordering matches time ordering.
fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ordering::{ids_of, is_contiguous};
    use tempfile::tempdir;

    fn memory_store() -> SqliteImageStore {
        SqliteImageStore::open_in_memory(&StoreConfig::default()).unwrap()
    }

    fn independent_store() -> SqliteImageStore {
        SqliteImageStore::open_in_memory(&StoreConfig {
            atomic_reorder: false,
        })
        .unwrap()
    }

    async fn seed(store: &SqliteImageStore, prompts: &[&str]) -> Vec<ImageRecord> {
        let mut created = Vec::new();
        for prompt in prompts {
            let image = NewImage::new(format!("https://img.test/{prompt}.webp"), *prompt);
            created.push(store.create(image).await.unwrap());
        }
        created
    }

    async fn order_indexes(store: &SqliteImageStore) -> Vec<(String, i64)> {
        store
            .list(Scope::All)
            .await
            .unwrap()
            .into_iter()
            .map(|r| (r.prompt, r.order_index))
            .collect()
    }

    #[test]
    fn test_open_creates_schema() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("images.db");

        let store = SqliteImageStore::open(&db_path, &StoreConfig::default()).unwrap();

        let conn = store.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='images'",
                [],
                |row| row.get(0),
            )
            .unwrap();

        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_empty_store_lists_nothing() {
        let store = memory_store();
        assert!(store.list(Scope::All).await.unwrap().is_empty());
        assert!(store.list(Scope::GalleryOnly).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_assigns_increasing_indexes() {
        let store = memory_store();
        let created = seed(&store, &["a", "b", "c", "d"]).await;

        let indexes: Vec<i64> = created.iter().map(|r| r.order_index).collect();
        assert_eq!(indexes, vec![0, 1, 2, 3]);
        assert!(created.iter().all(|r| !r.is_gallery));
    }

    #[tokio::test]
    async fn test_create_continues_after_max_not_count() {
        let store = memory_store();
        let created = seed(&store, &["a", "b", "c"]).await;
        store.delete(&created[0].id).await.unwrap();

        let next = store.create(NewImage::new("u", "d")).await.unwrap();
        assert_eq!(next.order_index, 3);
    }

    #[tokio::test]
    async fn test_create_rejects_missing_fields() {
        let store = memory_store();
        let err = store.create(NewImage::new("", "prompt")).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
        let err = store.create(NewImage::new("u", "")).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
        assert!(store.list(Scope::All).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_then_list_round_trip() {
        let store = memory_store();
        let data_url = "data:image/webp;base64,UklGRgAAAABXRUJQ";
        let created = store
            .create(NewImage::new(data_url, "a lighthouse at dusk"))
            .await
            .unwrap();

        let listed = store.list(Scope::All).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, created.id);
        assert_eq!(listed[0].image_url, data_url);
        assert_eq!(listed[0].prompt, "a lighthouse at dusk");
    }

    #[tokio::test]
    async fn test_reorder_assigns_positions() {
        let store = memory_store();
        let created = seed(&store, &["a", "b", "c"]).await;
        let ids = vec![
            created[2].id.clone(),
            created[0].id.clone(),
            created[1].id.clone(),
        ];

        store.reorder(&ids).await.unwrap();

        let listed = store.list(Scope::All).await.unwrap();
        assert_eq!(ids_of(&listed), ids);
        assert!(is_contiguous(&listed));
    }

    #[tokio::test]
    async fn test_atomic_reorder_unknown_id_changes_nothing() {
        let store = memory_store();
        let created = seed(&store, &["a", "b"]).await;
        let ids = vec![created[1].id.clone(), "missing".to_string()];

        let err = store.reorder(&ids).await.unwrap_err();

        assert!(matches!(err, AppError::NotFound { ref id } if id == "missing"));
        assert_eq!(
            order_indexes(&store).await,
            vec![("a".to_string(), 0), ("b".to_string(), 1)]
        );
    }

    #[tokio::test]
    async fn test_independent_reorder_reports_partial() {
        let store = independent_store();
        let created = seed(&store, &["a", "b"]).await;
        let ids = vec![
            created[1].id.clone(),
            "missing".to_string(),
            created[0].id.clone(),
        ];

        let err = store.reorder(&ids).await.unwrap_err();

        match err {
            AppError::PartialReorder { applied, missing } => {
                assert_eq!(applied, vec![created[1].id.clone(), created[0].id.clone()]);
                assert_eq!(missing, vec!["missing".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        // The rows that did land keep their new positions.
        assert_eq!(
            order_indexes(&store).await,
            vec![("b".to_string(), 0), ("a".to_string(), 2)]
        );
    }

    #[tokio::test]
    async fn test_independent_reorder_all_missing_is_not_found() {
        let store = independent_store();
        seed(&store, &["a"]).await;
        let err = store.reorder(&["nope".to_string()]).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_reorder_rejects_duplicates_and_allows_empty() {
        let store = memory_store();
        let created = seed(&store, &["a"]).await;
        let id = created[0].id.clone();

        assert!(store.reorder(&[]).await.is_ok());
        let err = store.reorder(&[id.clone(), id]).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_delete_leaves_gaps() {
        let store = memory_store();
        let created = seed(&store, &["a", "b", "c"]).await;

        store.delete(&created[1].id).await.unwrap();

        assert_eq!(
            order_indexes(&store).await,
            vec![("a".to_string(), 0), ("c".to_string(), 2)]
        );
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let store = memory_store();
        let err = store.delete("ghost").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_gallery_flag_controls_scope() {
        let store = memory_store();
        let created = seed(&store, &["a", "b"]).await;
        let id = created[0].id.clone();

        let updated = store.set_gallery_flag(&id, true).await.unwrap();
        assert!(updated.is_gallery);
        assert_eq!(updated.order_index, 0);

        let gallery = store.list(Scope::GalleryOnly).await.unwrap();
        assert_eq!(ids_of(&gallery), vec![id.clone()]);

        store.set_gallery_flag(&id, false).await.unwrap();
        assert!(store.list(Scope::GalleryOnly).await.unwrap().is_empty());
        assert_eq!(store.list(Scope::All).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_gallery_flag_is_idempotent() {
        let store = memory_store();
        let created = seed(&store, &["a"]).await;
        let id = created[0].id.clone();

        let once = store.set_gallery_flag(&id, true).await.unwrap();
        let twice = store.set_gallery_flag(&id, true).await.unwrap();
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn test_gallery_flag_missing_is_not_found() {
        let store = memory_store();
        let err = store.set_gallery_flag("ghost", true).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("images.db");
        let config = StoreConfig::default();

        {
            let store = SqliteImageStore::open(&db_path, &config).unwrap();
            seed(&store, &["kept"]).await;
        }

        let store = SqliteImageStore::open(&db_path, &config).unwrap();
        let listed = store.list(Scope::All).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].prompt, "kept");
    }
}
