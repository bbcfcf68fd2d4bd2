//! HTTP client for a running gallery server.
//!
//! Speaks the `/images` JSON API and maps response statuses back into
//! the store error taxonomy.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};

use super::generator::ImageGenerator;
use crate::domain::ordering::sort_records;
use crate::domain::{AppError, ClientConfig, ImageRecord, ImageStore, NewImage, Result, Scope};

/// Generation waits on an upstream model, far longer than a store call.
const GENERATE_TIMEOUT: Duration = Duration::from_secs(180);

/// `ImageStore` implemented over HTTP.
#[derive(Debug, Clone)]
pub struct HttpImageStore {
    client: Client,
    base_url: String,
}

impl HttpImageStore {
    /// Create a client for `config.base_url` with the configured timeout.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| AppError::transport("Failed to create HTTP client", e))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn images_url(&self) -> String {
        format!("{}/images", self.base_url)
    }

    /// Send a request and return its JSON body, or the mapped error.
    async fn send(&self, request: RequestBuilder) -> Result<Value> {
        let response = request
            .send()
            .await
            .map_err(|e| AppError::transport(format!("Request to {} failed", self.base_url), e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AppError::transport("Failed to read response body", e))?;
        let body: Value = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or_else(|_| json!({ "error": text }))
        };

        if status.is_success() {
            Ok(body)
        } else {
            Err(error_from_response(status, &body))
        }
    }
}

#[async_trait]
impl ImageStore for HttpImageStore {
    async fn list(&self, scope: Scope) -> Result<Vec<ImageRecord>> {
        let mut request = self.client.get(self.images_url());
        if scope.is_gallery_only() {
            request = request.query(&[("gallery", "true")]);
        }
        let mut body = self.send(request).await?;
        let mut images: Vec<ImageRecord> =
            serde_json::from_value(take_field(&mut body, "images")).map_err(AppError::json_parse)?;
        sort_records(&mut images);
        Ok(images)
    }

    async fn create(&self, image: NewImage) -> Result<ImageRecord> {
        let mut body = self
            .send(self.client.post(self.images_url()).json(&image))
            .await?;
        serde_json::from_value(take_field(&mut body, "image")).map_err(AppError::json_parse)
    }

    async fn reorder(&self, ids: &[String]) -> Result<()> {
        let images: Vec<Value> = ids.iter().map(|id| json!({ "id": id })).collect();
        self.send(
            self.client
                .patch(self.images_url())
                .json(&json!({ "images": images })),
        )
        .await?;
        Ok(())
    }

    async fn set_gallery_flag(&self, id: &str, flag: bool) -> Result<ImageRecord> {
        let mut body = self
            .send(
                self.client
                    .patch(self.images_url())
                    .json(&json!({ "id": id, "is_gallery": flag })),
            )
            .await?;
        serde_json::from_value(take_field(&mut body, "image")).map_err(AppError::json_parse)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.send(self.client.delete(self.images_url()).query(&[("id", id)]))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ImageGenerator for HttpImageStore {
    async fn generate(&self, prompt: &str, model: Option<&str>) -> Result<String> {
        let mut body = self
            .send(
                self.client
                    .post(format!("{}/generate", self.base_url))
                    .timeout(GENERATE_TIMEOUT)
                    .json(&json!({ "prompt": prompt, "model": model })),
            )
            .await?;
        match take_field(&mut body, "image") {
            Value::String(image) => Ok(image),
            _ => Err(AppError::Generation {
                message: "Server returned no image".into(),
            }),
        }
    }
}

fn take_field(body: &mut Value, key: &str) -> Value {
    body.get_mut(key).map(Value::take).unwrap_or_default()
}

/// Rebuild a store error from a non-2xx response.
fn error_from_response(status: StatusCode, body: &Value) -> AppError {
    let message = body["error"]
        .as_str()
        .map_or_else(|| status.to_string(), str::to_string);
    let ids = |key: &str| -> Vec<String> {
        body[key]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    };

    match status {
        StatusCode::BAD_REQUEST => AppError::Validation { message },
        StatusCode::NOT_FOUND if body["kind"] == "not_found" => {
            AppError::not_found(body["id"].as_str().unwrap_or_default())
        }
        StatusCode::CONFLICT => AppError::PartialReorder {
            applied: ids("applied"),
            missing: ids("missing"),
        },
        _ => AppError::Transport {
            message: format!("Server responded {status}: {message}"),
            source: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::{ServerConfig, StoreConfig};
    use crate::infrastructure::server::{routes, AppState};
    use crate::infrastructure::SqliteImageStore;

    /// Serve a fresh in-memory store on an ephemeral port.
    fn spawn_server(store_config: StoreConfig) -> HttpImageStore {
        let store = SqliteImageStore::open_in_memory(&store_config).unwrap();
        let state = AppState::new(Arc::new(store), &ServerConfig::default());
        let (addr, server) = warp::serve(routes(state)).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);

        HttpImageStore::new(&ClientConfig {
            base_url: format!("http://{addr}/"),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_error_mapping() {
        let err = error_from_response(
            StatusCode::BAD_REQUEST,
            &json!({ "error": "Image ID is required", "kind": "validation" }),
        );
        assert!(
            matches!(err, AppError::Validation { ref message } if message == "Image ID is required")
        );

        let err = error_from_response(
            StatusCode::NOT_FOUND,
            &json!({ "error": "gone", "kind": "not_found", "id": "abc" }),
        );
        assert!(matches!(err, AppError::NotFound { ref id } if id == "abc"));

        // A 404 from something that is not the gallery API is a transport problem.
        let err =
            error_from_response(StatusCode::NOT_FOUND, &json!({ "error": "Route not found" }));
        assert!(matches!(err, AppError::Transport { .. }));

        let err = error_from_response(
            StatusCode::CONFLICT,
            &json!({ "applied": ["a"], "missing": ["b", "c"] }),
        );
        match err {
            AppError::PartialReorder { applied, missing } => {
                assert_eq!(applied, vec!["a"]);
                assert_eq!(missing, vec!["b", "c"]);
            }
            other => panic!("unexpected error: {other}"),
        }

        let err = error_from_response(StatusCode::INTERNAL_SERVER_ERROR, &Value::Null);
        assert!(matches!(err, AppError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_round_trip_over_http() {
        let store = spawn_server(StoreConfig::default());

        let a = store.create(NewImage::new("https://img/a.png", "a")).await.unwrap();
        let b = store
            .create(NewImage::new("https://img/b.png", "b").in_gallery(true))
            .await
            .unwrap();
        assert_eq!((a.order_index, b.order_index), (0, 1));

        store.reorder(&[b.id.clone(), a.id.clone()]).await.unwrap();
        let all = store.list(Scope::All).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec![b.id.as_str(), a.id.as_str()]);

        let gallery = store.list(Scope::GalleryOnly).await.unwrap();
        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery[0].prompt, "b");

        let updated = store.set_gallery_flag(&a.id, true).await.unwrap();
        assert!(updated.is_gallery);

        store.delete(&a.id).await.unwrap();
        let err = store.delete(&a.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_validation_over_http() {
        let store = spawn_server(StoreConfig::default());
        let err = store.create(NewImage::new("", "p")).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_generate_without_generator_over_http() {
        let store = spawn_server(StoreConfig::default());
        let err = store.generate("a fox", None).await.unwrap_err();
        assert!(matches!(err, AppError::Transport { ref message, .. } if message.contains("not configured")));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        let store = HttpImageStore::new(&ClientConfig {
            base_url: "http://127.0.0.1:9".into(),
            timeout_secs: 2,
        })
        .unwrap();
        let err = store.list(Scope::All).await.unwrap_err();
        assert!(matches!(err, AppError::Transport { .. }));
    }
}
