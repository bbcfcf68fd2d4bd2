//! HTTP API over the ordering store.
//!
//! Routes:
//!   GET    /images[?gallery=true]
//!   POST   /images            { image_url, prompt, is_gallery? }
//!   PATCH  /images            { images: [...] } | { id, is_gallery }
//!   DELETE /images?id=<id>
//!   POST   /generate          { prompt, model? }
//!   GET    /health

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use warp::http::StatusCode;
use warp::hyper::body::Bytes;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

use crate::domain::{AppError, ImageStore, NewImage, Result, Scope, ServerConfig};

use super::generator::ImageGenerator;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn ImageStore>,
    generator: Option<Arc<dyn ImageGenerator>>,
    max_body_bytes: u64,
}

impl AppState {
    /// Create handler state over a store.
    pub fn new(store: Arc<dyn ImageStore>, config: &ServerConfig) -> Self {
        Self {
            store,
            generator: None,
            max_body_bytes: config.max_body_bytes,
        }
    }

    /// Enable `POST /generate`.
    #[must_use]
    pub fn with_generator(mut self, generator: Arc<dyn ImageGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    gallery: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeleteQuery {
    id: Option<String>,
}

/// Reorder entries only need an id; full records are accepted.
#[derive(Debug, Deserialize)]
struct ReorderEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PatchPayload {
    images: Option<Vec<ReorderEntry>>,
    id: Option<String>,
    is_gallery: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct GeneratePayload {
    #[serde(default)]
    prompt: String,
    #[serde(default, alias = "modelId")]
    model: Option<String>,
}

/// Build the complete route tree.
pub fn routes(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let max_body = state.max_body_bytes;
    let images = warp::path("images").and(warp::path::end());

    let list = images
        .clone()
        .and(warp::get())
        .and(warp::query::<ListQuery>())
        .and(with_state(state.clone()))
        .and_then(list_images);

    let create = images
        .clone()
        .and(warp::post())
        .and(warp::body::content_length_limit(max_body))
        .and(warp::body::bytes())
        .and(with_state(state.clone()))
        .and_then(create_image);

    let update = images
        .clone()
        .and(warp::patch())
        .and(warp::body::content_length_limit(max_body))
        .and(warp::body::bytes())
        .and(with_state(state.clone()))
        .and_then(update_images);

    let remove = images
        .and(warp::delete())
        .and(warp::query::<DeleteQuery>())
        .and(with_state(state.clone()))
        .and_then(delete_image);

    let generate = warp::path("generate")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(64 * 1024))
        .and(warp::body::bytes())
        .and(with_state(state))
        .and_then(generate_image);

    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| warp::reply::json(&json!({ "status": "ok" })));

    list.or(create)
        .or(update)
        .or(remove)
        .or(generate)
        .or(health)
        .recover(handle_rejection)
        .with(warp::log::custom(|info| {
            tracing::info!(
                method = %info.method(),
                path = info.path(),
                status = info.status().as_u16(),
                elapsed_ms = info.elapsed().as_millis(),
                "request"
            );
        }))
}

/// Bind and serve until Ctrl-C.
///
/// # Errors
/// Returns error if the address is invalid or cannot be bound.
pub async fn serve(state: AppState, config: &ServerConfig) -> Result<()> {
    let addr: SocketAddr = config.bind_addr().parse().map_err(|e| AppError::Config {
        message: format!("Invalid bind address {}: {e}", config.bind_addr()),
    })?;

    let (bound, server) = warp::serve(routes(state))
        .try_bind_with_graceful_shutdown(addr, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .map_err(|e| AppError::Config {
            message: format!("Failed to bind {addr}: {e}"),
        })?;

    tracing::info!(addr = %bound, "Server listening");
    server.await;
    tracing::info!("Server stopped");

    Ok(())
}

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

async fn list_images(query: ListQuery, state: AppState) -> std::result::Result<Response, Infallible> {
    let scope = Scope::from_gallery_flag(query.gallery.as_deref() == Some("true"));
    let result = state
        .store
        .list(scope)
        .await
        .map(|images| json!({ "images": images }));
    Ok(respond(result))
}

async fn create_image(body: Bytes, state: AppState) -> std::result::Result<Response, Infallible> {
    Ok(respond(try_create(&body, &state).await))
}

async fn update_images(body: Bytes, state: AppState) -> std::result::Result<Response, Infallible> {
    Ok(respond(try_update(&body, &state).await))
}

async fn delete_image(query: DeleteQuery, state: AppState) -> std::result::Result<Response, Infallible> {
    Ok(respond(try_delete(query, &state).await))
}

async fn generate_image(body: Bytes, state: AppState) -> std::result::Result<Response, Infallible> {
    Ok(respond(try_generate(&body, &state).await))
}

async fn try_create(body: &[u8], state: &AppState) -> Result<Value> {
    let payload: NewImage = parse_body(body)?;
    let image = state.store.create(payload).await?;
    Ok(json!({ "success": true, "image": image }))
}

async fn try_update(body: &[u8], state: &AppState) -> Result<Value> {
    let payload: PatchPayload = parse_body(body)?;
    match payload {
        PatchPayload {
            images: Some(entries),
            ..
        } => {
            let ids: Vec<String> = entries.into_iter().map(|e| e.id).collect();
            state.store.reorder(&ids).await?;
            Ok(json!({ "success": true }))
        }
        PatchPayload {
            id: Some(id),
            is_gallery: Some(flag),
            ..
        } if !id.is_empty() => {
            let image = state.store.set_gallery_flag(&id, flag).await?;
            Ok(json!({ "success": true, "image": image }))
        }
        _ => Err(AppError::validation("Invalid payload")),
    }
}

async fn try_delete(query: DeleteQuery, state: &AppState) -> Result<Value> {
    let id = query
        .id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::validation("Image ID is required"))?;
    state.store.delete(&id).await?;
    Ok(json!({ "success": true }))
}

async fn try_generate(body: &[u8], state: &AppState) -> Result<Value> {
    let payload: GeneratePayload = parse_body(body)?;
    let generator = state.generator.as_ref().ok_or_else(|| AppError::Config {
        message: "Image generation is not configured".into(),
    })?;
    let image = generator
        .generate(&payload.prompt, payload.model.as_deref())
        .await?;
    Ok(json!({ "success": true, "image": image }))
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|e| AppError::validation(format!("Invalid JSON body: {e}")))
}

fn respond(result: Result<Value>) -> Response {
    match result {
        Ok(body) => warp::reply::json(&body).into_response(),
        Err(err) => error_response(&err),
    }
}

/// Render an error as `{ error, kind, ... }` with its mapped status.
fn error_response(err: &AppError) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    if status.is_server_error() {
        tracing::error!(error = %err, "Request failed");
    } else {
        tracing::debug!(error = %err, "Request rejected");
    }

    let mut body = json!({ "error": err.to_string(), "kind": err.kind() });
    match err {
        AppError::NotFound { id } => body["id"] = json!(id),
        AppError::PartialReorder { applied, missing } => {
            body["applied"] = json!(applied);
            body["missing"] = json!(missing);
        }
        _ => {}
    }

    warp::reply::with_status(warp::reply::json(&body), status).into_response()
}

async fn handle_rejection(err: Rejection) -> std::result::Result<Response, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Route not found")
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large")
    } else if err.find::<warp::reject::InvalidQuery>().is_some() {
        (StatusCode::BAD_REQUEST, "Invalid query string")
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        // Combined with the GET route's method rejection; report the real cause.
        (StatusCode::LENGTH_REQUIRED, "Content-Length header is required")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
    } else {
        tracing::warn!("Unhandled rejection: {:?}", err);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&json!({ "error": message, "kind": "route" })),
        status,
    )
    .into_response())
}
