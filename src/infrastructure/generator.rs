//! External image generation client.
//!
//! Runs a Replicate prediction for a prompt, downloads the first output and
//! returns it inlined as a `data:` URL so the stored record never expires.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::domain::{AppError, GeneratorConfig, Result};

/// Interval between prediction status polls.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Content type assumed when the download carries none.
const FALLBACK_CONTENT_TYPE: &str = "image/png";

/// Produces an image reference for a prompt.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Generate an image and return it as an inline data URL.
    async fn generate(&self, prompt: &str, model: Option<&str>) -> Result<String>;
}

/// Where a model identifier points.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ModelRef<'a> {
    /// `owner/name`, the model's latest version.
    Latest(&'a str),
    /// `owner/name:version`, a pinned version.
    Version(&'a str),
}

impl<'a> ModelRef<'a> {
    fn parse(model: &'a str) -> Self {
        match model.split_once(':') {
            Some((_, version)) if !version.is_empty() => Self::Version(version),
            _ => Self::Latest(model),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Prediction {
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    urls: Option<PredictionUrls>,
}

#[derive(Debug, Deserialize)]
struct PredictionUrls {
    get: String,
}

impl Prediction {
    fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "succeeded" | "failed" | "canceled")
    }
}

/// Replicate API client.
pub struct ReplicateGenerator {
    client: Client,
    token: String,
    config: GeneratorConfig,
}

impl ReplicateGenerator {
    /// Create a generator, reading the API token from `config.token_env`.
    ///
    /// # Errors
    /// Returns `Config` if the token variable is unset or empty.
    pub fn from_config(config: &GeneratorConfig) -> Result<Self> {
        let token = std::env::var(&config.token_env)
            .ok()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Config {
                message: format!("{} not set", config.token_env),
            })?;
        Self::with_token(token, config.clone())
    }

    /// Create a generator with an explicit token.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn with_token(token: String, config: GeneratorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| AppError::transport("Failed to create HTTP client", e))?;

        Ok(Self {
            client,
            token,
            config,
        })
    }

    fn prediction_request(&self, model: &str, prompt: &str) -> (String, Value) {
        let mut input = Map::new();
        input.insert("num_outputs".into(), json!(1));
        input.insert("aspect_ratio".into(), json!("1:1"));
        input.insert("output_format".into(), json!("webp"));
        input.insert("output_quality".into(), json!(80));
        input.extend(self.config.input.clone());
        input.insert("prompt".into(), json!(prompt));

        let base = self.config.api_base.trim_end_matches('/');

        match ModelRef::parse(model) {
            ModelRef::Version(version) => (
                format!("{base}/predictions"),
                json!({ "version": version, "input": input }),
            ),
            ModelRef::Latest(name) => (
                format!("{base}/models/{name}/predictions"),
                json!({ "input": input }),
            ),
        }
    }

    async fn run_prediction(&self, model: &str, prompt: &str) -> Result<Prediction> {
        let (url, body) = self.prediction_request(model, prompt);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header("Prefer", "wait")
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::transport("Prediction request failed", e))?;

        let mut prediction = read_prediction(response).await?;

        while !prediction.is_terminal() {
            let Some(poll_url) = prediction.urls.as_ref().map(|u| u.get.clone()) else {
                return Err(AppError::Generation {
                    message: format!("Prediction {} without poll URL", prediction.status),
                });
            };
            tracing::debug!(status = %prediction.status, "Waiting for prediction");
            tokio::time::sleep(POLL_INTERVAL).await;

            let response = self
                .client
                .get(&poll_url)
                .bearer_auth(&self.token)
                .send()
                .await
                .map_err(|e| AppError::transport("Prediction poll failed", e))?;
            prediction = read_prediction(response).await?;
        }

        Ok(prediction)
    }

    async fn download_inline(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::transport("Image download failed", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Generation {
                message: format!("Failed to fetch image: {status}"),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::transport("Image download failed", e))?;

        Ok(to_data_url(content_type.as_deref(), &bytes))
    }
}

#[async_trait]
impl ImageGenerator for ReplicateGenerator {
    async fn generate(&self, prompt: &str, model: Option<&str>) -> Result<String> {
        if prompt.trim().is_empty() {
            return Err(AppError::validation("Prompt is required"));
        }
        let model = model
            .filter(|m| !m.is_empty())
            .unwrap_or(self.config.default_model.as_str());

        let started = std::time::Instant::now();
        let prediction =
            tokio::time::timeout(self.config.timeout(), self.run_prediction(model, prompt))
                .await
                .map_err(|e| AppError::transport("Generation timed out", e))??;

        if prediction.status != "succeeded" {
            let reason = prediction
                .error
                .map_or_else(|| prediction.status.clone(), |e| e.to_string());
            return Err(AppError::Generation {
                message: format!("Prediction failed: {reason}"),
            });
        }

        let url = prediction
            .output
            .as_ref()
            .and_then(first_output_url)
            .ok_or_else(|| AppError::Generation {
                message: "No image URL returned".into(),
            })?;

        let data_url = self.download_inline(&url).await?;
        tracing::info!(
            model,
            data_url_len = data_url.len(),
            duration_ms = started.elapsed().as_millis(),
            "Image generated"
        );
        Ok(data_url)
    }
}

impl std::fmt::Debug for ReplicateGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicateGenerator")
            .field("api_base", &self.config.api_base)
            .field("default_model", &self.config.default_model)
            .finish_non_exhaustive()
    }
}

async fn read_prediction(response: reqwest::Response) -> Result<Prediction> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(AppError::Generation {
            message: format!("API error {status}: {body}"),
        });
    }
    response
        .json()
        .await
        .map_err(|e| AppError::transport("Failed to parse prediction", e))
}

/// First URL in a prediction output: a string or an array of strings.
fn first_output_url(output: &Value) -> Option<String> {
    match output {
        Value::String(url) => Some(url.clone()),
        Value::Array(items) => items.first().and_then(first_output_url),
        _ => None,
    }
}

/// Encode bytes as `data:<type>;base64,<payload>`.
fn to_data_url(content_type: Option<&str>, bytes: &[u8]) -> String {
    let content_type = content_type
        .filter(|c| !c.is_empty())
        .unwrap_or(FALLBACK_CONTENT_TYPE);
    let encoded = general_purpose::STANDARD.encode(bytes);
    format!("data:{content_type};base64,{encoded}")
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::*;
    use warp::host::Authority;
    use warp::http::StatusCode;
    use warp::{Filter, Reply};

    #[test]
    fn test_model_ref() {
        assert_eq!(
            ModelRef::parse("black-forest-labs/flux-schnell"),
            ModelRef::Latest("black-forest-labs/flux-schnell")
        );
        assert_eq!(ModelRef::parse("owner/model:3a00387e"), ModelRef::Version("3a00387e"));
        assert_eq!(ModelRef::parse("owner/model:"), ModelRef::Latest("owner/model:"));
    }

    #[test]
    fn test_first_output_url() {
        assert_eq!(
            first_output_url(&json!(["https://a/1.webp", "https://a/2.webp"])),
            Some("https://a/1.webp".to_string())
        );
        assert_eq!(
            first_output_url(&json!("https://a/only.png")),
            Some("https://a/only.png".to_string())
        );
        assert_eq!(first_output_url(&json!([])), None);
        assert_eq!(first_output_url(&json!({ "url": 1 })), None);
    }

    #[test]
    fn test_to_data_url() {
        assert_eq!(to_data_url(Some("image/webp"), b"hi"), "data:image/webp;base64,aGk=");
        assert_eq!(to_data_url(None, b"hi"), "data:image/png;base64,aGk=");
    }

    #[test]
    fn test_prediction_request_merges_configured_input() {
        let mut config = GeneratorConfig::default();
        config.input.insert("guidance_scale".into(), json!(3));
        config.input.insert("output_format".into(), json!("png"));
        config.input.insert("prompt".into(), json!("ignored"));
        let generator = ReplicateGenerator::with_token("t".into(), config).unwrap();

        let (url, body) = generator.prediction_request("owner/lora:3a00387e", "a heron");
        assert_eq!(url, "https://api.replicate.com/v1/predictions");
        assert_eq!(body["version"], "3a00387e");
        assert_eq!(body["input"]["guidance_scale"], 3);
        assert_eq!(body["input"]["output_format"], "png");
        assert_eq!(body["input"]["num_outputs"], 1);
        assert_eq!(body["input"]["prompt"], "a heron");

        let (url, body) = generator.prediction_request("owner/plain", "a heron");
        assert_eq!(url, "https://api.replicate.com/v1/models/owner/plain/predictions");
        assert!(body.get("version").is_none());
    }

    fn origin(host: Option<Authority>) -> String {
        format!("http://{}", host.map(|h| h.to_string()).unwrap_or_default())
    }

    /// Local stand-in for the prediction API. The model name picks the
    /// behavior; outputs point back at the same server.
    fn spawn_api() -> SocketAddr {
        let create = warp::path!("models" / "acme" / String / "predictions")
            .and(warp::post())
            .and(warp::header::exact("authorization", "Bearer test-token"))
            .and(warp::header::exact("prefer", "wait"))
            .and(warp::host::optional())
            .map(|name: String, host: Option<Authority>| {
                let origin = origin(host);
                let body = match name.as_str() {
                    "painter" => json!({
                        "status": "succeeded",
                        "output": [format!("{origin}/out.webp")],
                    }),
                    "slow" => json!({
                        "status": "starting",
                        "urls": { "get": format!("{origin}/predictions/slow") },
                    }),
                    "stuck" => json!({
                        "status": "processing",
                        "urls": { "get": format!("{origin}/predictions/stuck") },
                    }),
                    "broken" => json!({ "status": "failed", "error": "safety filter" }),
                    _ => {
                        return warp::reply::with_status(
                            warp::reply::json(&json!({ "detail": "unavailable" })),
                            StatusCode::SERVICE_UNAVAILABLE,
                        )
                        .into_response()
                    }
                };
                warp::reply::json(&body).into_response()
            });

        let pinned = warp::path!("predictions")
            .and(warp::post())
            .and(warp::body::json())
            .and(warp::host::optional())
            .map(|body: Value, host: Option<Authority>| {
                let ok = body["version"] == "3a00387e" && body["input"]["lora_scale"] == 1;
                warp::reply::json(&if ok {
                    json!({ "status": "succeeded", "output": format!("{}/out.webp", origin(host)) })
                } else {
                    json!({ "status": "failed", "error": "unexpected request" })
                })
            });

        let poll = warp::path!("predictions" / String)
            .and(warp::get())
            .and(warp::header::exact("authorization", "Bearer test-token"))
            .and(warp::host::optional())
            .map(|id: String, host: Option<Authority>| {
                let origin = origin(host);
                warp::reply::json(&if id == "slow" {
                    json!({ "status": "succeeded", "output": [format!("{origin}/out.webp")] })
                } else {
                    json!({
                        "status": "processing",
                        "urls": { "get": format!("{origin}/predictions/{id}") },
                    })
                })
            });

        let image = warp::path!("out.webp")
            .map(|| warp::reply::with_header(b"RIFF".to_vec(), "content-type", "image/webp"));

        let (addr, server) = warp::serve(create.or(pinned).or(poll).or(image))
            .bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);
        addr
    }

    fn generator_for(addr: SocketAddr, timeout_secs: u64) -> ReplicateGenerator {
        let config = GeneratorConfig {
            api_base: format!("http://{addr}"),
            default_model: "acme/painter".into(),
            timeout_secs,
            ..Default::default()
        };
        ReplicateGenerator::with_token("test-token".into(), config).unwrap()
    }

    #[tokio::test]
    async fn test_generate_against_local_api() {
        let generator = generator_for(spawn_api(), 10);

        let data_url = generator.generate("a red kite", None).await.unwrap();
        assert_eq!(data_url, "data:image/webp;base64,UklGRg==");

        let err = generator.generate("  ", None).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_generate_polls_until_terminal() {
        let generator = generator_for(spawn_api(), 10);
        let data_url = generator.generate("a slow kite", Some("acme/slow")).await.unwrap();
        assert_eq!(data_url, "data:image/webp;base64,UklGRg==");
    }

    #[tokio::test]
    async fn test_pinned_version_uses_configured_input() {
        let addr = spawn_api();
        let mut generator = generator_for(addr, 10);
        generator.config.input.insert("lora_scale".into(), json!(1));

        let data_url = generator
            .generate("a kite", Some("acme/lora:3a00387e"))
            .await
            .unwrap();
        assert_eq!(data_url, "data:image/webp;base64,UklGRg==");
    }

    #[tokio::test]
    async fn test_failed_prediction_is_generation_error() {
        let generator = generator_for(spawn_api(), 10);
        let err = generator.generate("a kite", Some("acme/broken")).await.unwrap_err();
        assert!(
            matches!(err, AppError::Generation { ref message } if message.contains("safety filter"))
        );
    }

    #[tokio::test]
    async fn test_api_error_status_is_generation_error() {
        let generator = generator_for(spawn_api(), 10);
        let err = generator.generate("a kite", Some("acme/offline")).await.unwrap_err();
        assert!(matches!(err, AppError::Generation { ref message } if message.contains("503")));
    }

    #[tokio::test]
    async fn test_prediction_past_deadline_is_transport_error() {
        let generator = generator_for(spawn_api(), 2);
        let err = generator.generate("a kite", Some("acme/stuck")).await.unwrap_err();
        assert!(matches!(err, AppError::Transport { .. }));
    }
}
