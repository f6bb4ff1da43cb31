//! Gemini inference backend implementation.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Response};
use tracing::{debug, info, trace};

use dropwatch_core::{
    defaults, EmbeddingBackend, EmbeddingRequest, Error, Generation, GenerationBackend,
    GenerationRequest, Result, Vector,
};

use super::error::{
    parse_retry_after_header, parse_retry_delay, to_dropwatch_error, GeminiErrorCode, Surface,
};
use super::types::*;

/// Default Gemini API endpoint.
pub const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Configuration for the Gemini backend.
///
/// # Environment Variables
///
/// | Variable | Default | Description |
/// |----------|---------|-------------|
/// | `GEMINI_API_KEY` | (required) | API key |
/// | `GEMINI_BASE_URL` | `https://generativelanguage.googleapis.com/v1beta` | API endpoint |
/// | `GEMINI_GEN_MODEL` | `gemini-1.5-flash-latest` | Generation model |
/// | `GEMINI_EMBED_MODEL` | `text-embedding-004` | Embedding model |
/// | `GEMINI_EMBED_DIM` | 768 | Expected embedding dimension |
/// | `GEMINI_TIMEOUT` | 120 | Request timeout (seconds) |
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// Base URL for the API endpoint.
    pub base_url: String,
    /// API key sent as `x-goog-api-key`.
    pub api_key: String,
    /// Model to use for generation.
    pub gen_model: String,
    /// Model to use for embeddings.
    pub embed_model: String,
    /// Expected embedding dimension.
    pub embed_dimension: usize,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GEMINI_URL.to_string(),
            api_key: String::new(),
            gen_model: defaults::GEN_MODEL.to_string(),
            embed_model: defaults::EMBED_MODEL.to_string(),
            embed_dimension: defaults::EMBED_DIMENSION,
            timeout_seconds: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl GeminiConfig {
    /// Load configuration from environment variables.
    ///
    /// A missing or empty `GEMINI_API_KEY` is a configuration error.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::Config("GEMINI_API_KEY is not set".to_string()))?;

        Ok(Self {
            base_url: std::env::var("GEMINI_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_GEMINI_URL.to_string()),
            api_key,
            gen_model: std::env::var("GEMINI_GEN_MODEL")
                .unwrap_or_else(|_| defaults::GEN_MODEL.to_string()),
            embed_model: std::env::var("GEMINI_EMBED_MODEL")
                .unwrap_or_else(|_| defaults::EMBED_MODEL.to_string()),
            embed_dimension: std::env::var("GEMINI_EMBED_DIM")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults::EMBED_DIMENSION),
            timeout_seconds: std::env::var("GEMINI_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
        })
    }
}

/// Gemini backend for generation and embeddings.
pub struct GeminiBackend {
    client: Client,
    config: GeminiConfig,
}

impl GeminiBackend {
    /// Create a new Gemini backend with the given configuration.
    pub fn new(config: GeminiConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(Error::Config("Gemini API key is empty".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Inference(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "inference",
            component = "gemini",
            gen_model = %config.gen_model,
            embed_model = %config.embed_model,
            "Initializing Gemini backend"
        );

        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(GeminiConfig::from_env()?)
    }

    /// Get the current configuration.
    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        let model = model.trim_start_matches("models/");
        format!(
            "{}/models/{}:{}",
            self.config.base_url.trim_end_matches('/'),
            model,
            method
        )
    }

    fn build_request(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("x-goog-api-key", &self.config.api_key)
            .header("Content-Type", "application/json")
    }

    /// Turn a non-success response into a dropwatch error.
    async fn error_from_response(response: Response, surface: Surface) -> Error {
        let status = response.status().as_u16();
        let header_wait = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after_header);
        let body = response.text().await.unwrap_or_default();

        let (status_text, message, body_wait) =
            match serde_json::from_str::<GeminiErrorResponse>(&body) {
                Ok(parsed) => {
                    let wait = parsed.error.retry_delay().and_then(parse_retry_delay);
                    (parsed.error.status, parsed.error.message, wait)
                }
                Err(_) => (String::new(), body.chars().take(200).collect(), None),
            };

        let code = GeminiErrorCode::from_response(status, &status_text);
        let message = format!("Gemini returned {}: {}", status, message);
        to_dropwatch_error(code, surface, &message, body_wait.or(header_wait))
    }
}

#[async_trait]
impl GenerationBackend for GeminiBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation> {
        let start = Instant::now();
        debug!(
            subsystem = "inference",
            component = "gemini",
            op = "generate",
            model = %request.model,
            prompt_len = request.prompt.len(),
            "Sending generation request"
        );

        let body = GenerateContentRequest {
            contents: vec![Content::user_text(request.prompt.as_str())],
        };

        let response = self
            .build_request(&self.model_url(&request.model, "generateContent"))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Inference(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response, Surface::Generation).await);
        }

        let result: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| Error::Inference(format!("Failed to parse response: {}", e)))?;

        let generation = match result.first_text() {
            Some(text) => Generation::text(text),
            None => Generation {
                text: String::new(),
                has_content: false,
                block_reason: result.block_reason(),
            },
        };

        debug!(
            subsystem = "inference",
            component = "gemini",
            op = "generate",
            response_len = generation.text.len(),
            has_content = generation.has_content,
            duration_ms = start.elapsed().as_millis() as u64,
            "Generation complete"
        );
        trace!(sample = %generation.text.chars().take(200).collect::<String>(), "Raw response sample");
        Ok(generation)
    }

    fn model_name(&self) -> &str {
        &self.config.gen_model
    }
}

#[async_trait]
impl EmbeddingBackend for GeminiBackend {
    async fn embed(&self, request: &EmbeddingRequest) -> Result<Vector> {
        debug!(
            subsystem = "inference",
            component = "gemini",
            op = "embed",
            model = %request.model,
            text_len = request.text.len(),
            "Sending embedding request"
        );

        let model = request.model.trim_start_matches("models/");
        let body = EmbedContentRequest {
            model: format!("models/{}", model),
            content: Content::text(request.text.as_str()),
            task_type: Some(request.task_type.clone()).filter(|t| !t.is_empty()),
        };

        let response = self
            .build_request(&self.model_url(model, "embedContent"))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Embedding(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response, Surface::Embedding).await);
        }

        let result: EmbedContentResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("Failed to parse response: {}", e)))?;

        Ok(Vector::from(result.embedding.values))
    }

    fn dimension(&self) -> usize {
        self.config.embed_dimension
    }

    fn model_name(&self) -> &str {
        &self.config.embed_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> GeminiConfig {
        GeminiConfig {
            api_key: "test-key".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = GeminiConfig::default();
        assert_eq!(config.base_url, DEFAULT_GEMINI_URL);
        assert_eq!(config.gen_model, "gemini-1.5-flash-latest");
        assert_eq!(config.embed_model, "text-embedding-004");
        assert_eq!(config.embed_dimension, 768);
        assert_eq!(config.timeout_seconds, DEFAULT_TIMEOUT_SECS);
        assert!(config.api_key.is_empty());
    }

    #[test]
    fn test_backend_requires_api_key() {
        let result = GeminiBackend::new(GeminiConfig::default());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_backend_creation() {
        let backend = GeminiBackend::new(test_config()).unwrap();
        assert_eq!(backend.config().base_url, DEFAULT_GEMINI_URL);
    }

    #[test]
    fn test_model_url_strips_prefix() {
        let backend = GeminiBackend::new(GeminiConfig {
            base_url: "http://localhost:9000/v1beta/".to_string(),
            ..test_config()
        })
        .unwrap();
        assert_eq!(
            backend.model_url("models/text-embedding-004", "embedContent"),
            "http://localhost:9000/v1beta/models/text-embedding-004:embedContent"
        );
        assert_eq!(
            backend.model_url("gemini-1.5-flash-latest", "generateContent"),
            "http://localhost:9000/v1beta/models/gemini-1.5-flash-latest:generateContent"
        );
    }

    #[test]
    fn test_model_name_accessors() {
        let backend = GeminiBackend::new(GeminiConfig {
            gen_model: "test-gen".to_string(),
            embed_model: "test-embed".to_string(),
            embed_dimension: 256,
            ..test_config()
        })
        .unwrap();
        assert_eq!(GenerationBackend::model_name(&backend), "test-gen");
        assert_eq!(EmbeddingBackend::model_name(&backend), "test-embed");
        assert_eq!(backend.dimension(), 256);
    }
}
