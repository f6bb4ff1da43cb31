//! Extraction client: one generation call per message with bounded retry.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use dropwatch_core::{Error, GenerationBackend, GenerationRequest, Result, ShutdownSignal};

use crate::retry::RetryPolicy;

/// Calls the generation service and turns its response into raw text.
///
/// Rate limits are retried under the configured [`RetryPolicy`]. A response
/// without content is `ContentBlocked` when the service gives a reason,
/// otherwise `EmptyResponse`. Neither is retried.
#[derive(Clone)]
pub struct ExtractionClient {
    backend: Arc<dyn GenerationBackend>,
    model: String,
    policy: RetryPolicy,
}

impl ExtractionClient {
    pub fn new(backend: Arc<dyn GenerationBackend>, policy: RetryPolicy) -> Self {
        let model = backend.model_name().to_string();
        Self {
            backend,
            model,
            policy,
        }
    }

    /// Override the model sent with each request.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Send `prompt` and return the raw response text.
    pub async fn extract(
        &self,
        prompt: &str,
        source_link: &str,
        shutdown: &ShutdownSignal,
    ) -> Result<String> {
        let start = Instant::now();
        let request = GenerationRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
        };

        let generation = self
            .policy
            .run("extract", shutdown, |attempt| {
                let request = &request;
                async move {
                    info!(
                        subsystem = "inference",
                        component = "extraction",
                        op = "extract",
                        source_link,
                        attempt,
                        "Sending extraction request"
                    );
                    self.backend.generate(request).await
                }
            })
            .await?;

        if !generation.has_content {
            return Err(match generation.block_reason {
                Some(reason) => {
                    warn!(
                        subsystem = "inference",
                        component = "extraction",
                        source_link,
                        reason = %reason,
                        "Prompt blocked by generation service"
                    );
                    Error::ContentBlocked(reason)
                }
                None => {
                    warn!(
                        subsystem = "inference",
                        component = "extraction",
                        source_link,
                        "Generation service returned no content and no block reason"
                    );
                    Error::EmptyResponse
                }
            });
        }

        if generation.text.trim().is_empty() {
            return Err(Error::EmptyResponse);
        }

        debug!(
            subsystem = "inference",
            component = "extraction",
            source_link,
            response_len = generation.text.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Extraction response received"
        );
        Ok(generation.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockGenerationBackend, MockReply};
    use std::time::Duration;

    fn client(mock: &MockGenerationBackend) -> ExtractionClient {
        ExtractionClient::new(Arc::new(mock.clone()), RetryPolicy::default())
    }

    #[tokio::test]
    async fn test_returns_text() {
        let mock = MockGenerationBackend::new().with_reply(MockReply::Text("{}".into()));
        let text = client(&mock)
            .extract("p", "link", &ShutdownSignal::never())
            .await
            .unwrap();
        assert_eq!(text, "{}");
        assert_eq!(mock.call_count(), 1);
        assert_eq!(mock.prompts(), vec!["p".to_string()]);
    }

    #[tokio::test]
    async fn test_blocked_is_terminal() {
        let mock = MockGenerationBackend::new().with_reply(MockReply::Blocked("SAFETY".into()));
        let err = client(&mock)
            .extract("p", "link", &ShutdownSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ContentBlocked(ref r) if r == "SAFETY"));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_without_reason() {
        let mock = MockGenerationBackend::new().with_reply(MockReply::Empty);
        let err = client(&mock)
            .extract("p", "link", &ShutdownSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmptyResponse));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_rate_limited_calls_exactly_max_attempts() {
        let mock = MockGenerationBackend::new()
            .always(MockReply::RateLimited(Some(Duration::from_secs(2))));
        let policy = RetryPolicy::default().with_max_attempts(4);
        let client = ExtractionClient::new(Arc::new(mock.clone()), policy);
        let err = client
            .extract("p", "link", &ShutdownSignal::never())
            .await
            .unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(mock.call_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_rate_limit() {
        let mock = MockGenerationBackend::new()
            .with_reply(MockReply::RateLimited(None))
            .with_reply(MockReply::Text("{\"identified_projects\": []}".into()));
        let text = client(&mock)
            .extract("p", "link", &ShutdownSignal::never())
            .await
            .unwrap();
        assert!(text.contains("identified_projects"));
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_remote_error_fails_immediately() {
        let mock = MockGenerationBackend::new().always(MockReply::Fail("500".into()));
        let err = client(&mock)
            .extract("p", "link", &ShutdownSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Inference(_)));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_model_override_reaches_backend() {
        let mock = MockGenerationBackend::new().with_reply(MockReply::Text("ok".into()));
        let client = client(&mock).with_model("gemini-test");
        client
            .extract("p", "link", &ShutdownSignal::never())
            .await
            .unwrap();
        assert_eq!(mock.models(), vec!["gemini-test".to_string()]);
    }
}
