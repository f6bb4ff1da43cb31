//! Embedding generation for update rows.

use std::sync::Arc;

use tracing::{debug, warn};

use dropwatch_core::{
    defaults, EmbeddingBackend, EmbeddingRequest, Error, Result, ShutdownSignal, Vector,
};

use crate::retry::RetryPolicy;

/// Embeds update text, retrying rate limits under the extraction policy.
#[derive(Clone)]
pub struct EmbeddingGenerator {
    backend: Arc<dyn EmbeddingBackend>,
    model: String,
    task_type: String,
    policy: RetryPolicy,
}

impl EmbeddingGenerator {
    pub fn new(backend: Arc<dyn EmbeddingBackend>, policy: RetryPolicy) -> Self {
        let model = backend.model_name().to_string();
        Self {
            backend,
            model,
            task_type: defaults::EMBED_TASK_TYPE.to_string(),
            policy,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dimension(&self) -> usize {
        self.backend.dimension()
    }

    /// Embed `text`, failing on any service error or a dimension mismatch.
    pub async fn embed_text(&self, text: &str, shutdown: &ShutdownSignal) -> Result<Vector> {
        let request = EmbeddingRequest {
            model: self.model.clone(),
            text: text.to_string(),
            task_type: self.task_type.clone(),
        };

        let vector = self
            .policy
            .run("embed", shutdown, |_| self.backend.embed(&request))
            .await?;

        let expected = self.backend.dimension();
        let actual = vector.as_slice().len();
        if actual != expected {
            return Err(Error::Embedding(format!(
                "expected {} dimensions, got {}",
                expected, actual
            )));
        }
        Ok(vector)
    }

    /// Embed `text`, degrading failures to `None`.
    ///
    /// Only a shutdown during a retry wait is returned as an error.
    pub async fn embed_or_none(
        &self,
        text: &str,
        source_link: &str,
        shutdown: &ShutdownSignal,
    ) -> Result<Option<Vector>> {
        match self.embed_text(text, shutdown).await {
            Ok(vector) => {
                debug!(
                    subsystem = "inference",
                    component = "embedding",
                    op = "embed",
                    source_link,
                    dimension = vector.as_slice().len(),
                    "Embedding generated"
                );
                Ok(Some(vector))
            }
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(err) => {
                warn!(
                    subsystem = "inference",
                    component = "embedding",
                    op = "embed",
                    source_link,
                    error = %err,
                    "Embedding failed; row will be stored without one"
                );
                Ok(None)
            }
        }
    }
}
