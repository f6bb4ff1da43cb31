//! Core traits for dropwatch abstractions.
//!
//! These traits define the seams between the pipeline and its external
//! collaborators, so remote services and the store can be swapped for mocks
//! in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// INFERENCE TRAITS
// =============================================================================

/// Request to the generation service.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
}

/// Response from the generation service.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Generation {
    /// Concatenated text of all returned content parts.
    pub text: String,
    /// Whether the service returned any content blocks.
    pub has_content: bool,
    /// Reason reported when the prompt was refused.
    pub block_reason: Option<String>,
}

impl Generation {
    /// A response carrying text.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            has_content: true,
            block_reason: None,
        }
    }

    /// A refused prompt.
    pub fn blocked(reason: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            has_content: false,
            block_reason: Some(reason.into()),
        }
    }

    /// A response with neither content nor a block reason.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Backend for text generation.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Perform one generation call. Implementations do not retry.
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation>;

    /// Default model used when the caller does not override it.
    fn model_name(&self) -> &str;
}

/// Request to the embedding service.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRequest {
    pub model: String,
    pub text: String,
    /// Task hint, e.g. `RETRIEVAL_DOCUMENT`.
    pub task_type: String,
}

/// Backend for embedding generation.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed one text. Implementations do not retry.
    async fn embed(&self, request: &EmbeddingRequest) -> Result<Vector>;

    /// Expected vector length.
    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;
}

// =============================================================================
// STORE TRAITS
// =============================================================================

/// Repository for project update rows.
#[async_trait]
pub trait UpdateRepository: Send + Sync {
    /// Insert a row. A row with the same `(source_message_link, update_key)`
    /// yields [`SaveOutcome::AlreadyExists`] rather than an error.
    async fn save(&self, update: &NewUpdate) -> Result<SaveOutcome>;

    /// Number of rows stored for a source link.
    async fn count_for_link(&self, link: &str) -> Result<i64>;

    /// Rows without an embedding ordered by id, starting after `after_id`.
    ///
    /// Keyset paging guarantees progress even when some rows keep failing.
    async fn list_missing_embeddings(
        &self,
        project_name: Option<&str>,
        after_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<StoredUpdate>>;

    /// Attach an embedding to an existing row.
    async fn set_embedding(&self, id: Uuid, embedding: &Vector) -> Result<()>;

    /// Rows carrying an embedding, newest first, optionally newer than `since`.
    async fn list_with_embeddings(
        &self,
        since: Option<DateTime<Utc>>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<StoredUpdate>>;
}

/// Vector similarity search over stored updates.
#[async_trait]
pub trait SimilaritySearch: Send + Sync {
    /// Rows whose cosine similarity to `query` is at least `threshold`,
    /// ordered by descending similarity.
    async fn find_similar(
        &self,
        query: &Vector,
        threshold: f64,
        limit: i64,
        exclude_id: Option<Uuid>,
    ) -> Result<Vec<SimilarUpdate>>;
}
