//! Scripted inference backends for deterministic testing.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dropwatch_inference::mock::{MockGenerationBackend, MockReply};
//!
//! let backend = MockGenerationBackend::new()
//!     .with_reply(MockReply::RateLimited(None))
//!     .with_reply(MockReply::Text("{\"identified_projects\": []}".into()));
//! ```

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use dropwatch_core::{
    EmbeddingBackend, EmbeddingRequest, Error, Generation, GenerationBackend, GenerationRequest,
    Result, Vector,
};

/// One scripted generation outcome.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Content with the given text.
    Text(String),
    /// No content, with a block reason.
    Blocked(String),
    /// No content and no block reason.
    Empty,
    /// Quota error with an optional suggested delay.
    RateLimited(Option<Duration>),
    /// Non-retryable remote failure.
    Fail(String),
}

impl MockReply {
    fn to_result(&self) -> Result<Generation> {
        match self {
            MockReply::Text(text) => Ok(Generation::text(text.clone())),
            MockReply::Blocked(reason) => Ok(Generation::blocked(reason.clone())),
            MockReply::Empty => Ok(Generation::empty()),
            MockReply::RateLimited(wait) => Err(Error::RateLimited {
                message: "mock quota exhausted".to_string(),
                retry_after: *wait,
            }),
            MockReply::Fail(msg) => Err(Error::Inference(msg.clone())),
        }
    }
}

#[derive(Debug, Default)]
struct GenerationState {
    queue: VecDeque<MockReply>,
    fallback: Option<MockReply>,
    calls: Vec<GenerationRequest>,
}

/// Generation backend replaying a queue of scripted replies.
///
/// Once the queue drains, the `always` reply is used; without one, the
/// backend answers with an empty project list.
#[derive(Clone, Default)]
pub struct MockGenerationBackend {
    state: Arc<Mutex<GenerationState>>,
}

impl MockGenerationBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one reply.
    pub fn with_reply(self, reply: MockReply) -> Self {
        self.lock().queue.push_back(reply);
        self
    }

    /// Reply used whenever the queue is empty.
    pub fn always(self, reply: MockReply) -> Self {
        self.lock().fallback = Some(reply);
        self
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.lock().calls.iter().map(|c| c.prompt.clone()).collect()
    }

    pub fn models(&self) -> Vec<String> {
        self.lock().calls.iter().map(|c| c.model.clone()).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GenerationState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl GenerationBackend for MockGenerationBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation> {
        let reply = {
            let mut state = self.lock();
            state.calls.push(request.clone());
            state
                .queue
                .pop_front()
                .or_else(|| state.fallback.clone())
                .unwrap_or_else(|| MockReply::Text("{\"identified_projects\": []}".to_string()))
        };
        reply.to_result()
    }

    fn model_name(&self) -> &str {
        "mock-gen"
    }
}

#[derive(Debug, Default)]
struct EmbeddingState {
    calls: Vec<EmbeddingRequest>,
    rate_limited_remaining: usize,
}

/// Embedding backend producing deterministic pseudo-random unit vectors.
///
/// Identical texts map to identical vectors; distinct texts are nearly
/// orthogonal. Specific texts can be pinned to chosen vectors.
#[derive(Clone)]
pub struct MockEmbeddingBackend {
    dimension: usize,
    reported_dimension: Option<usize>,
    fail: bool,
    pinned: Arc<HashMap<String, Vec<f32>>>,
    state: Arc<Mutex<EmbeddingState>>,
}

impl Default for MockEmbeddingBackend {
    fn default() -> Self {
        Self {
            dimension: 64,
            reported_dimension: None,
            fail: false,
            pinned: Arc::new(HashMap::new()),
            state: Arc::new(Mutex::new(EmbeddingState::default())),
        }
    }
}

impl MockEmbeddingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    /// Report a different dimension than the one produced.
    pub fn with_reported_dimension(mut self, dimension: usize) -> Self {
        self.reported_dimension = Some(dimension);
        self
    }

    /// Return `vector` whenever the input text equals `text`.
    pub fn with_vector(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        Arc::make_mut(&mut self.pinned).insert(text.into(), vector);
        self
    }

    /// Fail every call with a non-retryable error.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Answer the next `n` calls with a rate-limit error.
    pub fn rate_limited_times(self, n: usize) -> Self {
        self.lock().rate_limited_remaining = n;
        self
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    pub fn texts(&self) -> Vec<String> {
        self.lock().calls.iter().map(|c| c.text.clone()).collect()
    }

    pub fn task_types(&self) -> Vec<String> {
        self.lock().calls.iter().map(|c| c.task_type.clone()).collect()
    }

    /// The vector this backend produces for `text`.
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        if let Some(v) = self.pinned.get(text) {
            return v.clone();
        }
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let mut seed = hasher.finish() | 1;

        let mut values: Vec<f32> = (0..self.dimension)
            .map(|_| {
                // xorshift64
                seed ^= seed << 13;
                seed ^= seed >> 7;
                seed ^= seed << 17;
                ((seed >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0) as f32
            })
            .collect();
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            values.iter_mut().for_each(|v| *v /= norm);
        }
        values
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EmbeddingState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl EmbeddingBackend for MockEmbeddingBackend {
    async fn embed(&self, request: &EmbeddingRequest) -> Result<Vector> {
        {
            let mut state = self.lock();
            state.calls.push(request.clone());
            if state.rate_limited_remaining > 0 {
                state.rate_limited_remaining -= 1;
                return Err(Error::RateLimited {
                    message: "mock quota exhausted".to_string(),
                    retry_after: Some(Duration::from_secs(1)),
                });
            }
        }
        if self.fail {
            return Err(Error::Embedding("mock embedding failure".to_string()));
        }
        Ok(Vector::from(self.vector_for(&request.text)))
    }

    fn dimension(&self) -> usize {
        self.reported_dimension.unwrap_or(self.dimension)
    }

    fn model_name(&self) -> &str {
        "mock-embed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_vectors_are_unit_length() {
        let mock = MockEmbeddingBackend::new();
        let v = mock.vector_for("anything");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_distinct_texts_not_similar() {
        let mock = MockEmbeddingBackend::new();
        let a = mock.vector_for("Project: Alpha, Activity: Testnet");
        let b = mock.vector_for("Project: Beta, Activity: Vote");
        assert!(cosine(&a, &b) < 0.8);
    }

    #[test]
    fn test_pinned_vector_used() {
        let mock = MockEmbeddingBackend::new().with_vector("x", vec![1.0, 0.0]);
        assert_eq!(mock.vector_for("x"), vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn test_generation_queue_then_default() {
        let mock = MockGenerationBackend::new().with_reply(MockReply::Text("first".into()));
        let req = GenerationRequest {
            model: "m".into(),
            prompt: "p".into(),
        };
        assert_eq!(mock.generate(&req).await.unwrap().text, "first");
        let second = mock.generate(&req).await.unwrap();
        assert!(second.text.contains("identified_projects"));
        assert_eq!(mock.call_count(), 2);
    }
}
