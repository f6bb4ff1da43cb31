//! # dropwatch-inference
//!
//! Generation and embedding backends for dropwatch.
//!
//! This crate provides:
//! - Gemini implementation of the core generation and embedding traits
//! - Extraction prompt templates for both aggregation modes
//! - Bounded, cancellable retry on rate-limit signals
//! - Extraction client and embedding generator built on that retry policy
//! - Scripted mock backends (`mock` feature)

pub mod embedding;
pub mod extraction;
pub mod gemini;
pub mod prompt;
pub mod retry;

// Scripted backends for tests in this and downstream crates
#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use embedding::EmbeddingGenerator;
pub use extraction::ExtractionClient;
pub use gemini::{GeminiBackend, GeminiConfig};
pub use prompt::{activity_labels, PromptBuilder};
pub use retry::RetryPolicy;
