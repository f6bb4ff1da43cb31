//! # dropwatch-pipeline
//!
//! Message extraction, deduplication and persistence pipeline for dropwatch.
//!
//! This crate provides:
//! - Input normalization and response parsing/validation
//! - Whole-message and per-update aggregation
//! - Embedding-based duplicate flagging and idempotent persistence
//! - A sequential batch runner with events and graceful shutdown
//! - Embedding backfill and the related-updates report
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use dropwatch_core::shutdown_channel;
//! use dropwatch_db::Database;
//! use dropwatch_inference::GeminiBackend;
//! use dropwatch_pipeline::{
//!     BatchRunner, JsonlMessageSource, MessageProcessor, PipelineConfig, PipelineContext,
//! };
//!
//! let db = Database::connect("postgres://...").await?;
//! let gemini = Arc::new(GeminiBackend::from_env()?);
//! let repo = Arc::new(db.updates.clone());
//! let (trigger, signal) = shutdown_channel();
//!
//! let ctx = PipelineContext::new(
//!     PipelineConfig::from_env()?,
//!     gemini.clone(),
//!     gemini,
//!     repo.clone(),
//!     repo,
//!     signal,
//! )?;
//! let runner = BatchRunner::new(MessageProcessor::new(ctx), trigger);
//! let source = JsonlMessageSource::load_historical("messages.jsonl").await?;
//!
//! let handle = runner.start(source);
//! let summary = handle.wait().await?;
//! ```

pub mod aggregate;
pub mod config;
pub mod dedup;
pub mod maintenance;
pub mod normalize;
pub mod parser;
pub mod processor;
pub mod runner;
pub mod source;

// Re-export core types
pub use dropwatch_core::*;

pub use aggregate::{aggregate, update_key};
pub use config::PipelineConfig;
pub use dedup::DuplicateDetector;
pub use maintenance::{
    backfill_embeddings, related_updates, BackfillReport, RelatedGroup, RelatedOptions,
};
pub use normalize::{normalize, Normalization, Normalized, SkipReason};
pub use parser::ResponseParser;
pub use processor::{MessageOutcome, MessageProcessor, PersistReport, PipelineContext};
pub use runner::{BatchRunner, RunSummary, RunnerEvent, RunnerHandle};
pub use source::{JsonlMessageSource, MessageSource, VecMessageSource};
