//! Gemini inference backend.
//!
//! Talks to the Generative Language REST API for both text generation
//! (`generateContent`) and embeddings (`embedContent`). Quota errors are
//! surfaced as [`dropwatch_core::Error::RateLimited`] with the suggested
//! retry delay; retrying is left to the caller.
//!
//! # Example
//!
//! ```rust,no_run
//! use dropwatch_core::{GenerationBackend, GenerationRequest};
//! use dropwatch_inference::gemini::GeminiBackend;
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = GeminiBackend::from_env().unwrap();
//!     let request = GenerationRequest {
//!         model: backend.model_name().to_string(),
//!         prompt: "Say hi".to_string(),
//!     };
//!     let generation = backend.generate(&request).await.unwrap();
//!     println!("{}", generation.text);
//! }
//! ```

mod backend;
mod error;
mod types;

pub use backend::{GeminiBackend, GeminiConfig, DEFAULT_GEMINI_URL, DEFAULT_TIMEOUT_SECS};
pub use error::{
    parse_retry_after_header, parse_retry_delay, to_dropwatch_error, GeminiErrorCode, Surface,
};
pub use types::*;
