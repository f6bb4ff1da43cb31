//! # dropwatch-core
//!
//! Core types, traits, and abstractions for dropwatch.
//!
//! This crate provides the data structures, error type and trait seams that
//! the inference, database and pipeline crates depend on.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod shutdown;
pub mod timestamp;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, ParseError, Result};
pub use models::*;
pub use shutdown::{shutdown_channel, ShutdownSignal, ShutdownTrigger};
pub use timestamp::{from_serial, normalize_timestamp, MessageTimestamp, RawTimestamp};
pub use traits::*;
