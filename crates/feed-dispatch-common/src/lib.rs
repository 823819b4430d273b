//! Feed Dispatch Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, error handling and logging for the feed-dispatch workspace.
//!
//! # Overview
//!
//! - **Error Handling**: the dispatch error taxonomy and its result alias
//! - **Logging**: `tracing` subscriber setup driven by environment variables
//! - **Types**: feed identifiers and declared update frequencies
//!
//! # Example
//!
//! ```no_run
//! use feed_dispatch_common::{DispatchError, FeedId, Result, UpdateFrequency};
//!
//! fn frequency_of(id: &FeedId, raw: &str) -> Result<UpdateFrequency> {
//!     UpdateFrequency::parse(raw)
//!         .ok_or_else(|| DispatchError::Config(format!("feed {id} has no usable frequency")))
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{DispatchError, Result};
pub use types::{FeedId, UpdateFrequency};
