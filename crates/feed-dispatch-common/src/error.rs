//! Error types for feed dispatch
//!
//! Errors fall into two groups. Run-level errors (`RegistryAuth`, `Config`,
//! and any failure of the initial registry fetch) abort a run and are reported
//! to the scheduler. Record-level errors are caught at the feed boundary and
//! end up in that feed's outcome instead of being propagated.

use thiserror::Error;

use crate::types::FeedId;

/// Result type alias for dispatch operations
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Main error type for feed dispatch
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The registry could not be reached, timed out, or answered with a
    /// transient failure (5xx, 408, 429).
    #[error("Registry unavailable: {0}")]
    RegistryUnavailable(String),

    /// The registry rejected the configured credentials.
    #[error("Registry rejected credentials: {0}")]
    RegistryAuth(String),

    /// The registry refused the request itself (malformed query, bad dataset id).
    #[error("Registry rejected request: {0}")]
    RegistryRequest(String),

    #[error("Record not found in registry: {0}")]
    RecordNotFound(FeedId),

    #[error("Invocation failed for feed {feed_id}: {detail}")]
    InvocationFailed { feed_id: FeedId, detail: String },

    #[error("Write-back failed for feed {feed_id} after {attempts} attempt(s): {detail}")]
    WriteBackFailed {
        feed_id: FeedId,
        attempts: u32,
        detail: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatchError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::RegistryUnavailable(_))
    }

    /// Whether the error must abort the whole run rather than a single record.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DispatchError::RegistryAuth(_) | DispatchError::Config(_))
    }

    /// Create a registry-unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::RegistryUnavailable(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
