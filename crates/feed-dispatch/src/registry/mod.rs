//! Feed registry access
//!
//! The registry is the remote table listing every feed with its schedule and
//! ingestion history. [`FeedRegistry`] is the seam the dispatcher talks to;
//! [`SocrataRegistry`] is the production backend and [`InMemoryRegistry`]
//! serves tests and dry runs.

pub mod memory;
pub mod record;
pub mod socrata;

use async_trait::async_trait;
use feed_dispatch_common::{FeedId, Result};

pub use memory::InMemoryRegistry;
pub use record::{AttemptStatus, FeedRecord, FeedUpdate};
pub use socrata::{SocrataCredentials, SocrataRegistry};

/// Read and write access to the feed registry.
#[async_trait]
pub trait FeedRegistry: Send + Sync {
    /// Fetch every record matching `filter`, or all records when `None`.
    ///
    /// Fails with `RegistryUnavailable` when the registry cannot be reached
    /// and `RegistryAuth` when the credentials are rejected.
    async fn fetch(&self, filter: Option<&str>) -> Result<Vec<FeedRecord>>;

    /// Write the populated fields of `update` to the record `id`.
    ///
    /// Fails with `RecordNotFound` when no such record exists. Fields absent
    /// from `update` are left untouched.
    async fn update(&self, id: &FeedId, update: &FeedUpdate) -> Result<()>;
}
