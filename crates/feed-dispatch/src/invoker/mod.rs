//! Downstream ingestion trigger
//!
//! The dispatcher only needs "accepted or not" from the downstream, plus an
//! optional tracking id. Completion of the ingestion itself is reported back
//! to the registry by the downstream, not observed here.

pub mod lambda;

use crate::registry::FeedRecord;
use async_trait::async_trait;
use feed_dispatch_common::FeedId;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;

pub use lambda::LambdaInvoker;

/// Payload handed to the downstream for one feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationRequest {
    #[serde(skip)]
    pub feed_id: FeedId,
    /// Full registry row, including `:id`, so the downstream can write back.
    pub feed: Map<String, Value>,
    pub dataset_id: String,
}

impl InvocationRequest {
    pub fn for_record(record: &FeedRecord, dataset_id: impl Into<String>) -> Self {
        Self {
            feed_id: record.id.clone(),
            feed: record.row(),
            dataset_id: dataset_id.into(),
        }
    }

    /// Serialized body: `{"feed": {...}, "dataset_id": "..."}`.
    pub fn payload(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationAck {
    pub invocation_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum InvocationError {
    /// The downstream answered and refused the request.
    #[error("downstream rejected invocation: {0}")]
    Rejected(String),

    #[error("invocation transport error: {0}")]
    Transport(String),

    #[error("invocation timed out after {0:?}")]
    TimedOut(Duration),
}

#[async_trait]
pub trait IngestInvoker: Send + Sync {
    /// Ask the downstream to ingest one feed; returns once it is accepted.
    async fn invoke(&self, request: &InvocationRequest) -> Result<InvocationAck, InvocationError>;
}
