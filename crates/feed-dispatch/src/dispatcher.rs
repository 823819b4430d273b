//! Ingest dispatcher
//!
//! Invokes the downstream once per due feed through a bounded pool and turns
//! every evaluated record into exactly one [`DispatchOutcome`]. Failures stay
//! with the feed that caused them.

use crate::eligibility::{EligibilityDecision, EligibilityReason};
use crate::invoker::{IngestInvoker, InvocationError, InvocationRequest};
use crate::registry::FeedRecord;
use chrono::{DateTime, Utc};
use feed_dispatch_common::{DispatchError, FeedId};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default size of the invocation pool.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Default bound on a single invocation, in seconds.
pub const DEFAULT_INVOKE_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DispatchResult {
    Triggered,
    InvocationFailed,
    Skipped,
}

impl DispatchResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchResult::Triggered => "triggered",
            DispatchResult::InvocationFailed => "invocation-failed",
            DispatchResult::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for DispatchResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one feed in this run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchOutcome {
    pub feed_id: FeedId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feed_name: Option<String>,
    /// Invocation start, or evaluation time for skipped feeds.
    pub invoked_at: DateTime<Utc>,
    pub result: DispatchResult,
    pub reason: EligibilityReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DispatchOutcome {
    fn skipped(record: &FeedRecord, reason: EligibilityReason, at: DateTime<Utc>) -> Self {
        Self {
            feed_id: record.id.clone(),
            feed_name: record.name.clone(),
            invoked_at: at,
            result: DispatchResult::Skipped,
            reason,
            invocation_id: None,
            error: None,
        }
    }

    /// Whether the downstream was called for this feed.
    pub fn was_attempted(&self) -> bool {
        self.result != DispatchResult::Skipped
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Registry dataset id forwarded to the downstream.
    pub dataset_id: String,
    pub concurrency: usize,
    pub invoke_timeout: Duration,
}

impl DispatcherConfig {
    pub fn new(dataset_id: impl Into<String>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            concurrency: DEFAULT_CONCURRENCY,
            invoke_timeout: Duration::from_secs(DEFAULT_INVOKE_TIMEOUT_SECS),
        }
    }
}

pub struct IngestDispatcher {
    config: DispatcherConfig,
}

impl IngestDispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self { config }
    }

    /// Trigger every due record and return one outcome per input, in input order.
    pub async fn run(
        &self,
        evaluated: Vec<(FeedRecord, EligibilityDecision)>,
        invoker: &dyn IngestInvoker,
    ) -> Vec<DispatchOutcome> {
        let evaluated_at = Utc::now();
        let total = evaluated.len();
        let due = evaluated.iter().filter(|(_, d)| d.due).count();
        let concurrency = self.config.concurrency.max(1);

        info!(total, due, concurrency, "Dispatching due feeds");

        let mut outcomes: Vec<(usize, DispatchOutcome)> = stream::iter(evaluated.into_iter().enumerate())
            .map(|(index, (record, decision))| async move {
                let outcome = if decision.due {
                    self.dispatch_one(&record, decision.reason, invoker).await
                } else {
                    debug!(feed_id = %record.id, feed = record.label(), reason = %decision.reason, "Skipping feed");
                    DispatchOutcome::skipped(&record, decision.reason, evaluated_at)
                };
                (index, outcome)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        outcomes.sort_by_key(|(index, _)| *index);
        outcomes.into_iter().map(|(_, outcome)| outcome).collect()
    }

    async fn dispatch_one(
        &self,
        record: &FeedRecord,
        reason: EligibilityReason,
        invoker: &dyn IngestInvoker,
    ) -> DispatchOutcome {
        let invoked_at = Utc::now();
        let request = InvocationRequest::for_record(record, self.config.dataset_id.clone());

        let result = match tokio::time::timeout(self.config.invoke_timeout, invoker.invoke(&request)).await {
            Ok(result) => result,
            Err(_) => Err(InvocationError::TimedOut(self.config.invoke_timeout)),
        };

        let mut outcome = DispatchOutcome {
            feed_id: record.id.clone(),
            feed_name: record.name.clone(),
            invoked_at,
            result: DispatchResult::Triggered,
            reason,
            invocation_id: None,
            error: None,
        };

        match result {
            Ok(ack) => {
                info!(
                    feed_id = %record.id,
                    feed = record.label(),
                    reason = %reason,
                    invocation_id = ?ack.invocation_id,
                    "Triggered ingestion"
                );
                outcome.invocation_id = ack.invocation_id;
            },
            Err(e) => {
                let err = DispatchError::InvocationFailed {
                    feed_id: record.id.clone(),
                    detail: e.to_string(),
                };
                warn!(feed = record.label(), error = %err, "Could not trigger ingestion");
                outcome.result = DispatchResult::InvocationFailed;
                outcome.error = Some(e.to_string());
            },
        }

        outcome
    }
}
