//! Result recorder
//!
//! Writes the outcome of each attempted feed back to the registry so the next
//! run sees it. Skipped feeds are never written. Transient write failures are
//! retried with backoff; a feed whose write-back still fails is reported as
//! `write-failed` while the other feeds carry on.

use crate::dispatcher::{DispatchOutcome, DispatchResult};
use crate::registry::{AttemptStatus, FeedRegistry, FeedUpdate};
use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use feed_dispatch_common::{DispatchError, FeedId, Result};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommitStatus {
    Committed,
    WriteFailed,
    /// Nothing to write (skipped feed).
    NotWritten,
}

impl CommitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitStatus::Committed => "committed",
            CommitStatus::WriteFailed => "write-failed",
            CommitStatus::NotWritten => "not-written",
        }
    }
}

impl std::fmt::Display for CommitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitEntry {
    pub feed_id: FeedId,
    pub status: CommitStatus,
    pub attempts: u32,
    /// Triggered feeds wait for the downstream to confirm ingestion out of band.
    pub awaiting_confirmation: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommitEntry {
    fn not_written(feed_id: FeedId) -> Self {
        Self {
            feed_id,
            status: CommitStatus::NotWritten,
            attempts: 0,
            awaiting_confirmation: false,
            error: None,
        }
    }
}

/// One entry per committed outcome, in outcome order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    pub entries: Vec<CommitEntry>,
}

impl CommitReport {
    pub fn entry(&self, feed_id: &FeedId) -> Option<&CommitEntry> {
        self.entries.iter().find(|e| &e.feed_id == feed_id)
    }

    pub fn count(&self, status: CommitStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    pub fn committed(&self) -> usize {
        self.count(CommitStatus::Committed)
    }

    pub fn write_failed(&self) -> usize {
        self.count(CommitStatus::WriteFailed)
    }
}

pub struct ResultRecorder<'a> {
    registry: &'a dyn FeedRegistry,
    retry: RetryPolicy,
    concurrency: usize,
}

impl<'a> ResultRecorder<'a> {
    pub fn new(registry: &'a dyn FeedRegistry, retry: RetryPolicy, concurrency: usize) -> Self {
        Self {
            registry,
            retry,
            concurrency: concurrency.max(1),
        }
    }

    /// Write back every attempted outcome.
    ///
    /// Returns `Err` only for a fatal registry error (rejected credentials);
    /// writes that completed before it stand.
    pub async fn commit(&self, outcomes: &[DispatchOutcome]) -> Result<CommitReport> {
        let attempted = outcomes.iter().filter(|o| o.was_attempted()).count();
        info!(outcomes = outcomes.len(), attempted, "Recording dispatch results");

        let mut entries: Vec<(usize, CommitEntry)> = stream::iter(outcomes.iter().enumerate())
            .map(|(index, outcome)| async move {
                let entry = self.commit_one(outcome).await?;
                Ok::<_, DispatchError>((index, entry))
            })
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;

        entries.sort_by_key(|(index, _)| *index);
        let report = CommitReport {
            entries: entries.into_iter().map(|(_, entry)| entry).collect(),
        };

        info!(
            committed = report.committed(),
            write_failed = report.write_failed(),
            "Dispatch results recorded"
        );
        Ok(report)
    }

    async fn commit_one(&self, outcome: &DispatchOutcome) -> Result<CommitEntry> {
        let status = match outcome.result {
            DispatchResult::Skipped => return Ok(CommitEntry::not_written(outcome.feed_id.clone())),
            DispatchResult::Triggered => AttemptStatus::Success,
            DispatchResult::InvocationFailed => AttemptStatus::Failure,
        };

        let update = FeedUpdate::attempt(outcome.invoked_at, status);
        let mut entry = self.write(&outcome.feed_id, &update).await?;
        entry.awaiting_confirmation =
            outcome.result == DispatchResult::Triggered && entry.status == CommitStatus::Committed;
        Ok(entry)
    }

    /// Record that the downstream finished ingesting `feed_id` at `at`.
    #[instrument(skip(self), fields(feed_id = %feed_id))]
    pub async fn confirm_ingestion(&self, feed_id: &FeedId, at: DateTime<Utc>) -> Result<CommitEntry> {
        let entry = self
            .write(feed_id, &FeedUpdate::ingestion_confirmed(at))
            .await?;
        if entry.status == CommitStatus::Committed {
            info!(at = %at, "Ingestion confirmed");
        }
        Ok(entry)
    }

    async fn write(&self, feed_id: &FeedId, update: &FeedUpdate) -> Result<CommitEntry> {
        let (result, attempts) = self
            .retry
            .run("registry write", || self.registry.update(feed_id, update))
            .await;

        match result {
            Ok(()) => {
                debug!(feed_id = %feed_id, attempts, "Write-back committed");
                Ok(CommitEntry {
                    feed_id: feed_id.clone(),
                    status: CommitStatus::Committed,
                    attempts,
                    awaiting_confirmation: false,
                    error: None,
                })
            },
            Err(e) if e.is_fatal() => {
                error!(feed_id = %feed_id, error = %e, "Write-back aborted");
                Err(e)
            },
            Err(e) => {
                let failure = DispatchError::WriteBackFailed {
                    feed_id: feed_id.clone(),
                    attempts,
                    detail: e.to_string(),
                };
                warn!(error = %failure, "Write-back failed");
                Ok(CommitEntry {
                    feed_id: feed_id.clone(),
                    status: CommitStatus::WriteFailed,
                    attempts,
                    awaiting_confirmation: false,
                    error: Some(e.to_string()),
                })
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::eligibility::EligibilityReason;
    use crate::registry::{FeedRecord, InMemoryRegistry};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::time::Duration;

    fn outcome(id: &str, result: DispatchResult) -> DispatchOutcome {
        DispatchOutcome {
            feed_id: FeedId::new(id),
            feed_name: None,
            invoked_at: Utc::now(),
            result,
            reason: EligibilityReason::Stale,
            invocation_id: None,
            error: None,
        }
    }

    fn quick_retry() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    /// Fails the first `failures` writes with a transient error.
    struct Flaky {
        inner: InMemoryRegistry,
        failures: AtomicU32,
    }

    #[async_trait]
    impl FeedRegistry for Flaky {
        async fn fetch(&self, filter: Option<&str>) -> Result<Vec<FeedRecord>> {
            self.inner.fetch(filter).await
        }

        async fn update(&self, id: &FeedId, update: &FeedUpdate) -> Result<()> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(DispatchError::unavailable("503 Service Unavailable"));
            }
            self.inner.update(id, update).await
        }
    }

    /// Counts concurrent writes.
    #[derive(Default)]
    struct SlowWrites {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl FeedRegistry for SlowWrites {
        async fn fetch(&self, _filter: Option<&str>) -> Result<Vec<FeedRecord>> {
            Ok(Vec::new())
        }

        async fn update(&self, _id: &FeedId, _update: &FeedUpdate) -> Result<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Unauthorized;

    #[async_trait]
    impl FeedRegistry for Unauthorized {
        async fn fetch(&self, _filter: Option<&str>) -> Result<Vec<FeedRecord>> {
            Ok(Vec::new())
        }

        async fn update(&self, _id: &FeedId, _update: &FeedUpdate) -> Result<()> {
            Err(DispatchError::RegistryAuth("401 Unauthorized".into()))
        }
    }

    #[tokio::test]
    async fn test_commit_writes_attempt_status() {
        let registry = InMemoryRegistry::with_records([
            FeedRecord::new("ok"),
            FeedRecord::new("bad"),
            FeedRecord::new("idle"),
        ]);
        let outcomes = vec![
            outcome("ok", DispatchResult::Triggered),
            outcome("bad", DispatchResult::InvocationFailed),
            outcome("idle", DispatchResult::Skipped),
        ];

        let report = ResultRecorder::new(&registry, quick_retry(), 4)
            .commit(&outcomes)
            .await
            .unwrap();

        let ok = report.entry(&FeedId::new("ok")).unwrap();
        assert_eq!(ok.status, CommitStatus::Committed);
        assert!(ok.awaiting_confirmation);

        let bad = report.entry(&FeedId::new("bad")).unwrap();
        assert_eq!(bad.status, CommitStatus::Committed);
        assert!(!bad.awaiting_confirmation);

        assert_eq!(report.entry(&FeedId::new("idle")).unwrap().status, CommitStatus::NotWritten);
        assert_eq!(registry.writes(), 2);

        let stored = registry.get(&FeedId::new("bad")).await.unwrap();
        assert_eq!(stored.last_attempt_status, AttemptStatus::Failure);
        assert_eq!(stored.last_success_at, None);

        let stored = registry.get(&FeedId::new("ok")).await.unwrap();
        assert_eq!(stored.last_attempt_status, AttemptStatus::Success);
        assert_eq!(stored.last_success_at, None);
    }

    #[tokio::test]
    async fn test_skipped_only_commit_does_not_write() {
        let registry = InMemoryRegistry::with_records([FeedRecord::new("idle")]);
        let report = ResultRecorder::new(&registry, quick_retry(), 1)
            .commit(&[outcome("idle", DispatchResult::Skipped)])
            .await
            .unwrap();

        assert_eq!(report.count(CommitStatus::NotWritten), 1);
        assert_eq!(registry.writes(), 0);
    }

    #[tokio::test]
    async fn test_transient_write_failure_is_retried() {
        let registry = Flaky {
            inner: InMemoryRegistry::with_records([FeedRecord::new("ok")]),
            failures: AtomicU32::new(2),
        };

        let report = ResultRecorder::new(&registry, quick_retry(), 1)
            .commit(&[outcome("ok", DispatchResult::Triggered)])
            .await
            .unwrap();

        let entry = report.entry(&FeedId::new("ok")).unwrap();
        assert_eq!(entry.status, CommitStatus::Committed);
        assert_eq!(entry.attempts, 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_only_that_feed() {
        let registry = Flaky {
            inner: InMemoryRegistry::with_records([FeedRecord::new("a")]),
            failures: AtomicU32::new(100),
        };

        let report = ResultRecorder::new(&registry, RetryPolicy::new(2, Duration::from_millis(1)), 1)
            .commit(&[
                outcome("a", DispatchResult::Triggered),
                outcome("b", DispatchResult::Skipped),
            ])
            .await
            .unwrap();

        let failed = report.entry(&FeedId::new("a")).unwrap();
        assert_eq!(failed.status, CommitStatus::WriteFailed);
        assert_eq!(failed.attempts, 3);
        assert!(failed.error.as_deref().unwrap().contains("503"));
        assert!(!failed.awaiting_confirmation);
        assert_eq!(report.entry(&FeedId::new("b")).unwrap().status, CommitStatus::NotWritten);
    }

    #[tokio::test]
    async fn test_missing_record_is_not_retried() {
        let registry = InMemoryRegistry::new();

        let report = ResultRecorder::new(&registry, quick_retry(), 1)
            .commit(&[outcome("gone", DispatchResult::Triggered)])
            .await
            .unwrap();

        let entry = report.entry(&FeedId::new("gone")).unwrap();
        assert_eq!(entry.status, CommitStatus::WriteFailed);
        assert_eq!(entry.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_never_exceed_concurrency() {
        let registry = SlowWrites::default();
        let outcomes: Vec<_> = (0..20)
            .map(|i| outcome(&format!("feed-{i}"), DispatchResult::Triggered))
            .collect();

        let report = ResultRecorder::new(&registry, quick_retry(), 3)
            .commit(&outcomes)
            .await
            .unwrap();

        assert_eq!(report.committed(), 20);
        assert_eq!(registry.peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_auth_failure_aborts_commit() {
        let err = ResultRecorder::new(&Unauthorized, quick_retry(), 1)
            .commit(&[outcome("a", DispatchResult::Triggered)])
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::RegistryAuth(_)));
    }

    #[tokio::test]
    async fn test_confirm_ingestion_sets_last_success() {
        let registry = InMemoryRegistry::with_records([FeedRecord::new("ok")]);
        let at = Utc::now();

        let entry = ResultRecorder::new(&registry, quick_retry(), 1)
            .confirm_ingestion(&FeedId::new("ok"), at)
            .await
            .unwrap();

        assert_eq!(entry.status, CommitStatus::Committed);
        let stored = registry.get(&FeedId::new("ok")).await.unwrap();
        assert_eq!(stored.last_success_at, Some(at));
        assert_eq!(stored.last_attempt_status, AttemptStatus::Never);
    }
}
