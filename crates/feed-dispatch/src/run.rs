//! One dispatch run
//!
//! fetch → evaluate → dispatch → commit, then an optional run-log entry. A run
//! visits every registry record once and never loops; the next scheduled run
//! starts again from fresh registry state.

use crate::dispatcher::{DispatchOutcome, DispatchResult, DispatcherConfig, IngestDispatcher};
use crate::eligibility::{self, EligibilityDecision, EligibilityReason};
use crate::invoker::IngestInvoker;
use crate::recorder::{CommitReport, CommitStatus, ResultRecorder};
use crate::registry::{FeedRecord, FeedRegistry};
use crate::retry::RetryPolicy;
use crate::run_log::RunLogSink;
use chrono::{DateTime, Utc};
use feed_dispatch_common::{FeedId, Result};
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Registry filter applied when none is configured.
pub const DEFAULT_FILTER: &str = "active = true";

// ============================================================================
// Report
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeedStatus {
    Triggered,
    Skipped,
    InvocationFailed,
    /// Triggered, but the attempt could not be recorded.
    WriteFailed,
}

impl FeedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedStatus::Triggered => "triggered",
            FeedStatus::Skipped => "skipped",
            FeedStatus::InvocationFailed => "invocation-failed",
            FeedStatus::WriteFailed => "write-failed",
        }
    }
}

impl std::fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedReport {
    pub feed_id: FeedId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feed_name: Option<String>,
    pub final_status: FeedStatus,
    pub reason: EligibilityReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
    /// Invocation error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_error: Option<String>,
}

impl FeedReport {
    fn from_outcome(outcome: DispatchOutcome, commit: &CommitReport) -> Self {
        let write_error = commit
            .entry(&outcome.feed_id)
            .filter(|entry| entry.status == CommitStatus::WriteFailed)
            .and_then(|entry| entry.error.clone());

        let final_status = match outcome.result {
            DispatchResult::Skipped => FeedStatus::Skipped,
            DispatchResult::InvocationFailed => FeedStatus::InvocationFailed,
            DispatchResult::Triggered if write_error.is_some() => FeedStatus::WriteFailed,
            DispatchResult::Triggered => FeedStatus::Triggered,
        };

        Self {
            feed_id: outcome.feed_id,
            feed_name: outcome.feed_name,
            final_status,
            reason: outcome.reason,
            invocation_id: outcome.invocation_id,
            error: outcome.error,
            write_error,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub triggered: usize,
    pub skipped: usize,
    pub invocation_failed: usize,
    pub write_failed: usize,
}

impl RunSummary {
    fn tally(feeds: &[FeedReport]) -> Self {
        let mut summary = Self {
            total: feeds.len(),
            ..Self::default()
        };
        for feed in feeds {
            match feed.final_status {
                FeedStatus::Triggered => summary.triggered += 1,
                FeedStatus::Skipped => summary.skipped += 1,
                FeedStatus::InvocationFailed => summary.invocation_failed += 1,
                FeedStatus::WriteFailed => summary.write_failed += 1,
            }
        }
        summary
    }
}

/// Final status of a run, one entry per registry record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub dataset_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub summary: RunSummary,
    pub feeds: Vec<FeedReport>,
}

impl RunReport {
    pub fn feed(&self, feed_id: &FeedId) -> Option<&FeedReport> {
        self.feeds.iter().find(|f| &f.feed_id == feed_id)
    }
}

// ============================================================================
// Run
// ============================================================================

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub dataset_id: String,
    /// SoQL `$where` clause; `None` fetches every row.
    pub filter: Option<String>,
    pub concurrency: usize,
    pub invoke_timeout: Duration,
    pub write_retry: RetryPolicy,
}

impl RunSettings {
    pub fn new(dataset_id: impl Into<String>) -> Self {
        let dispatcher = DispatcherConfig::new(dataset_id);
        Self {
            dataset_id: dispatcher.dataset_id,
            filter: Some(DEFAULT_FILTER.to_string()),
            concurrency: dispatcher.concurrency,
            invoke_timeout: dispatcher.invoke_timeout,
            write_retry: RetryPolicy::default(),
        }
    }

    fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            dataset_id: self.dataset_id.clone(),
            concurrency: self.concurrency,
            invoke_timeout: self.invoke_timeout,
        }
    }
}

pub struct DispatchRun<'a> {
    registry: &'a dyn FeedRegistry,
    invoker: &'a dyn IngestInvoker,
    run_log: Option<&'a dyn RunLogSink>,
    settings: RunSettings,
}

impl<'a> DispatchRun<'a> {
    pub fn new(
        registry: &'a dyn FeedRegistry,
        invoker: &'a dyn IngestInvoker,
        settings: RunSettings,
    ) -> Self {
        Self {
            registry,
            invoker,
            run_log: None,
            settings,
        }
    }

    pub fn with_run_log(mut self, sink: &'a dyn RunLogSink) -> Self {
        self.run_log = Some(sink);
        self
    }

    /// Execute one run.
    ///
    /// Fails only when the registry cannot be read or rejects the credentials;
    /// per-feed failures are part of the returned report.
    #[instrument(skip_all, fields(dataset_id = %self.settings.dataset_id))]
    pub async fn execute(&self) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, "Starting dispatch run");

        let records = self.fetch().await?;
        let evaluated = eligibility::evaluate(records, Utc::now());

        let outcomes = IngestDispatcher::new(self.settings.dispatcher_config())
            .run(evaluated, self.invoker)
            .await;

        let commit = ResultRecorder::new(
            self.registry,
            self.settings.write_retry,
            self.settings.concurrency,
        )
        .commit(&outcomes)
        .await
        .inspect_err(|e| error!(%run_id, error = %e, "Aborting run during write-back"))?;

        let feeds: Vec<FeedReport> = outcomes
            .into_iter()
            .map(|outcome| FeedReport::from_outcome(outcome, &commit))
            .collect();

        let report = RunReport {
            run_id,
            dataset_id: self.settings.dataset_id.clone(),
            started_at,
            finished_at: Utc::now(),
            summary: RunSummary::tally(&feeds),
            feeds,
        };

        if let Some(sink) = self.run_log {
            if let Err(e) = sink.record(&report).await {
                warn!(%run_id, error = %e, "Could not write run log");
            }
        }

        let summary = &report.summary;
        info!(
            %run_id,
            total = summary.total,
            triggered = summary.triggered,
            skipped = summary.skipped,
            invocation_failed = summary.invocation_failed,
            write_failed = summary.write_failed,
            "Dispatch run complete"
        );

        Ok(report)
    }

    async fn fetch(&self) -> Result<Vec<FeedRecord>> {
        self.registry
            .fetch(self.settings.filter.as_deref())
            .await
            .inspect_err(|e| error!(error = %e, "Could not read feed registry"))
    }
}

/// Fetch and evaluate without invoking anything or writing back.
#[instrument(skip(registry))]
pub async fn preview(
    registry: &dyn FeedRegistry,
    filter: Option<&str>,
) -> Result<Vec<(FeedRecord, EligibilityDecision)>> {
    let records = registry.fetch(filter).await?;
    let evaluated = eligibility::evaluate(records, Utc::now());
    let due = evaluated.iter().filter(|(_, d)| d.due).count();
    info!(total = evaluated.len(), due, "Dry run evaluated registry");
    Ok(evaluated)
}
