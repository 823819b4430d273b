//! End-to-end tests for a dispatch run
//!
//! These drive `DispatchRun` against the in-memory registry and a scripted
//! downstream:
//! - Eligibility scenarios
//! - Fatal registry errors
//! - Invocation timeouts and rejections
//! - Write-back failures
//! - Back-to-back runs

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::{
    AuthFailingRegistry, FailingSink, FlakyWrites, RecordingSink, Script, ScriptedInvoker,
};
use feed_dispatch::registry::{AttemptStatus, FeedRecord, InMemoryRegistry};
use feed_dispatch::retry::RetryPolicy;
use feed_dispatch::run::{DispatchRun, FeedStatus, RunSettings};
use feed_dispatch::EligibilityReason;
use feed_dispatch_common::{DispatchError, FeedId};
use serde_json::json;
use std::time::Duration;

fn settings() -> RunSettings {
    let mut settings = RunSettings::new("abcd-1234");
    settings.filter = None;
    settings.write_retry = RetryPolicy::new(2, Duration::from_millis(1));
    settings
}

fn hourly(id: &str) -> FeedRecord {
    FeedRecord::new(id).with_name(format!("Feed {id}")).with_frequency("1h")
}

#[tokio::test]
async fn test_mixed_registry_scenario() {
    let now = Utc::now();
    let registry = InMemoryRegistry::with_records([
        hourly("A"),
        hourly("B").with_last_success(now - ChronoDuration::hours(2)),
        hourly("C").with_last_success(now - ChronoDuration::minutes(6)),
        hourly("D").with_disabled(true),
    ]);
    let invoker = ScriptedInvoker::accepting();

    let report = DispatchRun::new(&registry, &invoker, settings())
        .execute()
        .await
        .unwrap();

    let status = |id: &str| report.feed(&FeedId::new(id)).unwrap().final_status;
    assert_eq!(status("A"), FeedStatus::Triggered);
    assert_eq!(status("B"), FeedStatus::Triggered);
    assert_eq!(status("C"), FeedStatus::Skipped);
    assert_eq!(status("D"), FeedStatus::Skipped);
    assert_eq!(
        report.feed(&FeedId::new("D")).unwrap().reason,
        EligibilityReason::Disabled
    );

    let mut called = invoker.calls();
    called.sort();
    assert_eq!(called, vec![FeedId::new("A"), FeedId::new("B")]);

    assert_eq!(report.summary.total, 4);
    assert_eq!(report.summary.triggered, 2);
    assert_eq!(report.summary.skipped, 2);

    // Only the two attempted feeds are written back.
    assert_eq!(registry.writes(), 2);
    let a = registry.get(&FeedId::new("A")).await.unwrap();
    assert_eq!(a.last_attempt_status, AttemptStatus::Success);
    assert!(a.last_attempt_at.is_some());
    assert_eq!(a.last_success_at, None);
}

#[tokio::test]
async fn test_auth_failure_aborts_before_any_invocation() {
    let invoker = ScriptedInvoker::accepting();

    let err = DispatchRun::new(&AuthFailingRegistry, &invoker, settings())
        .execute()
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::RegistryAuth(_)));
    assert!(err.is_fatal());
    assert_eq!(invoker.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_invocation_is_recorded_as_failure() {
    let registry = InMemoryRegistry::with_records([hourly("E"), hourly("F")]);
    let invoker = ScriptedInvoker::accepting().with("E", Script::Hang);
    let mut settings = settings();
    settings.invoke_timeout = Duration::from_secs(5);

    let report = DispatchRun::new(&registry, &invoker, settings)
        .execute()
        .await
        .unwrap();

    let e = report.feed(&FeedId::new("E")).unwrap();
    assert_eq!(e.final_status, FeedStatus::InvocationFailed);
    assert!(e.error.as_deref().unwrap().contains("timed out"));
    assert_eq!(
        report.feed(&FeedId::new("F")).unwrap().final_status,
        FeedStatus::Triggered
    );

    let stored = registry.get(&FeedId::new("E")).await.unwrap();
    assert_eq!(stored.last_attempt_status, AttemptStatus::Failure);
    assert!(stored.last_attempt_at.is_some());
}

#[tokio::test]
async fn test_one_rejection_does_not_stop_the_others() {
    let records: Vec<_> = (1..=6).map(|i| hourly(&format!("feed-{i}"))).collect();
    let registry = InMemoryRegistry::with_records(records);
    let invoker = ScriptedInvoker::accepting().with("feed-4", Script::Reject("throttled"));

    let report = DispatchRun::new(&registry, &invoker, settings())
        .execute()
        .await
        .unwrap();

    assert_eq!(report.feeds.len(), 6);
    assert_eq!(report.summary.triggered, 5);
    assert_eq!(report.summary.invocation_failed, 1);
    let failed = report.feed(&FeedId::new("feed-4")).unwrap();
    assert_eq!(failed.final_status, FeedStatus::InvocationFailed);
    assert!(failed.error.as_deref().unwrap().contains("throttled"));
    assert_eq!(invoker.call_count(), 6);
}

#[tokio::test]
async fn test_second_run_does_not_retrigger() {
    let now = Utc::now();
    let registry = InMemoryRegistry::with_records([
        hourly("new"),
        hourly("stale").with_last_success(now - ChronoDuration::hours(3)),
        hourly("fresh").with_last_success(now - ChronoDuration::minutes(1)),
    ]);
    let invoker = ScriptedInvoker::accepting();

    let first = DispatchRun::new(&registry, &invoker, settings())
        .execute()
        .await
        .unwrap();
    assert_eq!(first.summary.triggered, 2);
    let writes_after_first = registry.writes();

    let second = DispatchRun::new(&registry, &invoker, settings())
        .execute()
        .await
        .unwrap();

    assert_eq!(invoker.call_count(), 2);
    assert_eq!(second.summary.triggered, 0);
    assert_eq!(second.summary.skipped, 3);
    assert_eq!(
        second.feed(&FeedId::new("new")).unwrap().reason,
        EligibilityReason::RecentlyTriggered
    );
    assert_eq!(registry.writes(), writes_after_first);
}

#[tokio::test]
async fn test_failed_invocation_is_retried_next_run() {
    let registry = InMemoryRegistry::with_records([hourly("flaky")]);

    let rejecting = ScriptedInvoker::accepting().with("flaky", Script::Reject("503"));
    DispatchRun::new(&registry, &rejecting, settings())
        .execute()
        .await
        .unwrap();

    let accepting = ScriptedInvoker::accepting();
    let report = DispatchRun::new(&registry, &accepting, settings())
        .execute()
        .await
        .unwrap();

    assert_eq!(accepting.call_count(), 1);
    assert_eq!(report.summary.triggered, 1);
}

#[tokio::test]
async fn test_write_back_failure_is_reported_per_feed() {
    let registry = FlakyWrites::new(
        InMemoryRegistry::with_records([hourly("ok"), hourly("unlucky")]),
        &["unlucky"],
    );
    let invoker = ScriptedInvoker::accepting();

    let report = DispatchRun::new(&registry, &invoker, settings())
        .execute()
        .await
        .unwrap();

    let unlucky = report.feed(&FeedId::new("unlucky")).unwrap();
    assert_eq!(unlucky.final_status, FeedStatus::WriteFailed);
    assert!(unlucky.invocation_id.is_some());
    assert!(unlucky.write_error.as_deref().unwrap().contains("503"));
    assert_eq!(
        report.feed(&FeedId::new("ok")).unwrap().final_status,
        FeedStatus::Triggered
    );
    assert_eq!(report.summary.write_failed, 1);
    // One attempt plus two retries.
    assert_eq!(registry.failed_writes.load(std::sync::atomic::Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_filter_limits_the_registry_snapshot() {
    let registry = InMemoryRegistry::with_records([
        hourly("on").with_metadata("active", json!(true)),
        hourly("off").with_metadata("active", json!(false)),
    ]);
    let invoker = ScriptedInvoker::accepting();

    let report = DispatchRun::new(&registry, &invoker, RunSettings::new("abcd-1234"))
        .execute()
        .await
        .unwrap();

    assert_eq!(report.feeds.len(), 1);
    assert_eq!(invoker.calls(), vec![FeedId::new("on")]);
}

#[tokio::test]
async fn test_run_log_receives_report() {
    let registry = InMemoryRegistry::with_records([hourly("A")]);
    let invoker = ScriptedInvoker::accepting();
    let sink = RecordingSink::default();

    let report = DispatchRun::new(&registry, &invoker, settings())
        .with_run_log(&sink)
        .execute()
        .await
        .unwrap();

    let logged = sink.reports.lock().unwrap();
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].run_id, report.run_id);
    assert_eq!(logged[0].dataset_id, "abcd-1234");
}

#[tokio::test]
async fn test_run_log_failure_does_not_fail_run() {
    let registry = InMemoryRegistry::with_records([hourly("A")]);
    let invoker = ScriptedInvoker::accepting();

    let report = DispatchRun::new(&registry, &invoker, settings())
        .with_run_log(&FailingSink)
        .execute()
        .await
        .unwrap();

    assert_eq!(report.summary.triggered, 1);
}

#[tokio::test]
async fn test_empty_registry_is_a_successful_run() {
    let registry = InMemoryRegistry::new();
    let invoker = ScriptedInvoker::accepting();

    let report = DispatchRun::new(&registry, &invoker, settings())
        .execute()
        .await
        .unwrap();

    assert_eq!(report.summary.total, 0);
    assert_eq!(registry.writes(), 0);
    assert_eq!(invoker.call_count(), 0);
}
