//! Ingestion eligibility policy
//!
//! Pure decision logic: given a registry snapshot and the current time, decide
//! whether each feed should be triggered in this run. Nothing here performs I/O.
//!
//! Checks are applied in this order, first match wins:
//!
//! 1. `disabled` flag set: never due
//! 2. last attempt accepted less than one frequency ago: not due (`recently-triggered`)
//! 3. no successful ingestion yet: due (`never-ingested`)
//! 4. no usable frequency: not due (`recently-succeeded`)
//! 5. frequency elapsed since the last success: due (`stale`), else `recently-succeeded`
//!
//! A frequency of `None` never re-triggers a feed that has succeeded once.

use crate::registry::{AttemptStatus, FeedRecord};
use chrono::{DateTime, Duration, Utc};
use feed_dispatch_common::FeedId;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EligibilityReason {
    NeverIngested,
    Stale,
    RecentlySucceeded,
    /// An accepted trigger is still within its frequency window.
    RecentlyTriggered,
    Disabled,
}

impl EligibilityReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EligibilityReason::NeverIngested => "never-ingested",
            EligibilityReason::Stale => "stale",
            EligibilityReason::RecentlySucceeded => "recently-succeeded",
            EligibilityReason::RecentlyTriggered => "recently-triggered",
            EligibilityReason::Disabled => "disabled",
        }
    }
}

impl std::fmt::Display for EligibilityReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EligibilityDecision {
    pub feed_id: FeedId,
    pub due: bool,
    pub reason: EligibilityReason,
}

impl EligibilityDecision {
    fn new(record: &FeedRecord, due: bool, reason: EligibilityReason) -> Self {
        Self {
            feed_id: record.id.clone(),
            due,
            reason,
        }
    }
}

/// Time since `then`; a timestamp in the future counts as nothing elapsed.
fn elapsed_since(now: DateTime<Utc>, then: DateTime<Utc>) -> Duration {
    (now - then).max(Duration::zero())
}

pub fn is_due(record: &FeedRecord, now: DateTime<Utc>) -> EligibilityDecision {
    use EligibilityReason::*;

    if record.disabled {
        return EligibilityDecision::new(record, false, Disabled);
    }

    let frequency = record.update_frequency().map(|f| f.as_duration());

    if record.last_attempt_status == AttemptStatus::Success {
        if let Some(attempted_at) = record.last_attempt_at {
            let in_window = frequency.map_or(true, |freq| elapsed_since(now, attempted_at) < freq);
            if in_window {
                return EligibilityDecision::new(record, false, RecentlyTriggered);
            }
        }
    }

    let Some(last_success) = record.last_success_at else {
        return EligibilityDecision::new(record, true, NeverIngested);
    };

    match frequency {
        Some(freq) if elapsed_since(now, last_success) >= freq => {
            EligibilityDecision::new(record, true, Stale)
        },
        _ => EligibilityDecision::new(record, false, RecentlySucceeded),
    }
}

/// Decide every record of a snapshot, keeping each record next to its decision.
pub fn evaluate(
    records: Vec<FeedRecord>,
    now: DateTime<Utc>,
) -> Vec<(FeedRecord, EligibilityDecision)> {
    records
        .into_iter()
        .map(|record| {
            let decision = is_due(&record, now);
            (record, decision)
        })
        .collect()
}
