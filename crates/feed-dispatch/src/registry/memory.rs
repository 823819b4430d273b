//! In-memory feed registry
//!
//! Holds records in a map keyed by feed id. Filters support the single-clause
//! form the dispatcher uses by default, `<column> = <literal>`, evaluated
//! against the record's registry row.

use crate::registry::record::{FeedRecord, FeedUpdate};
use crate::registry::FeedRegistry;
use async_trait::async_trait;
use feed_dispatch_common::{DispatchError, FeedId, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    records: RwLock<BTreeMap<FeedId, FeedRecord>>,
    writes: AtomicUsize,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = FeedRecord>) -> Self {
        let map = records.into_iter().map(|r| (r.id.clone(), r)).collect();
        Self {
            records: RwLock::new(map),
            writes: AtomicUsize::new(0),
        }
    }

    /// Insert or replace a record.
    pub async fn insert(&self, record: FeedRecord) {
        self.records.write().await.insert(record.id.clone(), record);
    }

    pub async fn get(&self, id: &FeedId) -> Option<FeedRecord> {
        self.records.read().await.get(id).cloned()
    }

    /// Number of successful updates applied so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedRegistry for InMemoryRegistry {
    async fn fetch(&self, filter: Option<&str>) -> Result<Vec<FeedRecord>> {
        let clause = filter.map(Clause::parse).transpose()?;
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|record| clause.as_ref().map_or(true, |c| c.matches(record)))
            .cloned()
            .collect())
    }

    async fn update(&self, id: &FeedId, update: &FeedUpdate) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| DispatchError::RecordNotFound(id.clone()))?;
        update.apply_to(record);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// `<column> = <literal>` where the literal is `true`, `false`, a number, or a
/// single-quoted string.
#[derive(Debug)]
struct Clause {
    column: String,
    expected: Value,
}

impl Clause {
    fn parse(filter: &str) -> Result<Self> {
        let unsupported = || DispatchError::RegistryRequest(format!("unsupported filter: {filter}"));

        let (column, literal) = filter.split_once('=').ok_or_else(unsupported)?;
        let column = column.trim();
        let literal = literal.trim();
        if column.is_empty() || column.contains(char::is_whitespace) {
            return Err(unsupported());
        }

        let expected = match literal {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            quoted if quoted.len() >= 2 && quoted.starts_with('\'') && quoted.ends_with('\'') => {
                Value::String(quoted[1..quoted.len() - 1].to_string())
            },
            number => serde_json::from_str::<serde_json::Number>(number)
                .map(Value::Number)
                .map_err(|_| unsupported())?,
        };

        Ok(Self {
            column: column.to_string(),
            expected,
        })
    }

    fn matches(&self, record: &FeedRecord) -> bool {
        let row = record.row();
        match (row.get(&self.column), &self.expected) {
            (Some(actual), expected) if actual == expected => true,
            // Socrata returns checkbox and number columns as text in some exports.
            (Some(Value::String(actual)), Value::Bool(b)) => actual.eq_ignore_ascii_case(&b.to_string()),
            (Some(Value::String(actual)), Value::Number(n)) => actual == &n.to_string(),
            _ => false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::registry::record::AttemptStatus;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn registry() -> InMemoryRegistry {
        InMemoryRegistry::with_records([
            FeedRecord::new("a").with_metadata("active", json!(true)),
            FeedRecord::new("b").with_metadata("active", json!(false)),
            FeedRecord::new("c").with_metadata("state", json!("IA")),
        ])
    }

    #[tokio::test]
    async fn test_fetch_all_without_filter() {
        let records = registry().fetch(None).await.unwrap();
        assert_eq!(records.len(), 3);
    }

    #[tokio::test]
    async fn test_fetch_applies_equality_filter() {
        let registry = registry();

        let active = registry.fetch(Some("active = true")).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, FeedId::new("a"));

        let iowa = registry.fetch(Some("state = 'IA'")).await.unwrap();
        assert_eq!(iowa.len(), 1);
        assert_eq!(iowa[0].id, FeedId::new("c"));
    }

    #[tokio::test]
    async fn test_unsupported_filter_is_a_request_error() {
        let err = registry().fetch(Some("active = true AND x > 3")).await.unwrap_err();
        assert!(matches!(err, DispatchError::RegistryRequest(_)));
    }

    #[tokio::test]
    async fn test_update_applies_and_counts() {
        let registry = registry();
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let id = FeedId::new("a");

        registry
            .update(&id, &FeedUpdate::attempt(at, AttemptStatus::Success))
            .await
            .unwrap();

        let stored = registry.get(&id).await.unwrap();
        assert_eq!(stored.last_attempt_at, Some(at));
        assert_eq!(stored.last_attempt_status, AttemptStatus::Success);
        assert_eq!(registry.writes(), 1);
    }

    #[tokio::test]
    async fn test_update_unknown_record() {
        let err = registry()
            .update(&FeedId::new("missing"), &FeedUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::RecordNotFound(id) if id.as_str() == "missing"));
    }
}
