//! Registry rows and partial updates
//!
//! A [`FeedRecord`] is an immutable snapshot of one registry row. Only the
//! columns the dispatcher reasons about are typed; every other column is kept
//! in `metadata`. The row exactly as fetched is kept alongside and is what the
//! downstream ingester receives.

use chrono::{DateTime, NaiveDateTime, Utc};
use feed_dispatch_common::{FeedId, UpdateFrequency};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

// ============================================================================
// Registry Columns
// ============================================================================

/// Socrata system row identifier.
pub const ID_COLUMN: &str = ":id";
pub const NAME_COLUMN: &str = "feedname";
pub const URL_COLUMN: &str = "url";
pub const FREQUENCY_COLUMN: &str = "datafeed_frequency_update";
pub const LAST_SUCCESS_COLUMN: &str = "lastingestedtosandbox";
pub const LAST_ATTEMPT_AT_COLUMN: &str = "lastattemptedat";
pub const LAST_ATTEMPT_STATUS_COLUMN: &str = "lastattemptstatus";
pub const DISABLED_COLUMN: &str = "disabled";
pub const ACTIVE_COLUMN: &str = "active";

/// Socrata floating timestamp layout used on write.
const FLOATING_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// Status of the most recent trigger attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    #[default]
    Never,
    /// The downstream accepted the trigger.
    Success,
    Failure,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Never => "never",
            AttemptStatus::Success => "success",
            AttemptStatus::Failure => "failure",
        }
    }
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AttemptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "never" => Ok(AttemptStatus::Never),
            "success" => Ok(AttemptStatus::Success),
            "failure" | "failed" => Ok(AttemptStatus::Failure),
            other => Err(format!("unknown attempt status '{other}'")),
        }
    }
}

/// Why a registry row could not become a [`FeedRecord`].
#[derive(Debug, thiserror::Error)]
pub enum RowError {
    #[error("row has no ':id' column; was it fetched with system fields?")]
    MissingId,
}

/// One feed as read from the registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedRecord {
    pub id: FeedId,
    pub name: Option<String>,
    pub source_url: Option<String>,
    /// Declared update frequency as stored; see [`FeedRecord::update_frequency`].
    pub declared_frequency: Option<String>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_attempt_status: AttemptStatus,
    pub disabled: bool,
    /// Every column not listed above, passed through unmodified.
    pub metadata: Map<String, Value>,
    /// The row as fetched. Empty for records built in code.
    #[serde(skip)]
    fetched: Map<String, Value>,
}

impl FeedRecord {
    pub fn new(id: impl Into<FeedId>) -> Self {
        Self {
            id: id.into(),
            name: None,
            source_url: None,
            declared_frequency: None,
            last_success_at: None,
            last_attempt_at: None,
            last_attempt_status: AttemptStatus::Never,
            disabled: false,
            metadata: Map::new(),
            fetched: Map::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_frequency(mut self, frequency: impl Into<String>) -> Self {
        self.declared_frequency = Some(frequency.into());
        self
    }

    pub fn with_last_success(mut self, at: DateTime<Utc>) -> Self {
        self.last_success_at = Some(at);
        self
    }

    pub fn with_last_attempt(mut self, at: DateTime<Utc>, status: AttemptStatus) -> Self {
        self.last_attempt_at = Some(at);
        self.last_attempt_status = status;
        self
    }

    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn with_metadata(mut self, column: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(column.into(), value);
        self
    }

    /// Parsed update frequency, `None` when absent, malformed or non-positive.
    pub fn update_frequency(&self) -> Option<UpdateFrequency> {
        self.declared_frequency.as_deref().and_then(UpdateFrequency::parse)
    }

    /// Label for log lines: the feed name when the registry has one.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.id.as_str())
    }

    /// Build a record from a raw registry row.
    ///
    /// Malformed timestamps and statuses are logged and treated as absent so
    /// that one bad row cannot stop a run.
    pub fn from_row(mut row: Map<String, Value>) -> Result<Self, RowError> {
        let fetched = row.clone();
        let id = match row.remove(ID_COLUMN) {
            Some(Value::String(id)) if !id.is_empty() => FeedId::new(id),
            _ => return Err(RowError::MissingId),
        };

        let name = row.remove(NAME_COLUMN).and_then(text);
        let source_url = row.remove(URL_COLUMN).and_then(text);
        let declared_frequency = row.remove(FREQUENCY_COLUMN).and_then(text);

        let last_success_at = timestamp_column(&id, LAST_SUCCESS_COLUMN, row.remove(LAST_SUCCESS_COLUMN));
        let last_attempt_at =
            timestamp_column(&id, LAST_ATTEMPT_AT_COLUMN, row.remove(LAST_ATTEMPT_AT_COLUMN));

        let last_attempt_status = match row.remove(LAST_ATTEMPT_STATUS_COLUMN).and_then(text) {
            None => AttemptStatus::Never,
            Some(raw) => raw.parse().unwrap_or_else(|e: String| {
                warn!(feed_id = %id, column = LAST_ATTEMPT_STATUS_COLUMN, error = %e, "Ignoring malformed column");
                AttemptStatus::Never
            }),
        };

        // `active` stays in metadata; an explicit `active = false` still disables.
        let inactive = row.get(ACTIVE_COLUMN).and_then(truthy) == Some(false);
        let disabled = row.remove(DISABLED_COLUMN).as_ref().and_then(truthy).unwrap_or(false) || inactive;

        Ok(Self {
            id,
            name,
            source_url,
            declared_frequency,
            last_success_at,
            last_attempt_at,
            last_attempt_status,
            disabled,
            metadata: row,
            fetched,
        })
    }

    /// The registry row handed to the downstream.
    ///
    /// A fetched record returns its row unchanged, value types and timestamp
    /// layout included. A record built in code is rendered with [`FeedRecord::to_row`].
    pub fn row(&self) -> Map<String, Value> {
        if self.fetched.is_empty() {
            self.to_row()
        } else {
            self.fetched.clone()
        }
    }

    /// The typed fields rendered back into registry columns.
    pub fn to_row(&self) -> Map<String, Value> {
        let mut row = self.metadata.clone();
        row.insert(ID_COLUMN.into(), Value::String(self.id.to_string()));

        let optional = [
            (NAME_COLUMN, self.name.clone()),
            (URL_COLUMN, self.source_url.clone()),
            (FREQUENCY_COLUMN, self.declared_frequency.clone()),
            (LAST_SUCCESS_COLUMN, self.last_success_at.map(format_timestamp)),
            (LAST_ATTEMPT_AT_COLUMN, self.last_attempt_at.map(format_timestamp)),
        ];
        for (column, value) in optional {
            if let Some(value) = value {
                row.insert(column.into(), Value::String(value));
            }
        }

        if self.last_attempt_status != AttemptStatus::Never {
            row.insert(
                LAST_ATTEMPT_STATUS_COLUMN.into(),
                Value::String(self.last_attempt_status.to_string()),
            );
        }
        if self.disabled {
            row.insert(DISABLED_COLUMN.into(), Value::Bool(true));
        }

        row
    }
}

/// Partial update of one registry row. Only the fields that are `Some` are written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedUpdate {
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_attempt_status: Option<AttemptStatus>,
    pub last_success_at: Option<DateTime<Utc>>,
}

impl FeedUpdate {
    /// Record a trigger attempt and its acknowledgement status.
    pub fn attempt(at: DateTime<Utc>, status: AttemptStatus) -> Self {
        Self {
            last_attempt_at: Some(at),
            last_attempt_status: Some(status),
            last_success_at: None,
        }
    }

    /// Record that the downstream confirmed a completed ingestion.
    pub fn ingestion_confirmed(at: DateTime<Utc>) -> Self {
        Self {
            last_success_at: Some(at),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.last_attempt_at.is_none()
            && self.last_attempt_status.is_none()
            && self.last_success_at.is_none()
    }

    /// Registry columns written by this update.
    pub fn to_columns(&self) -> Map<String, Value> {
        let mut columns = Map::new();
        if let Some(at) = self.last_attempt_at {
            columns.insert(LAST_ATTEMPT_AT_COLUMN.into(), Value::String(format_timestamp(at)));
        }
        if let Some(status) = self.last_attempt_status {
            columns.insert(LAST_ATTEMPT_STATUS_COLUMN.into(), Value::String(status.to_string()));
        }
        if let Some(at) = self.last_success_at {
            columns.insert(LAST_SUCCESS_COLUMN.into(), Value::String(format_timestamp(at)));
        }
        columns
    }

    /// Apply the update to a stored record, last write wins per field.
    pub fn apply_to(&self, record: &mut FeedRecord) {
        if !record.fetched.is_empty() {
            record.fetched.extend(self.to_columns());
        }
        if let Some(at) = self.last_attempt_at {
            record.last_attempt_at = Some(at);
        }
        if let Some(status) = self.last_attempt_status {
            record.last_attempt_status = status;
        }
        if let Some(at) = self.last_success_at {
            record.last_success_at = Some(at);
        }
    }
}

/// Parse a registry timestamp. Floating timestamps carry no zone and are read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(FLOATING_TIMESTAMP_FORMAT).to_string()
}

fn text(value: Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn truthy(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn timestamp_column(id: &FeedId, column: &str, value: Option<Value>) -> Option<DateTime<Utc>> {
    let raw = value.and_then(text)?;
    let parsed = parse_timestamp(&raw);
    if parsed.is_none() {
        warn!(feed_id = %id, column, value = %raw, "Ignoring malformed timestamp");
    }
    parsed
}
