//! Common types used across feed dispatch

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

// ============================================================================
// Feed Identifier
// ============================================================================

/// Registry row identifier of a feed.
///
/// This is the join key for every write-back, so it is kept verbatim as the
/// registry returned it (Socrata row ids look like `row-ab12~cd34.ef56`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedId(String);

impl FeedId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FeedId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FeedId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for FeedId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ============================================================================
// Update Frequency
// ============================================================================

#[allow(clippy::expect_used)]
static FREQUENCY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)\s*([A-Za-z]+)\s*$").expect("frequency pattern is a valid literal")
});

/// Declared update frequency of a feed.
///
/// The registry stores it as a number followed by a unit, e.g. `12h`, `5m`
/// or `30s`. Always strictly positive: zero and unparseable values have no
/// `UpdateFrequency` at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UpdateFrequency {
    seconds: i64,
}

impl UpdateFrequency {
    /// Parse the registry representation.
    ///
    /// Accepted units (case-insensitive): `s`/`sec`/`second(s)`,
    /// `m`/`min`/`minute(s)`, `h`/`hr`/`hour(s)`, `d`/`day(s)`.
    pub fn parse(raw: &str) -> Option<Self> {
        let captures = FREQUENCY_PATTERN.captures(raw)?;
        let amount: i64 = captures.get(1)?.as_str().parse().ok()?;
        let unit_seconds = match captures.get(2)?.as_str().to_ascii_lowercase().as_str() {
            "s" | "sec" | "secs" | "second" | "seconds" => 1,
            "m" | "min" | "mins" | "minute" | "minutes" => 60,
            "h" | "hr" | "hrs" | "hour" | "hours" => 3_600,
            "d" | "day" | "days" => 86_400,
            _ => return None,
        };
        Self::from_seconds(amount.checked_mul(unit_seconds)?)
    }

    /// Build a frequency from a number of seconds; `None` unless positive.
    pub fn from_seconds(seconds: i64) -> Option<Self> {
        (seconds > 0).then_some(Self { seconds })
    }

    pub fn as_seconds(&self) -> i64 {
        self.seconds
    }

    pub fn as_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.seconds)
    }
}

impl std::fmt::Display for UpdateFrequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.seconds {
            s if s % 86_400 == 0 => write!(f, "{}d", s / 86_400),
            s if s % 3_600 == 0 => write!(f, "{}h", s / 3_600),
            s if s % 60 == 0 => write!(f, "{}m", s / 60),
            s => write!(f, "{}s", s),
        }
    }
}

impl Serialize for UpdateFrequency {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for UpdateFrequency {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid update frequency: {raw}")))
    }
}
