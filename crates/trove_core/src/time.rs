//! Wall-clock timestamps recorded in declarations and stats logs.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// UTC timestamp with microsecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Format used to prefix sampled stats lines
    pub const STATS_FORMAT: &'static str = "%Y-%m-%dT%H:%M:%S%.6f";

    /// Current time
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Wrap a chrono time
    #[must_use]
    pub const fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Parse an RFC 3339 string
    ///
    /// # Errors
    ///
    /// Returns error if the string is not RFC 3339
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| Self(dt.with_timezone(&Utc)))
            .map_err(|e| CoreError::InvalidTimestamp {
                reason: format!("{s}: {e}"),
            })
    }

    /// ISO 8601 form used in declarations, e.g. `2024-01-02T03:04:05.000006Z`
    #[must_use]
    pub fn to_iso8601(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    /// Prefix for a sampled stats line
    #[must_use]
    pub fn to_stats_prefix(&self) -> String {
        self.0.format(Self::STATS_FORMAT).to_string()
    }

    /// Date used in bag metadata (`Bagging-Date`)
    #[must_use]
    pub fn to_date(&self) -> String {
        self.0.format("%Y-%m-%d").to_string()
    }

    /// Get as chrono time
    #[must_use]
    pub const fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_iso8601())
    }
}
