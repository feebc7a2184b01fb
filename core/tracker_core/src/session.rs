use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::clock::epoch_ms;

pub const SESSIONS_KEY_PREFIX: &str = "sessions-";

/// Storage key of the append-only session log for `date` (YYYY-MM-DD).
pub fn sessions_key(date: &str) -> String {
    format!("{SESSIONS_KEY_PREFIX}{date}")
}

/// Continuous, exclusive attention on one URL. Only ever held in memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub url: String,
    pub title: String,
    pub start_time: OffsetDateTime,
}

impl Session {
    pub fn new(url: impl Into<String>, title: impl Into<String>, start_time: OffsetDateTime) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            start_time,
        }
    }

    /// Terminates the session at `end`. A non-positive duration yields nothing
    /// to persist.
    pub fn close(self, end: OffsetDateTime) -> Option<SessionRecord> {
        let start_ms = epoch_ms(self.start_time);
        let end_ms = epoch_ms(end);
        let duration_ms = end_ms - start_ms;
        if duration_ms <= 0 {
            return None;
        }
        Some(SessionRecord {
            url: self.url,
            title: self.title,
            start_time: start_ms,
            end_time: end_ms,
            duration_ms,
        })
    }

    pub fn view(&self, now: OffsetDateTime) -> SessionView {
        SessionView {
            url: self.url.clone(),
            title: self.title.clone(),
            start_ts: self.start_time.format(&Rfc3339).unwrap_or_default(),
            elapsed_ms: (epoch_ms(now) - epoch_ms(self.start_time)).max(0),
        }
    }
}

/// Wire form of the open session for status queries.
#[derive(Clone, Debug, Serialize)]
pub struct SessionView {
    pub url: String,
    pub title: String,
    pub start_ts: String,
    pub elapsed_ms: i64,
}

/// Persisted, terminated session. Times are epoch milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub url: String,
    #[serde(default)]
    pub title: String,
    pub start_time: i64,
    pub end_time: i64,
    pub duration_ms: i64,
}
