use std::sync::Mutex;
use time::{OffsetDateTime, UtcOffset};

pub const TZ_OFFSET_MINUTES_MIN: i32 = -14 * 60;
pub const TZ_OFFSET_MINUTES_MAX: i32 = 14 * 60;

/// Source of wall-clock time for the tracker and the report timer.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A clock that only moves when told to. Used to drive the tracker deterministically.
pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: time::Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *guard += by;
    }

    pub fn set(&self, to: OffsetDateTime) {
        *self.now.lock().unwrap_or_else(|p| p.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

pub fn normalize_tz_offset_minutes(v: i32) -> i32 {
    v.clamp(TZ_OFFSET_MINUTES_MIN, TZ_OFFSET_MINUTES_MAX)
}

pub fn tz_offset_from_minutes(minutes: i32) -> UtcOffset {
    UtcOffset::from_whole_seconds(normalize_tz_offset_minutes(minutes).saturating_mul(60))
        .unwrap_or(UtcOffset::UTC)
}

/// Calendar day (YYYY-MM-DD) of `t` as seen from `tz`.
pub fn date_string(t: OffsetDateTime, tz: UtcOffset) -> String {
    t.to_offset(tz).date().to_string()
}

/// Parses YYYY-MM-DD. Returns the canonical form so `2024-1-2` and `2024-01-02`
/// address the same day bucket.
pub fn parse_date(date: &str) -> Option<String> {
    let parts: Vec<&str> = date.trim().split('-').collect();
    if parts.len() != 3 {
        return None;
    }
    let y: i32 = parts[0].parse().ok()?;
    let m: u8 = parts[1].parse().ok()?;
    let d: u8 = parts[2].parse().ok()?;
    let month = time::Month::try_from(m).ok()?;
    let dt = time::Date::from_calendar_date(y, month, d).ok()?;
    Some(dt.to_string())
}

pub fn epoch_ms(t: OffsetDateTime) -> i64 {
    (t.unix_timestamp_nanos() / 1_000_000) as i64
}
