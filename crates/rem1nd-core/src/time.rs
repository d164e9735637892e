//! Timestamp codec and the injectable clock.
//!
//! Reminder instants are naive wall-clock values (no timezone). Legacy
//! databases store them as Python `isoformat()` text, so the writer mirrors
//! that layout exactly: `YYYY-MM-DDTHH:MM:SS`, plus `.ffffff` only when the
//! microsecond part is non-zero.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};

use crate::config::ClockMode;
use crate::error::{Rem1ndError, Result};

/// Formats accepted by [`parse_timestamp`], tried in order.
const ACCEPTED_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    // HTML datetime-local input
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Offset-carrying layouts, as written by `isoformat()` on an aware datetime.
const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%d %H:%M%:z",
];

/// Render `ts` the way the database stores it.
pub fn format_timestamp(ts: NaiveDateTime) -> String {
    let micros = ts.nanosecond() % 1_000_000_000 / 1_000;
    if micros == 0 {
        ts.format("%Y-%m-%dT%H:%M:%S").to_string()
    } else {
        format!("{}.{:06}", ts.format("%Y-%m-%dT%H:%M:%S"), micros)
    }
}

/// Parse a stored or user-supplied timestamp.
///
/// Besides the naive layouts this accepts a trailing UTC offset (`+05:00`,
/// `Z`), which is dropped so the written wall-clock time is kept, and a bare
/// date, which means midnight.
pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime> {
    let trimmed = value.trim();
    ACCEPTED_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(trimmed)
                .ok()
                .or_else(|| {
                    OFFSET_FORMATS
                        .iter()
                        .find_map(|fmt| DateTime::parse_from_str(trimmed, fmt).ok())
                })
                .map(|dt| dt.naive_local())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
        .ok_or_else(|| Rem1ndError::InvalidTimestamp {
            value: value.to_string(),
        })
}

/// Source of "now" for the scheduler.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Wall clock, read either in local time (legacy behaviour) or UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock {
    mode: ClockMode,
}

impl SystemClock {
    pub fn new(mode: ClockMode) -> Self {
        Self { mode }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        match self.mode {
            ClockMode::Local => Local::now().naive_local(),
            ClockMode::Utc => Utc::now().naive_utc(),
        }
    }
}

/// Hand-driven clock for tests and dry runs.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap()
    }
}
