//!
//! Clock collaborator
//!
//! `TimePoint` is a millisecond tick count. `Chrono::now` counts from a
//! process-wide monotonic anchor; `Chrono::wall_now` counts from the Unix
//! epoch and is the one to feed into `to_string`.
//!

use std::sync::OnceLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::{Local, TimeZone};

/// Milliseconds on either the monotonic tick counter or the Unix epoch.
pub type TimePoint = u64;

const CALENDAR_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Default, Clone, Copy)]
pub struct Chrono;

impl Chrono {
    fn anchor() -> Instant {
        static ANCHOR: OnceLock<Instant> = OnceLock::new();
        *ANCHOR.get_or_init(Instant::now)
    }

    /// Monotonic milliseconds since first use of the clock.
    pub fn now() -> TimePoint {
        Self::anchor().elapsed().as_millis() as TimePoint
    }

    /// Wall-clock milliseconds since the Unix epoch.
    pub fn wall_now() -> TimePoint {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as TimePoint)
            .unwrap_or(0)
    }

    /// Seconds between two time points. Negative when `end` precedes `start`.
    pub fn elapsed(start: TimePoint, end: TimePoint) -> f64 {
        (end as f64 - start as f64) / 1000.0
    }

    pub fn to_time_t(point: TimePoint) -> i64 {
        (point / 1000) as i64
    }

    pub fn from_time_t(time: i64) -> TimePoint {
        time.max(0) as TimePoint * 1000
    }

    /// Formats an epoch-based time point as local `YYYY-MM-DD HH:MM:SS`.
    pub fn to_string(point: TimePoint) -> String {
        match Local.timestamp_opt(Self::to_time_t(point), 0).single() {
            Some(dt) => dt.format(CALENDAR_FORMAT).to_string(),
            None => String::new(),
        }
    }

    pub fn sleep_ms(ms: u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }
}
