//! Time source abstraction.
//!
//! All quantum timing reads the clock through [`Clock`] so tests can move
//! time forward without sleeping.

use chrono::{DateTime, Duration, Local, NaiveDateTime, Utc};
use chrono_tz::Tz;
use std::sync::{Arc, Mutex};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub type SharedClock = Arc<dyn Clock>;

/// Wall-clock reading of `ts` in `tz`, or in the machine's local zone.
pub fn local_naive(ts: DateTime<Utc>, tz: Option<Tz>) -> NaiveDateTime {
    match tz {
        Some(tz) => ts.with_timezone(&tz).naive_local(),
        None => ts.with_timezone(&Local).naive_local(),
    }
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance(Duration::seconds(secs));
    }

    pub fn advance_ms(&self, ms: i64) {
        self.advance(Duration::milliseconds(ms));
    }

    pub fn set(&self, to: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = to;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|now| *now).unwrap_or_else(|_| Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let handle = clock.clone();

        handle.advance_secs(90);
        handle.advance_ms(500);

        assert_eq!(clock.now(), start + Duration::milliseconds(90_500));
    }

    #[test]
    fn test_local_naive_in_zone() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 15, 23, 30, 0).unwrap();
        let berlin = local_naive(ts, Some(chrono_tz::Europe::Berlin));
        assert_eq!(berlin.to_string(), "2025-01-16 00:30:00");
    }
}
