//! UTC clock and broker-calendar helpers.
//!
//! Every timestamp inside the core is stored and compared in UTC (spec §9
//! design note: "store and compare all timestamps in UTC; convert to the
//! broker's local calendar only at the boundary that needs it"). This module
//! is that boundary: it knows the broker's trading hours and the 06:00
//! local-time session expiry deadline, and converts between UTC instants and
//! those local-time concepts.

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketPhase {
    PreOpen,
    Open,
    Closed,
}

/// Trading hours and session-expiry rules for the broker's exchange
/// calendar. Holidays are intentionally not modeled here (spec Non-goals).
#[derive(Debug, Clone)]
pub struct Calendar {
    pub timezone: Tz,
    pub open: NaiveTime,
    pub close: NaiveTime,
    /// Local time of day at which the broker invalidates the previous
    /// session's access token (spec §4.9: "a fixed local-time boundary,
    /// typically around 06:00").
    pub session_expiry: NaiveTime,
}

impl Default for Calendar {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::Asia::Kolkata,
            open: NaiveTime::from_hms_opt(9, 15, 0).unwrap(),
            close: NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
            session_expiry: NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
        }
    }
}

impl Calendar {
    pub fn phase_at(&self, now: DateTime<Utc>) -> MarketPhase {
        let local = now.with_timezone(&self.timezone);
        let t = local.time();
        if t < self.open {
            MarketPhase::PreOpen
        } else if t < self.close {
            MarketPhase::Open
        } else {
            MarketPhase::Closed
        }
    }

    /// Minutes remaining until the close, or zero if already closed. Used
    /// by the Timeout Monitor to size SL/SL_M cancellation deadlines.
    pub fn minutes_to_close(&self, now: DateTime<Utc>) -> i64 {
        let local = now.with_timezone(&self.timezone);
        let close_today = local
            .date_naive()
            .and_time(self.close)
            .and_local_timezone(self.timezone)
            .single();
        match close_today {
            Some(close) if close > local => (close - local).num_minutes(),
            _ => 0,
        }
    }

    /// The next instant (in UTC) at which the broker's session expires.
    /// If `now` is already past today's boundary, returns tomorrow's.
    pub fn next_session_expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local = now.with_timezone(&self.timezone);
        let boundary_today = local
            .date_naive()
            .and_time(self.session_expiry)
            .and_local_timezone(self.timezone)
            .single()
            .expect("session expiry time is unambiguous");

        let boundary = if boundary_today > local {
            boundary_today
        } else {
            let tomorrow = local.date_naive() + ChronoDuration::days(1);
            tomorrow
                .and_time(self.session_expiry)
                .and_local_timezone(self.timezone)
                .single()
                .expect("session expiry time is unambiguous")
        };
        boundary.with_timezone(&Utc)
    }
}

/// A thin wrapper over [`Utc::now`] so tests can substitute a fixed or
/// stepped clock without threading `DateTime<Utc>` through every call site.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(any(test, feature = "testing"))]
pub struct FixedClock(pub std::sync::Mutex<DateTime<Utc>>);

#[cfg(any(test, feature = "testing"))]
impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(std::sync::Mutex::new(at))
    }

    pub fn advance(&self, d: ChronoDuration) {
        let mut guard = self.0.lock().unwrap();
        *guard = *guard + d;
    }
}

#[cfg(any(test, feature = "testing"))]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, mi, s).unwrap()
    }

    #[test]
    fn phase_transitions_across_the_trading_day() {
        let cal = Calendar::default();
        // 03:00 UTC == 08:30 IST, before open.
        assert_eq!(cal.phase_at(utc(2026, 7, 27, 3, 0, 0)), MarketPhase::PreOpen);
        // 06:00 UTC == 11:30 IST, open.
        assert_eq!(cal.phase_at(utc(2026, 7, 27, 6, 0, 0)), MarketPhase::Open);
        // 11:00 UTC == 16:30 IST, closed.
        assert_eq!(cal.phase_at(utc(2026, 7, 27, 11, 0, 0)), MarketPhase::Closed);
    }

    #[test]
    fn minutes_to_close_counts_down_and_floors_at_zero() {
        let cal = Calendar::default();
        let before_close = utc(2026, 7, 27, 9, 30, 0); // 15:00 IST
        assert!(cal.minutes_to_close(before_close) > 0);
        let after_close = utc(2026, 7, 27, 11, 0, 0);
        assert_eq!(cal.minutes_to_close(after_close), 0);
    }

    #[test]
    fn session_expiry_rolls_to_next_day_once_past_boundary() {
        let cal = Calendar::default();
        let just_before = utc(2026, 7, 27, 0, 0, 0); // 05:30 IST
        let expiry = cal.next_session_expiry(just_before);
        assert_eq!(expiry.with_timezone(&cal.timezone).time(), cal.session_expiry);
        assert_eq!(expiry.with_timezone(&cal.timezone).date_naive(), just_before.with_timezone(&cal.timezone).date_naive());

        let just_after = utc(2026, 7, 27, 1, 0, 0); // 06:30 IST
        let expiry2 = cal.next_session_expiry(just_after);
        assert!(expiry2 > just_after);
        assert_eq!(
            expiry2.with_timezone(&cal.timezone).date_naive(),
            just_after.with_timezone(&cal.timezone).date_naive() + ChronoDuration::days(1)
        );
    }

    #[test]
    fn fixed_clock_advances_deterministically() {
        let clock = FixedClock::new(utc(2026, 7, 27, 0, 0, 0));
        let t0 = clock.now();
        clock.advance(ChronoDuration::minutes(5));
        assert_eq!(clock.now(), t0 + ChronoDuration::minutes(5));
    }
}
