//! # Clock
//!
//! Time source for the engine. Storage keeps millisecond precision, so
//! [`Clock::now_millis`] is the base of every stamp written to a row.
//! Writes that a pull cursor must see are stamped with [`commit_stamp`].

use chrono::{DateTime, SubsecRound, Utc};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;

    /// [`Clock::now`] truncated to whole milliseconds.
    fn now_millis(&self) -> DateTime<Utc> {
        self.now().trunc_subsecs(3)
    }
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        ManualClock {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Stamp for a write committed after `last`, the highest stamp already
/// issued to the user. Never earlier than `now` and always at least one
/// millisecond past `last`, even when the clock stalls or steps back.
pub(crate) fn commit_stamp(now: DateTime<Utc>, last: Option<DateTime<Utc>>) -> DateTime<Utc> {
    match last {
        Some(last) if last >= now => last + chrono::Duration::milliseconds(1),
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_manual_clock_clones_share_time() {
        let start = DateTime::from_timestamp(1_750_000_000, 0).unwrap();
        let clock = ManualClock::new(start);
        let shared = clock.clone();

        clock.advance(Duration::milliseconds(29_900));
        assert_eq!(shared.now(), start + Duration::milliseconds(29_900));

        shared.set(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn test_now_millis_drops_sub_millisecond_part() {
        let at = DateTime::from_timestamp(1_750_000_000, 123_456_789).unwrap();
        let clock = ManualClock::new(at);
        assert_eq!(clock.now_millis().timestamp_subsec_nanos(), 123_000_000);
    }

    #[test]
    fn test_commit_stamp_moves_past_last_issued() {
        let now = DateTime::from_timestamp(1_750_000_000, 0).unwrap();

        assert_eq!(commit_stamp(now, None), now);
        assert_eq!(commit_stamp(now, Some(now - Duration::seconds(1))), now);
        assert_eq!(commit_stamp(now, Some(now)), now + Duration::milliseconds(1));
        // Clock stepped back two seconds
        assert_eq!(
            commit_stamp(now, Some(now + Duration::seconds(2))),
            now + Duration::milliseconds(2_001)
        );
    }
}
