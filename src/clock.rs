//! Service clock with a configurable offset and the local auction calendar.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::error::{AuctionError, Result};

/// Time source shared by the scheduler and request handlers.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    offset: Duration,
    tz: FixedOffset,
}

impl Clock {
    pub fn new(offset_ms: i64, tz_offset_minutes: i32) -> Result<Self> {
        let tz = FixedOffset::east_opt(tz_offset_minutes * 60).ok_or_else(|| {
            AuctionError::Config(format!("invalid timezone offset {tz_offset_minutes}"))
        })?;
        Ok(Self {
            offset: Duration::milliseconds(offset_ms),
            tz,
        })
    }

    pub fn now(&self) -> DateTime<Utc> {
        Utc::now() + self.offset
    }

    pub fn tz(&self) -> FixedOffset {
        self.tz
    }

    pub fn offset_ms(&self) -> i64 {
        self.offset.num_milliseconds()
    }

    /// Calendar date of `at` in the auction timezone.
    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.tz).date_naive()
    }

    /// UTC instant of a local slot start.
    pub fn slot_start(&self, date: NaiveDate, slot: NaiveTime) -> Result<DateTime<Utc>> {
        self.tz
            .from_local_datetime(&date.and_time(slot))
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| AuctionError::Config(format!("ambiguous local time {date} {slot}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ist_slot_start() {
        let clock = Clock::new(0, 330).unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
        let slot = NaiveTime::from_hms_opt(14, 0, 0).unwrap();
        let start = clock.slot_start(date, slot).unwrap();
        assert_eq!(start.to_rfc3339(), "2026-10-17T08:30:00+00:00");
    }

    #[test]
    fn test_local_date_rolls_over_before_utc() {
        let clock = Clock::new(0, 330).unwrap();
        let at = Utc.with_ymd_and_hms(2026, 10, 16, 19, 0, 0).unwrap();
        assert_eq!(clock.local_date(at), NaiveDate::from_ymd_opt(2026, 10, 17).unwrap());
    }

    #[test]
    fn test_offset_shifts_now() {
        let clock = Clock::new(3_600_000, 0).unwrap();
        let drift = clock.now() - Utc::now();
        assert!(drift > Duration::minutes(59));
        assert_eq!(clock.offset_ms(), 3_600_000);
    }
}
