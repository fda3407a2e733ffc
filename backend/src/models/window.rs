//! Time windows used for store queries and aggregation.

use chrono::{DateTime, Duration, Months, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A time range starting at an inclusive `start`.
///
/// The end bound is explicit. Calendar windows stop before the next-day
/// boundary, so every instant of their last day is covered regardless of
/// timestamp precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub end_inclusive: bool,
}

impl TimeWindow {
    /// `[start, end)`
    pub fn half_open(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            end_inclusive: false,
        }
    }

    /// `[start, end]`
    pub fn closed(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            end_inclusive: true,
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        if instant < self.start {
            return false;
        }
        if self.end_inclusive {
            instant <= self.end
        } else {
            instant < self.end
        }
    }

    /// The calendar day containing `now`: `[00:00, next 00:00)`.
    pub fn day_of(now: DateTime<Utc>) -> Self {
        let today = now.date_naive();
        let start = start_of_day(today);
        Self::half_open(start, start + Duration::days(1))
    }

    /// The last seven days through the end of today: `[today-7 00:00, tomorrow 00:00)`.
    pub fn last_week(now: DateTime<Utc>) -> Self {
        let today = now.date_naive();
        let start = start_of_day(today) - Duration::days(7);
        Self::half_open(start, start_of_next_day(today))
    }

    /// One calendar month back up to the end of today.
    ///
    /// Month arithmetic clamps to the last valid day (Mar 31 → Feb 28/29).
    pub fn last_month(now: DateTime<Utc>) -> Self {
        let today = now.date_naive();
        let first = today
            .checked_sub_months(Months::new(1))
            .unwrap_or(today - Duration::days(31));
        Self::half_open(start_of_day(first), start_of_next_day(today))
    }
}

/// Midnight UTC of `date`.
pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

fn start_of_next_day(date: NaiveDate) -> DateTime<Utc> {
    start_of_day(date) + Duration::days(1)
}
