//! Time-bucketed statistics over heart-rate samples.
//!
//! [`aggregate`] is a pure function: it filters samples to a window, groups
//! them by calendar day or by month-relative week, and reduces each group to
//! max-of-max, min-of-min and the rounded mean of the averages. Buckets with
//! no members are never produced.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::models::{Sample, TimeWindow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
    Day,
    Week,
}

/// Grouping key of a bucket.
///
/// Ordering is chronological: days by date, weeks by (year, month, week).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BucketKey {
    Day(NaiveDate),
    /// Week `week` of `month`, counted from the Sunday-aligned row the 1st
    /// falls in. Week 1 may be short and a month can reach week 6.
    Week { year: i32, month: u32, week: u32 },
}

impl BucketKey {
    pub fn for_date(date: NaiveDate, granularity: Granularity) -> Self {
        match granularity {
            Granularity::Day => BucketKey::Day(date),
            Granularity::Week => BucketKey::Week {
                year: date.year(),
                month: date.month(),
                week: week_of_month(date),
            },
        }
    }
}

/// `ceil((day_of_month + weekday_of_first) / 7)` with Sunday = 0.
pub fn week_of_month(date: NaiveDate) -> u32 {
    let first_weekday = date
        .with_day(1)
        .map(|first| first.weekday().num_days_from_sunday())
        .unwrap_or(0);
    (date.day() + first_weekday).div_ceil(7)
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketKey::Day(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            // Month is not zero-padded.
            BucketKey::Week { year, month, week } => write!(f, "{}-{}-W{}", year, month, week),
        }
    }
}

impl Serialize for BucketKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Statistics for one non-empty group of samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Bucket {
    pub key: BucketKey,
    #[serde(rename = "maxBPM")]
    pub max_bpm: u32,
    #[serde(rename = "avgBPM")]
    pub avg_bpm: u32,
    #[serde(rename = "minBPM")]
    pub min_bpm: u32,
    #[serde(skip)]
    pub count: u32,
}

#[derive(Debug, Clone, Copy)]
struct Accumulator {
    max_bpm: u32,
    min_bpm: u32,
    avg_sum: u64,
    count: u32,
}

impl Accumulator {
    fn new(sample: &Sample) -> Self {
        Self {
            max_bpm: sample.max_bpm(),
            min_bpm: sample.min_bpm(),
            avg_sum: u64::from(sample.avg_bpm()),
            count: 1,
        }
    }

    fn add(&mut self, sample: &Sample) {
        self.max_bpm = self.max_bpm.max(sample.max_bpm());
        self.min_bpm = self.min_bpm.min(sample.min_bpm());
        self.avg_sum += u64::from(sample.avg_bpm());
        self.count += 1;
    }

    fn finish(self, key: BucketKey) -> Bucket {
        Bucket {
            key,
            max_bpm: self.max_bpm,
            avg_bpm: rounded_mean(self.avg_sum, self.count),
            min_bpm: self.min_bpm,
            count: self.count,
        }
    }
}

/// Mean rounded to nearest, halves up.
pub fn rounded_mean(sum: u64, count: u32) -> u32 {
    if count == 0 {
        return 0;
    }
    let count = u64::from(count);
    let mean = (2 * sum + count) / (2 * count);
    u32::try_from(mean).unwrap_or(u32::MAX)
}

/// Group `samples` inside `window` into ordered buckets.
///
/// Input order does not matter and samples outside the window are ignored.
pub fn aggregate(samples: &[Sample], granularity: Granularity, window: &TimeWindow) -> Vec<Bucket> {
    let mut groups: BTreeMap<BucketKey, Accumulator> = BTreeMap::new();

    for sample in samples.iter().filter(|s| window.contains(s.created_at)) {
        let key = BucketKey::for_date(sample.created_at.date_naive(), granularity);
        groups
            .entry(key)
            .and_modify(|acc| acc.add(sample))
            .or_insert_with(|| Accumulator::new(sample));
    }

    groups
        .into_iter()
        .map(|(key, acc)| acc.finish(key))
        .collect()
}

#[cfg(test)]
#[path = "aggregator_tests.rs"]
mod aggregator_tests;
