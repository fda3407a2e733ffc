//! Read models for the analytics views.
//!
//! - daily: raw readings of today, oldest first
//! - weekly: one summary per calendar day over the last seven days
//! - monthly: one summary per month-relative week over the last month
//!
//! All windows are computed in UTC from the caller-supplied `now`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::aggregator::{aggregate, Bucket, Granularity};
use super::error::PipelineError;
use crate::db::repository::SampleRepository;
use crate::models::{Reading, Sample, SampleId, Scope, TimeWindow};

/// One raw reading in the daily view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyReading {
    #[serde(rename = "_id")]
    pub id: SampleId,
    #[serde(rename = "maxBPM")]
    pub max_bpm: u32,
    #[serde(rename = "avgBPM")]
    pub avg_bpm: u32,
    #[serde(rename = "minBPM")]
    pub min_bpm: u32,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl From<&Sample> for DailyReading {
    fn from(sample: &Sample) -> Self {
        Self {
            id: sample.id,
            max_bpm: sample.max_bpm(),
            avg_bpm: sample.avg_bpm(),
            min_bpm: sample.min_bpm(),
            created_at: sample.created_at,
        }
    }
}

impl From<&Reading> for DailyReading {
    fn from(reading: &Reading) -> Self {
        Self {
            id: reading.id,
            max_bpm: reading.heart_rate.max_bpm,
            avg_bpm: reading.heart_rate.avg_bpm,
            min_bpm: reading.heart_rate.min_bpm,
            created_at: reading.timestamp,
        }
    }
}

/// Per-day statistics in the weekly view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklySummary {
    /// `YYYY-MM-DD`
    pub date: String,
    #[serde(rename = "maxBPM")]
    pub max_bpm: u32,
    #[serde(rename = "avgBPM")]
    pub avg_bpm: u32,
    #[serde(rename = "minBPM")]
    pub min_bpm: u32,
}

impl From<&Bucket> for WeeklySummary {
    fn from(bucket: &Bucket) -> Self {
        Self {
            date: bucket.key.to_string(),
            max_bpm: bucket.max_bpm,
            avg_bpm: bucket.avg_bpm,
            min_bpm: bucket.min_bpm,
        }
    }
}

/// Per-week statistics in the monthly view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlySummary {
    /// `YYYY-M-W<n>`
    pub week: String,
    #[serde(rename = "maxBPM")]
    pub max_bpm: u32,
    #[serde(rename = "avgBPM")]
    pub avg_bpm: u32,
    #[serde(rename = "minBPM")]
    pub min_bpm: u32,
}

impl From<&Bucket> for MonthlySummary {
    fn from(bucket: &Bucket) -> Self {
        Self {
            week: bucket.key.to_string(),
            max_bpm: bucket.max_bpm,
            avg_bpm: bucket.avg_bpm,
            min_bpm: bucket.min_bpm,
        }
    }
}

async fn load<R>(
    repo: &R,
    scope: Option<&Scope>,
    window: &TimeWindow,
) -> Result<Vec<Sample>, PipelineError>
where
    R: SampleRepository + ?Sized,
{
    repo.query_samples(scope, window).await.map_err(|e| {
        log::warn!("Aggregation query for {:?} failed: {}", scope, e);
        PipelineError::AggregationQueryFailure(e)
    })
}

/// Today's readings, oldest first.
pub async fn daily_readings<R>(
    repo: &R,
    scope: Option<&Scope>,
    now: DateTime<Utc>,
) -> Result<Vec<DailyReading>, PipelineError>
where
    R: SampleRepository + ?Sized,
{
    let samples = load(repo, scope, &TimeWindow::day_of(now)).await?;
    Ok(samples.iter().map(DailyReading::from).collect())
}

/// Per-day statistics from seven days ago through the end of today.
pub async fn weekly_summary<R>(
    repo: &R,
    scope: Option<&Scope>,
    now: DateTime<Utc>,
) -> Result<Vec<WeeklySummary>, PipelineError>
where
    R: SampleRepository + ?Sized,
{
    let window = TimeWindow::last_week(now);
    let samples = load(repo, scope, &window).await?;
    Ok(aggregate(&samples, Granularity::Day, &window)
        .iter()
        .map(WeeklySummary::from)
        .collect())
}

/// Per-week statistics from one month ago through the end of today.
pub async fn monthly_summary<R>(
    repo: &R,
    scope: Option<&Scope>,
    now: DateTime<Utc>,
) -> Result<Vec<MonthlySummary>, PipelineError>
where
    R: SampleRepository + ?Sized,
{
    let window = TimeWindow::last_month(now);
    let samples = load(repo, scope, &window).await?;
    Ok(aggregate(&samples, Granularity::Week, &window)
        .iter()
        .map(MonthlySummary::from)
        .collect())
}
