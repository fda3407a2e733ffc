//! Subscriber-side view state kept current from the change stream.
//!
//! The daily view is patched in place from each event. Weekly and monthly
//! summaries are never patched: they are recomputed from the store at most
//! once per refresh interval and replaced wholesale, and only when the
//! recomputation succeeds.

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

use super::error::PipelineError;
use super::views::{self, DailyReading, MonthlySummary, WeeklySummary};
use crate::db::repository::SampleRepository;
use crate::models::{ChangeOperation, ChangePayload, ChangeEvent, Scope, TimeWindow};

/// Allows one refresh per `interval`, counted from the last successful one.
#[derive(Debug, Clone)]
pub struct RefreshThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl RefreshThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        match self.last {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    pub fn mark(&mut self, now: Instant) {
        self.last = Some(now);
    }
}

/// What applying one event did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub daily_changed: bool,
    /// The aggregate views should be recomputed now.
    pub refresh_due: bool,
}

#[derive(Debug, Clone)]
pub struct ClientMerge {
    day: TimeWindow,
    daily: Vec<DailyReading>,
    weekly: Vec<WeeklySummary>,
    monthly: Vec<MonthlySummary>,
    throttle: RefreshThrottle,
}

impl ClientMerge {
    pub fn new(wall_now: DateTime<Utc>, refresh_interval: Duration) -> Self {
        Self {
            day: TimeWindow::day_of(wall_now),
            daily: Vec::new(),
            weekly: Vec::new(),
            monthly: Vec::new(),
            throttle: RefreshThrottle::new(refresh_interval),
        }
    }

    pub fn daily(&self) -> &[DailyReading] {
        &self.daily
    }

    pub fn weekly(&self) -> &[WeeklySummary] {
        &self.weekly
    }

    pub fn monthly(&self) -> &[MonthlySummary] {
        &self.monthly
    }

    pub fn day_window(&self) -> &TimeWindow {
        &self.day
    }

    /// Replace the daily view, e.g. with an initial load.
    pub fn replace_daily(&mut self, day: TimeWindow, mut readings: Vec<DailyReading>) {
        readings.sort_by_key(|r| r.created_at);
        self.day = day;
        self.daily = readings;
    }

    pub fn replace_aggregates(&mut self, weekly: Vec<WeeklySummary>, monthly: Vec<MonthlySummary>) {
        self.weekly = weekly;
        self.monthly = monthly;
    }

    /// Patch the daily view with `event`.
    pub fn apply(&mut self, event: &ChangeEvent, now: Instant) -> MergeOutcome {
        let daily_changed = match (event.operation, &event.payload) {
            (ChangeOperation::Delete, ChangePayload::Deleted(id)) => {
                let before = self.daily.len();
                self.daily.retain(|r| r.id != *id);
                self.daily.len() != before
            }
            (
                ChangeOperation::Insert | ChangeOperation::Update | ChangeOperation::Latest,
                ChangePayload::Reading(reading),
            ) if self.day.contains(reading.timestamp) => {
                let incoming = DailyReading::from(reading);
                match self
                    .daily
                    .iter_mut()
                    .find(|r| r.created_at == incoming.created_at)
                {
                    Some(existing) if *existing == incoming => false,
                    Some(existing) => {
                        *existing = incoming;
                        true
                    }
                    None => {
                        self.daily.push(incoming);
                        self.daily.sort_by_key(|r| r.created_at);
                        true
                    }
                }
            }
            _ => false,
        };

        MergeOutcome {
            daily_changed,
            refresh_due: self.throttle.is_due(now),
        }
    }

    /// Reload today's readings from the store.
    pub async fn refresh_daily<R>(
        &mut self,
        repo: &R,
        scope: Option<&Scope>,
        wall_now: DateTime<Utc>,
    ) -> Result<(), PipelineError>
    where
        R: SampleRepository + ?Sized,
    {
        let readings = views::daily_readings(repo, scope, wall_now).await?;
        self.replace_daily(TimeWindow::day_of(wall_now), readings);
        Ok(())
    }

    /// Recompute weekly and monthly summaries when the throttle allows it.
    ///
    /// Returns `Ok(false)` when skipped. On error the held summaries are left
    /// as they were and the next call may retry immediately.
    pub async fn refresh_aggregates<R>(
        &mut self,
        repo: &R,
        scope: Option<&Scope>,
        wall_now: DateTime<Utc>,
        now: Instant,
    ) -> Result<bool, PipelineError>
    where
        R: SampleRepository + ?Sized,
    {
        if !self.throttle.is_due(now) {
            return Ok(false);
        }
        let weekly = views::weekly_summary(repo, scope, wall_now).await?;
        let monthly = views::monthly_summary(repo, scope, wall_now).await?;
        self.replace_aggregates(weekly, monthly);
        self.throttle.mark(now);
        Ok(true)
    }
}

#[cfg(test)]
#[path = "client_merge_tests.rs"]
mod tests;
