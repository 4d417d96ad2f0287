// src/memory.rs

//! In-memory collaborators for single-node deployments and tests.

// dependencies
use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use dashmap::DashMap;

use crate::clock::{Clock, NANOS_PER_SECOND, SystemClock};
use crate::collaborators::{
    PersistedUsage, SubscriptionProvider, SubscriptionStatus, UsageCounterStore,
    UsageDeltaRecord,
};
use crate::errors::GateError;

/// Counter row with the start of each billing period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterRow {
    pub daily_count: u64,
    pub daily_period_start: NaiveDate,
    pub monthly_count: u64,
    pub monthly_period_start: NaiveDate,
}

impl CounterRow {
    fn empty(day: NaiveDate, month: NaiveDate) -> Self {
        Self {
            daily_count: 0,
            daily_period_start: day,
            monthly_count: 0,
            monthly_period_start: month,
        }
    }

    fn roll_over(&mut self, day: NaiveDate, month: NaiveDate) {
        if self.daily_period_start != day {
            self.daily_count = 0;
            self.daily_period_start = day;
        }
        if self.monthly_period_start != month {
            self.monthly_count = 0;
            self.monthly_period_start = month;
        }
    }
}

/// Usage counters kept in a map, with calendar-day and calendar-month
/// rollover in UTC.
pub struct InMemoryUsageStore<C = SystemClock>
where
    C: Clock,
{
    rows: DashMap<String, CounterRow>,
    clock: C,
}

impl<C> InMemoryUsageStore<C>
where
    C: Clock,
{
    pub fn new(clock: C) -> Self {
        Self {
            rows: DashMap::new(),
            clock,
        }
    }

    /// Overwrite a user's counters for the current periods.
    pub fn set_usage(&self, user_id: &str, daily_count: u64, monthly_count: u64) -> Result<(), GateError> {
        let (day, month) = self.periods()?;
        self.rows.insert(
            user_id.to_string(),
            CounterRow {
                daily_count,
                daily_period_start: day,
                monthly_count,
                monthly_period_start: month,
            },
        );
        Ok(())
    }

    /// The stored row, without applying rollover.
    pub fn row(&self, user_id: &str) -> Option<CounterRow> {
        self.rows.get(user_id).map(|row| *row.value())
    }

    fn periods(&self) -> Result<(NaiveDate, NaiveDate), GateError> {
        let now = self.clock.now()?;
        let at = DateTime::<Utc>::from_timestamp(
            (now / NANOS_PER_SECOND) as i64,
            (now % NANOS_PER_SECOND) as u32,
        )
        .ok_or_else(|| GateError::Store(format!("timestamp {now} out of range")))?;
        let day = at.date_naive();
        let month = day.with_day(1).unwrap_or(day);
        Ok((day, month))
    }
}

#[async_trait]
impl<C> UsageCounterStore for InMemoryUsageStore<C>
where
    C: Clock,
{
    async fn usage(&self, user_id: &str) -> Result<Option<PersistedUsage>, GateError> {
        let (day, month) = self.periods()?;
        Ok(self.row(user_id).map(|mut row| {
            row.roll_over(day, month);
            PersistedUsage {
                daily_count: row.daily_count,
                monthly_count: row.monthly_count,
            }
        }))
    }

    async fn apply_usage_deltas(&self, batch: &[UsageDeltaRecord]) -> Result<Vec<String>, GateError> {
        let (day, month) = self.periods()?;
        let mut applied = Vec::with_capacity(batch.len());
        for record in batch {
            let mut row = self
                .rows
                .entry(record.user_id.clone())
                .or_insert_with(|| CounterRow::empty(day, month));
            row.roll_over(day, month);
            row.daily_count += record.daily_delta;
            row.monthly_count += record.monthly_delta;
            applied.push(record.user_id.clone());
        }
        Ok(applied)
    }
}

/// Subscription statuses held in a map. Unknown users are unsubscribed.
#[derive(Debug, Default)]
pub struct StaticSubscriptions {
    statuses: DashMap<String, SubscriptionStatus>,
}

impl StaticSubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, user_id: &str, status: SubscriptionStatus) {
        self.statuses.insert(user_id.to_string(), status);
    }

    pub fn remove(&self, user_id: &str) {
        self.statuses.remove(user_id);
    }
}

impl<S: Into<String>> FromIterator<(S, SubscriptionStatus)> for StaticSubscriptions {
    fn from_iter<I: IntoIterator<Item = (S, SubscriptionStatus)>>(iter: I) -> Self {
        Self {
            statuses: iter.into_iter().map(|(id, s)| (id.into(), s)).collect(),
        }
    }
}

#[async_trait]
impl SubscriptionProvider for StaticSubscriptions {
    async fn status(&self, user_id: &str) -> Result<Option<SubscriptionStatus>, GateError> {
        Ok(self.statuses.get(user_id).map(|s| *s.value()))
    }
}
