use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use super::{apply_jitter, TriggerResult};
use crate::error::TriggerError;

/// Fires every `interval_secs`, anchored at `start_date`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalTrigger {
    pub interval_secs: i64,
    pub start_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    /// Maximum whole seconds each fire may be shifted either way.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter: Option<u32>,
}

impl IntervalTrigger {
    /// Every `interval`, first fire one interval after `now`.
    ///
    /// Intervals shorter than a second are raised to one second.
    pub fn every(interval: Duration, now: DateTime<Utc>) -> Self {
        let interval_secs = interval.num_seconds().max(1);
        Self {
            interval_secs,
            start_date: (now + Duration::seconds(interval_secs)).trunc_subsecs(0),
            end_date: None,
            jitter: None,
        }
    }

    /// Sum of the calendar parts, as accepted by the admin API.
    pub fn from_parts(
        weeks: i64,
        days: i64,
        hours: i64,
        minutes: i64,
        seconds: i64,
        now: DateTime<Utc>,
    ) -> Self {
        let total = Duration::weeks(weeks)
            + Duration::days(days)
            + Duration::hours(hours)
            + Duration::minutes(minutes)
            + Duration::seconds(seconds);
        Self::every(total, now)
    }

    pub fn starting_at(mut self, start_date: DateTime<Utc>) -> Self {
        self.start_date = start_date.trunc_subsecs(0);
        self
    }

    pub fn ending_at(mut self, end_date: DateTime<Utc>) -> Self {
        self.end_date = Some(end_date.trunc_subsecs(0));
        self
    }

    pub fn with_jitter(mut self, jitter_secs: u32) -> Self {
        self.jitter = (jitter_secs > 0).then_some(jitter_secs);
        self
    }

    /// `<positive-int><s|m|h|d>`.
    pub fn parse(rule: &str, now: DateTime<Utc>) -> TriggerResult<Self> {
        let rule = rule.trim();
        let bad = |reason: &str| TriggerError::BadRule {
            kind: "interval",
            rule: rule.to_string(),
            reason: reason.to_string(),
        };

        let unit = rule.chars().last().ok_or_else(|| bad("empty rule"))?;
        let multiplier = match unit.to_ascii_lowercase() {
            's' => 1,
            'm' => 60,
            'h' => 3_600,
            'd' => 86_400,
            _ => return Err(bad("unit must be one of s, m, h, d")),
        };
        let count: i64 = rule[..rule.len() - unit.len_utf8()]
            .parse()
            .map_err(|_| bad("count must be a positive integer"))?;
        if count <= 0 {
            return Err(bad("count must be a positive integer"));
        }
        let secs = count
            .checked_mul(multiplier)
            .ok_or_else(|| bad("interval too large"))?;
        Ok(Self::every(Duration::seconds(secs), now))
    }

    pub fn rule(&self) -> String {
        let secs = self.interval_secs;
        if secs % 86_400 == 0 {
            format!("{}d", secs / 86_400)
        } else if secs % 3_600 == 0 {
            format!("{}h", secs / 3_600)
        } else if secs % 60 == 0 {
            format!("{}m", secs / 60)
        } else {
            format!("{secs}s")
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::seconds(self.interval_secs)
    }

    pub fn next_fire_time(
        &self,
        previous: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> TriggerResult<Option<DateTime<Utc>>> {
        let overflow = || TriggerError::Evaluation("interval fire time overflowed".to_string());
        let interval = self.interval();

        let candidate = match previous {
            Some(prev) => prev.checked_add_signed(interval).ok_or_else(overflow)?,
            None if self.start_date > now => self.start_date,
            None => {
                // k = ceil((now - start) / interval)
                let elapsed_ms = (now - self.start_date).num_milliseconds();
                let step_ms = self.interval_secs.saturating_mul(1_000);
                let k = elapsed_ms / step_ms + i64::from(elapsed_ms % step_ms != 0);
                let offset = self.interval_secs.checked_mul(k).ok_or_else(overflow)?;
                self.start_date
                    .checked_add_signed(Duration::seconds(offset))
                    .ok_or_else(overflow)?
            }
        };

        if self.end_date.is_some_and(|end| candidate > end) {
            return Ok(None);
        }
        let shifted = apply_jitter(candidate, self.jitter, previous, now);
        Ok(Some(match self.end_date {
            Some(end) => shifted.min(end),
            None => shifted,
        }))
    }
}
