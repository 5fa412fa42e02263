//! Cron trigger.
//!
//! Each field compiles to a set of accepted values. Evaluation walks the
//! fields coarse to fine, bumping the first field whose current value is not
//! accepted and resetting every finer field to its minimum, until all eight
//! fields agree. Day-of-month and day-of-week must both match.

mod expressions;
mod fields;

use chrono::{DateTime, Duration, SubsecRound, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use self::fields::{CronField, FieldKind};
use super::{apply_jitter, ceil_second, TriggerResult};
use crate::error::TriggerError;

/// Evaluation gives up after this many field adjustments.
const MAX_STEPS: usize = 1_000_000;

/// Uncompiled cron description; also the persisted form of [`CronTrigger`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub week: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hour: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub second: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter: Option<u32>,
}

impl CronFields {
    fn get(&self, kind: FieldKind) -> Option<&str> {
        let value = match kind {
            FieldKind::Year => &self.year,
            FieldKind::Month => &self.month,
            FieldKind::Day => &self.day,
            FieldKind::Week => &self.week,
            FieldKind::DayOfWeek => &self.day_of_week,
            FieldKind::Hour => &self.hour,
            FieldKind::Minute => &self.minute,
            FieldKind::Second => &self.second,
        };
        value.as_deref()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "CronFields", into = "CronFields")]
pub struct CronTrigger {
    fields: Vec<CronField>,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    jitter: Option<u32>,
}

impl CronTrigger {
    /// Compile `spec`. Fields left unset become `*` when coarser than the
    /// finest field given, and their minimum when finer.
    pub fn new(spec: CronFields) -> TriggerResult<Self> {
        let finest_given = FieldKind::ORDERED
            .iter()
            .rposition(|kind| spec.get(*kind).is_some());

        let fields = FieldKind::ORDERED
            .iter()
            .enumerate()
            .map(|(idx, kind)| {
                let source = match spec.get(*kind) {
                    Some(given) => given,
                    None if finest_given.is_some_and(|finest| idx > finest) => {
                        kind.default_expr()
                    }
                    None => "*",
                };
                CronField::compile(*kind, source)
            })
            .collect::<TriggerResult<Vec<_>>>()?;

        Ok(Self {
            fields,
            start_date: spec.start_date.map(|d| d.trunc_subsecs(0)),
            end_date: spec.end_date.map(|d| d.trunc_subsecs(0)),
            jitter: spec.jitter.filter(|j| *j > 0),
        })
    }

    /// Six fields `second minute hour day month day_of_week`, or the classic
    /// five-field `minute hour day month day_of_week` with `second = 0`.
    pub fn from_crontab(expr: &str) -> TriggerResult<Self> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        let (second, rest) = match parts.len() {
            6 => (parts[0], &parts[1..]),
            5 => ("0", &parts[..]),
            n => {
                return Err(TriggerError::BadRule {
                    kind: "cron",
                    rule: expr.to_string(),
                    reason: format!("expected 5 or 6 fields, found {n}"),
                })
            }
        };
        Self::new(CronFields {
            second: Some(second.to_string()),
            minute: Some(rest[0].to_string()),
            hour: Some(rest[1].to_string()),
            day: Some(rest[2].to_string()),
            month: Some(rest[3].to_string()),
            day_of_week: Some(rest[4].to_string()),
            ..CronFields::default()
        })
    }

    pub fn with_start_date(mut self, start_date: DateTime<Utc>) -> Self {
        self.start_date = Some(start_date.trunc_subsecs(0));
        self
    }

    pub fn with_end_date(mut self, end_date: DateTime<Utc>) -> Self {
        self.end_date = Some(end_date.trunc_subsecs(0));
        self
    }

    pub fn with_jitter(mut self, jitter_secs: u32) -> Self {
        self.jitter = (jitter_secs > 0).then_some(jitter_secs);
        self
    }

    /// Six-field crontab rendering.
    pub fn rule(&self) -> String {
        [
            FieldKind::Second,
            FieldKind::Minute,
            FieldKind::Hour,
            FieldKind::Day,
            FieldKind::Month,
            FieldKind::DayOfWeek,
        ]
        .iter()
        .map(|kind| self.field(*kind).source.replace(' ', "_"))
        .collect::<Vec<_>>()
        .join(" ")
    }

    pub fn next_fire_time(
        &self,
        previous: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> TriggerResult<Option<DateTime<Utc>>> {
        let start = match previous {
            Some(prev) => prev + Duration::microseconds(1),
            None => match self.start_date {
                Some(start_date) => start_date.max(now),
                None => now,
            },
        };

        let mut next = ceil_second(start);
        let mut fieldnum: isize = 0;
        let mut steps = 0usize;

        while (0..self.fields.len() as isize).contains(&fieldnum) {
            steps += 1;
            if steps > MAX_STEPS {
                return Err(TriggerError::Evaluation(format!(
                    "cron search for {:?} did not converge",
                    self.rule()
                )));
            }

            let field = &self.fields[fieldnum as usize];
            let current = field.value(&next);
            match field.next_value(&next) {
                None => {
                    (next, fieldnum) = self.increment_field(next, fieldnum - 1)?;
                }
                Some(value) if value > current => {
                    if field.kind.is_real() {
                        next = self.set_field(next, fieldnum as usize, value)?;
                        fieldnum += 1;
                    } else {
                        (next, fieldnum) = self.increment_field(next, fieldnum)?;
                    }
                }
                Some(_) => fieldnum += 1,
            }

            if self.end_date.is_some_and(|end| next > end) {
                return Ok(None);
            }
        }

        if fieldnum < 0 {
            return Ok(None);
        }
        let shifted = apply_jitter(next, self.jitter, previous, now);
        Ok(Some(match self.end_date {
            Some(end) => shifted.min(end),
            None => shifted,
        }))
    }

    fn field(&self, kind: FieldKind) -> &CronField {
        let idx = FieldKind::ORDERED
            .iter()
            .position(|k| *k == kind)
            .unwrap_or_default();
        &self.fields[idx]
    }

    /// Bump field `fieldnum` by one, carrying into coarser fields on
    /// overflow; finer fields reset to their minimum. Returns the field the
    /// search should resume from (`-1` when the calendar is exhausted).
    fn increment_field(
        &self,
        dateval: DateTime<Utc>,
        mut fieldnum: isize,
    ) -> TriggerResult<(DateTime<Utc>, isize)> {
        let mut values = [0u32; 8];
        let mut i: isize = 0;

        while i < self.fields.len() as isize {
            if i < 0 {
                return Ok((dateval, -1));
            }
            let kind = self.fields[i as usize].kind;
            if !kind.is_real() {
                if i == fieldnum {
                    fieldnum -= 1;
                    i -= 1;
                } else {
                    i += 1;
                }
                continue;
            }

            if i < fieldnum {
                values[i as usize] = kind.value(&dateval);
                i += 1;
            } else if i > fieldnum {
                values[i as usize] = kind.min_value();
                i += 1;
            } else {
                let value = kind.value(&dateval);
                if value == kind.max_at(&dateval) {
                    fieldnum -= 1;
                    i -= 1;
                } else {
                    values[i as usize] = value + 1;
                    i += 1;
                }
            }
        }

        Ok((build_datetime(&values)?, fieldnum))
    }

    /// Set field `fieldnum` to `value`, keep coarser fields, reset finer ones.
    fn set_field(
        &self,
        dateval: DateTime<Utc>,
        fieldnum: usize,
        value: u32,
    ) -> TriggerResult<DateTime<Utc>> {
        let mut values = [0u32; 8];
        for (i, field) in self.fields.iter().enumerate() {
            if !field.kind.is_real() {
                continue;
            }
            values[i] = match i.cmp(&fieldnum) {
                std::cmp::Ordering::Less => field.kind.value(&dateval),
                std::cmp::Ordering::Greater => field.kind.min_value(),
                std::cmp::Ordering::Equal => value,
            };
        }
        build_datetime(&values)
    }
}

/// `values` is indexed like [`FieldKind::ORDERED`]; week slots are ignored.
fn build_datetime(values: &[u32; 8]) -> TriggerResult<DateTime<Utc>> {
    Utc.with_ymd_and_hms(
        values[0] as i32,
        values[1],
        values[2],
        values[5],
        values[6],
        values[7],
    )
    .single()
    .ok_or_else(|| {
        TriggerError::Evaluation(format!(
            "no such instant {:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            values[0], values[1], values[2], values[5], values[6], values[7]
        ))
    })
}

impl TryFrom<CronFields> for CronTrigger {
    type Error = TriggerError;

    fn try_from(spec: CronFields) -> Result<Self, Self::Error> {
        CronTrigger::new(spec)
    }
}

impl From<CronTrigger> for CronFields {
    fn from(trigger: CronTrigger) -> Self {
        let source = |kind: FieldKind| Some(trigger.field(kind).source.clone());
        CronFields {
            year: source(FieldKind::Year),
            month: source(FieldKind::Month),
            day: source(FieldKind::Day),
            week: source(FieldKind::Week),
            day_of_week: source(FieldKind::DayOfWeek),
            hour: source(FieldKind::Hour),
            minute: source(FieldKind::Minute),
            second: source(FieldKind::Second),
            start_date: trigger.start_date,
            end_date: trigger.end_date,
            jitter: trigger.jitter,
        }
    }
}

impl PartialEq for CronTrigger {
    fn eq(&self, other: &Self) -> bool {
        self.fields
            .iter()
            .zip(&other.fields)
            .all(|(a, b)| a.source == b.source)
            && self.start_date == other.start_date
            && self.end_date == other.end_date
            && self.jitter == other.jitter
    }
}
