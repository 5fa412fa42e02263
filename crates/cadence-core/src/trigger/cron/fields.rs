use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};

use super::expressions::Expression;
use crate::error::TriggerError;

/// The eight cron fields, coarse to fine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FieldKind {
    Year,
    Month,
    Day,
    Week,
    DayOfWeek,
    Hour,
    Minute,
    Second,
}

impl FieldKind {
    pub(crate) const ORDERED: [FieldKind; 8] = [
        FieldKind::Year,
        FieldKind::Month,
        FieldKind::Day,
        FieldKind::Week,
        FieldKind::DayOfWeek,
        FieldKind::Hour,
        FieldKind::Minute,
        FieldKind::Second,
    ];

    pub(crate) fn name(self) -> &'static str {
        match self {
            FieldKind::Year => "year",
            FieldKind::Month => "month",
            FieldKind::Day => "day",
            FieldKind::Week => "week",
            FieldKind::DayOfWeek => "day_of_week",
            FieldKind::Hour => "hour",
            FieldKind::Minute => "minute",
            FieldKind::Second => "second",
        }
    }

    /// Expression a field takes when it is finer than every field given.
    pub(crate) fn default_expr(self) -> &'static str {
        match self {
            FieldKind::Year | FieldKind::Week | FieldKind::DayOfWeek => "*",
            FieldKind::Month | FieldKind::Day => "1",
            FieldKind::Hour | FieldKind::Minute | FieldKind::Second => "0",
        }
    }

    /// Week and day-of-week constrain the date but are not calendar
    /// components; they can only be satisfied by moving a coarser field.
    pub(crate) fn is_real(self) -> bool {
        !matches!(self, FieldKind::Week | FieldKind::DayOfWeek)
    }

    pub(crate) fn min_value(self) -> u32 {
        match self {
            FieldKind::Year => 1970,
            FieldKind::Month | FieldKind::Day | FieldKind::Week => 1,
            FieldKind::DayOfWeek | FieldKind::Hour | FieldKind::Minute | FieldKind::Second => 0,
        }
    }

    /// Static upper bound, used when validating expressions.
    pub(crate) fn max_value(self) -> u32 {
        match self {
            FieldKind::Year => 9999,
            FieldKind::Month => 12,
            FieldKind::Day => 31,
            FieldKind::Week => 53,
            FieldKind::DayOfWeek => 6,
            FieldKind::Hour => 23,
            FieldKind::Minute | FieldKind::Second => 59,
        }
    }

    /// Upper bound for the month `dt` falls in.
    pub(crate) fn max_at(self, dt: &DateTime<Utc>) -> u32 {
        match self {
            FieldKind::Day => days_in_month(dt.year(), dt.month()),
            other => other.max_value(),
        }
    }

    pub(crate) fn value(self, dt: &DateTime<Utc>) -> u32 {
        match self {
            FieldKind::Year => dt.year() as u32,
            FieldKind::Month => dt.month(),
            FieldKind::Day => dt.day(),
            FieldKind::Week => dt.iso_week().week(),
            FieldKind::DayOfWeek => dt.weekday().num_days_from_monday(),
            FieldKind::Hour => dt.hour(),
            FieldKind::Minute => dt.minute(),
            FieldKind::Second => dt.second(),
        }
    }
}

/// One compiled cron field: a union of expressions.
#[derive(Debug, Clone)]
pub(crate) struct CronField {
    pub(crate) kind: FieldKind,
    pub(crate) source: String,
    expressions: Vec<Expression>,
}

impl CronField {
    pub(crate) fn compile(kind: FieldKind, source: &str) -> Result<Self, TriggerError> {
        let normalized = source.trim().to_ascii_lowercase();
        let expressions = normalized
            .split(',')
            .map(|expr| Expression::compile(kind, expr.trim()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            kind,
            source: normalized,
            expressions,
        })
    }

    pub(crate) fn value(&self, dt: &DateTime<Utc>) -> u32 {
        self.kind.value(dt)
    }

    /// Smallest accepted value ≥ the field's current value in `dt`.
    pub(crate) fn next_value(&self, dt: &DateTime<Utc>) -> Option<u32> {
        self.expressions
            .iter()
            .filter_map(|expr| expr.next_value(self.kind, dt))
            .min()
    }
}

pub(crate) fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}
