use chrono::{DateTime, Datelike, NaiveDate, Utc};

use super::fields::{days_in_month, FieldKind};
use crate::error::TriggerError;

const WEEKDAYS: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];
const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const POSITIONS: [&str; 6] = ["1st", "2nd", "3rd", "4th", "5th", "last"];

/// A single comma-separated term of a cron field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Expression {
    /// `*` or `*/step`.
    All { step: Option<u32> },
    /// `a`, `a-b`, `a/step`, `a-b/step`; month and weekday names compile here too.
    Range {
        first: u32,
        last: Option<u32>,
        step: Option<u32>,
    },
    /// `1st mon` … `5th sun`, `last fri` (day field only; `_` may replace the
    /// space inside crontab strings). `position` 0..=4, 5 = last.
    WeekdayPosition { position: u32, weekday: u32 },
    /// `last` (day field only).
    LastDayOfMonth,
}

impl Expression {
    pub(crate) fn compile(kind: FieldKind, expr: &str) -> Result<Self, TriggerError> {
        let fail = |reason: String| TriggerError::BadExpression {
            field: kind.name(),
            expr: expr.to_string(),
            reason,
        };

        if expr.is_empty() {
            return Err(fail("empty expression".to_string()));
        }

        if let Some(rest) = expr.strip_prefix('*') {
            let step = match rest.strip_prefix('/') {
                Some(step) => Some(parse_step(step).map_err(fail)?),
                None if rest.is_empty() => None,
                None => return Err(fail("unrecognised expression".to_string())),
            };
            let span = kind.max_value() - kind.min_value();
            if let Some(step) = step {
                if step > span {
                    return Err(fail(format!(
                        "step {step} is larger than the field range ({span})"
                    )));
                }
            }
            return Ok(Expression::All { step });
        }

        if kind == FieldKind::Day {
            if expr == "last" {
                return Ok(Expression::LastDayOfMonth);
            }
            if let Some((position, weekday)) = expr.split_once([' ', '_']) {
                let position = POSITIONS
                    .iter()
                    .position(|p| *p == position.trim())
                    .ok_or_else(|| fail(format!("unknown position {position:?}")))?;
                let weekday = name_index(&WEEKDAYS, weekday.trim())
                    .ok_or_else(|| fail(format!("unknown weekday {weekday:?}")))?;
                return Ok(Expression::WeekdayPosition {
                    position: position as u32,
                    weekday,
                });
            }
        }

        let (bounds, step) = match expr.split_once('/') {
            Some((bounds, step)) => (bounds, Some(parse_step(step).map_err(fail)?)),
            None => (expr, None),
        };
        let (first, last) = match bounds.split_once('-') {
            Some((first, last)) => (first, Some(last)),
            None => (bounds, None),
        };

        let names: Option<&[&str]> = match kind {
            FieldKind::Month => Some(&MONTHS[..]),
            FieldKind::DayOfWeek => Some(&WEEKDAYS[..]),
            _ => None,
        };
        let offset = if kind == FieldKind::Month { 1 } else { 0 };
        let parse_bound = |text: &str| -> Result<u32, TriggerError> {
            let text = text.trim();
            if let Ok(n) = text.parse::<u32>() {
                return Ok(n);
            }
            names
                .and_then(|names| name_index(names, text))
                .map(|idx| idx + offset)
                .ok_or_else(|| fail("unrecognised expression".to_string()))
        };

        let first = parse_bound(first)?;
        let last = match (last, step) {
            (Some(last), _) => Some(parse_bound(last)?),
            // A bare value is a one-element range; `a/step` runs to the field maximum.
            (None, None) => Some(first),
            (None, Some(_)) => None,
        };

        if first < kind.min_value() {
            return Err(fail(format!(
                "{first} is below the minimum ({})",
                kind.min_value()
            )));
        }
        if let Some(last) = last {
            if last > kind.max_value() {
                return Err(fail(format!(
                    "{last} is above the maximum ({})",
                    kind.max_value()
                )));
            }
            if last < first {
                return Err(fail(format!("range end {last} precedes start {first}")));
            }
        }
        if let Some(step) = step {
            let span = last.unwrap_or(kind.max_value()) - first;
            if step > span {
                return Err(fail(format!(
                    "step {step} is larger than the range ({span})"
                )));
            }
        }

        Ok(Expression::Range { first, last, step })
    }

    pub(crate) fn next_value(&self, kind: FieldKind, dt: &DateTime<Utc>) -> Option<u32> {
        match *self {
            Expression::All { step } => {
                let min = kind.min_value();
                let start = kind.value(dt).max(min);
                let next = match step {
                    Some(step) => start + (step - (start - min) % step) % step,
                    None => start,
                };
                (next <= kind.max_at(dt)).then_some(next)
            }
            Expression::Range { first, last, step } => {
                let min = kind.min_value().max(first);
                let max = match last {
                    Some(last) => kind.max_at(dt).min(last),
                    None => kind.max_at(dt),
                };
                let mut next = kind.value(dt).max(min);
                if let Some(step) = step {
                    next += (step - (next - min) % step) % step;
                }
                (next <= max).then_some(next)
            }
            Expression::WeekdayPosition { position, weekday } => {
                let (year, month) = (dt.year(), dt.month());
                let first_weekday = NaiveDate::from_ymd_opt(year, month, 1)?
                    .weekday()
                    .num_days_from_monday() as i64;
                let last_day = i64::from(days_in_month(year, month));
                let mut first_hit = i64::from(weekday) - first_weekday + 1;
                if first_hit <= 0 {
                    first_hit += 7;
                }
                let target = if position < 5 {
                    first_hit + i64::from(position) * 7
                } else {
                    first_hit + ((last_day - first_hit) / 7) * 7
                };
                (target <= last_day && target >= i64::from(dt.day())).then_some(target as u32)
            }
            Expression::LastDayOfMonth => Some(days_in_month(dt.year(), dt.month())),
        }
    }
}

fn parse_step(text: &str) -> Result<u32, String> {
    match text.trim().parse::<u32>() {
        Ok(0) => Err("step must be greater than zero".to_string()),
        Ok(step) => Ok(step),
        Err(_) => Err(format!("invalid step {text:?}")),
    }
}

fn name_index(names: &[&str], name: &str) -> Option<u32> {
    names.iter().position(|n| *n == name).map(|idx| idx as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn compiles_each_form() {
        assert_eq!(
            Expression::compile(FieldKind::Minute, "*").unwrap(),
            Expression::All { step: None }
        );
        assert_eq!(
            Expression::compile(FieldKind::Minute, "*/15").unwrap(),
            Expression::All { step: Some(15) }
        );
        assert_eq!(
            Expression::compile(FieldKind::Hour, "9-17/2").unwrap(),
            Expression::Range { first: 9, last: Some(17), step: Some(2) }
        );
        assert_eq!(
            Expression::compile(FieldKind::Second, "5/20").unwrap(),
            Expression::Range { first: 5, last: None, step: Some(20) }
        );
        assert_eq!(
            Expression::compile(FieldKind::Month, "mar-may").unwrap(),
            Expression::Range { first: 3, last: Some(5), step: None }
        );
        assert_eq!(
            Expression::compile(FieldKind::DayOfWeek, "mon-fri").unwrap(),
            Expression::Range { first: 0, last: Some(4), step: None }
        );
        assert_eq!(
            Expression::compile(FieldKind::Day, "last fri").unwrap(),
            Expression::WeekdayPosition { position: 5, weekday: 4 }
        );
        assert_eq!(
            Expression::compile(FieldKind::Day, "last").unwrap(),
            Expression::LastDayOfMonth
        );
    }

    #[test]
    fn rejects_out_of_range_and_garbage() {
        for (kind, expr) in [
            (FieldKind::Minute, "60"),
            (FieldKind::Hour, "5-3"),
            (FieldKind::Day, "0"),
            (FieldKind::Month, "13"),
            (FieldKind::DayOfWeek, "7"),
            (FieldKind::Second, "*/0"),
            (FieldKind::Second, "*/61"),
            (FieldKind::Minute, "abc"),
            (FieldKind::Minute, "last"),
            (FieldKind::Day, "6th mon"),
            (FieldKind::Hour, "mon"),
        ] {
            assert!(
                Expression::compile(kind, expr).is_err(),
                "{}={expr:?} should fail",
                kind.name()
            );
        }
    }

    #[test]
    fn nth_and_last_weekday_of_month() {
        // January 2025: Wednesday the 1st, Fridays on 3, 10, 17, 24, 31.
        let last_fri = Expression::WeekdayPosition { position: 5, weekday: 4 };
        assert_eq!(last_fri.next_value(FieldKind::Day, &day(2025, 1, 1)), Some(31));

        let first_mon = Expression::WeekdayPosition { position: 0, weekday: 0 };
        assert_eq!(first_mon.next_value(FieldKind::Day, &day(2025, 1, 1)), Some(6));
        assert_eq!(first_mon.next_value(FieldKind::Day, &day(2025, 1, 7)), None);

        // February 2025 has only four Saturdays.
        let fifth_sat = Expression::WeekdayPosition { position: 4, weekday: 5 };
        assert_eq!(fifth_sat.next_value(FieldKind::Day, &day(2025, 2, 1)), None);
    }

    #[test]
    fn day_range_respects_month_length() {
        let d31 = Expression::compile(FieldKind::Day, "31").unwrap();
        assert_eq!(d31.next_value(FieldKind::Day, &day(2025, 4, 1)), None);
        assert_eq!(d31.next_value(FieldKind::Day, &day(2025, 5, 1)), Some(31));
        assert_eq!(
            Expression::LastDayOfMonth.next_value(FieldKind::Day, &day(2024, 2, 3)),
            Some(29)
        );
    }
}
