//! Fire-time computation.
//!
//! A [`Trigger`] is an immutable value: given the previous fire time (or
//! `None` for the first fire) and the current time it yields the next fire
//! time, or `None` once it is exhausted.
//!
//! | Variant    | Rule string                                  |
//! |------------|----------------------------------------------|
//! | `Date`     | `now` or `YYYY-MM-DD HH:MM:SS[.ffffff]`      |
//! | `Interval` | `<n>s`, `<n>m`, `<n>h`, `<n>d`               |
//! | `Cron`     | `second minute hour day month day_of_week`   |

mod cron;
mod date;
mod interval;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::TriggerError;

pub use cron::{CronFields, CronTrigger};
pub use date::DateTrigger;
pub use interval::IntervalTrigger;

pub(crate) type TriggerResult<T> = std::result::Result<T, TriggerError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    Date(DateTrigger),
    Interval(IntervalTrigger),
    Cron(CronTrigger),
}

/// Discriminant of [`Trigger`], persisted in the `job_trigger` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Date,
    Interval,
    Cron,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Date => "date",
            TriggerKind::Interval => "interval",
            TriggerKind::Cron => "cron",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerKind {
    type Err = TriggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "date" => Ok(TriggerKind::Date),
            "interval" => Ok(TriggerKind::Interval),
            "cron" => Ok(TriggerKind::Cron),
            other => Err(TriggerError::UnknownKind(other.to_string())),
        }
    }
}

impl Trigger {
    /// Build a trigger from its kind and rule string.
    ///
    /// `now` anchors the relative parts of the grammar: `date now` and the
    /// implicit start of an interval.
    pub fn parse(kind: &str, rule: &str, now: DateTime<Utc>) -> TriggerResult<Self> {
        match kind.parse::<TriggerKind>()? {
            TriggerKind::Date => DateTrigger::parse(rule, now).map(Trigger::Date),
            TriggerKind::Interval => IntervalTrigger::parse(rule, now).map(Trigger::Interval),
            TriggerKind::Cron => CronTrigger::from_crontab(rule).map(Trigger::Cron),
        }
    }

    pub fn kind(&self) -> TriggerKind {
        match self {
            Trigger::Date(_) => TriggerKind::Date,
            Trigger::Interval(_) => TriggerKind::Interval,
            Trigger::Cron(_) => TriggerKind::Cron,
        }
    }

    /// Canonical rule string, carried to listeners and the `job_rule` column.
    pub fn rule(&self) -> String {
        match self {
            Trigger::Date(t) => t.rule(),
            Trigger::Interval(t) => t.rule(),
            Trigger::Cron(t) => t.rule(),
        }
    }

    /// Next fire time strictly after `previous`, or the first one when
    /// `previous` is `None`. `Ok(None)` means the trigger is exhausted.
    pub fn next_fire_time(
        &self,
        previous: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> TriggerResult<Option<DateTime<Utc>>> {
        match self {
            Trigger::Date(t) => Ok(t.next_fire_time(previous)),
            Trigger::Interval(t) => t.next_fire_time(previous, now),
            Trigger::Cron(t) => t.next_fire_time(previous, now),
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.kind(), self.rule())
    }
}

/// Round up to the next whole second (no-op on whole seconds).
pub(crate) fn ceil_second(dt: DateTime<Utc>) -> DateTime<Utc> {
    let floor = dt.trunc_subsecs(0);
    if floor == dt {
        dt
    } else {
        floor + Duration::seconds(1)
    }
}

/// Shift `candidate` by a uniform whole-second offset in `[-jitter, +jitter]`.
///
/// The result never precedes `previous + 1s`, and never precedes `now` when
/// the unshifted candidate did not.
pub(crate) fn apply_jitter(
    candidate: DateTime<Utc>,
    jitter: Option<u32>,
    previous: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let jitter = match jitter {
        Some(j) if j > 0 => i64::from(j),
        _ => return candidate,
    };
    let offset = rand::thread_rng().gen_range(-jitter..=jitter);
    let mut shifted = candidate + Duration::seconds(offset);
    if candidate >= now {
        shifted = shifted.max(ceil_second(now).min(candidate));
    }
    if let Some(prev) = previous {
        shifted = shifted.max(prev + Duration::seconds(1));
    }
    shifted
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, h, m, s).unwrap()
    }

    #[test]
    fn parse_dispatches_on_kind() {
        let now = at(0, 0, 0);
        assert_eq!(Trigger::parse("date", "now", now).unwrap().kind(), TriggerKind::Date);
        assert_eq!(
            Trigger::parse("interval", "5s", now).unwrap().kind(),
            TriggerKind::Interval
        );
        assert_eq!(
            Trigger::parse("CRON", "0 0 * * * *", now).unwrap().kind(),
            TriggerKind::Cron
        );
        assert!(matches!(
            Trigger::parse("hourly", "1", now),
            Err(TriggerError::UnknownKind(_))
        ));
    }

    #[test]
    fn serde_tags_variant_by_kind() {
        let trigger = Trigger::parse("cron", "0 */5 * * * *", at(0, 0, 0)).unwrap();
        let json = serde_json::to_value(&trigger).unwrap();
        assert_eq!(json["kind"], "cron");
        let back: Trigger = serde_json::from_value(json).unwrap();
        assert_eq!(back, trigger);
    }

    #[test]
    fn ceil_second_rounds_up_fractions_only() {
        let whole = at(0, 0, 5);
        assert_eq!(ceil_second(whole), whole);
        let fractional = whole + Duration::milliseconds(1);
        assert_eq!(ceil_second(fractional), at(0, 0, 6));
    }

    #[test]
    fn jitter_never_moves_before_previous_or_now() {
        let now = at(0, 0, 10);
        let previous = at(0, 0, 9);
        for _ in 0..200 {
            let shifted = apply_jitter(at(0, 0, 11), Some(30), Some(previous), now);
            assert!(shifted >= now);
            assert!(shifted >= previous + Duration::seconds(1));
            assert!(shifted <= at(0, 0, 41));
        }
    }

    #[test]
    fn monotonic_for_every_variant() {
        let now = at(12, 0, 0);
        let triggers = [
            Trigger::parse("interval", "1s", now).unwrap(),
            Trigger::parse("interval", "3m", now).unwrap(),
            Trigger::parse("cron", "* * * * * *", now).unwrap(),
            Trigger::parse("cron", "30 15 10 * * mon-fri", now).unwrap(),
        ];
        for trigger in &triggers {
            let mut previous = trigger.next_fire_time(None, now).unwrap().unwrap();
            for _ in 0..20 {
                let next = trigger.next_fire_time(Some(previous), now).unwrap().unwrap();
                assert!(
                    next >= previous + Duration::seconds(1),
                    "{trigger}: {next} not after {previous}"
                );
                previous = next;
            }
        }
    }
}
