use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use super::TriggerResult;
use crate::error::TriggerError;

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Fires exactly once, at `run_date` (whole seconds).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateTrigger {
    pub run_date: DateTime<Utc>,
}

impl DateTrigger {
    /// Sub-second precision is dropped.
    pub fn new(run_date: DateTime<Utc>) -> Self {
        Self {
            run_date: run_date.trunc_subsecs(0),
        }
    }

    /// `now` or `YYYY-MM-DD HH:MM:SS[.ffffff]` (UTC), truncated to the second.
    pub fn parse(rule: &str, now: DateTime<Utc>) -> TriggerResult<Self> {
        let rule = rule.trim();
        if rule.eq_ignore_ascii_case("now") {
            return Ok(Self::new(now));
        }
        NaiveDateTime::parse_from_str(rule, DATE_FORMAT)
            .map(|naive| Self::new(naive.and_utc()))
            .map_err(|e| TriggerError::BadRule {
                kind: "date",
                rule: rule.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn rule(&self) -> String {
        self.run_date.format(DATE_FORMAT).to_string()
    }

    pub fn next_fire_time(&self, previous: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        match previous {
            None => Some(self.run_date),
            Some(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn fires_exactly_once() {
        let run_date = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        let trigger = DateTrigger::new(run_date);
        assert_eq!(trigger.next_fire_time(None), Some(run_date));
        assert_eq!(trigger.next_fire_time(Some(run_date)), None);
    }

    #[test]
    fn parses_now_and_timestamps() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(DateTrigger::parse("now", now).unwrap().run_date, now);

        let t = DateTrigger::parse("2025-06-30 23:59:58", now).unwrap();
        assert_eq!(t.run_date, Utc.with_ymd_and_hms(2025, 6, 30, 23, 59, 58).unwrap());
        assert_eq!(t.rule(), "2025-06-30 23:59:58");

        let frac = DateTrigger::parse("2025-06-30 23:59:58.250000", now).unwrap();
        assert_eq!(frac.run_date, t.run_date);
        assert_eq!(frac.rule(), "2025-06-30 23:59:58");
    }

    #[test]
    fn now_is_truncated_to_the_second() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::milliseconds(750);
        let trigger = DateTrigger::parse("now", now).unwrap();
        assert_eq!(trigger.run_date, Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(trigger.run_date.timestamp_subsec_nanos(), 0);
        assert_eq!(trigger.rule(), "2025-01-01 00:00:00");
    }

    #[test]
    fn rejects_garbage() {
        let now = Utc::now();
        assert!(DateTrigger::parse("tomorrow", now).is_err());
        assert!(DateTrigger::parse("2025-13-01 00:00:00", now).is_err());
    }
}
