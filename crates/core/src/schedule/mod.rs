//! Next-fire computation for scheduled work.
//!
//! Two grammars are supported:
//! - the simple grammar shared by alerts and pipelines
//!   (`CRON | "1m" | "5m" | "15m" | "30m" | "1h" | <minutes>`), parsed into
//!   [`Schedule`];
//! - the named report cadences (daily / weekly / monthly / cron), see
//!   [`ReportCadence`].
//!
//! Every computation resolves an IANA zone first and falls back to UTC when
//! the zone is unknown. All functions take `now` explicitly.

mod cron;
mod report;
mod timezone;

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;

use crate::error::CoreError;

pub use self::cron::CronExpr;
pub use self::report::{ReportCadence, ScheduleKind, TimeOfDay};
pub use self::timezone::resolve_timezone;

/// Closed interval vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    OneHour,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::OneMinute => "1m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::ThirtyMinutes => "30m",
            Interval::OneHour => "1h",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Interval::OneMinute => Duration::minutes(1),
            Interval::FiveMinutes => Duration::minutes(5),
            Interval::FifteenMinutes => Duration::minutes(15),
            Interval::ThirtyMinutes => Duration::minutes(30),
            Interval::OneHour => Duration::hours(1),
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(Interval::OneMinute),
            "5m" => Some(Interval::FiveMinutes),
            "15m" => Some(Interval::FifteenMinutes),
            "30m" => Some(Interval::ThirtyMinutes),
            "1h" => Some(Interval::OneHour),
            _ => None,
        }
    }
}

/// A parsed alert/pipeline schedule string.
#[derive(Debug, Clone)]
pub enum Schedule {
    Cron(CronExpr),
    Interval(Interval),
    /// Bare positive integer: every N minutes.
    Minutes(u32),
}

impl Schedule {
    pub fn parse(expr: &str) -> Result<Self, CoreError> {
        let trimmed = expr.trim();
        if trimmed.contains(' ') || trimmed.contains('*') {
            return CronExpr::parse(trimmed).map(Schedule::Cron);
        }
        if let Some(interval) = Interval::parse(trimmed) {
            return Ok(Schedule::Interval(interval));
        }
        match trimmed.parse::<u32>() {
            Ok(n) if n > 0 => Ok(Schedule::Minutes(n)),
            _ => Err(CoreError::UnsupportedSchedule(trimmed.to_string())),
        }
    }

    /// Next fire time strictly after `now`, evaluated in `tz`.
    pub fn next_after(&self, now: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Cron(cron) => cron
                .next_after(&now.with_timezone(&tz))
                .map(|t| t.with_timezone(&Utc)),
            Schedule::Interval(interval) => Some(now + interval.duration()),
            Schedule::Minutes(n) => Some(now + Duration::minutes(i64::from(*n))),
        }
    }
}

impl FromStr for Schedule {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Schedule::parse(s)
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Schedule::Cron(cron) => write!(f, "{cron}"),
            Schedule::Interval(interval) => f.write_str(interval.as_str()),
            Schedule::Minutes(n) => write!(f, "{n}"),
        }
    }
}

/// Compute the next run of a simple schedule string in the named zone.
pub fn next_run(expr: &str, timezone: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, CoreError> {
    let schedule = Schedule::parse(expr)?;
    let tz = resolve_timezone(timezone);
    schedule
        .next_after(now, tz)
        .ok_or_else(|| CoreError::UnsupportedSchedule(format!("{expr}: no future fire time")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn parses_each_grammar_branch() {
        assert!(matches!(Schedule::parse("*/5 * * * *").unwrap(), Schedule::Cron(_)));
        assert!(matches!(
            Schedule::parse("15m").unwrap(),
            Schedule::Interval(Interval::FifteenMinutes)
        ));
        assert!(matches!(Schedule::parse("90").unwrap(), Schedule::Minutes(90)));
    }

    #[test]
    fn rejects_unsupported_input() {
        for bad in ["", "2m", "0", "-5", "hourly", "1d"] {
            assert!(
                matches!(Schedule::parse(bad), Err(CoreError::UnsupportedSchedule(_))),
                "{bad:?} should be unsupported"
            );
        }
        assert!(matches!(
            Schedule::parse("* * *"),
            Err(CoreError::InvalidCron { .. })
        ));
    }

    #[test]
    fn interval_and_minutes_add_duration() {
        let now = at(2025, 1, 1, 10, 7, 13);
        assert_eq!(next_run("1h", "UTC", now).unwrap(), at(2025, 1, 1, 11, 7, 13));
        assert_eq!(next_run("45", "UTC", now).unwrap(), at(2025, 1, 1, 10, 52, 13));
    }

    #[test]
    fn cron_uses_timezone() {
        // 09:00 in Manila (UTC+8) is 01:00 UTC.
        let now = at(2025, 6, 1, 2, 0, 0);
        let next = next_run("0 9 * * *", "Asia/Manila", now).unwrap();
        assert_eq!(next, at(2025, 6, 2, 1, 0, 0));
    }

    #[test]
    fn unknown_timezone_behaves_like_utc() {
        let now = at(2025, 6, 1, 2, 0, 0);
        assert_eq!(
            next_run("0 9 * * *", "Nowhere/Special", now).unwrap(),
            next_run("0 9 * * *", "UTC", now).unwrap()
        );
    }

    #[test]
    fn cron_round_trip_is_stable() {
        let now = at(2025, 2, 14, 8, 3, 0);
        let first = Schedule::parse("*/10 8-17 * * 1-5").unwrap();
        let next = first.next_after(now, Tz::UTC).unwrap();
        let reparsed = Schedule::parse(&first.to_string()).unwrap();
        assert_eq!(reparsed.next_after(now, Tz::UTC).unwrap(), next);
        assert_eq!(next, at(2025, 2, 14, 8, 10, 0));
    }

    #[test]
    fn next_run_is_strictly_future() {
        let now = at(2025, 1, 1, 0, 5, 0);
        assert!(next_run("*/5 * * * *", "UTC", now).unwrap() > now);
    }
}
