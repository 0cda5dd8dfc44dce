//! Named report cadences: daily / weekly / monthly at a wall-clock time, or
//! a free cron expression.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::cron::CronExpr;
use super::timezone::{localize, resolve_timezone};
use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    Daily,
    Weekly,
    Monthly,
    Cron,
}

impl ScheduleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleKind::Daily => "daily",
            ScheduleKind::Weekly => "weekly",
            ScheduleKind::Monthly => "monthly",
            ScheduleKind::Cron => "cron",
        }
    }
}

impl std::str::FromStr for ScheduleKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(ScheduleKind::Daily),
            "weekly" => Ok(ScheduleKind::Weekly),
            "monthly" => Ok(ScheduleKind::Monthly),
            "cron" => Ok(ScheduleKind::Cron),
            _ => Err(CoreError::unknown("schedule kind", s)),
        }
    }
}

impl TryFrom<String> for ScheduleKind {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Wall-clock `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOfDay {
    pub hour: u32,
    pub minute: u32,
}

impl TimeOfDay {
    pub const DEFAULT: TimeOfDay = TimeOfDay { hour: 9, minute: 0 };

    /// Parse `HH:MM`; an empty or missing value means 09:00.
    pub fn parse(raw: Option<&str>) -> Result<Self, CoreError> {
        let raw = match raw.map(str::trim) {
            None | Some("") => return Ok(Self::DEFAULT),
            Some(r) => r,
        };
        let invalid = || CoreError::InvalidTimeOfDay(raw.to_string());
        let (h, m) = raw.split_once(':').ok_or_else(invalid)?;
        let hour: u32 = h.parse().map_err(|_| invalid())?;
        let minute: u32 = m.parse().map_err(|_| invalid())?;
        if hour > 23 || minute > 59 {
            return Err(invalid());
        }
        Ok(Self { hour, minute })
    }

    fn has_passed(&self, local: &DateTime<Tz>) -> bool {
        local.hour() > self.hour || (local.hour() == self.hour && local.minute() >= self.minute)
    }
}

impl std::fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// A validated report schedule.
#[derive(Debug, Clone)]
pub enum ReportCadence {
    Daily { at: TimeOfDay },
    /// `day_of_week`: 0 = Sunday .. 6 = Saturday.
    Weekly { day_of_week: u32, at: TimeOfDay },
    /// `day_of_month`: 1..=31, clamped to the month's last day.
    Monthly { day_of_month: u32, at: TimeOfDay },
    Cron(CronExpr),
}

impl ReportCadence {
    /// Build and validate a cadence from the stored report fields.
    pub fn from_parts(
        kind: ScheduleKind,
        time_of_day: Option<&str>,
        day_of_week: Option<i32>,
        day_of_month: Option<i32>,
        cron: Option<&str>,
    ) -> Result<Self, CoreError> {
        match kind {
            ScheduleKind::Daily => Ok(ReportCadence::Daily {
                at: TimeOfDay::parse(time_of_day)?,
            }),
            ScheduleKind::Weekly => {
                let dow = day_of_week.ok_or_else(|| {
                    CoreError::InvalidField("day_of_week is required for weekly schedules".into())
                })?;
                if !(0..=6).contains(&dow) {
                    return Err(CoreError::InvalidField(
                        "day_of_week must be between 0 (Sunday) and 6 (Saturday)".into(),
                    ));
                }
                Ok(ReportCadence::Weekly {
                    day_of_week: dow as u32,
                    at: TimeOfDay::parse(time_of_day)?,
                })
            }
            ScheduleKind::Monthly => {
                let dom = day_of_month.ok_or_else(|| {
                    CoreError::InvalidField("day_of_month is required for monthly schedules".into())
                })?;
                if !(1..=31).contains(&dom) {
                    return Err(CoreError::InvalidField(
                        "day_of_month must be between 1 and 31".into(),
                    ));
                }
                Ok(ReportCadence::Monthly {
                    day_of_month: dom as u32,
                    at: TimeOfDay::parse(time_of_day)?,
                })
            }
            ScheduleKind::Cron => {
                let expr = cron.map(str::trim).filter(|c| !c.is_empty()).ok_or_else(|| {
                    CoreError::InvalidField("cron expression is required for cron schedules".into())
                })?;
                CronExpr::parse(expr).map(ReportCadence::Cron)
            }
        }
    }

    /// Next run strictly after `now`, computed in the named zone.
    pub fn next_run(&self, timezone: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, CoreError> {
        let tz = resolve_timezone(timezone);
        let local = now.with_timezone(&tz);
        let next = match self {
            ReportCadence::Daily { at } => {
                let today = at_time(tz, local.date_naive(), *at);
                if today > local {
                    today
                } else {
                    at_time(tz, local.date_naive() + Duration::days(1), *at)
                }
            }
            ReportCadence::Weekly { day_of_week, at } => {
                let current = local.weekday().num_days_from_sunday() as i64;
                let mut days = *day_of_week as i64 - current;
                if days < 0 || (days == 0 && at.has_passed(&local)) {
                    days += 7;
                }
                at_time(tz, local.date_naive() + Duration::days(days), *at)
            }
            ReportCadence::Monthly { day_of_month, at } => {
                let this_month = clamped_date(local.year(), local.month(), *day_of_month);
                let candidate = at_time(tz, this_month, *at);
                if candidate > local {
                    candidate
                } else {
                    let (y, m) = if local.month() == 12 {
                        (local.year() + 1, 1)
                    } else {
                        (local.year(), local.month() + 1)
                    };
                    at_time(tz, clamped_date(y, m, *day_of_month), *at)
                }
            }
            ReportCadence::Cron(cron) => cron.next_after(&local).ok_or_else(|| {
                CoreError::UnsupportedSchedule(format!("{cron}: no future fire time"))
            })?,
        };
        Ok(next.with_timezone(&Utc))
    }
}

fn at_time(tz: Tz, date: NaiveDate, at: TimeOfDay) -> DateTime<Tz> {
    let naive = date.and_hms_opt(at.hour, at.minute, 0).unwrap_or_default();
    localize(tz, naive)
}

fn last_day_of_month(year: i32, month: u32) -> u32 {
    let (ny, nm) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(ny, nm, 1)
        .and_then(|first| first.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

fn clamped_date(year: i32, month: u32, day: u32) -> NaiveDate {
    let day = day.min(last_day_of_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn monthly(dom: i32, tod: &str) -> ReportCadence {
        ReportCadence::from_parts(ScheduleKind::Monthly, Some(tod), None, Some(dom), None).unwrap()
    }

    #[test]
    fn time_of_day_defaults_to_nine() {
        assert_eq!(TimeOfDay::parse(None).unwrap(), TimeOfDay::DEFAULT);
        assert_eq!(TimeOfDay::parse(Some("")).unwrap().to_string(), "09:00");
        assert!(TimeOfDay::parse(Some("24:00")).is_err());
        assert!(TimeOfDay::parse(Some("9")).is_err());
        assert!(TimeOfDay::parse(Some("07:60")).is_err());
    }

    #[test]
    fn daily_today_or_tomorrow() {
        let cadence =
            ReportCadence::from_parts(ScheduleKind::Daily, Some("09:00"), None, None, None).unwrap();
        assert_eq!(
            cadence.next_run("UTC", at(2025, 3, 10, 8, 0, 0)).unwrap(),
            at(2025, 3, 10, 9, 0, 0)
        );
        assert_eq!(
            cadence.next_run("UTC", at(2025, 3, 10, 9, 0, 0)).unwrap(),
            at(2025, 3, 11, 9, 0, 0)
        );
    }

    #[test]
    fn weekly_advances_seven_days_when_time_passed() {
        // 2025-03-10 is a Monday (day_of_week = 1).
        let cadence =
            ReportCadence::from_parts(ScheduleKind::Weekly, Some("10:30"), Some(1), None, None)
                .unwrap();
        assert_eq!(
            cadence.next_run("UTC", at(2025, 3, 10, 9, 0, 0)).unwrap(),
            at(2025, 3, 10, 10, 30, 0)
        );
        assert_eq!(
            cadence.next_run("UTC", at(2025, 3, 10, 11, 0, 0)).unwrap(),
            at(2025, 3, 17, 10, 30, 0)
        );
        // From Wednesday, next Monday.
        assert_eq!(
            cadence.next_run("UTC", at(2025, 3, 12, 0, 0, 0)).unwrap(),
            at(2025, 3, 17, 10, 30, 0)
        );
    }

    #[test]
    fn monthly_clamps_to_month_end() {
        let cadence = monthly(31, "09:00");
        assert_eq!(
            cadence.next_run("UTC", at(2025, 1, 31, 9, 0, 0)).unwrap(),
            at(2025, 2, 28, 9, 0, 0)
        );
        assert_eq!(
            cadence.next_run("UTC", at(2024, 1, 31, 9, 0, 0)).unwrap(),
            at(2024, 2, 29, 9, 0, 0)
        );
    }

    #[test]
    fn monthly_clamped_day_in_current_month() {
        let cadence = monthly(31, "09:00");
        assert_eq!(
            cadence.next_run("UTC", at(2025, 4, 2, 0, 0, 0)).unwrap(),
            at(2025, 4, 30, 9, 0, 0)
        );
    }

    #[test]
    fn monthly_wraps_year() {
        let cadence = monthly(15, "06:00");
        assert_eq!(
            cadence.next_run("UTC", at(2025, 12, 20, 0, 0, 0)).unwrap(),
            at(2026, 1, 15, 6, 0, 0)
        );
    }

    #[test]
    fn daily_respects_timezone() {
        let cadence =
            ReportCadence::from_parts(ScheduleKind::Daily, Some("09:00"), None, None, None).unwrap();
        // 09:00 New York in January is 14:00 UTC.
        assert_eq!(
            cadence.next_run("America/New_York", at(2025, 1, 15, 12, 0, 0)).unwrap(),
            at(2025, 1, 15, 14, 0, 0)
        );
    }

    #[test]
    fn validation_errors() {
        assert!(ReportCadence::from_parts(ScheduleKind::Weekly, None, None, None, None).is_err());
        assert!(ReportCadence::from_parts(ScheduleKind::Weekly, None, Some(7), None, None).is_err());
        assert!(ReportCadence::from_parts(ScheduleKind::Monthly, None, None, Some(0), None).is_err());
        assert!(ReportCadence::from_parts(ScheduleKind::Cron, None, None, None, Some("")).is_err());
        assert!(
            ReportCadence::from_parts(ScheduleKind::Cron, None, None, None, Some("0 8 * * 1"))
                .is_ok()
        );
    }
}
