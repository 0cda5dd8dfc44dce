//! 5-field cron normalisation and parsing on top of the `cron` crate.

use std::str::FromStr;

use chrono::{DateTime, TimeZone};

use crate::error::CoreError;

/// A parsed 5-field cron expression that remembers its source text.
///
/// When both day-of-month and day-of-week are restricted the expression
/// fires on days matching either field, as POSIX cron does. The `cron`
/// crate requires both, so that case is held as two schedules.
#[derive(Debug, Clone)]
pub struct CronExpr {
    source: String,
    schedules: Vec<cron::Schedule>,
}

impl CronExpr {
    /// Parse a standard 5-field expression
    /// (`minute hour day-of-month month day-of-week`).
    pub fn parse(expr: &str) -> Result<Self, CoreError> {
        let trimmed = expr.trim();
        let fields = trimmed.split_whitespace().count();
        if fields != 5 {
            return Err(CoreError::InvalidCron {
                expr: trimmed.to_string(),
                reason: format!("expected 5 fields, found {fields}"),
            });
        }
        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        let variants = if is_restricted(fields[2]) && is_restricted(fields[4]) {
            vec![
                format!("{} {} {} {} *", fields[0], fields[1], fields[2], fields[3]),
                format!("{} {} * {} {}", fields[0], fields[1], fields[3], fields[4]),
            ]
        } else {
            vec![fields.join(" ")]
        };
        let schedules = variants
            .iter()
            .map(|v| {
                let normalized = normalize_cron(v)?;
                cron::Schedule::from_str(&normalized).map_err(|e| CoreError::InvalidCron {
                    expr: trimmed.to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            source: fields.join(" "),
            schedules,
        })
    }

    /// First fire time strictly after `after`, in the zone of `after`.
    pub fn next_after<Z: TimeZone>(&self, after: &DateTime<Z>) -> Option<DateTime<Z>> {
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.after(after).next())
            .min()
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl std::fmt::Display for CronExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

/// A day field is restricted unless it starts with `*` or is `?`.
fn is_restricted(field: &str) -> bool {
    !(field.starts_with('*') || field == "?")
}

/// Normalize a 5-field expression to the 6-field form the `cron` crate
/// expects: prepend "0 " for seconds and shift numeric day-of-week values
/// from POSIX numbering (0 or 7 = Sunday) to the crate's (1 = Sunday).
pub(crate) fn normalize_cron(cron_5field: &str) -> Result<String, CoreError> {
    let fields: Vec<&str> = cron_5field.split_whitespace().collect();
    let [minute, hour, dom, month, dow] = fields.as_slice() else {
        return Err(CoreError::InvalidCron {
            expr: cron_5field.to_string(),
            reason: "expected 5 fields".to_string(),
        });
    };
    let dow = translate_dow(dow).map_err(|reason| CoreError::InvalidCron {
        expr: cron_5field.to_string(),
        reason,
    })?;
    Ok(format!("0 {minute} {hour} {dom} {month} {dow}"))
}

fn translate_dow(field: &str) -> Result<String, String> {
    let mut out = Vec::new();
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((r, s)) => (r, Some(s)),
            None => (item, None),
        };
        let translated = match range.split_once('-') {
            Some((a, b)) => {
                let (start, end) = (shift_day(a)?, shift_day(b)?);
                match (start.parse::<u8>(), end.parse::<u8>()) {
                    // Sunday moved from the start of the week to day 1, so a
                    // range ending on Sunday wraps and has to be split.
                    (Ok(s), Ok(e)) if s > e && step.is_none() => {
                        out.push(format!("{s}-7"));
                        out.push(if e == 1 { "1".to_string() } else { format!("1-{e}") });
                        continue;
                    }
                    _ => format!("{start}-{end}"),
                }
            }
            None => shift_day(range)?,
        };
        match step {
            Some(s) => out.push(format!("{translated}/{s}")),
            None => out.push(translated),
        }
    }
    Ok(out.join(","))
}

fn shift_day(token: &str) -> Result<String, String> {
    if token == "*" || token == "?" {
        return Ok(token.to_string());
    }
    match token.parse::<u8>() {
        Ok(0) | Ok(7) => Ok("1".to_string()),
        Ok(n) if n <= 6 => Ok((n + 1).to_string()),
        Ok(n) => Err(format!("day-of-week {n} out of range 0-7")),
        // Named days (MON, tue, ...) pass through unchanged.
        Err(_) => Ok(token.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Utc, Weekday};

    #[test]
    fn normalize_cron_prepends_seconds() {
        assert_eq!(normalize_cron("*/15 * * * *").unwrap(), "0 */15 * * * *");
        assert_eq!(normalize_cron("30 2 1 * *").unwrap(), "0 30 2 1 * *");
    }

    #[test]
    fn normalize_cron_shifts_weekdays() {
        assert_eq!(normalize_cron("0 6 * * 1-5").unwrap(), "0 0 6 * * 2-6");
        assert_eq!(normalize_cron("0 6 * * 0").unwrap(), "0 0 6 * * 1");
        assert_eq!(normalize_cron("0 6 * * 5-7").unwrap(), "0 0 6 * * 6-7,1");
        assert_eq!(normalize_cron("0 6 * * MON").unwrap(), "0 0 6 * * MON");
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(CronExpr::parse("0 */5 * * * *").is_err());
        assert!(CronExpr::parse("* * *").is_err());
    }

    #[test]
    fn rejects_out_of_range_weekday() {
        assert!(CronExpr::parse("0 6 * * 9").is_err());
    }

    #[test]
    fn weekday_one_means_monday() {
        let cron = CronExpr::parse("0 9 * * 1").unwrap();
        // 2025-01-01 is a Wednesday.
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let next = cron.next_after(&now).unwrap();
        assert_eq!(next.weekday(), Weekday::Mon);
        assert_eq!(next.day(), 6);
        assert_eq!(next.hour(), 9);
    }

    #[test]
    fn day_of_month_or_weekday_when_both_restricted() {
        let cron = CronExpr::parse("0 9 1 * 1").unwrap();
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        // Monday the 6th comes before the 1st of February.
        let first = cron.next_after(&now).unwrap();
        assert_eq!(first, Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap());

        let late_jan = Utc.with_ymd_and_hms(2025, 1, 28, 10, 0, 0).unwrap();
        assert_eq!(
            cron.next_after(&late_jan).unwrap(),
            Utc.with_ymd_and_hms(2025, 2, 1, 9, 0, 0).unwrap()
        );
        assert_eq!(cron.as_str(), "0 9 1 * 1");
    }

    #[test]
    fn starred_weekday_keeps_day_of_month_only() {
        let cron = CronExpr::parse("0 9 15 * *").unwrap();
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(
            cron.next_after(&now).unwrap(),
            Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn next_after_is_strictly_later() {
        let cron = CronExpr::parse("*/5 * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 10, 5, 0).unwrap();
        assert_eq!(
            cron.next_after(&now).unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 1, 10, 10, 0).unwrap()
        );
    }
}
