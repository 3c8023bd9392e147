//! Five field calendar expressions: `minute hour day month weekday`.
//!
//! Each field is `*` or a comma separated list of `n`, `a-b`, `a-b/n`, `*/n` and `a/n`.
//! All five fields must match (no cron style OR between day and weekday).

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Timelike};

/// How far ahead [`CronSchedule::next_after`] looks before giving up.
/// Leap days can be eight years apart.
const HORIZON_DAYS: i64 = 366 * 8;

/// Longest month length, by month
const MONTH_DAYS: [u32; 12] = [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Minute,
    Hour,
    Day,
    Month,
    Weekday,
}

impl FieldKind {
    const ALL: [FieldKind; 5] = [
        FieldKind::Minute,
        FieldKind::Hour,
        FieldKind::Day,
        FieldKind::Month,
        FieldKind::Weekday,
    ];

    fn range(self) -> (u32, u32) {
        match self {
            FieldKind::Minute => (0, 59),
            FieldKind::Hour => (0, 23),
            FieldKind::Day => (1, 31),
            FieldKind::Month => (1, 12),
            FieldKind::Weekday => (0, 6),
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::Minute => "minute",
            FieldKind::Hour => "hour",
            FieldKind::Day => "day",
            FieldKind::Month => "month",
            FieldKind::Weekday => "weekday",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CronError {
    #[error("expected 5 fields (minute hour day month weekday), got {0}")]
    FieldCount(usize),
    #[error("invalid {field} field `{token}`: {reason}")]
    Field {
        field: FieldKind,
        token: String,
        reason: String,
    },
    #[error("`{0}` never selects a date")]
    NeverFires(String),
}

/// Values accepted by one field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CronField {
    Any,
    Values(BTreeSet<u32>),
}

impl CronField {
    pub fn matches(&self, value: u32) -> bool {
        match self {
            CronField::Any => true,
            CronField::Values(values) => values.contains(&value),
        }
    }

    fn parse(token: &str, kind: FieldKind) -> Result<Self, CronError> {
        let (lo, hi) = kind.range();
        let fail = |reason: String| CronError::Field {
            field: kind,
            token: token.to_string(),
            reason,
        };
        let number = |s: &str| {
            s.parse::<u32>()
                .map_err(|_| fail(format!("`{s}` is not a number")))
        };

        let mut any = false;
        let mut values = BTreeSet::new();
        for item in token.split(',') {
            if item.is_empty() {
                return Err(fail("empty list item".to_string()));
            }

            let (range, step) = match item.split_once('/') {
                Some((range, step)) => (range, Some(number(step)?)),
                None => (item, None),
            };
            if step == Some(0) {
                return Err(fail("step must be positive".to_string()));
            }

            let (start, end) = if range == "*" {
                if step.is_none() {
                    any = true;
                    continue;
                }
                (lo, hi)
            } else if let Some((a, b)) = range.split_once('-') {
                let (a, b) = (number(a)?, number(b)?);
                if a > b {
                    return Err(fail(format!("range {a}-{b} is reversed")));
                }
                (a, b)
            } else {
                let a = number(range)?;
                if step.is_some() { (a, hi) } else { (a, a) }
            };

            if start < lo || end > hi {
                return Err(fail(format!("values must be within {lo}-{hi}")));
            }
            values.extend((start..=end).step_by(step.unwrap_or(1) as usize));
        }

        Ok(if any {
            CronField::Any
        } else {
            CronField::Values(values)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    raw: String,
    tokens: [String; 5],
    minutes: CronField,
    hours: CronField,
    days: CronField,
    months: CronField,
    weekdays: CronField,
}

impl FromStr for CronSchedule {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        let [minute, hour, day, month, weekday] = parts.as_slice() else {
            return Err(CronError::FieldCount(parts.len()));
        };

        let tokens = [minute, hour, day, month, weekday].map(|t| t.to_string());
        let mut fields = tokens
            .iter()
            .zip(FieldKind::ALL)
            .map(|(token, kind)| CronField::parse(token, kind))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter();

        let mut next = || fields.next().unwrap_or(CronField::Any);
        let schedule = Self {
            raw: tokens.join(" "),
            minutes: next(),
            hours: next(),
            days: next(),
            months: next(),
            weekdays: next(),
            tokens,
        };
        if !schedule.has_dates() {
            return Err(CronError::NeverFires(schedule.raw));
        }
        Ok(schedule)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl CronSchedule {
    /// Expression with whitespace normalized
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Whether some selected month has a selected day, e.g. not `31 2`
    fn has_dates(&self) -> bool {
        (1..=12u32)
            .filter(|m| self.months.matches(*m))
            .any(|m| (1..=MONTH_DAYS[m as usize - 1]).any(|d| self.days.matches(d)))
    }

    fn date_matches(&self, date: &NaiveDate) -> bool {
        self.days.matches(date.day())
            && self.months.matches(date.month())
            && self.weekdays.matches(date.weekday().num_days_from_sunday())
    }

    /// Whether the minute containing `at` is selected
    pub fn matches(&self, at: &NaiveDateTime) -> bool {
        self.date_matches(&at.date())
            && self.hours.matches(at.hour())
            && self.minutes.matches(at.minute())
    }

    /// First selected minute strictly after the minute containing `from`, in `from`'s
    /// wall clock. Local times skipped by a DST jump are never returned.
    pub fn next_after<Tz: TimeZone>(&self, from: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = from.timezone();
        let local = from.naive_local();
        let start = local.date().and_hms_opt(local.hour(), local.minute(), 0)? + TimeDelta::minutes(1);
        let horizon = start + TimeDelta::days(HORIZON_DAYS);

        let mut cursor = start;
        while cursor < horizon {
            if !self.date_matches(&cursor.date()) {
                cursor = cursor.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if self.matches(&cursor) {
                if let Some(at) = tz.from_local_datetime(&cursor).earliest() {
                    if at > *from {
                        return Some(at);
                    }
                }
            }
            cursor += TimeDelta::minutes(1);
        }
        None
    }

    /// The next `n` runs after `from`
    pub fn upcoming<Tz: TimeZone>(&self, from: &DateTime<Tz>, n: usize) -> Vec<DateTime<Tz>> {
        let mut runs = Vec::with_capacity(n);
        let mut cursor = from.clone();
        while runs.len() < n {
            let Some(next) = self.next_after(&cursor) else {
                break;
            };
            cursor = next.clone();
            runs.push(next);
        }
        runs
    }

    /// Human readable summary, e.g. "Daily at 9:00 AM, Monday through Friday"
    pub fn describe(&self) -> String {
        let [minute, hour, day, month, weekday] = &self.tokens;
        let daily = day == "*" && month == "*" && (weekday == "*" || weekday.contains('-'));

        let mut text = match (minute.as_str(), hour.as_str()) {
            ("*", "*") => "Every minute".to_string(),
            (m, "*") if m.starts_with("*/") => format!("Every {} minutes", &m[2..]),
            ("0", "*") => "Every hour".to_string(),
            ("0", h) if h.starts_with("*/") => format!("Every {} hours", &h[2..]),
            _ => match (&self.minutes, &self.hours) {
                (CronField::Values(ms), CronField::Values(hs)) if ms.len() * hs.len() <= 4 => {
                    let times: Vec<String> = hs
                        .iter()
                        .flat_map(|h| ms.iter().map(move |m| clock(*h, *m)))
                        .collect();
                    let prefix = if daily { "Daily at" } else { "At" };
                    format!("{prefix} {}", join_and(&times))
                }
                _ => format!("At minute {minute} past hour {hour}"),
            },
        };

        if day != "*" {
            text.push_str(&format!(", on day {day} of the month"));
        }
        if month != "*" {
            match &self.months {
                CronField::Values(ms) if ms.len() == 1 => {
                    let m = ms.iter().next().copied().unwrap_or(1);
                    text.push_str(&format!(", in {}", month_name(m)));
                }
                _ => text.push_str(&format!(", in months {month}")),
            }
        }
        if weekday != "*" {
            text.push_str(", ");
            text.push_str(&describe_weekdays(weekday, &self.weekdays));
        }
        text
    }
}

fn clock(hour: u32, minute: u32) -> String {
    let suffix = if hour < 12 { "AM" } else { "PM" };
    let h12 = match hour % 12 {
        0 => 12,
        h => h,
    };
    format!("{h12}:{minute:02} {suffix}")
}

fn join_and(items: &[String]) -> String {
    match items {
        [] => String::new(),
        [one] => one.clone(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    }
}

const WEEKDAYS: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

fn month_name(month: u32) -> &'static str {
    const MONTHS: [&str; 12] = [
        "January",
        "February",
        "March",
        "April",
        "May",
        "June",
        "July",
        "August",
        "September",
        "October",
        "November",
        "December",
    ];
    MONTHS
        .get(month.saturating_sub(1) as usize)
        .copied()
        .unwrap_or("?")
}

fn describe_weekdays(token: &str, field: &CronField) -> String {
    if let Some((a, b)) = token.split_once('-').filter(|(_, b)| !b.contains('/')) {
        if let (Ok(a), Ok(b)) = (a.parse::<usize>(), b.parse::<usize>()) {
            if let (Some(a), Some(b)) = (WEEKDAYS.get(a), WEEKDAYS.get(b)) {
                return format!("{a} through {b}");
            }
        }
    }
    match field {
        CronField::Values(days) => {
            let names: Vec<String> = days
                .iter()
                .filter_map(|d| WEEKDAYS.get(*d as usize))
                .map(|d| d.to_string())
                .collect();
            format!("on {}", join_and(&names))
        }
        CronField::Any => "every day".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Utc, Weekday};

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn parse(s: &str) -> CronSchedule {
        s.parse().unwrap()
    }

    #[test]
    fn test_weekday_morning_from_saturday() {
        // 2024-01-13 is a Saturday
        let from = utc(2024, 1, 13, 10, 0);
        assert_eq!(from.weekday(), Weekday::Sat);
        let next = parse("0 9 * * 1-5").next_after(&from).unwrap();
        assert_eq!(next, utc(2024, 1, 15, 9, 0));
        assert_eq!(next.weekday(), Weekday::Mon);
    }

    #[test]
    fn test_every_quarter_hour() {
        let schedule = parse("*/15 * * * *");
        let from = utc(2024, 3, 1, 11, 59);
        let runs = schedule.upcoming(&from, 8);
        let in_noon_hour = runs.iter().filter(|r| r.hour() == 12).count();
        assert_eq!(in_noon_hour, 4);
        assert_eq!(runs[0], utc(2024, 3, 1, 12, 0));
        assert_eq!(runs[1], utc(2024, 3, 1, 12, 15));
    }

    #[test]
    fn test_next_is_strictly_after_current_minute() {
        let schedule = parse("30 8 * * *");
        let from = Utc.with_ymd_and_hms(2024, 5, 5, 8, 30, 20).unwrap();
        assert_eq!(schedule.next_after(&from).unwrap(), utc(2024, 5, 6, 8, 30));
    }

    #[test]
    fn test_field_forms() {
        let schedule = parse("0,30 9-17/4 1 */6 *");
        assert!(schedule.matches(&utc(2024, 1, 1, 13, 30).naive_utc()));
        assert!(schedule.matches(&utc(2024, 7, 1, 17, 0).naive_utc()));
        assert!(!schedule.matches(&utc(2024, 2, 1, 9, 0).naive_utc()));
        assert!(!schedule.matches(&utc(2024, 1, 1, 10, 0).naive_utc()));

        // a/n runs from a to the end of the range
        let schedule = parse("50/5 * * * *");
        assert!(schedule.matches(&utc(2024, 1, 1, 0, 55).naive_utc()));
        assert!(!schedule.matches(&utc(2024, 1, 1, 0, 5).naive_utc()));
    }

    #[test]
    fn test_leap_day_is_found() {
        let next = parse("0 0 29 2 *").next_after(&utc(2023, 3, 1, 0, 0)).unwrap();
        assert_eq!(next, utc(2024, 2, 29, 0, 0));
    }

    #[test]
    fn test_leap_day_years_away() {
        let next = parse("0 0 29 2 *").next_after(&utc(2025, 3, 1, 0, 0)).unwrap();
        assert_eq!(next, utc(2028, 2, 29, 0, 0));
    }

    #[test]
    fn test_impossible_dates_are_rejected() {
        for never in ["0 0 31 2 *", "0 0 30 2 *", "0 0 31 4,6,9,11 *"] {
            let err = never.parse::<CronSchedule>().unwrap_err();
            assert!(matches!(err, CronError::NeverFires(_)), "accepted `{never}`");
        }
        // one of the months still has the day
        assert!("0 0 31 2,3 *".parse::<CronSchedule>().is_ok());
    }

    #[test]
    fn test_weekday_leap_day_beyond_horizon() {
        // the next Monday 29 February after 2025 is in 2044
        assert!(parse("0 0 29 2 1").next_after(&utc(2025, 1, 1, 0, 0)).is_none());
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in [
            "",
            "* * * *",
            "* * * * * *",
            "60 * * * *",
            "* 24 * * *",
            "* * 0 * *",
            "* * * 13 *",
            "* * * * 7",
            "*/0 * * * *",
            "5-1 * * * *",
            "1,,2 * * * *",
            "a * * * *",
            "0-70/5 * * * *",
        ] {
            assert!(bad.parse::<CronSchedule>().is_err(), "accepted `{bad}`");
        }
    }

    #[test]
    fn test_error_names_field() {
        let err = "0 25 * * *".parse::<CronSchedule>().unwrap_err();
        assert!(err.to_string().contains("hour"));
    }

    #[test]
    fn test_describe() {
        assert_eq!(
            parse("0 9 * * 1-5").describe(),
            "Daily at 9:00 AM, Monday through Friday"
        );
        assert_eq!(parse("0 22 * * *").describe(), "Daily at 10:00 PM");
        assert_eq!(
            parse("0 8,20 * * *").describe(),
            "Daily at 8:00 AM and 8:00 PM"
        );
        assert_eq!(parse("*/15 * * * *").describe(), "Every 15 minutes");
        assert_eq!(parse("0 */2 * * *").describe(), "Every 2 hours");
        assert_eq!(parse("0 0 * * 0").describe(), "At 12:00 AM, on Sunday");
        assert_eq!(
            parse("0 0 1 1 *").describe(),
            "At 12:00 AM, on day 1 of the month, in January"
        );
    }
}
