//! Recording start time encoded in filenames.
//!
//! The set of patterns is versioned and append-only: cleanup decisions depend on
//! files written by older releases still being recognized.

use chrono::{NaiveDate, NaiveDateTime};
use lazy_static::lazy_static;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampPattern {
    /// `2024-01-15_09-30-00`
    V1,
    /// `20240115_093000`
    V2,
    /// `2024-01-15T09:30:00`
    V3,
}

lazy_static! {
    static ref V1: Regex = Regex::new(r"(\d{4})-(\d{2})-(\d{2})_(\d{2})-(\d{2})-(\d{2})").unwrap();
    static ref V2: Regex = Regex::new(r"(\d{4})(\d{2})(\d{2})_(\d{2})(\d{2})(\d{2})").unwrap();
    static ref V3: Regex = Regex::new(r"(\d{4})-(\d{2})-(\d{2})T(\d{2}):(\d{2}):(\d{2})").unwrap();
}

impl TimestampPattern {
    /// Patterns in match priority order
    pub const ALL: [TimestampPattern; 3] =
        [TimestampPattern::V1, TimestampPattern::V2, TimestampPattern::V3];

    /// chrono format string that renders this pattern
    pub fn format(self) -> &'static str {
        match self {
            TimestampPattern::V1 => "%Y-%m-%d_%H-%M-%S",
            TimestampPattern::V2 => "%Y%m%d_%H%M%S",
            TimestampPattern::V3 => "%Y-%m-%dT%H:%M:%S",
        }
    }

    fn regex(self) -> &'static Regex {
        match self {
            TimestampPattern::V1 => &V1,
            TimestampPattern::V2 => &V2,
            TimestampPattern::V3 => &V3,
        }
    }
}

/// A timestamp found in a filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameTimestamp {
    /// Local wall-clock time
    pub at: NaiveDateTime,
    pub pattern: TimestampPattern,
    /// Byte offset of the match in the filename
    pub start: usize,
    pub end: usize,
}

/// Find the first valid timestamp in `filename`, trying patterns in version order.
/// Matches that are not a real calendar time (month 13, hour 25) are ignored.
pub fn parse_filename_timestamp(filename: &str) -> Option<FilenameTimestamp> {
    TimestampPattern::ALL.iter().find_map(|pattern| {
        pattern.regex().captures_iter(filename).find_map(|caps| {
            let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
            let year = caps.get(1)?.as_str().parse::<i32>().ok()?;
            let at = NaiveDate::from_ymd_opt(year, num(2)?, num(3)?)?
                .and_hms_opt(num(4)?, num(5)?, num(6)?)?;
            let whole = caps.get(0)?;
            Some(FilenameTimestamp {
                at,
                pattern: *pattern,
                start: whole.start(),
                end: whole.end(),
            })
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn test_each_pattern() {
        let v1 = parse_filename_timestamp("cam_2024-01-15_09-30-00.mp4").unwrap();
        assert_eq!(v1.at, dt(2024, 1, 15, 9, 30, 0));
        assert_eq!(v1.pattern, TimestampPattern::V1);
        assert_eq!(&"cam_2024-01-15_09-30-00.mp4"[..v1.start], "cam_");

        let v2 = parse_filename_timestamp("cam_20240115_093000.mkv").unwrap();
        assert_eq!(v2.at, dt(2024, 1, 15, 9, 30, 0));
        assert_eq!(v2.pattern, TimestampPattern::V2);

        let v3 = parse_filename_timestamp("cam 2024-01-15T09:30:00.ts").unwrap();
        assert_eq!(v3.pattern, TimestampPattern::V3);
    }

    #[test]
    fn test_invalid_calendar_values_are_skipped() {
        assert!(parse_filename_timestamp("cam_2024-13-15_09-30-00.mp4").is_none());
        // an impossible first candidate does not hide a later valid one
        let stamp = parse_filename_timestamp("x_2024-02-30_00-00-00_2024-02-29_00-00-00.mp4")
            .unwrap();
        assert_eq!(stamp.at, dt(2024, 2, 29, 0, 0, 0));
    }

    #[test]
    fn test_no_timestamp() {
        assert!(parse_filename_timestamp("clip.mp4").is_none());
        assert!(parse_filename_timestamp("cam_1705311000.mp4").is_none());
    }
}
