//! Output path templates.
//!
//! Recognized placeholders, usable in both the directory and filename templates:
//!
//! | placeholder   | example               |
//! |---------------|-----------------------|
//! | `{stream}`    | `camera01`            |
//! | `{year}`      | `2024`                |
//! | `{month}`     | `01`                  |
//! | `{day}`       | `15`                  |
//! | `{hour}`      | `09`                  |
//! | `{timestamp}` | `2024-01-15_09-30-00` |
//! | `{date}`      | `2024-01-15`          |
//! | `{time}`      | `09-30-00`            |
//!
//! `{timestamp}` renders with the V1 filename pattern, so files named from the default
//! template can always be dated again by [`crate::timestamp`].

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use crate::path::sanitize_component;
use crate::timestamp::TimestampPattern;

pub fn render_template(template: &str, stream: &str, at: &NaiveDateTime) -> String {
    template
        .replace("{stream}", &sanitize_component(stream))
        .replace("{year}", &at.format("%Y").to_string())
        .replace("{month}", &at.format("%m").to_string())
        .replace("{day}", &at.format("%d").to_string())
        .replace("{hour}", &at.format("%H").to_string())
        .replace(
            "{timestamp}",
            &at.format(TimestampPattern::V1.format()).to_string(),
        )
        .replace("{date}", &at.format("%Y-%m-%d").to_string())
        .replace("{time}", &at.format("%H-%M-%S").to_string())
}

/// Full output path: `{base}/{path_template}/{filename_template}.{ext}`
pub fn recording_path(
    base: &Path,
    path_template: &str,
    filename_template: &str,
    stream: &str,
    at: &NaiveDateTime,
    ext: &str,
) -> PathBuf {
    let dir = render_template(path_template, stream, at);
    let name = render_template(filename_template, stream, at);
    let mut path = base.to_path_buf();
    for component in dir.split('/').filter(|c| !c.is_empty() && *c != "." && *c != "..") {
        path.push(component);
    }
    path.push(format!("{name}.{ext}"));
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::parse_filename_timestamp;
    use chrono::NaiveDate;

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap()
    }

    #[test]
    fn test_render_template() {
        assert_eq!(
            render_template("{year}/{month}/{day}/{hour}/{stream}", "cam", &at()),
            "2024/01/15/09/cam"
        );
        assert_eq!(
            render_template("{stream}_{date}_{time}", "cam", &at()),
            "cam_2024-01-15_09-30-00"
        );
    }

    #[test]
    fn test_recording_path() {
        let path = recording_path(
            Path::new("recordings"),
            "{year}/{month}/{day}/{stream}",
            "{stream}_{timestamp}",
            "camera01",
            &at(),
            "mp4",
        );
        assert_eq!(
            path,
            PathBuf::from("recordings/2024/01/15/camera01/camera01_2024-01-15_09-30-00.mp4")
        );
    }

    #[test]
    fn test_recording_path_ignores_parent_components() {
        let path = recording_path(Path::new("base"), "../{stream}", "{stream}", "cam", &at(), "ts");
        assert_eq!(path, PathBuf::from("base/cam/cam.ts"));
    }

    #[test]
    fn test_default_filename_is_dateable() {
        let name = format!("{}.mp4", render_template("{stream}_{timestamp}", "cam", &at()));
        let stamp = parse_filename_timestamp(&name).unwrap();
        assert_eq!(stamp.at, at());
        assert_eq!(stamp.pattern, TimestampPattern::V1);
    }
}
