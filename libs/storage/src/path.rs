use chrono::{Datelike, NaiveDateTime};
use std::path::{Path, PathBuf};

/// Archive location for a recording.
/// Format: {archive_root}/{stream}/{year}/{month}/{day}/{filename}
pub fn archive_path(
    archive_root: &Path,
    stream: &str,
    recorded_at: &NaiveDateTime,
    filename: &str,
) -> PathBuf {
    archive_root
        .join(sanitize_component(stream))
        .join(format!("{:04}", recorded_at.year()))
        .join(format!("{:02}", recorded_at.month()))
        .join(format!("{:02}", recorded_at.day()))
        .join(filename)
}

/// Make a stream name safe to use as a single path component
pub fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect();
    match cleaned.as_str() {
        "" => "_".to_string(),
        "." | ".." => cleaned.replace('.', "_"),
        _ => cleaned,
    }
}

/// Validate a relative storage path
pub fn validate_path(path: &str) -> bool {
    !path.is_empty() && !path.split(['/', '\\']).any(|c| c == "..") && !path.starts_with('/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_archive_path() {
        let at = NaiveDate::from_ymd_opt(2024, 1, 5)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let path = archive_path(Path::new("/data/archive"), "camera01", &at, "camera01_x.mp4");
        assert_eq!(
            path,
            PathBuf::from("/data/archive/camera01/2024/01/05/camera01_x.mp4")
        );
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("camera01"), "camera01");
        assert_eq!(sanitize_component("site/cam"), "site_cam");
        assert_eq!(sanitize_component(".."), "__");
        assert_eq!(sanitize_component(""), "_");
    }

    #[test]
    fn test_validate_path() {
        assert!(validate_path("camera01/2024/01/15/segment.mp4"));
        assert!(validate_path("camera01/a..b.mp4"));
        assert!(!validate_path("../camera01/segment.mp4"));
        assert!(!validate_path("/absolute/path"));
        assert!(!validate_path(""));
    }
}
