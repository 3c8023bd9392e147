use std::path::Path;

use crate::timestamp::FilenameTimestamp;

/// Directory names that never identify a stream
const GENERIC_DIRS: &[&str] = &["recordings", "recording", "records", "archive", "videos", "media"];

/// Owning stream of a recording file.
///
/// `relative` is the path below the storage root. The filename prefix in front of the
/// timestamp wins; otherwise the closest ancestor directory that is neither a date
/// component nor a generic name is used.
pub fn infer_stream(relative: &Path, stamp: Option<&FilenameTimestamp>) -> String {
    let name = relative.file_name().and_then(|n| n.to_str());
    if let Some(prefix) = stamp.zip(name).and_then(|(stamp, name)| name.get(..stamp.start)) {
        let prefix = prefix.trim_end_matches(['_', '-', '.', ' ']);
        if !prefix.is_empty() {
            return prefix.to_string();
        }
    }

    relative
        .parent()
        .into_iter()
        .flat_map(|parent| parent.iter().rev())
        .filter_map(|c| c.to_str())
        .find(|c| !is_date_component(c) && !GENERIC_DIRS.contains(&c.to_ascii_lowercase().as_str()))
        .map(str::to_string)
        .unwrap_or_else(|| "unknown".to_string())
}

fn is_date_component(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::parse_filename_timestamp;

    fn infer(path: &str) -> String {
        let path = Path::new(path);
        let name = path.file_name().unwrap().to_str().unwrap();
        infer_stream(path, parse_filename_timestamp(name).as_ref())
    }

    #[test]
    fn test_prefix_before_timestamp() {
        assert_eq!(infer("2024/01/15/cam1/cam1_2024-01-15_09-30-00.mp4"), "cam1");
        assert_eq!(infer("front_door_20240115_093000.mkv"), "front_door");
    }

    #[test]
    fn test_directory_fallback() {
        assert_eq!(infer("2024/01/15/cam2/2024-01-15_09-30-00.mp4"), "cam2");
        assert_eq!(infer("lobby/2024/01/15/clip.mp4"), "lobby");
        assert_eq!(infer("recordings/2024-01-15/clip.mp4"), "unknown");
        assert_eq!(infer("clip.mp4"), "unknown");
    }
}
