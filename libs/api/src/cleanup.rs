use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Summary of one cleanup pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupResult {
    pub dry_run: bool,
    pub files_deleted: usize,
    pub files_archived: usize,
    /// Files that could not be deleted or moved; they stay for the next pass
    pub files_failed: usize,
    /// Files left alone because an encoder may still be writing them
    pub files_skipped: usize,
    pub bytes_reclaimed: u64,
    pub deleted_files: Vec<String>,
    pub archived_files: Vec<String>,
    pub streams_affected: Vec<String>,
    pub policies_applied: Vec<String>,
    pub total_size_before: u64,
    pub total_size_after: u64,
    pub started_at: Option<DateTime<Local>>,
    pub elapsed_ms: u64,
}

impl CleanupResult {
    pub fn files_removed(&self) -> usize {
        self.files_deleted + self.files_archived
    }
}

/// Aggregate view of the recordings currently on disk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordingStats {
    pub total_recordings: usize,
    pub total_size: u64,
    pub oldest_recording: Option<DateTime<Local>>,
    pub newest_recording: Option<DateTime<Local>>,
    pub streams: BTreeMap<String, usize>,
}

/// One recording file found under the storage root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingFile {
    pub stream: String,
    pub filename: String,
    pub path: String,
    /// Path relative to the storage root
    pub relative_path: String,
    pub size: u64,
    pub size_human: String,
    pub recorded_at: DateTime<Local>,
    pub modified_at: DateTime<Local>,
    pub format: String,
    /// Local date of the recording, `YYYY-MM-DD`
    pub date: String,
    pub active: bool,
}

/// Render a byte count with a binary unit suffix
pub fn human_size(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{bytes} B");
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT && exp < 4 {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    let units = ["KB", "MB", "GB", "TB", "PB"];
    format!("{:.1} {}", bytes as f64 / div as f64, units[exp])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(1536), "1.5 KB");
        assert_eq!(human_size(10 * 1024 * 1024), "10.0 MB");
        assert_eq!(human_size(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[test]
    fn test_cleanup_result_serialization() {
        let result = CleanupResult {
            files_deleted: 2,
            files_archived: 1,
            streams_affected: vec!["cam1".to_string()],
            ..Default::default()
        };
        assert_eq!(result.files_removed(), 3);

        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"files_deleted\":2"));
        assert!(json.contains("\"streams_affected\":[\"cam1\"]"));
    }
}
