use std::path::{Path, PathBuf};
use std::time::SystemTime;

use api::cleanup::{human_size, RecordingFile};
use chrono::{DateTime, Local, TimeZone};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// A recording found on disk during a cleanup pass
#[derive(Debug, Clone)]
pub struct RecordingFileInfo {
    pub path: PathBuf,
    /// Path below the storage root
    pub relative: PathBuf,
    pub stream: String,
    pub size: u64,
    pub modified: DateTime<Local>,
    /// Recording start from the filename, or the modification time when it has none
    pub recorded_at: DateTime<Local>,
}

impl RecordingFileInfo {
    pub fn filename(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    pub fn to_api(&self, active: bool) -> RecordingFile {
        RecordingFile {
            stream: self.stream.clone(),
            filename: self.filename().to_string(),
            path: self.path.to_string_lossy().into_owned(),
            relative_path: self.relative.to_string_lossy().into_owned(),
            size: self.size,
            size_human: human_size(self.size),
            recorded_at: self.recorded_at,
            modified_at: self.modified,
            format: storage::format_from_extension(&self.path)
                .unwrap_or_default()
                .to_string(),
            date: self.recorded_at.format("%Y-%m-%d").to_string(),
            active,
        }
    }
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Every media file below `root`. Hidden directories and anything under `excluded`
/// are skipped. Unreadable entries are logged and ignored.
pub fn scan(root: &Path, excluded: &[&Path]) -> Vec<RecordingFileInfo> {
    if !root.exists() {
        debug!("[cleanup] storage root {} does not exist", root.display());
        return vec![];
    }

    WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            let hidden = entry.file_type().is_dir()
                && entry.file_name().to_str().is_some_and(is_hidden);
            !hidden && !excluded.iter().any(|x| entry.path() == *x)
        })
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("[cleanup] skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && storage::is_media_file(entry.path()))
        .filter_map(|entry| {
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(e) => {
                    warn!("[cleanup] cannot stat {}: {}", entry.path().display(), e);
                    return None;
                }
            };
            let modified: DateTime<Local> =
                meta.modified().unwrap_or(SystemTime::UNIX_EPOCH).into();
            let path = entry.into_path();
            let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
            Some(describe(path, relative, meta.len(), modified))
        })
        .collect()
}

fn describe(
    path: PathBuf,
    relative: PathBuf,
    size: u64,
    modified: DateTime<Local>,
) -> RecordingFileInfo {
    let stamp = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(storage::parse_filename_timestamp);
    let stream = storage::infer_stream(&relative, stamp.as_ref());
    let recorded_at = stamp
        .and_then(|s| Local.from_local_datetime(&s.at).earliest())
        .unwrap_or(modified);

    RecordingFileInfo {
        path,
        relative,
        stream,
        size,
        modified,
        recorded_at,
    }
}
