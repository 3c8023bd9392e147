use serde::{Deserialize, Serialize};

/// Filter for listing recording files
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordingFileQuery {
    #[serde(default)]
    pub stream: Option<String>,
    /// Local date, `YYYY-MM-DD`
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Operator triggered cleanup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForceCleanup {
    pub older_than_days: u32,
    #[serde(default)]
    pub dry_run: bool,
}

/// Add a calendar schedule for a stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddSchedule {
    pub stream: String,
    pub schedule: String,
    /// Recording length per trigger in seconds
    pub duration: u64,
}
