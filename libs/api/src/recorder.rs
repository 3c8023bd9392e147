use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Recording job state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// Created but the encoder has not been started yet
    Idle,
    /// Encoder process is running
    Active,
    /// Stopped explicitly, by the duration cap, or because the encoder exited
    Stopped,
}

impl std::fmt::Display for RecordingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordingState::Idle => write!(f, "idle"),
            RecordingState::Active => write!(f, "active"),
            RecordingState::Stopped => write!(f, "stopped"),
        }
    }
}

impl FromStr for RecordingState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "idle" => Ok(RecordingState::Idle),
            "active" => Ok(RecordingState::Active),
            "stopped" => Ok(RecordingState::Stopped),
            _ => Err(format!("Invalid recording state: {s}")),
        }
    }
}

/// Why a job left the active state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Requested,
    DurationReached,
    ProcessExited,
}

/// Snapshot of a single recording job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingStatus {
    pub id: String,
    pub stream: String,
    /// Output file written by the encoder
    pub output: String,
    /// Container format handed to the encoder
    pub format: String,
    pub state: RecordingState,
    pub started_at: Option<DateTime<Local>>,
    pub stopped_at: Option<DateTime<Local>>,
    pub stop_reason: Option<StopReason>,
    /// Elapsed recording time in milliseconds
    pub elapsed_ms: u64,
    /// Duration cap in milliseconds, if any
    pub max_duration_ms: Option<u64>,
    /// Time left before the duration cap stops the job
    pub remaining_ms: Option<u64>,
    pub pid: Option<u32>,
}

/// Snapshot of a segmented recording
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentedStatus {
    pub id: String,
    pub stream: String,
    pub state: RecordingState,
    pub started_at: DateTime<Local>,
    pub stopped_at: Option<DateTime<Local>>,
    /// Index of the current (or last) segment, starting at 1
    pub current_segment: u32,
    /// Job id of the segment currently recording
    pub current_id: Option<String>,
    pub current_file: Option<String>,
    pub segment_started_at: Option<DateTime<Local>>,
    pub segment_duration_ms: u64,
    pub max_file_size_mb: u64,
}
