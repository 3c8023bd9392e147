use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleInfo {
    pub stream: String,
    pub schedule: String,
    pub duration_ms: u64,
    pub next_run: Option<DateTime<Local>>,
    /// Job started by the most recent trigger, while it is still recording
    pub active_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleValidation {
    pub schedule: String,
    pub valid: bool,
    pub error: Option<String>,
    pub next_runs: Vec<DateTime<Local>>,
    pub description: String,
}
