//! Eviction planning. Pure: decides which files go, touches nothing.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Local};

use super::scan::RecordingFileInfo;

pub const GLOBAL_SIZE_POLICY: &str = "global_size_limit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamLimits {
    pub retention: Duration,
    /// 0 means unlimited
    pub max_recordings: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eviction {
    /// Index into the scanned files
    pub index: usize,
    pub policy: String,
}

#[derive(Debug, Default)]
pub struct Plan {
    pub evictions: Vec<Eviction>,
    /// Files a policy selected but that were left alone as possibly being written
    pub skipped: usize,
    /// Policies that selected at least one file, in the order they ran
    pub policies: Vec<String>,
}

struct Planner<'a> {
    files: &'a [RecordingFileInfo],
    protected: Vec<bool>,
    marked: Vec<bool>,
    skipped: Vec<bool>,
    plan: Plan,
}

impl Planner<'_> {
    /// Returns true when the file is now marked for eviction
    fn mark(&mut self, index: usize, policy: &str) -> bool {
        if self.marked[index] {
            return false;
        }
        if self.protected[index] {
            self.skipped[index] = true;
            return false;
        }
        self.marked[index] = true;
        self.plan.evictions.push(Eviction {
            index,
            policy: policy.to_string(),
        });
        if !self.plan.policies.iter().any(|p| p == policy) {
            self.plan.policies.push(policy.to_string());
        }
        true
    }

    fn finish(mut self) -> Plan {
        self.plan.skipped = self.skipped.iter().filter(|s| **s).count();
        self.plan
    }
}

/// Decide what a cleanup pass removes.
///
/// Per stream, files older than the retention are evicted first; if more than
/// `max_recordings` remain, the oldest of those go too. Then, across all streams, the
/// oldest remaining files go until the total is within `max_total_bytes`. Protected
/// files are never evicted.
pub fn plan<L, P>(
    files: &[RecordingFileInfo],
    now: DateTime<Local>,
    limits: L,
    max_total_bytes: u64,
    protected: P,
) -> Plan
where
    L: Fn(&str) -> StreamLimits,
    P: Fn(&RecordingFileInfo) -> bool,
{
    let mut planner = Planner {
        files,
        protected: files.iter().map(&protected).collect(),
        marked: vec![false; files.len()],
        skipped: vec![false; files.len()],
        plan: Plan::default(),
    };

    let mut streams: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (index, file) in files.iter().enumerate() {
        streams.entry(file.stream.as_str()).or_default().push(index);
    }

    for (stream, mut group) in streams {
        group.sort_by_key(|i| files[*i].recorded_at);
        let limits = limits(stream);

        let retention_policy = format!("retention_{stream}");
        if let Ok(retention) = chrono::Duration::from_std(limits.retention) {
            let cutoff = now - retention;
            for &index in &group {
                if planner.files[index].recorded_at < cutoff {
                    planner.mark(index, &retention_policy);
                }
            }
        }

        if limits.max_recordings > 0 {
            let survivors: Vec<usize> = group
                .iter()
                .copied()
                .filter(|i| !planner.marked[*i])
                .collect();
            let mut excess = survivors.len().saturating_sub(limits.max_recordings);
            let count_policy = format!("max_count_{stream}");
            for index in survivors {
                if excess == 0 {
                    break;
                }
                if planner.mark(index, &count_policy) {
                    excess -= 1;
                }
            }
        }
    }

    if max_total_bytes > 0 {
        let mut remaining: u64 = files
            .iter()
            .enumerate()
            .filter(|(i, _)| !planner.marked[*i])
            .map(|(_, f)| f.size)
            .sum();
        let mut oldest_first: Vec<usize> = (0..files.len()).filter(|i| !planner.marked[*i]).collect();
        oldest_first.sort_by_key(|i| files[*i].recorded_at);
        for index in oldest_first {
            if remaining <= max_total_bytes {
                break;
            }
            if planner.mark(index, GLOBAL_SIZE_POLICY) {
                remaining -= files[index].size;
            }
        }
    }

    planner.finish()
}

/// Files recorded before `cutoff`, oldest first, ignoring every configured policy
pub fn older_than<P>(files: &[RecordingFileInfo], cutoff: DateTime<Local>, protected: P) -> Plan
where
    P: Fn(&RecordingFileInfo) -> bool,
{
    let mut planner = Planner {
        files,
        protected: files.iter().map(&protected).collect(),
        marked: vec![false; files.len()],
        skipped: vec![false; files.len()],
        plan: Plan::default(),
    };
    let mut oldest_first: Vec<usize> = (0..files.len()).collect();
    oldest_first.sort_by_key(|i| files[*i].recorded_at);
    for index in oldest_first {
        if files[index].recorded_at < cutoff {
            planner.mark(index, "force_cleanup");
        }
    }
    planner.finish()
}
