//! Retention: a filesystem sweep that evicts recordings past their age, count or
//! total size limits.
//!
//! The engine never looks at the in-memory job registries. Files an encoder may still
//! be writing are recognised through live leases and the modification grace window.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use api::cleanup::{CleanupResult, RecordingFile, RecordingStats};
use api::request::RecordingFileQuery;
use chrono::{DateTime, Local};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::{Config, RecordingConfig};
use crate::metrics;
use crate::recorder::LeaseStore;
use crate::result::Result;
use crate::shutdown::Shutdown;

pub mod policy;
pub mod scan;

use policy::{Plan, StreamLimits};
use scan::RecordingFileInfo;

const MEGABYTE: u64 = 1024 * 1024;

pub struct CleanupEngine {
    cfg: Arc<Config>,
    leases: LeaseStore,
    /// Serializes passes; a manual trigger waits for a running periodic one
    pass: Mutex<()>,
}

/// What a pass may not touch
struct Guard {
    live: HashSet<PathBuf>,
    grace: chrono::Duration,
    now: DateTime<Local>,
}

impl Guard {
    fn new(cfg: &RecordingConfig, leases: &LeaseStore, now: DateTime<Local>) -> Self {
        Self {
            live: leases.live_outputs(),
            grace: chrono::Duration::from_std(cfg.cleanup_grace()).unwrap_or_default(),
            now,
        }
    }

    fn is_protected(&self, file: &RecordingFileInfo) -> bool {
        self.live.contains(&file.path) || self.now - file.modified < self.grace
    }
}

fn scan_storage(cfg: &RecordingConfig, leases: &LeaseStore) -> Vec<RecordingFileInfo> {
    let archive = cfg.archive_root();
    scan::scan(&cfg.base_path, &[archive.as_path(), leases.dir()])
}

/// Move a file, copying when a rename cannot cross devices
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}

fn archive_file(file: &RecordingFileInfo, archive_root: &Path) -> io::Result<PathBuf> {
    let target = storage::archive_path(
        archive_root,
        &file.stream,
        &file.recorded_at.naive_local(),
        file.filename(),
    );
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    move_file(&file.path, &target)?;
    Ok(target)
}

/// Carry out `plan`. Per-file failures are logged and counted, never fatal.
fn apply(
    files: &[RecordingFileInfo],
    plan: Plan,
    archive_root: Option<&Path>,
    dry_run: bool,
    started: Instant,
) -> CleanupResult {
    let total_size_before: u64 = files.iter().map(|f| f.size).sum();
    let mut result = CleanupResult {
        dry_run,
        files_skipped: plan.skipped,
        policies_applied: plan.policies,
        total_size_before,
        started_at: Some(Local::now()),
        ..Default::default()
    };
    let mut streams = BTreeSet::new();

    for eviction in plan.evictions {
        let file = &files[eviction.index];
        if dry_run {
            result.deleted_files.push(file.path.to_string_lossy().into_owned());
            result.bytes_reclaimed += file.size;
            streams.insert(file.stream.clone());
            continue;
        }

        let outcome = match archive_root {
            Some(root) => archive_file(file, root).map(|target| {
                result.files_archived += 1;
                result
                    .archived_files
                    .push(target.to_string_lossy().into_owned());
            }),
            None => fs::remove_file(&file.path).map(|()| {
                result.files_deleted += 1;
                result
                    .deleted_files
                    .push(file.path.to_string_lossy().into_owned());
            }),
        };

        match outcome {
            Ok(()) => {
                debug!(
                    path = %file.path.display(),
                    "[cleanup] evicted by {}",
                    eviction.policy
                );
                result.bytes_reclaimed += file.size;
                streams.insert(file.stream.clone());
            }
            Err(e) => {
                warn!(path = %file.path.display(), "[cleanup] failed to evict: {}", e);
                result.files_failed += 1;
            }
        }
    }

    result.streams_affected = streams.into_iter().collect();
    result.total_size_after = if dry_run {
        total_size_before
    } else {
        total_size_before.saturating_sub(result.bytes_reclaimed)
    };
    result.elapsed_ms = started.elapsed().as_millis() as u64;

    if !dry_run {
        metrics::CLEANUP_FILES_REMOVED.inc_by(result.files_removed() as u64);
        metrics::CLEANUP_BYTES_RECLAIMED.inc_by(result.bytes_reclaimed);
    }
    result
}

fn cleanup_pass(cfg: &RecordingConfig, leases: &LeaseStore) -> CleanupResult {
    let started = Instant::now();
    let now = Local::now();
    let files = scan_storage(cfg, leases);
    let guard = Guard::new(cfg, leases, now);

    let plan = policy::plan(
        &files,
        now,
        |stream| {
            let effective = cfg.resolve(stream);
            StreamLimits {
                retention: effective.retention,
                max_recordings: effective.max_recordings,
            }
        },
        cfg.max_total_size * MEGABYTE,
        |file| guard.is_protected(file),
    );

    let archive_root = cfg.move_to_archive.then(|| cfg.archive_root());
    apply(&files, plan, archive_root.as_deref(), false, started)
}

fn force_pass(
    cfg: &RecordingConfig,
    leases: &LeaseStore,
    older_than_days: u32,
    dry_run: bool,
) -> CleanupResult {
    let started = Instant::now();
    let now = Local::now();
    let files = scan_storage(cfg, leases);
    let guard = Guard::new(cfg, leases, now);
    let cutoff = now - chrono::Duration::days(older_than_days as i64);
    let plan = policy::older_than(&files, cutoff, |file| guard.is_protected(file));
    apply(&files, plan, None, dry_run, started)
}

fn collect_stats(files: &[RecordingFileInfo]) -> RecordingStats {
    let mut stats = RecordingStats {
        total_recordings: files.len(),
        total_size: files.iter().map(|f| f.size).sum(),
        oldest_recording: files.iter().map(|f| f.recorded_at).min(),
        newest_recording: files.iter().map(|f| f.recorded_at).max(),
        ..Default::default()
    };
    for file in files {
        *stats.streams.entry(file.stream.clone()).or_default() += 1;
    }
    stats
}

impl CleanupEngine {
    pub fn new(cfg: Arc<Config>, leases: LeaseStore) -> Self {
        Self {
            cfg,
            leases,
            pass: Mutex::new(()),
        }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&RecordingConfig, &LeaseStore) -> T + Send + 'static,
    {
        let cfg = self.cfg.clone();
        let leases = self.leases.clone();
        let value = tokio::task::spawn_blocking(move || f(&cfg.recording, &leases))
            .await
            .map_err(anyhow::Error::from)?;
        Ok(value)
    }

    /// Apply the configured retention policies now
    pub async fn run_cleanup(&self) -> Result<CleanupResult> {
        let _pass = self.pass.lock().await;
        let result = self.blocking(cleanup_pass).await?;
        info!(
            "[cleanup] deleted {} archived {} failed {} skipped {}, reclaimed {} bytes, policies: {:?}",
            result.files_deleted,
            result.files_archived,
            result.files_failed,
            result.files_skipped,
            result.bytes_reclaimed,
            result.policies_applied
        );
        Ok(result)
    }

    /// Delete every recording older than `older_than_days`, whatever the configured
    /// policies say. A dry run only reports what would go.
    pub async fn force_cleanup(&self, older_than_days: u32, dry_run: bool) -> Result<CleanupResult> {
        let _pass = self.pass.lock().await;
        let result = self
            .blocking(move |cfg, leases| force_pass(cfg, leases, older_than_days, dry_run))
            .await?;
        info!(
            "[cleanup] force cleanup older than {} days{}: {} files, {} bytes",
            older_than_days,
            if dry_run { " (dry run)" } else { "" },
            result.deleted_files.len(),
            result.bytes_reclaimed
        );
        Ok(result)
    }

    pub async fn stats(&self) -> Result<RecordingStats> {
        self.blocking(|cfg, leases| collect_stats(&scan_storage(cfg, leases)))
            .await
    }

    /// Recording files, newest first
    pub async fn list_files(&self, query: &RecordingFileQuery) -> Result<Vec<RecordingFile>> {
        let query = query.clone();
        self.blocking(move |cfg, leases| {
            let guard = Guard::new(cfg, leases, Local::now());
            let mut files: Vec<RecordingFileInfo> = scan_storage(cfg, leases)
                .into_iter()
                .filter(|f| query.stream.as_ref().is_none_or(|s| &f.stream == s))
                .filter(|f| {
                    query
                        .date
                        .as_ref()
                        .is_none_or(|d| f.recorded_at.format("%Y-%m-%d").to_string() == *d)
                })
                .collect();
            files.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
            if let Some(limit) = query.limit {
                files.truncate(limit);
            }
            files
                .iter()
                .map(|f| f.to_api(guard.is_protected(f)))
                .collect()
        })
        .await
    }

    /// Periodic cleanup until `shutdown`
    pub async fn run(&self, shutdown: Shutdown) {
        let period = self.cfg.recording.cleanup_interval();
        info!("[cleanup] running every {:?}", period);
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cleanup().await {
                        error!("[cleanup] pass failed: {}", e);
                    }
                }
                _ = shutdown.wait() => break,
            }
        }
        info!("[cleanup] stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::{Duration, SystemTime};

    fn touch(path: &Path, size: u64, age: Duration) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let file = File::create(path).unwrap();
        file.set_len(size).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    fn engine(root: &Path, edit: impl FnOnce(&mut RecordingConfig)) -> CleanupEngine {
        let mut cfg = Config::default();
        cfg.recording.base_path = root.to_path_buf();
        edit(&mut cfg.recording);
        let leases = LeaseStore::new(cfg.recording.lease_dir());
        CleanupEngine::new(Arc::new(cfg), leases)
    }

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn test_grace_window_protects_fresh_files() {
        let dir = tempfile::tempdir().unwrap();
        // a very old name but just written
        touch(&dir.path().join("cam/cam_2001-01-01_00-00-00.mp4"), 10, Duration::ZERO);
        touch(&dir.path().join("cam/cam_2001-01-02_00-00-00.mp4"), 10, HOUR);

        let engine = engine(dir.path(), |_| {});
        let result = engine.run_cleanup().await.unwrap();
        assert_eq!(result.files_deleted, 1);
        assert_eq!(result.files_skipped, 1);
        assert!(dir.path().join("cam/cam_2001-01-01_00-00-00.mp4").exists());
    }

    #[tokio::test]
    async fn test_force_cleanup_dry_run() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("cam/cam_2020-05-01_00-00-00.mp4");
        touch(&old, 100, HOUR);
        let fresh = Local::now().format("cam_%Y-%m-%d_%H-%M-%S.mp4").to_string();
        touch(&dir.path().join("cam").join(&fresh), 100, HOUR);

        let engine = engine(dir.path(), |r| r.max_total_size = 0);
        let result = engine.force_cleanup(30, true).await.unwrap();
        assert!(result.dry_run);
        assert_eq!(result.files_deleted, 0);
        assert_eq!(result.deleted_files, vec![old.to_string_lossy().into_owned()]);
        assert_eq!(result.bytes_reclaimed, 100);
        assert_eq!(result.policies_applied, vec!["force_cleanup"]);
        assert!(old.exists());

        let result = engine.force_cleanup(30, false).await.unwrap();
        assert_eq!(result.files_deleted, 1);
        assert!(!old.exists());
    }

    #[tokio::test]
    async fn test_stats_and_listing() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a/a_2024-01-01_00-00-00.mp4"), 5, HOUR);
        touch(&dir.path().join("a/a_2024-01-02_00-00-00.mp4"), 5, HOUR);
        touch(&dir.path().join("b/b_2024-01-03_00-00-00.ts"), 7, HOUR);

        let engine = engine(dir.path(), |_| {});
        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.total_recordings, 3);
        assert_eq!(stats.total_size, 17);
        assert_eq!(stats.streams.get("a"), Some(&2));
        assert_eq!(
            stats.oldest_recording.unwrap().naive_local().to_string(),
            "2024-01-01 00:00:00"
        );

        let files = engine
            .list_files(&RecordingFileQuery {
                stream: Some("a".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].filename, "a_2024-01-02_00-00-00.mp4");
        assert!(!files[0].active);

        let files = engine
            .list_files(&RecordingFileQuery {
                date: Some("2024-01-03".to_string()),
                limit: Some(5),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].format, "mpegts");
    }
}
