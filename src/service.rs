use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use api::cleanup::{CleanupResult, RecordingFile, RecordingStats};
use api::recorder::{RecordingStatus, SegmentedStatus};
use api::request::{AddSchedule, ForceCleanup, RecordingFileQuery};
use api::schedule::{ScheduleInfo, ScheduleValidation};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::autorecord::{AutoRecorder, ReconcilePass};
use crate::config::Config;
use crate::encoder::{EncoderProbe, Spawner};
use crate::recorder::{RecordOptions, RecordingManager};
use crate::result::Result;
use crate::retention::CleanupEngine;
use crate::scheduler::Scheduler;
use crate::segment::SegmentManager;
use crate::shutdown::Shutdown;
use crate::source::SourceRegistry;

/// The recording control plane, wired together.
///
/// Everything an HTTP layer would need goes through here.
#[derive(Clone)]
pub struct Recorder {
    cfg: Arc<Config>,
    recordings: RecordingManager,
    segments: SegmentManager,
    cleanup: Arc<CleanupEngine>,
    autorecord: AutoRecorder,
    scheduler: Scheduler,
}

impl Recorder {
    pub fn new(
        cfg: Arc<Config>,
        sources: Arc<dyn SourceRegistry>,
        spawner: Arc<dyn Spawner>,
        probe: Arc<dyn EncoderProbe>,
    ) -> Self {
        let recordings = RecordingManager::new(cfg.clone(), sources.clone(), spawner);
        let segments = SegmentManager::new(recordings.clone());
        let cleanup = Arc::new(CleanupEngine::new(cfg.clone(), recordings.leases().clone()));
        let autorecord = AutoRecorder::new(
            cfg.clone(),
            sources,
            probe,
            recordings.clone(),
            segments.clone(),
        );
        let scheduler = Scheduler::new(cfg.clone(), recordings.clone(), segments.clone());
        Self {
            cfg,
            recordings,
            segments,
            cleanup,
            autorecord,
            scheduler,
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.cfg
    }

    pub fn recordings(&self) -> &RecordingManager {
        &self.recordings
    }

    pub fn segments(&self) -> &SegmentManager {
        &self.segments
    }

    pub fn cleanup(&self) -> &CleanupEngine {
        &self.cleanup
    }

    pub fn autorecord(&self) -> &AutoRecorder {
        &self.autorecord
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Load configured schedules and spawn the periodic drivers. They stop when
    /// `shutdown` triggers.
    pub async fn run(&self, shutdown: Shutdown) -> Vec<JoinHandle<()>> {
        self.scheduler.load_from_config().await;

        let mut tasks = vec![];
        if self.cfg.recording.enable_cleanup {
            let cleanup = self.cleanup.clone();
            let shutdown = shutdown.clone();
            tasks.push(tokio::spawn(async move { cleanup.run(shutdown).await }));
        }

        let autorecord = self.autorecord.clone();
        let signal = shutdown.clone();
        tasks.push(tokio::spawn(async move { autorecord.run(signal).await }));

        let scheduler = self.scheduler.clone();
        tasks.push(tokio::spawn(async move { scheduler.run(shutdown).await }));

        info!(
            "[recorder] running, storage at {}",
            self.cfg.recording.base_path.display()
        );
        tasks
    }

    /// Stop scheduled recordings, then auto recordings, then everything else
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        self.autorecord.stop_auto_recordings().await;
        self.segments.stop_all().await;
        self.recordings.stop_all().await;
        info!("[recorder] all recordings stopped");
    }

    pub async fn start_recording(
        &self,
        id: &str,
        stream: &str,
        options: RecordOptions,
    ) -> Result<RecordingStatus> {
        let recording = self.recordings.start(id, stream, options).await?;
        Ok(recording.status().await)
    }

    pub async fn stop_recording(&self, id: &str) -> Result<()> {
        self.recordings.stop(id).await
    }

    pub async fn recording_status(&self, id: &str) -> Result<RecordingStatus> {
        self.recordings.status(id).await
    }

    pub async fn list_recordings(&self) -> Vec<RecordingStatus> {
        self.recordings.list().await
    }

    pub async fn start_segmented(
        &self,
        id: &str,
        stream: &str,
        options: RecordOptions,
    ) -> Result<SegmentedStatus> {
        self.segments.start(id, stream, options).await?;
        self.segments.status(id).await
    }

    pub async fn stop_segmented(&self, id: &str) -> Result<()> {
        self.segments.stop(id).await
    }

    pub async fn segmented_status(&self, id: &str) -> Result<SegmentedStatus> {
        self.segments.status(id).await
    }

    pub async fn list_segmented(&self) -> Vec<SegmentedStatus> {
        self.segments.list().await
    }

    pub async fn segment_files(&self, id: &str) -> Result<Vec<PathBuf>> {
        self.segments.segments(id).await
    }

    pub async fn cleanup_now(&self) -> Result<CleanupResult> {
        self.cleanup.run_cleanup().await
    }

    pub async fn force_cleanup(&self, req: &ForceCleanup) -> Result<CleanupResult> {
        self.cleanup
            .force_cleanup(req.older_than_days, req.dry_run)
            .await
    }

    pub async fn recording_stats(&self) -> Result<RecordingStats> {
        self.cleanup.stats().await
    }

    pub async fn recording_files(&self, query: &RecordingFileQuery) -> Result<Vec<RecordingFile>> {
        self.cleanup.list_files(query).await
    }

    pub async fn reconcile(&self) -> ReconcilePass {
        self.autorecord.reconcile().await
    }

    pub async fn add_schedule(&self, req: &AddSchedule) -> Result<ScheduleInfo> {
        let duration = match req.duration {
            0 => Duration::from_secs(self.cfg.recording.default_schedule_duration),
            secs => Duration::from_secs(secs),
        };
        self.scheduler
            .add(&req.stream, &req.schedule, duration)
            .await
    }

    pub async fn remove_schedule(&self, stream: &str) -> Result<()> {
        self.scheduler.remove(stream).await
    }

    pub async fn list_schedules(&self) -> Vec<ScheduleInfo> {
        self.scheduler.list().await
    }

    pub fn validate_schedule(&self, expr: &str, n: usize) -> ScheduleValidation {
        Scheduler::validate(expr, n)
    }
}

/// Wait for every driver to finish
pub async fn join_all(tasks: Vec<JoinHandle<()>>) {
    for task in tasks {
        if let Err(e) = task.await {
            error!("[recorder] driver task failed: {}", e);
        }
    }
}
