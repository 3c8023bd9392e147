use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use api::recorder::{RecordingStatus, StopReason};
use chrono::Local;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{Config, EffectiveStreamConfig};
use crate::encoder::{build_command, Spawner};
use crate::error::RecordError;
use crate::result::Result;
use crate::source::{resolve_source, SourceRegistry};

use super::lease::{Lease, LeaseStore};
use super::recording::Recording;
use super::{RecordConfig, RecordOptions};

const EXIT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const FINISHED_CAPACITY: usize = 256;

/// Registry of single recording jobs.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct RecordingManager {
    inner: Arc<Inner>,
}

struct Inner {
    cfg: Arc<Config>,
    sources: Arc<dyn SourceRegistry>,
    spawner: Arc<dyn Spawner>,
    leases: LeaseStore,
    recordings: RwLock<HashMap<String, Arc<Recording>>>,
    /// Streams reserved by a longer lived owner, stream to owner id.
    /// Locked after `recordings`.
    holds: Mutex<HashMap<String, String>>,
    /// Final statuses of recently retired jobs, oldest first
    finished: Mutex<VecDeque<RecordingStatus>>,
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl RecordingManager {
    pub fn new(
        cfg: Arc<Config>,
        sources: Arc<dyn SourceRegistry>,
        spawner: Arc<dyn Spawner>,
    ) -> Self {
        let leases = LeaseStore::new(cfg.recording.lease_dir());
        Self {
            inner: Arc::new(Inner {
                cfg,
                sources,
                spawner,
                leases,
                recordings: RwLock::new(HashMap::new()),
                holds: Mutex::new(HashMap::new()),
                finished: Mutex::new(VecDeque::new()),
            }),
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.inner.cfg
    }

    pub fn leases(&self) -> &LeaseStore {
        &self.inner.leases
    }

    /// Start a new job recording `stream`.
    ///
    /// The id is reserved before anything else happens, so a concurrent start with the
    /// same id fails with `AlreadyActive`. A stream can only have one live job.
    pub async fn start(
        &self,
        id: &str,
        stream: &str,
        options: RecordOptions,
    ) -> Result<Arc<Recording>> {
        self.start_for(id, stream, options, None).await
    }

    /// Like [`start`](Self::start), on behalf of `owner`. A stream held by `owner`
    /// accepts its jobs; a stream held by anyone else is busy.
    pub(crate) async fn start_for(
        &self,
        id: &str,
        stream: &str,
        options: RecordOptions,
        owner: Option<&str>,
    ) -> Result<Arc<Recording>> {
        let cfg = &self.inner.cfg;
        let effective = cfg.recording.resolve(stream);
        let job = RecordConfig::resolve(
            &options,
            &effective,
            &cfg.recording.base_path,
            &Local::now().naive_local(),
        );

        let recording = self.reserve(id, stream, job, owner).await?;
        match self.launch(&recording, &effective).await {
            Ok(()) => {
                self.supervise(recording.clone());
                Ok(recording)
            }
            Err(e) => {
                self.release(&recording).await;
                Err(e)
            }
        }
    }

    async fn reserve(
        &self,
        id: &str,
        stream: &str,
        job: RecordConfig,
        owner: Option<&str>,
    ) -> Result<Arc<Recording>> {
        let mut recordings = self.inner.recordings.write().await;
        if recordings.get(id).is_some_and(|r| !r.is_stopped()) {
            return Err(RecordError::already_active(id));
        }
        if let Some(busy) = recordings
            .values()
            .find(|r| r.stream() == stream && !r.is_stopped())
        {
            return Err(RecordError::stream_busy(stream, busy.id()));
        }
        if let Some(holder) = self.inner.holds.lock().await.get(stream) {
            if owner != Some(holder.as_str()) {
                return Err(RecordError::stream_busy(stream, holder));
            }
        }
        let recording = Arc::new(Recording::new(id, stream, job));
        recordings.insert(id.to_string(), recording.clone());
        Ok(recording)
    }

    /// Reserve `stream` for `owner` until [`release_hold`](Self::release_hold).
    ///
    /// While held, only [`start_for`](Self::start_for) with the same owner can start
    /// jobs on the stream, even between two of the owner's jobs.
    pub(crate) async fn hold(&self, stream: &str, owner: &str) -> Result<()> {
        let recordings = self.inner.recordings.write().await;
        if let Some(busy) = recordings
            .values()
            .find(|r| r.stream() == stream && !r.is_stopped())
        {
            return Err(RecordError::stream_busy(stream, busy.id()));
        }
        let mut holds = self.inner.holds.lock().await;
        if let Some(holder) = holds.get(stream) {
            return Err(RecordError::stream_busy(stream, holder));
        }
        holds.insert(stream.to_string(), owner.to_string());
        debug!(stream = %stream, owner = %owner, "[recording] stream held");
        Ok(())
    }

    pub(crate) async fn release_hold(&self, stream: &str, owner: &str) {
        let mut holds = self.inner.holds.lock().await;
        if holds.get(stream).is_some_and(|h| h == owner) {
            holds.remove(stream);
            debug!(stream = %stream, owner = %owner, "[recording] stream released");
        }
    }

    async fn release(&self, recording: &Arc<Recording>) {
        let mut recordings = self.inner.recordings.write().await;
        if recordings
            .get(recording.id())
            .is_some_and(|r| Arc::ptr_eq(r, recording))
        {
            recordings.remove(recording.id());
        }
    }

    async fn launch(
        &self,
        recording: &Arc<Recording>,
        effective: &EffectiveStreamConfig,
    ) -> Result<()> {
        let cfg = &self.inner.cfg;
        let stream = recording.stream();

        let source = resolve_source(cfg, stream);
        if source.is_internal() && self.inner.sources.lookup(stream).await.is_none() {
            warn!(stream = %stream, "[recording] stream not found and no direct source configured");
            return Err(RecordError::source_unavailable(stream));
        }

        let output = &recording.config().output;
        let parent = output.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(parent) = parent.filter(|_| cfg.recording.create_directories) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RecordError::filesystem(parent, e))?;
        }

        let spec = build_command(&cfg.encoder, source.url(), recording.config(), effective);
        let pid = recording
            .start(
                self.inner.spawner.as_ref(),
                &spec,
                cfg.encoder.spawn_timeout(),
            )
            .await?;

        if let Some(pid) = pid {
            let lease = Lease {
                id: recording.id().to_string(),
                stream: stream.to_string(),
                pid,
                output: output.clone(),
                started_at: Local::now(),
            };
            if let Err(e) = self.inner.leases.write(&lease).await {
                warn!(id = %recording.id(), "[recording] failed to write lease: {:#}", e);
            }
        }
        Ok(())
    }

    /// Watches one job: enforces its duration cap, notices a dead encoder and
    /// retires the job once it is stopped.
    fn supervise(&self, recording: Arc<Recording>) {
        let manager = self.clone();
        tokio::spawn(async move {
            let deadline = recording.config().duration.map(|d| Instant::now() + d);
            let mut poll = tokio::time::interval(EXIT_POLL_INTERVAL);
            poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = wait_deadline(deadline) => {
                        info!(id = %recording.id(), "[recording] duration reached");
                        if let Err(e) = recording.stop(StopReason::DurationReached).await {
                            error!(id = %recording.id(), "[recording] {}", e);
                        }
                        break;
                    }
                    _ = poll.tick() => {
                        if recording.is_stopped() {
                            break;
                        }
                        if recording.poll_exit().await {
                            warn!(
                                id = %recording.id(),
                                stream = %recording.stream(),
                                "[recording] encoder exited unexpectedly"
                            );
                            break;
                        }
                    }
                }
            }
            manager.retire(&recording).await;
        });
    }

    /// Remove a stopped job from the registry and keep its final status
    async fn retire(&self, recording: &Arc<Recording>) {
        let mut recordings = self.inner.recordings.write().await;
        let current = recordings
            .get(recording.id())
            .is_some_and(|r| Arc::ptr_eq(r, recording));
        if !current {
            return;
        }
        recordings.remove(recording.id());
        self.inner.leases.remove(recording.id()).await;
        drop(recordings);

        let status = recording.status().await;
        let mut finished = self.inner.finished.lock().await;
        finished.retain(|s| s.id != status.id);
        finished.push_back(status);
        while finished.len() > FINISHED_CAPACITY {
            finished.pop_front();
        }
        debug!(id = %recording.id(), "[recording] retired");
    }

    /// Stop a job. Stopping a job that already finished is a no-op.
    pub async fn stop(&self, id: &str) -> Result<()> {
        let recording = self.inner.recordings.read().await.get(id).cloned();
        match recording {
            Some(recording) => {
                let outcome = recording.stop(StopReason::Requested).await;
                self.retire(&recording).await;
                outcome.map(|_| ())
            }
            None if self.finished_status(id).await.is_some() => Ok(()),
            None => Err(RecordError::not_found(id)),
        }
    }

    async fn finished_status(&self, id: &str) -> Option<RecordingStatus> {
        self.inner
            .finished
            .lock()
            .await
            .iter()
            .rev()
            .find(|s| s.id == id)
            .cloned()
    }

    pub async fn status(&self, id: &str) -> Result<RecordingStatus> {
        let recording = self.inner.recordings.read().await.get(id).cloned();
        match recording {
            Some(recording) => Ok(recording.status().await),
            None => self
                .finished_status(id)
                .await
                .ok_or_else(|| RecordError::not_found(id)),
        }
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Recording>> {
        self.inner.recordings.read().await.get(id).cloned()
    }

    /// Statuses of every registered job, sorted by id
    pub async fn list(&self) -> Vec<RecordingStatus> {
        let recordings: Vec<Arc<Recording>> =
            self.inner.recordings.read().await.values().cloned().collect();
        let mut statuses = Vec::with_capacity(recordings.len());
        for recording in recordings {
            statuses.push(recording.status().await);
        }
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }

    pub async fn is_active(&self, id: &str) -> bool {
        self.inner
            .recordings
            .read()
            .await
            .get(id)
            .is_some_and(|r| r.is_active())
    }

    /// Whether a job for `stream` is starting or running, or the stream is held
    pub async fn is_stream_recording(&self, stream: &str) -> bool {
        let running = self
            .inner
            .recordings
            .read()
            .await
            .values()
            .any(|r| r.stream() == stream && !r.is_stopped());
        running || self.inner.holds.lock().await.contains_key(stream)
    }

    /// Stop every job whose id starts with `prefix`. Returns the ids that were stopped.
    pub async fn stop_with_prefix(&self, prefix: &str) -> Vec<String> {
        let ids: Vec<String> = self
            .inner
            .recordings
            .read()
            .await
            .keys()
            .filter(|id| id.starts_with(prefix))
            .cloned()
            .collect();

        let mut stopped = Vec::with_capacity(ids.len());
        for id in ids {
            match self.stop(&id).await {
                Ok(()) => stopped.push(id),
                Err(e) => error!(id = %id, "[recording] stop failed: {}", e),
            }
        }
        stopped
    }

    pub async fn stop_all(&self) -> Vec<String> {
        let stopped = self.stop_with_prefix("").await;
        if !stopped.is_empty() {
            info!("[recording] stopped {} recordings", stopped.len());
        }
        stopped
    }
}
