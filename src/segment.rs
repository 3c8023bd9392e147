//! Segmented recordings: one logical recording written as a rolling series of files.
//!
//! Each segment is an ordinary job in the [`RecordingManager`] with id `<id>_seg<n>`.
//! An evaluator task checks the current segment every `segment_check_interval` and
//! rotates it once it is old or large enough. Rotation stops segment `n` before
//! segment `n + 1` starts, so the files never overlap. Boundaries overshoot by up
//! to one evaluator tick.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use api::recorder::{RecordingState, SegmentedStatus};
use chrono::{DateTime, Local};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::RecordError;
use crate::metrics;
use crate::recorder::{RecordOptions, Recording, RecordingManager};
use crate::result::Result;

const FINISHED_CAPACITY: usize = 256;
const MEGABYTE: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rotation {
    Initial,
    Duration,
    Size,
    Exited,
    Retry,
}

pub struct SegmentedRecording {
    id: String,
    stream: String,
    options: RecordOptions,
    segment_duration: Duration,
    max_file_size_mb: u64,
    /// Cap on the whole logical recording
    max_duration: Option<Duration>,
    active: AtomicBool,
    inner: Mutex<Inner>,
}

struct Inner {
    segment: u32,
    current: Option<Arc<Recording>>,
    started_at: DateTime<Local>,
    started: Instant,
    stopped_at: Option<DateTime<Local>>,
    segment_started_at: Option<DateTime<Local>>,
    segment_started: Option<Instant>,
    files: Vec<PathBuf>,
}

impl SegmentedRecording {
    fn new(
        id: &str,
        stream: &str,
        mut options: RecordOptions,
        segment_duration: Duration,
        max_file_size_mb: u64,
    ) -> Self {
        // every segment gets a fresh name and no cap of its own
        let max_duration = options.duration.take().filter(|d| !d.is_zero());
        options.output = None;
        Self {
            id: id.to_string(),
            stream: stream.to_string(),
            options,
            segment_duration,
            max_file_size_mb,
            max_duration,
            active: AtomicBool::new(true),
            inner: Mutex::new(Inner {
                segment: 0,
                current: None,
                started_at: Local::now(),
                started: Instant::now(),
                stopped_at: None,
                segment_started_at: None,
                segment_started: None,
                files: vec![],
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn segment_id(&self, n: u32) -> String {
        format!("{}_seg{}", self.id, n)
    }

    /// Stop the current segment, if any, then start the next one
    async fn rotate(
        &self,
        inner: &mut Inner,
        recorder: &RecordingManager,
        reason: Rotation,
    ) -> Result<()> {
        if let Some(current) = inner.current.take() {
            if let Err(e) = recorder.stop(current.id()).await {
                error!(id = %self.id, "[segment] failed to stop {}: {}", current.id(), e);
            }
        }

        inner.segment += 1;
        let segment_id = self.segment_id(inner.segment);
        let recording = recorder
            .start_for(
                &segment_id,
                &self.stream,
                self.options.clone(),
                Some(&self.id),
            )
            .await?;

        if reason != Rotation::Initial {
            metrics::SEGMENT_ROTATIONS.inc();
        }
        info!(
            id = %self.id,
            stream = %self.stream,
            "[segment] segment {} started ({:?}): {}",
            inner.segment,
            reason,
            recording.config().output.display()
        );
        inner.files.push(recording.config().output.clone());
        inner.segment_started_at = Some(Local::now());
        inner.segment_started = Some(Instant::now());
        inner.current = Some(recording);
        Ok(())
    }

    async fn rotation_due(&self, inner: &Inner) -> Option<Rotation> {
        let Some(current) = &inner.current else {
            return Some(Rotation::Retry);
        };
        if current.is_stopped() {
            return Some(Rotation::Exited);
        }
        if inner
            .segment_started
            .is_some_and(|s| s.elapsed() >= self.segment_duration)
        {
            return Some(Rotation::Duration);
        }
        if self.max_file_size_mb > 0 {
            let output = &current.config().output;
            let size = tokio::fs::metadata(output).await.map(|m| m.len()).unwrap_or(0);
            if size >= self.max_file_size_mb * MEGABYTE {
                return Some(Rotation::Size);
            }
        }
        None
    }

    /// One evaluator tick. Returns false once the recording is over.
    async fn evaluate(&self, recorder: &RecordingManager) -> bool {
        let mut inner = self.inner.lock().await;
        if !self.is_active() {
            return false;
        }

        if self
            .max_duration
            .is_some_and(|max| inner.started.elapsed() >= max)
        {
            info!(id = %self.id, "[segment] duration reached");
            self.finish(&mut inner, recorder).await;
            return false;
        }

        let Some(reason) = self.rotation_due(&inner).await else {
            return true;
        };
        if reason == Rotation::Exited {
            warn!(
                id = %self.id,
                stream = %self.stream,
                "[segment] segment {} ended on its own, starting the next one",
                inner.segment
            );
        }
        if let Err(e) = self.rotate(&mut inner, recorder, reason).await {
            error!(id = %self.id, "[segment] rotation failed, retrying next tick: {}", e);
        }
        true
    }

    async fn finish(&self, inner: &mut Inner, recorder: &RecordingManager) {
        self.active.store(false, Ordering::Release);
        if let Some(current) = inner.current.take() {
            if let Err(e) = recorder.stop(current.id()).await {
                error!(id = %self.id, "[segment] failed to stop {}: {}", current.id(), e);
            }
        }
        recorder.release_hold(&self.stream, &self.id).await;
        inner.stopped_at = Some(Local::now());
    }

    /// Stop the current segment and end the recording. No-op when already stopped.
    async fn stop(&self, recorder: &RecordingManager) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.stopped_at.is_some() {
            return false;
        }
        self.finish(&mut inner, recorder).await;
        info!(
            id = %self.id,
            stream = %self.stream,
            "[segment] stopped after {} segments",
            inner.segment
        );
        true
    }

    pub async fn status(&self) -> SegmentedStatus {
        let inner = self.inner.lock().await;
        let state = if inner.stopped_at.is_some() {
            RecordingState::Stopped
        } else if inner.current.as_ref().is_some_and(|c| c.is_active()) {
            RecordingState::Active
        } else {
            RecordingState::Idle
        };
        SegmentedStatus {
            id: self.id.clone(),
            stream: self.stream.clone(),
            state,
            started_at: inner.started_at,
            stopped_at: inner.stopped_at,
            current_segment: inner.segment,
            current_id: inner.current.as_ref().map(|c| c.id().to_string()),
            current_file: inner
                .files
                .last()
                .map(|f| f.to_string_lossy().into_owned()),
            segment_started_at: inner.segment_started_at,
            segment_duration_ms: self.segment_duration.as_millis() as u64,
            max_file_size_mb: self.max_file_size_mb,
        }
    }

    /// Files written by this recording that still exist, in segment order
    pub async fn segments(&self) -> Vec<PathBuf> {
        let files = self.inner.lock().await.files.clone();
        let mut existing = Vec::with_capacity(files.len());
        for file in files {
            if tokio::fs::try_exists(&file).await.unwrap_or(false) {
                existing.push(file);
            }
        }
        existing
    }
}

/// Registry of segmented recordings
#[derive(Clone)]
pub struct SegmentManager {
    inner: Arc<Shared>,
}

struct Shared {
    recorder: RecordingManager,
    check_interval: Duration,
    recordings: RwLock<HashMap<String, Arc<SegmentedRecording>>>,
    finished: Mutex<VecDeque<SegmentedStatus>>,
}

impl SegmentManager {
    pub fn new(recorder: RecordingManager) -> Self {
        let check_interval = recorder.config().recording.segment_check_interval();
        Self {
            inner: Arc::new(Shared {
                recorder,
                check_interval,
                recordings: RwLock::new(HashMap::new()),
                finished: Mutex::new(VecDeque::new()),
            }),
        }
    }

    pub fn recorder(&self) -> &RecordingManager {
        &self.inner.recorder
    }

    /// Start a segmented recording of `stream`. `options.duration`, if set, caps the
    /// whole recording rather than each segment.
    pub async fn start(&self, id: &str, stream: &str, options: RecordOptions) -> Result<()> {
        let effective = self.inner.recorder.config().recording.resolve(stream);
        let recording = {
            let mut recordings = self.inner.recordings.write().await;
            if recordings.get(id).is_some_and(|r| r.is_active()) {
                return Err(RecordError::already_active(id));
            }
            if let Some(busy) = recordings
                .values()
                .find(|r| r.stream() == stream && r.is_active())
            {
                return Err(RecordError::stream_busy(stream, busy.id()));
            }
            // the stream stays ours between segments, even after one dies
            self.inner.recorder.hold(stream, id).await?;
            let recording = Arc::new(SegmentedRecording::new(
                id,
                stream,
                options,
                effective.segment_duration,
                effective.max_file_size_mb,
            ));
            recordings.insert(id.to_string(), recording.clone());
            recording
        };

        let first = {
            let mut inner = recording.inner.lock().await;
            recording
                .rotate(&mut inner, &self.inner.recorder, Rotation::Initial)
                .await
        };
        if let Err(e) = first {
            recording.active.store(false, Ordering::Release);
            self.inner.recorder.release_hold(stream, id).await;
            let mut recordings = self.inner.recordings.write().await;
            if recordings
                .get(id)
                .is_some_and(|r| Arc::ptr_eq(r, &recording))
            {
                recordings.remove(id);
            }
            return Err(e);
        }

        info!(
            id = %id,
            stream = %stream,
            "[segment] started, rotating every {:?} or {} MB",
            effective.segment_duration,
            effective.max_file_size_mb
        );
        self.evaluate_loop(recording);
        Ok(())
    }

    fn evaluate_loop(&self, recording: Arc<SegmentedRecording>) {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.inner.check_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !recording.evaluate(&manager.inner.recorder).await {
                    break;
                }
            }
            manager.retire(&recording).await;
        });
    }

    async fn retire(&self, recording: &Arc<SegmentedRecording>) {
        let mut recordings = self.inner.recordings.write().await;
        if !recordings
            .get(recording.id())
            .is_some_and(|r| Arc::ptr_eq(r, recording))
        {
            return;
        }
        recordings.remove(recording.id());
        drop(recordings);

        let status = recording.status().await;
        let mut finished = self.inner.finished.lock().await;
        finished.retain(|s| s.id != status.id);
        finished.push_back(status);
        while finished.len() > FINISHED_CAPACITY {
            finished.pop_front();
        }
        debug!(id = %recording.id(), "[segment] retired");
    }

    pub async fn stop(&self, id: &str) -> Result<()> {
        let recording = self.inner.recordings.read().await.get(id).cloned();
        match recording {
            Some(recording) => {
                recording.stop(&self.inner.recorder).await;
                self.retire(&recording).await;
                Ok(())
            }
            None if self.finished_status(id).await.is_some() => Ok(()),
            None => Err(RecordError::not_found(id)),
        }
    }

    async fn finished_status(&self, id: &str) -> Option<SegmentedStatus> {
        self.inner
            .finished
            .lock()
            .await
            .iter()
            .rev()
            .find(|s| s.id == id)
            .cloned()
    }

    pub async fn status(&self, id: &str) -> Result<SegmentedStatus> {
        let recording = self.inner.recordings.read().await.get(id).cloned();
        match recording {
            Some(recording) => Ok(recording.status().await),
            None => self
                .finished_status(id)
                .await
                .ok_or_else(|| RecordError::not_found(id)),
        }
    }

    pub async fn get(&self, id: &str) -> Option<Arc<SegmentedRecording>> {
        self.inner.recordings.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<SegmentedStatus> {
        let recordings: Vec<Arc<SegmentedRecording>> =
            self.inner.recordings.read().await.values().cloned().collect();
        let mut statuses = Vec::with_capacity(recordings.len());
        for recording in recordings {
            statuses.push(recording.status().await);
        }
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }

    pub async fn segments(&self, id: &str) -> Result<Vec<PathBuf>> {
        match self.get(id).await {
            Some(recording) => Ok(recording.segments().await),
            None => Err(RecordError::not_found(id)),
        }
    }

    pub async fn is_stream_recording(&self, stream: &str) -> bool {
        self.inner
            .recordings
            .read()
            .await
            .values()
            .any(|r| r.stream() == stream && r.is_active())
    }

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
            if self.stop(&id).await.is_ok() {
                stopped.push(id);
            }
        }
        stopped
    }

    pub async fn stop_all(&self) -> Vec<String> {
        self.stop_with_prefix("").await
    }
}
