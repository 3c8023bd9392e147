//! Auto recording: keeps the set of recording streams converged on the configured
//! target set.
//!
//! A stream counts as recording when either the in-memory registries or the encoder
//! probe says so. The probe survives restarts of this process; the registries do not.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::encoder::EncoderProbe;
use crate::error::RecordError;
use crate::metrics;
use crate::recorder::{RecordOptions, RecordingManager};
use crate::segment::SegmentManager;
use crate::shutdown::Shutdown;
use crate::source::SourceRegistry;

pub const AUTO_PREFIX: &str = "auto_";

/// What one reconciliation pass did, per stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePass {
    pub started: Vec<String>,
    pub already_recording: Vec<String>,
    pub unavailable: Vec<String>,
    pub failed: Vec<String>,
    /// Claimed by an overlapping pass, or not restarted because `restart_on_error` is off
    pub skipped: Vec<String>,
}

#[derive(Debug)]
enum Outcome {
    Started,
    AlreadyRecording,
    Unavailable,
    Failed,
    Skipped,
}

#[derive(Clone)]
pub struct AutoRecorder {
    inner: Arc<Inner>,
}

struct Inner {
    cfg: Arc<Config>,
    sources: Arc<dyn SourceRegistry>,
    probe: Arc<dyn EncoderProbe>,
    recorder: RecordingManager,
    segments: SegmentManager,
    /// Streams some pass is working on right now
    claims: Mutex<HashSet<String>>,
    /// Streams this loop has started at least once
    started: Mutex<HashSet<String>>,
}

/// Releases a stream claim when the per-stream task ends, panics included
struct Claim {
    inner: Arc<Inner>,
    stream: String,
}

impl Drop for Claim {
    fn drop(&mut self) {
        if let Ok(mut claims) = self.inner.claims.lock() {
            claims.remove(&self.stream);
        }
    }
}

impl AutoRecorder {
    pub fn new(
        cfg: Arc<Config>,
        sources: Arc<dyn SourceRegistry>,
        probe: Arc<dyn EncoderProbe>,
        recorder: RecordingManager,
        segments: SegmentManager,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                cfg,
                sources,
                probe,
                recorder,
                segments,
                claims: Mutex::new(HashSet::new()),
                started: Mutex::new(HashSet::new()),
            }),
        }
    }

    fn claim(&self, stream: &str) -> Option<Claim> {
        let mut claims = self.inner.claims.lock().ok()?;
        claims.insert(stream.to_string()).then(|| Claim {
            inner: self.inner.clone(),
            stream: stream.to_string(),
        })
    }

    fn has_started(&self, stream: &str) -> bool {
        self.inner
            .started
            .lock()
            .map(|started| started.contains(stream))
            .unwrap_or(false)
    }

    fn mark_started(&self, stream: &str) {
        if let Ok(mut started) = self.inner.started.lock() {
            started.insert(stream.to_string());
        }
    }

    /// Either signal is enough
    async fn is_recording(&self, stream: &str) -> bool {
        self.inner.recorder.is_stream_recording(stream).await
            || self.inner.segments.is_stream_recording(stream).await
            || self.inner.probe.is_running(stream).await
    }

    async fn reconcile_stream(&self, stream: &str, delay: Duration) -> Outcome {
        let Some(_claim) = self.claim(stream) else {
            debug!(stream = %stream, "[autorecord] already being handled");
            return Outcome::Skipped;
        };

        if self.is_recording(stream).await {
            return Outcome::AlreadyRecording;
        }

        let effective = self.inner.cfg.recording.resolve(stream);
        if !effective.restart_on_error && self.has_started(stream) {
            debug!(stream = %stream, "[autorecord] not restarting, restart_on_error is off");
            return Outcome::Skipped;
        }

        if effective.source.is_none() && self.inner.sources.lookup(stream).await.is_none() {
            debug!(stream = %stream, "[autorecord] source not available");
            return Outcome::Unavailable;
        }

        tokio::time::sleep(delay).await;

        let id = format!("{}{}_{}", AUTO_PREFIX, stream, Utc::now().timestamp());
        let result = if effective.enable_segments {
            self.inner
                .segments
                .start(&id, stream, RecordOptions::default())
                .await
        } else {
            self.inner
                .recorder
                .start(&id, stream, RecordOptions::default())
                .await
                .map(|_| ())
        };

        match result {
            Ok(()) => {
                self.mark_started(stream);
                metrics::AUTORECORD_STARTS.inc();
                info!(
                    id = %id,
                    stream = %stream,
                    "[autorecord] started{}",
                    if effective.enable_segments { " (segmented)" } else { "" }
                );
                Outcome::Started
            }
            Err(RecordError::StreamBusy { .. } | RecordError::AlreadyActive(_)) => {
                Outcome::AlreadyRecording
            }
            Err(RecordError::SourceUnavailable(_)) => Outcome::Unavailable,
            Err(e) => {
                warn!(stream = %stream, "[autorecord] failed to start: {}", e);
                Outcome::Failed
            }
        }
    }

    /// One pass over the target set. Streams are handled concurrently with a small
    /// staggered delay before each start; a failing or panicking stream only affects
    /// itself.
    pub async fn reconcile(&self) -> ReconcilePass {
        let known = self.inner.sources.stream_names().await;
        let targets = self.inner.cfg.recording.target_streams(&known);
        let mut pass = ReconcilePass::default();
        if targets.is_empty() {
            return pass;
        }

        let stagger = self.inner.cfg.recording.auto_record_stagger();
        let handles: Vec<_> = targets
            .into_iter()
            .enumerate()
            .map(|(i, stream)| {
                let this = self.clone();
                let delay = stagger * i as u32;
                let task_stream = stream.clone();
                let handle =
                    tokio::spawn(async move { this.reconcile_stream(&task_stream, delay).await });
                (stream, handle)
            })
            .collect();

        for (stream, handle) in handles {
            match handle.await {
                Ok(Outcome::Started) => pass.started.push(stream),
                Ok(Outcome::AlreadyRecording) => pass.already_recording.push(stream),
                Ok(Outcome::Unavailable) => pass.unavailable.push(stream),
                Ok(Outcome::Failed) => pass.failed.push(stream),
                Ok(Outcome::Skipped) => pass.skipped.push(stream),
                Err(e) => {
                    error!(stream = %stream, "[autorecord] stream task failed: {}", e);
                    pass.failed.push(stream);
                }
            }
        }

        for list in [
            &mut pass.started,
            &mut pass.already_recording,
            &mut pass.unavailable,
            &mut pass.failed,
            &mut pass.skipped,
        ] {
            list.sort();
        }
        if !pass.started.is_empty() || !pass.failed.is_empty() {
            info!(
                "[autorecord] pass: started {:?}, failed {:?}, recording {}, unavailable {}",
                pass.started,
                pass.failed,
                pass.already_recording.len(),
                pass.unavailable.len()
            );
        }
        pass
    }

    /// Stop every recording this loop started
    pub async fn stop_auto_recordings(&self) -> Vec<String> {
        let mut stopped = self.inner.segments.stop_with_prefix(AUTO_PREFIX).await;
        stopped.extend(self.inner.recorder.stop_with_prefix(AUTO_PREFIX).await);
        if !stopped.is_empty() {
            info!("[autorecord] stopped {} auto recordings", stopped.len());
        }
        stopped
    }

    /// First pass after the startup delay, then one per check interval
    pub async fn run(&self, shutdown: Shutdown) {
        let recording = &self.inner.cfg.recording;
        let delay = recording.auto_record_startup_delay();
        let period = recording.auto_record_check_interval();
        info!(
            "[autorecord] first pass in {:?}, then every {:?}",
            delay, period
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.wait() => return,
        }

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.reconcile().await;
                }
                _ = shutdown.wait() => break,
            }
        }
        info!("[autorecord] stopped");
    }
}
