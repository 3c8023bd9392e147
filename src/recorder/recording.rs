use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use api::recorder::{RecordingState, RecordingStatus, StopReason};
use chrono::{DateTime, Local};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{error, info};

use crate::encoder::{CommandSpec, EncoderProcess, Spawner};
use crate::error::RecordError;
use crate::metrics;
use crate::result::Result;

use super::RecordConfig;

/// One encoder-backed recording job
pub struct Recording {
    id: String,
    stream: String,
    config: RecordConfig,
    /// Mirror of `inner.state` readable without waiting on the job lock
    state: AtomicU8,
    inner: Mutex<Inner>,
}

struct Inner {
    state: RecordingState,
    started_at: Option<DateTime<Local>>,
    started: Option<Instant>,
    stopped_at: Option<DateTime<Local>>,
    stop_reason: Option<StopReason>,
    elapsed: Duration,
    pid: Option<u32>,
    process: Option<Box<dyn EncoderProcess>>,
}

fn encode(state: RecordingState) -> u8 {
    match state {
        RecordingState::Idle => 0,
        RecordingState::Active => 1,
        RecordingState::Stopped => 2,
    }
}

fn decode(value: u8) -> RecordingState {
    match value {
        0 => RecordingState::Idle,
        1 => RecordingState::Active,
        _ => RecordingState::Stopped,
    }
}

impl Recording {
    pub(crate) fn new(id: &str, stream: &str, config: RecordConfig) -> Self {
        Self {
            id: id.to_string(),
            stream: stream.to_string(),
            config,
            state: AtomicU8::new(encode(RecordingState::Idle)),
            inner: Mutex::new(Inner {
                state: RecordingState::Idle,
                started_at: None,
                started: None,
                stopped_at: None,
                stop_reason: None,
                elapsed: Duration::ZERO,
                pid: None,
                process: None,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn config(&self) -> &RecordConfig {
        &self.config
    }

    pub fn state(&self) -> RecordingState {
        decode(self.state.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        self.state() == RecordingState::Active
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == RecordingState::Stopped
    }

    fn set_state(&self, inner: &mut Inner, state: RecordingState) {
        inner.state = state;
        self.state.store(encode(state), Ordering::Release);
    }

    /// Launch the encoder. Creation that takes longer than `timeout` counts as failure.
    pub(crate) async fn start(
        &self,
        spawner: &dyn Spawner,
        spec: &CommandSpec,
        timeout: Duration,
    ) -> Result<Option<u32>> {
        let mut inner = self.inner.lock().await;
        if inner.state != RecordingState::Idle {
            return Err(RecordError::already_active(&self.id));
        }

        info!(id = %self.id, stream = %self.stream, "[recording] starting: {}", spec);
        let process = match tokio::time::timeout(timeout, spawner.spawn(spec)).await {
            Ok(Ok(process)) => process,
            Ok(Err(e)) => {
                error!(id = %self.id, "[recording] encoder failed to start: {:#}", e);
                return Err(RecordError::process_creation_failed(&self.id, format!("{e:#}")));
            }
            Err(_) => {
                error!(id = %self.id, "[recording] encoder creation timed out after {:?}", timeout);
                return Err(RecordError::process_creation_failed(
                    &self.id,
                    format!("timed out after {timeout:?}"),
                ));
            }
        };

        inner.pid = process.pid();
        inner.process = Some(process);
        inner.started_at = Some(Local::now());
        inner.started = Some(Instant::now());
        self.set_state(&mut inner, RecordingState::Active);
        metrics::ACTIVE_RECORDINGS.inc();

        info!(
            id = %self.id,
            stream = %self.stream,
            "[recording] active, writing {}",
            self.config.output.display()
        );
        Ok(inner.pid)
    }

    fn finish(&self, inner: &mut Inner, reason: StopReason) {
        inner.elapsed = inner.started.map(|s| s.elapsed()).unwrap_or_default();
        inner.stopped_at = Some(Local::now());
        inner.stop_reason = Some(reason);
        if inner.state == RecordingState::Active {
            metrics::ACTIVE_RECORDINGS.dec();
        }
        self.set_state(inner, RecordingState::Stopped);
    }

    /// Stop the encoder. Returns `Ok(false)` when the job was already stopped.
    ///
    /// The job ends up `Stopped` even when the encoder refuses to stop; its handle is
    /// dropped, which kills it.
    pub async fn stop(&self, reason: StopReason) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if inner.state == RecordingState::Stopped {
            return Ok(false);
        }

        let outcome = match inner.process.take() {
            Some(mut process) => process.stop().await,
            None => Ok(()),
        };
        self.finish(&mut inner, reason);

        match outcome {
            Ok(()) => {
                info!(
                    id = %self.id,
                    stream = %self.stream,
                    "[recording] completed after {:?} ({:?}): {}",
                    inner.elapsed,
                    reason,
                    self.config.output.display()
                );
                Ok(true)
            }
            Err(e) => {
                error!(id = %self.id, "[recording] failed to stop encoder: {:#}", e);
                Err(RecordError::StopFailed {
                    id: self.id.clone(),
                    reason: format!("{e:#}"),
                })
            }
        }
    }

    /// Mark the job stopped if its encoder exited by itself. Returns true on that transition.
    pub(crate) async fn poll_exit(&self) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.state != RecordingState::Active {
            return false;
        }
        let exited = inner
            .process
            .as_mut()
            .map(|p| p.has_exited())
            .unwrap_or(true);
        if exited {
            inner.process = None;
            self.finish(&mut inner, StopReason::ProcessExited);
        }
        exited
    }

    pub async fn status(&self) -> RecordingStatus {
        let inner = self.inner.lock().await;
        let elapsed = match inner.state {
            RecordingState::Active => inner.started.map(|s| s.elapsed()).unwrap_or_default(),
            _ => inner.elapsed,
        };
        let remaining = match (inner.state, self.config.duration) {
            (RecordingState::Active, Some(max)) => Some(max.saturating_sub(elapsed)),
            _ => None,
        };

        RecordingStatus {
            id: self.id.clone(),
            stream: self.stream.clone(),
            output: self.config.output.to_string_lossy().into_owned(),
            format: self.config.format.clone(),
            state: inner.state,
            started_at: inner.started_at,
            stopped_at: inner.stopped_at,
            stop_reason: inner.stop_reason,
            elapsed_ms: elapsed.as_millis() as u64,
            max_duration_ms: self.config.duration.map(|d| d.as_millis() as u64),
            remaining_ms: remaining.map(|d| d.as_millis() as u64),
            pid: inner.pid,
        }
    }
}
