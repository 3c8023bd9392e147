//! Calendar driven recordings.
//!
//! Each stream has at most one schedule. When a tick finds a schedule due, it starts a
//! duration capped job for the stream unless that stream is already recording.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use api::schedule::{ScheduleInfo, ScheduleValidation};
use chrono::{DateTime, Local};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::RecordError;
use crate::metrics;
use crate::recorder::{RecordOptions, RecordingManager};
use crate::result::Result;
use crate::segment::SegmentManager;
use crate::shutdown::Shutdown;

pub mod cron;

use cron::{CronError, CronSchedule};

pub const SCHEDULE_PREFIX: &str = "sched_";

struct Schedule {
    stream: String,
    cron: CronSchedule,
    duration: Duration,
    next_run: Option<DateTime<Local>>,
    active_id: Option<String>,
}

impl Schedule {
    fn info(&self) -> ScheduleInfo {
        ScheduleInfo {
            stream: self.stream.clone(),
            schedule: self.cron.raw().to_string(),
            duration_ms: self.duration.as_millis() as u64,
            next_run: self.next_run,
            active_id: self.active_id.clone(),
        }
    }
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    cfg: Arc<Config>,
    recorder: RecordingManager,
    segments: SegmentManager,
    schedules: Mutex<BTreeMap<String, Schedule>>,
}

impl Scheduler {
    pub fn new(cfg: Arc<Config>, recorder: RecordingManager, segments: SegmentManager) -> Self {
        Self {
            inner: Arc::new(Inner {
                cfg,
                recorder,
                segments,
                schedules: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    /// Add or replace the schedule of `stream`. A replaced schedule keeps tracking the
    /// recording it already started.
    pub async fn add(&self, stream: &str, expr: &str, duration: Duration) -> Result<ScheduleInfo> {
        let cron = CronSchedule::from_str(expr)?;
        let next_run = cron
            .next_after(&Local::now())
            .ok_or_else(|| CronError::NeverFires(cron.raw().to_string()))?;

        let mut schedules = self.inner.schedules.lock().await;
        let active_id = schedules
            .get(stream)
            .and_then(|s| s.active_id.clone());
        let schedule = Schedule {
            stream: stream.to_string(),
            cron,
            duration,
            next_run: Some(next_run),
            active_id,
        };
        let info = schedule.info();
        schedules.insert(stream.to_string(), schedule);

        info!(
            stream = %stream,
            "[scheduler] schedule '{}' for {:?}, next run {}",
            expr,
            duration,
            next_run
        );
        Ok(info)
    }

    /// Drop the schedule of `stream`, stopping the recording it started
    pub async fn remove(&self, stream: &str) -> Result<()> {
        let schedule = self
            .inner
            .schedules
            .lock()
            .await
            .remove(stream)
            .ok_or_else(|| RecordError::not_found(stream))?;

        if let Some(id) = schedule.active_id {
            self.stop_triggered(&id).await;
        }
        info!(stream = %stream, "[scheduler] schedule removed");
        Ok(())
    }

    async fn stop_triggered(&self, id: &str) {
        match self.inner.recorder.stop(id).await {
            Ok(()) | Err(RecordError::NotFound(_)) => {}
            Err(e) => error!(id = %id, "[scheduler] failed to stop: {}", e),
        }
    }

    pub async fn list(&self) -> Vec<ScheduleInfo> {
        self.inner
            .schedules
            .lock()
            .await
            .values()
            .map(Schedule::info)
            .collect()
    }

    /// Parse `expr` and compute its next `n` runs from now
    pub fn validate(expr: &str, n: usize) -> ScheduleValidation {
        let parsed = CronSchedule::from_str(expr).and_then(|cron| {
            let next_runs = cron.upcoming(&Local::now(), n);
            if next_runs.is_empty() && n > 0 {
                return Err(CronError::NeverFires(cron.raw().to_string()));
            }
            Ok((cron, next_runs))
        });
        match parsed {
            Ok((cron, next_runs)) => ScheduleValidation {
                schedule: expr.to_string(),
                valid: true,
                error: None,
                next_runs,
                description: cron.describe(),
            },
            Err(e) => ScheduleValidation {
                schedule: expr.to_string(),
                valid: false,
                error: Some(e.to_string()),
                next_runs: vec![],
                description: String::new(),
            },
        }
    }

    async fn is_stream_recording(&self, stream: &str) -> bool {
        self.inner.recorder.is_stream_recording(stream).await
            || self.inner.segments.is_stream_recording(stream).await
    }

    /// Evaluate every schedule at `now`. Returns the ids of the recordings started.
    ///
    /// The schedule table is only locked to pick the due schedules and to record what
    /// was started, never while an encoder is being spawned.
    pub async fn tick(&self, now: DateTime<Local>) -> Vec<String> {
        let due = self.take_due(now).await;

        let mut launched = vec![];
        for (stream, duration) in due {
            if self.is_stream_recording(&stream).await {
                info!(stream = %stream, "[scheduler] stream already recording, skipping");
                continue;
            }

            let id = format!("{}{}_{}", SCHEDULE_PREFIX, stream, now.timestamp());
            let options = RecordOptions {
                duration: Some(duration),
                ..Default::default()
            };
            match self.inner.recorder.start(&id, &stream, options).await {
                Ok(_) => {
                    metrics::SCHEDULE_TRIGGERS.inc();
                    info!(id = %id, stream = %stream, "[scheduler] started for {:?}", duration);
                    launched.push((stream, id));
                }
                Err(e) => {
                    error!(stream = %stream, "[scheduler] failed to start: {}", e);
                }
            }
        }

        let mut started = Vec::with_capacity(launched.len());
        let mut orphaned = vec![];
        {
            let mut schedules = self.inner.schedules.lock().await;
            for (stream, id) in launched {
                match schedules.get_mut(&stream) {
                    Some(schedule) => {
                        schedule.active_id = Some(id.clone());
                        started.push(id);
                    }
                    None => orphaned.push(id),
                }
            }
        }
        // removed while starting
        for id in orphaned {
            debug!(id = %id, "[scheduler] schedule gone, stopping");
            self.stop_triggered(&id).await;
        }
        started
    }

    /// Advance every due schedule and return the streams to start, with their caps.
    /// Schedules still tracking a running recording are advanced but skipped.
    async fn take_due(&self, now: DateTime<Local>) -> Vec<(String, Duration)> {
        let mut due = vec![];
        let mut schedules = self.inner.schedules.lock().await;
        for schedule in schedules.values_mut() {
            if let Some(id) = &schedule.active_id {
                let running = self
                    .inner
                    .recorder
                    .get(id)
                    .await
                    .is_some_and(|r| !r.is_stopped());
                if !running {
                    debug!(id = %id, "[scheduler] scheduled recording finished");
                    schedule.active_id = None;
                }
            }

            if !schedule.next_run.is_some_and(|next| now >= next) {
                continue;
            }
            schedule.next_run = schedule.cron.next_after(&now);
            debug!(
                stream = %schedule.stream,
                "[scheduler] due, next run {:?}",
                schedule.next_run
            );

            if let Some(id) = &schedule.active_id {
                debug!(stream = %schedule.stream, "[scheduler] {} still recording, skipping", id);
                continue;
            }
            due.push((schedule.stream.clone(), schedule.duration));
        }
        due
    }

    /// Register every schedule found in the per-stream configuration
    pub async fn load_from_config(&self) -> usize {
        let recording = &self.inner.cfg.recording;
        let mut loaded = 0;
        for stream in recording.streams.keys() {
            let effective = recording.resolve(stream);
            let Some(expr) = effective.schedule else {
                continue;
            };
            match self.add(stream, &expr, effective.schedule_duration).await {
                Ok(_) => loaded += 1,
                Err(e) => warn!(stream = %stream, "[scheduler] ignoring schedule: {}", e),
            }
        }
        if loaded > 0 {
            info!("[scheduler] loaded {} schedules from config", loaded);
        }
        loaded
    }

    pub async fn run(&self, shutdown: Shutdown) {
        let period = self.inner.cfg.recording.scheduler_tick();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(Local::now()).await;
                }
                _ = shutdown.wait() => break,
            }
        }
        info!("[scheduler] stopped");
    }

    /// Stop every scheduled recording and forget all schedules
    pub async fn shutdown(&self) {
        let schedules = std::mem::take(&mut *self.inner.schedules.lock().await);
        for schedule in schedules.into_values() {
            if let Some(id) = schedule.active_id {
                self.stop_triggered(&id).await;
            }
        }
    }
}
