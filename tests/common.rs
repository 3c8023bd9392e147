#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use liverec::Recorder;
use liverec::config::Config;
use liverec::encoder::{CommandSpec, EncoderProbe, EncoderProcess, Spawner};
use liverec::source::SourceTable;

/// Pids far above any real pid_max, so leases written for fakes are never live
const FAKE_PID_BASE: u32 = 4_000_000;

#[derive(Default)]
struct State {
    live: HashMap<String, usize>,
    peak: HashMap<String, usize>,
    spawned: Vec<CommandSpec>,
    exits: Vec<(String, Arc<AtomicBool>)>,
    failing: HashSet<String>,
    panicking: HashSet<String>,
    hanging: bool,
    file_size: u64,
}

/// Spawner that pretends to run encoders and counts them per stream
#[derive(Clone, Default)]
pub struct FakeSpawner {
    state: Arc<Mutex<State>>,
}

impl FakeSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encoders currently running for `stream`
    pub fn live(&self, stream: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.live.get(stream).copied().unwrap_or(0)
    }

    /// Most encoders ever running at once for `stream`
    pub fn peak(&self, stream: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.peak.get(stream).copied().unwrap_or(0)
    }

    pub fn spawned(&self) -> Vec<CommandSpec> {
        self.state.lock().unwrap().spawned.clone()
    }

    pub fn spawned_for(&self, stream: &str) -> usize {
        self.spawned().iter().filter(|s| s.stream == stream).count()
    }

    pub fn fail(&self, stream: &str) {
        self.state.lock().unwrap().failing.insert(stream.to_string());
    }

    pub fn panic_on(&self, stream: &str) {
        self.state
            .lock()
            .unwrap()
            .panicking
            .insert(stream.to_string());
    }

    pub fn hang(&self) {
        self.state.lock().unwrap().hanging = true;
    }

    /// Size of the output file each new encoder creates
    pub fn write_bytes(&self, size: u64) {
        self.state.lock().unwrap().file_size = size;
    }

    /// Make every running encoder of `stream` exit on its own
    pub fn exit_all(&self, stream: &str) {
        let state = self.state.lock().unwrap();
        for (s, exited) in &state.exits {
            if s == stream {
                exited.store(true, Ordering::SeqCst);
            }
        }
    }
}

struct FakeProcess {
    pid: u32,
    stream: String,
    state: Arc<Mutex<State>>,
    exited: Arc<AtomicBool>,
    released: bool,
}

impl FakeProcess {
    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let mut state = self.state.lock().unwrap();
        if let Some(live) = state.live.get_mut(&self.stream) {
            *live = live.saturating_sub(1);
        }
    }
}

impl Drop for FakeProcess {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl EncoderProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn has_exited(&mut self) -> bool {
        if self.exited.load(Ordering::SeqCst) {
            self.release();
            return true;
        }
        false
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        self.release();
        Ok(())
    }
}

#[async_trait]
impl Spawner for FakeSpawner {
    async fn spawn(&self, spec: &CommandSpec) -> anyhow::Result<Box<dyn EncoderProcess>> {
        let (hanging, failing, panicking, file_size) = {
            let state = self.state.lock().unwrap();
            (
                state.hanging,
                state.failing.contains(&spec.stream),
                state.panicking.contains(&spec.stream),
                state.file_size,
            )
        };
        if hanging {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if panicking {
            panic!("encoder for {} blew up", spec.stream);
        }
        if failing {
            anyhow::bail!("no such encoder for {}", spec.stream);
        }

        if spec.output.parent().is_some_and(|p| p.exists()) {
            let file = std::fs::File::create(&spec.output)?;
            file.set_len(file_size)?;
        }

        let exited = Arc::new(AtomicBool::new(false));
        let mut state = self.state.lock().unwrap();
        state.spawned.push(spec.clone());
        state.exits.push((spec.stream.clone(), exited.clone()));
        let live = state.live.entry(spec.stream.clone()).or_default();
        *live += 1;
        let live = *live;
        let peak = state.peak.entry(spec.stream.clone()).or_default();
        *peak = (*peak).max(live);
        let pid = FAKE_PID_BASE + state.spawned.len() as u32;

        Ok(Box::new(FakeProcess {
            pid,
            stream: spec.stream.clone(),
            state: self.state.clone(),
            exited,
            released: false,
        }))
    }
}

/// Probe that reports whatever the test told it
#[derive(Clone, Default)]
pub struct FakeProbe {
    running: Arc<Mutex<HashSet<String>>>,
}

impl FakeProbe {
    pub fn set_running(&self, stream: &str) {
        self.running.lock().unwrap().insert(stream.to_string());
    }
}

#[async_trait]
impl EncoderProbe for FakeProbe {
    async fn is_running(&self, stream: &str) -> bool {
        self.running.lock().unwrap().contains(stream)
    }
}

/// Defaults tuned for tests: storage under `root`, no stagger, short spawn timeout
pub fn config(root: &Path) -> Config {
    let mut cfg = Config::default();
    cfg.recording.base_path = root.to_path_buf();
    cfg.recording.enable_segments = false;
    cfg.recording.auto_record_stagger_ms = 0;
    cfg.encoder.spawn_timeout_ms = 200;
    cfg
}

pub struct Harness {
    pub recorder: Recorder,
    pub spawner: FakeSpawner,
    pub probe: FakeProbe,
    pub sources: SourceTable,
}

pub async fn harness(cfg: Config, streams: &[&str]) -> Harness {
    let sources = SourceTable::new();
    for stream in streams {
        sources
            .insert(stream, Some(format!("rtsp://camera.local/{stream}")))
            .await;
    }
    let spawner = FakeSpawner::new();
    let probe = FakeProbe::default();
    let recorder = Recorder::new(
        Arc::new(cfg),
        Arc::new(sources.clone()),
        Arc::new(spawner.clone()),
        Arc::new(probe.clone()),
    );
    Harness {
        recorder,
        spawner,
        probe,
        sources,
    }
}

/// Poll `check` until it holds or `timeout` passes
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
