use std::{collections::BTreeMap, env, fs, path::PathBuf, str::FromStr, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::scheduler::cron::CronSchedule;

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub log: Log,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub encoder: Encoder,
    #[serde(default)]
    pub gateway: Gateway,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Log {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    env::var("LOG_LEVEL").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug".to_string()
        } else {
            "info".to_string()
        }
    })
}

/// External encoder invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Encoder {
    #[serde(default = "default_encoder_program")]
    pub program: String,
    /// Extra arguments placed before `-i`, shell quoted
    #[serde(default)]
    pub input_args: String,
    /// Extra arguments placed before the output format, shell quoted
    #[serde(default)]
    pub output_args: String,
    #[serde(default = "default_spawn_timeout_ms")]
    pub spawn_timeout_ms: u64,
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

fn default_encoder_program() -> String {
    "ffmpeg".to_string()
}

fn default_spawn_timeout_ms() -> u64 {
    10_000
}

fn default_stop_timeout_ms() -> u64 {
    5_000
}

impl Default for Encoder {
    fn default() -> Self {
        Self {
            program: default_encoder_program(),
            input_args: String::new(),
            output_args: String::new(),
            spawn_timeout_ms: default_spawn_timeout_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}

impl Encoder {
    pub fn spawn_timeout(&self) -> Duration {
        Duration::from_millis(self.spawn_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gateway {
    /// Where the gateway re-exposes a stream; `{stream}` is replaced by the stream name
    #[serde(default = "default_internal_source")]
    pub internal_source: String,
}

fn default_internal_source() -> String {
    "rtsp://127.0.0.1:8554/{stream}".to_string()
}

impl Default for Gateway {
    fn default() -> Self {
        Self {
            internal_source: default_internal_source(),
        }
    }
}

/// A stream known to the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub stream_id: String,
    pub url: String,
}

impl SourceConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.stream_id.trim().is_empty() {
            anyhow::bail!("stream_id cannot be empty");
        }

        if self.url.trim().is_empty() {
            anyhow::bail!("url cannot be empty");
        }

        Ok(())
    }
}

/// Per-stream boolean override that remembers whether it was configured at all
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<bool>", into = "Option<bool>")]
pub enum Toggle {
    #[default]
    Unset,
    On,
    Off,
}

impl Toggle {
    pub fn resolve(self, default: bool) -> bool {
        match self {
            Toggle::Unset => default,
            Toggle::On => true,
            Toggle::Off => false,
        }
    }

    pub fn is_unset(&self) -> bool {
        *self == Toggle::Unset
    }
}

impl From<Option<bool>> for Toggle {
    fn from(value: Option<bool>) -> Self {
        match value {
            None => Toggle::Unset,
            Some(true) => Toggle::On,
            Some(false) => Toggle::Off,
        }
    }
}

impl From<Toggle> for Option<bool> {
    fn from(value: Toggle) -> Self {
        match value {
            Toggle::Unset => None,
            Toggle::On => Some(true),
            Toggle::Off => Some(false),
        }
    }
}

/// Global recording defaults. Durations are in seconds, sizes in MB.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,
    #[serde(default = "default_path_template")]
    pub path_template: String,
    #[serde(default = "default_filename_template")]
    pub filename_template: String,
    #[serde(default = "default_format")]
    pub default_format: String,
    #[serde(default = "default_true")]
    pub create_directories: bool,

    #[serde(default = "default_segment_duration")]
    pub segment_duration: u64,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_true")]
    pub enable_segments: bool,
    #[serde(default = "default_segment_check_interval")]
    pub segment_check_interval: u64,

    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
    #[serde(default)]
    pub retention_hours: u64,
    /// Per stream, 0 keeps everything
    #[serde(default = "default_max_recordings")]
    pub max_recordings: usize,
    /// Across all streams, 0 disables the cap
    #[serde(default = "default_max_total_size")]
    pub max_total_size: u64,
    #[serde(default = "default_true")]
    pub enable_cleanup: bool,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
    /// Files modified this recently are never evicted
    #[serde(default = "default_cleanup_grace")]
    pub cleanup_grace: u64,
    #[serde(default)]
    pub move_to_archive: bool,
    #[serde(default = "default_archive_path")]
    pub archive_path: PathBuf,

    #[serde(default)]
    pub auto_start: bool,
    #[serde(default = "default_auto_record_check_interval")]
    pub auto_record_check_interval: u64,
    #[serde(default = "default_auto_record_startup_delay")]
    pub auto_record_startup_delay: u64,
    #[serde(default = "default_auto_record_stagger_ms")]
    pub auto_record_stagger_ms: u64,
    #[serde(default = "default_true")]
    pub restart_on_error: bool,

    #[serde(default = "default_scheduler_tick")]
    pub scheduler_tick: u64,
    #[serde(default = "default_schedule_duration")]
    pub default_schedule_duration: u64,

    /// Camera URL template used instead of the gateway, `{stream}` is substituted
    #[serde(default)]
    pub direct_source: Option<String>,
    #[serde(default = "default_codec")]
    pub default_video: String,
    #[serde(default = "default_codec")]
    pub default_audio: String,

    #[serde(default)]
    pub streams: BTreeMap<String, StreamRecordingConfig>,
}

fn default_true() -> bool {
    true
}

fn default_base_path() -> PathBuf {
    PathBuf::from("recordings")
}

fn default_path_template() -> String {
    "{year}/{month}/{day}/{stream}".to_string()
}

fn default_filename_template() -> String {
    "{stream}_{timestamp}".to_string()
}

fn default_format() -> String {
    "mp4".to_string()
}

fn default_segment_duration() -> u64 {
    600
}

fn default_max_file_size() -> u64 {
    1024
}

fn default_segment_check_interval() -> u64 {
    30
}

fn default_retention_days() -> u64 {
    7
}

fn default_max_recordings() -> usize {
    100
}

fn default_max_total_size() -> u64 {
    10_240
}

fn default_cleanup_interval() -> u64 {
    3600
}

fn default_cleanup_grace() -> u64 {
    120
}

fn default_archive_path() -> PathBuf {
    PathBuf::from("archive")
}

fn default_auto_record_check_interval() -> u64 {
    10
}

fn default_auto_record_startup_delay() -> u64 {
    15
}

fn default_auto_record_stagger_ms() -> u64 {
    200
}

fn default_scheduler_tick() -> u64 {
    30
}

fn default_schedule_duration() -> u64 {
    3600
}

fn default_codec() -> String {
    "copy".to_string()
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            path_template: default_path_template(),
            filename_template: default_filename_template(),
            default_format: default_format(),
            create_directories: true,
            segment_duration: default_segment_duration(),
            max_file_size: default_max_file_size(),
            enable_segments: true,
            segment_check_interval: default_segment_check_interval(),
            retention_days: default_retention_days(),
            retention_hours: 0,
            max_recordings: default_max_recordings(),
            max_total_size: default_max_total_size(),
            enable_cleanup: true,
            cleanup_interval: default_cleanup_interval(),
            cleanup_grace: default_cleanup_grace(),
            move_to_archive: false,
            archive_path: default_archive_path(),
            auto_start: false,
            auto_record_check_interval: default_auto_record_check_interval(),
            auto_record_startup_delay: default_auto_record_startup_delay(),
            auto_record_stagger_ms: default_auto_record_stagger_ms(),
            restart_on_error: true,
            scheduler_tick: default_scheduler_tick(),
            default_schedule_duration: default_schedule_duration(),
            direct_source: None,
            default_video: default_codec(),
            default_audio: default_codec(),
            streams: BTreeMap::new(),
        }
    }
}

/// Overrides for a single stream. Anything left out falls back to [`RecordingConfig`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamRecordingConfig {
    #[serde(default, skip_serializing_if = "Toggle::is_unset")]
    pub enabled: Toggle,
    /// Direct source URL for this stream
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub path_template: Option<String>,
    #[serde(default)]
    pub filename_template: Option<String>,
    #[serde(default)]
    pub format: Option<String>,

    #[serde(default)]
    pub segment_duration: Option<u64>,
    #[serde(default)]
    pub max_file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Toggle::is_unset")]
    pub enable_segments: Toggle,

    #[serde(default)]
    pub retention_days: Option<u64>,
    #[serde(default)]
    pub retention_hours: Option<u64>,
    #[serde(default)]
    pub max_recordings: Option<usize>,

    #[serde(default)]
    pub video: Option<String>,
    #[serde(default)]
    pub audio: Option<String>,
    /// Passed to the encoder as `-b:v` when video is re-encoded
    #[serde(default)]
    pub bitrate_limit: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub framerate: Option<u32>,

    #[serde(default, skip_serializing_if = "Toggle::is_unset")]
    pub restart_on_error: Toggle,

    /// Five field cron expression
    #[serde(default)]
    pub schedule: Option<String>,
    /// Seconds recorded per schedule trigger
    #[serde(default)]
    pub schedule_duration: Option<u64>,
}

/// Settings for one stream after merging its overrides over the global defaults
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveStreamConfig {
    pub stream: String,
    pub enabled: bool,
    /// Direct source, when one is configured for this stream or globally
    pub source: Option<String>,
    pub path_template: String,
    pub filename_template: String,
    pub format: String,
    pub segment_duration: Duration,
    pub max_file_size_mb: u64,
    pub enable_segments: bool,
    pub retention: Duration,
    /// 0 keeps everything
    pub max_recordings: usize,
    pub video: String,
    pub audio: String,
    pub bitrate_limit: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub framerate: Option<u32>,
    pub restart_on_error: bool,
    pub schedule: Option<String>,
    pub schedule_duration: Duration,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn retention_of(hours: u64, days: u64) -> Option<Duration> {
    if hours > 0 {
        Some(Duration::from_secs(hours * 3600))
    } else if days > 0 {
        Some(Duration::from_secs(days * 24 * 3600))
    } else {
        None
    }
}

impl RecordingConfig {
    /// Hours win over days; a week when neither is set
    pub fn retention(&self) -> Duration {
        retention_of(self.retention_hours, self.retention_days)
            .unwrap_or(Duration::from_secs(7 * 24 * 3600))
    }

    pub fn segment_check_interval(&self) -> Duration {
        Duration::from_secs(self.segment_check_interval.max(1))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval)
    }

    pub fn cleanup_grace(&self) -> Duration {
        Duration::from_secs(self.cleanup_grace)
    }

    pub fn auto_record_check_interval(&self) -> Duration {
        Duration::from_secs(self.auto_record_check_interval.max(1))
    }

    pub fn auto_record_startup_delay(&self) -> Duration {
        Duration::from_secs(self.auto_record_startup_delay)
    }

    pub fn auto_record_stagger(&self) -> Duration {
        Duration::from_millis(self.auto_record_stagger_ms)
    }

    pub fn scheduler_tick(&self) -> Duration {
        Duration::from_secs(self.scheduler_tick.max(1))
    }

    /// Archive root; relative paths live under `base_path`
    pub fn archive_root(&self) -> PathBuf {
        if self.archive_path.is_absolute() {
            self.archive_path.clone()
        } else {
            self.base_path.join(&self.archive_path)
        }
    }

    /// Directory holding the liveness leases of running encoders
    pub fn lease_dir(&self) -> PathBuf {
        self.base_path.join(".leases")
    }

    /// Direct source for `stream`: its own URL first, then the global template
    pub fn direct_source(&self, stream: &str) -> Option<String> {
        if let Some(source) = self.streams.get(stream).and_then(|s| non_empty(&s.source)) {
            return Some(source.to_string());
        }
        non_empty(&self.direct_source).map(|template| template.replace("{stream}", stream))
    }

    /// Merge overrides for `stream` over the global defaults (stream > global).
    pub fn resolve(&self, stream: &str) -> EffectiveStreamConfig {
        let overrides = self.streams.get(stream);
        let default = StreamRecordingConfig::default();
        let s = overrides.unwrap_or(&default);

        let enabled = match overrides {
            Some(s) => s.enabled.resolve(true),
            None => self.auto_start && self.streams.is_empty(),
        };

        let retention = retention_of(
            s.retention_hours.unwrap_or(0),
            s.retention_days.unwrap_or(0),
        )
        .unwrap_or_else(|| self.retention());

        let segment_duration =
            Duration::from_secs(s.segment_duration.filter(|d| *d > 0).unwrap_or(self.segment_duration));

        let schedule_duration = s
            .schedule_duration
            .or(s.segment_duration)
            .filter(|d| *d > 0)
            .unwrap_or(self.default_schedule_duration);

        EffectiveStreamConfig {
            stream: stream.to_string(),
            enabled,
            source: self.direct_source(stream),
            path_template: non_empty(&s.path_template)
                .unwrap_or(self.path_template.as_str())
                .to_string(),
            filename_template: non_empty(&s.filename_template)
                .unwrap_or(self.filename_template.as_str())
                .to_string(),
            format: non_empty(&s.format)
                .unwrap_or(self.default_format.as_str())
                .to_string(),
            segment_duration,
            max_file_size_mb: s
                .max_file_size
                .filter(|m| *m > 0)
                .unwrap_or(self.max_file_size),
            enable_segments: s.enable_segments.resolve(self.enable_segments),
            retention,
            max_recordings: s.max_recordings.unwrap_or(self.max_recordings),
            video: non_empty(&s.video).unwrap_or(self.default_video.as_str()).to_string(),
            audio: non_empty(&s.audio).unwrap_or(self.default_audio.as_str()).to_string(),
            bitrate_limit: non_empty(&s.bitrate_limit).map(str::to_string),
            width: s.width.filter(|w| *w > 0),
            height: s.height.filter(|h| *h > 0),
            framerate: s.framerate.filter(|f| *f > 0),
            restart_on_error: s.restart_on_error.resolve(self.restart_on_error),
            schedule: non_empty(&s.schedule).map(str::to_string),
            schedule_duration: Duration::from_secs(schedule_duration),
        }
    }

    /// Streams the auto recorder should keep recording.
    ///
    /// With per-stream configuration present, exactly the enabled configured streams.
    /// Without it, every known stream when `auto_start` is on, and nothing otherwise.
    pub fn target_streams(&self, known: &[String]) -> Vec<String> {
        if !self.streams.is_empty() {
            return self
                .streams
                .iter()
                .filter(|(_, s)| s.enabled.resolve(true))
                .map(|(name, _)| name.clone())
                .collect();
        }
        if self.auto_start {
            return known.to_vec();
        }
        vec![]
    }

    fn normalize(&mut self) {
        if self.retention_hours > 0 && self.retention_days > 0 {
            warn!(
                "[config] both retention_hours ({}) and retention_days ({}) set, using hours",
                self.retention_hours, self.retention_days
            );
            self.retention_days = 0;
        }

        if self.enable_cleanup && self.cleanup_interval < 60 {
            warn!(
                "[config] cleanup_interval {}s too short, using 60s",
                self.cleanup_interval
            );
            self.cleanup_interval = 60;
        }

        if self.enable_segments && self.segment_duration < 60 {
            warn!(
                "[config] segment_duration {}s too short, using 60s",
                self.segment_duration
            );
            self.segment_duration = 60;
        }

        if self.path_template.trim().is_empty() {
            self.path_template = "{stream}".to_string();
        }
        if self.filename_template.trim().is_empty() {
            self.filename_template = default_filename_template();
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.default_format.trim().is_empty() {
            anyhow::bail!("recording.default_format cannot be empty");
        }

        if !storage::validate_path(&self.path_template) {
            anyhow::bail!(
                "recording.path_template must be a relative path: {}",
                self.path_template
            );
        }

        for (stream, s) in self.streams.iter() {
            if non_empty(&s.path_template).is_some_and(|t| !storage::validate_path(t)) {
                anyhow::bail!("stream {stream}: path_template must be a relative path");
            }
            if let Some(expr) = non_empty(&s.schedule) {
                CronSchedule::from_str(expr)
                    .map_err(|e| anyhow::anyhow!("stream {stream}: invalid schedule: {e}"))?;
            }
        }

        Ok(())
    }
}

impl Config {
    pub fn parse(path: Option<String>) -> anyhow::Result<Self> {
        let result = fs::read_to_string(path.unwrap_or(String::from("liverec.toml")))
            .or(fs::read_to_string("/etc/liverec/liverec.toml"))
            .unwrap_or_default();
        let mut cfg: Self = toml::from_str(result.as_str()).context("config parse error")?;
        cfg.validate().context("config validate")?;
        Ok(cfg)
    }

    pub fn validate(&mut self) -> anyhow::Result<()> {
        self.recording.normalize();
        self.recording.validate()?;

        for source in &self.sources {
            source
                .validate()
                .map_err(|e| anyhow::anyhow!("source {}: {}", source.stream_id, e))?;
        }

        if self.encoder.program.trim().is_empty() {
            anyhow::bail!("encoder.program cannot be empty");
        }
        shellwords::split(&self.encoder.input_args)
            .map_err(|e| anyhow::anyhow!("encoder.input_args: {e}"))?;
        shellwords::split(&self.encoder.output_args)
            .map_err(|e| anyhow::anyhow!("encoder.output_args: {e}"))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_file() {
        let mut cfg: Config = toml::from_str("").unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.recording.base_path, PathBuf::from("recordings"));
        assert_eq!(cfg.recording.segment_duration, 600);
        assert_eq!(cfg.recording.retention(), Duration::from_secs(7 * 24 * 3600));
        assert_eq!(cfg.encoder.spawn_timeout(), Duration::from_secs(10));
        assert!(cfg.recording.enable_cleanup);
    }

    #[test]
    fn test_toggle_is_tristate() {
        let cfg: RecordingConfig = toml::from_str(
            r#"
            [streams.a]
            enabled = false

            [streams.b]
            enabled = true

            [streams.c]
            format = "mkv"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.streams["a"].enabled, Toggle::Off);
        assert_eq!(cfg.streams["b"].enabled, Toggle::On);
        assert_eq!(cfg.streams["c"].enabled, Toggle::Unset);
        assert_eq!(cfg.target_streams(&[]), vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_resolve_precedence() {
        let cfg: RecordingConfig = toml::from_str(
            r#"
            default_video = "h264"
            enable_segments = true
            direct_source = "rtsp://camera/{stream}"

            [streams.cam1]
            video = "copy"
            enable_segments = false
            segment_duration = 120
            retention_hours = 12
            source = "rtsp://10.0.0.9/main"

            [streams.cam2]
            video = ""
            "#,
        )
        .unwrap();

        let cam1 = cfg.resolve("cam1");
        assert!(cam1.enabled);
        assert_eq!(cam1.video, "copy");
        assert!(!cam1.enable_segments);
        assert_eq!(cam1.segment_duration, Duration::from_secs(120));
        assert_eq!(cam1.schedule_duration, Duration::from_secs(120));
        assert_eq!(cam1.retention, Duration::from_secs(12 * 3600));
        assert_eq!(cam1.source.as_deref(), Some("rtsp://10.0.0.9/main"));

        let cam2 = cfg.resolve("cam2");
        assert_eq!(cam2.video, "h264");
        assert!(cam2.enable_segments);
        assert_eq!(cam2.retention, cfg.retention());
        assert_eq!(cam2.source.as_deref(), Some("rtsp://camera/cam2"));
    }

    #[test]
    fn test_target_streams_modes() {
        let known = vec!["x".to_string(), "y".to_string()];

        let mut cfg = RecordingConfig::default();
        assert!(cfg.target_streams(&known).is_empty());

        cfg.auto_start = true;
        assert_eq!(cfg.target_streams(&known), known);
        assert!(cfg.resolve("x").enabled);

        cfg.streams.insert(
            "z".to_string(),
            StreamRecordingConfig {
                enabled: Toggle::Off,
                ..Default::default()
            },
        );
        assert!(cfg.target_streams(&known).is_empty());
        assert!(!cfg.resolve("x").enabled);
    }

    #[test]
    fn test_normalize() {
        let mut cfg: Config = toml::from_str(
            r#"
            [recording]
            retention_days = 3
            retention_hours = 6
            cleanup_interval = 5
            segment_duration = 10
            path_template = ""
            "#,
        )
        .unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.recording.retention_days, 0);
        assert_eq!(cfg.recording.retention(), Duration::from_secs(6 * 3600));
        assert_eq!(cfg.recording.cleanup_interval, 60);
        assert_eq!(cfg.recording.segment_duration, 60);
        assert_eq!(cfg.recording.path_template, "{stream}");
    }

    #[test]
    fn test_validate_rejects_bad_schedule() {
        let mut cfg: Config = toml::from_str(
            r#"
            [recording.streams.cam]
            schedule = "61 * * * *"
            "#,
        )
        .unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_sources() {
        let mut cfg: Config = toml::from_str(
            r#"
            [[sources]]
            stream_id = "cam"
            url = ""
            "#,
        )
        .unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_archive_root() {
        let mut cfg = RecordingConfig::default();
        assert_eq!(cfg.archive_root(), PathBuf::from("recordings/archive"));
        cfg.archive_path = PathBuf::from("/mnt/cold");
        assert_eq!(cfg.archive_root(), PathBuf::from("/mnt/cold"));
    }
}
