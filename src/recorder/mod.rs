use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDateTime;

use crate::config::EffectiveStreamConfig;

pub mod lease;
mod manager;
mod recording;

pub use lease::{Lease, LeaseProbe, LeaseStore};
pub use manager::RecordingManager;
pub use recording::Recording;

/// Caller supplied settings for a new job. Anything left out comes from the stream config.
#[derive(Debug, Clone, Default)]
pub struct RecordOptions {
    pub output: Option<PathBuf>,
    pub format: Option<String>,
    /// Stop automatically after this long
    pub duration: Option<Duration>,
    pub video: Option<String>,
    pub audio: Option<String>,
}

/// Settings a job runs with, fixed when it starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordConfig {
    pub output: PathBuf,
    pub format: String,
    pub duration: Option<Duration>,
    pub video: String,
    pub audio: String,
}

impl RecordConfig {
    /// Fill in `options` from the stream's effective settings.
    ///
    /// The format is the requested one, else the one implied by the output extension,
    /// else the stream default. Without an output path one is generated from the
    /// stream's templates at `now`.
    pub fn resolve(
        options: &RecordOptions,
        stream: &EffectiveStreamConfig,
        base: &Path,
        now: &NaiveDateTime,
    ) -> Self {
        let format = options
            .format
            .clone()
            .filter(|f| !f.is_empty())
            .or_else(|| {
                options
                    .output
                    .as_deref()
                    .and_then(storage::format_from_extension)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| stream.format.clone());

        let output = options.output.clone().unwrap_or_else(|| {
            storage::recording_path(
                base,
                &stream.path_template,
                &stream.filename_template,
                &stream.stream,
                now,
                storage::extension_for_format(&format),
            )
        });

        Self {
            output,
            format,
            duration: options.duration.filter(|d| !d.is_zero()),
            video: options
                .video
                .clone()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| stream.video.clone()),
            audio: options
                .audio
                .clone()
                .filter(|a| !a.is_empty())
                .unwrap_or_else(|| stream.audio.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecordingConfig;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_generated_output() {
        let cfg = RecordingConfig::default();
        let job = RecordConfig::resolve(
            &RecordOptions::default(),
            &cfg.resolve("cam"),
            Path::new("/rec"),
            &now(),
        );
        assert_eq!(
            job.output,
            PathBuf::from("/rec/2024/06/01/cam/cam_2024-06-01_08-00-00.mp4")
        );
        assert_eq!(job.format, "mp4");
        assert_eq!(job.video, "copy");
        assert_eq!(job.duration, None);
    }

    #[test]
    fn test_format_from_output_extension() {
        let cfg = RecordingConfig::default();
        let options = RecordOptions {
            output: Some(PathBuf::from("/tmp/clip.mkv")),
            duration: Some(Duration::from_secs(30)),
            audio: Some("aac".to_string()),
            ..Default::default()
        };
        let job = RecordConfig::resolve(&options, &cfg.resolve("cam"), Path::new("/rec"), &now());
        assert_eq!(job.format, "matroska");
        assert_eq!(job.output, PathBuf::from("/tmp/clip.mkv"));
        assert_eq!(job.audio, "aac");
        assert_eq!(job.duration, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_generated_extension_follows_format() {
        let cfg = RecordingConfig::default();
        let options = RecordOptions {
            format: Some("mpegts".to_string()),
            ..Default::default()
        };
        let job = RecordConfig::resolve(&options, &cfg.resolve("cam"), Path::new("/rec"), &now());
        assert_eq!(job.output.extension().unwrap(), "ts");
    }
}
