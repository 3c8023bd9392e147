use crate::config::{EffectiveStreamConfig, Encoder};
use crate::recorder::RecordConfig;

use super::CommandSpec;

const COPY: &str = "copy";
const NONE: &str = "none";

fn video_preset(name: &str) -> Option<&'static [&'static str]> {
    let args: &'static [&'static str] = match name {
        "h264" => &[
            "-c:v", "libx264", "-g", "50", "-profile:v", "high", "-level:v", "4.1",
            "-preset:v", "superfast", "-tune:v", "zerolatency", "-pix_fmt:v", "yuv420p",
        ],
        "h265" => &[
            "-c:v", "libx265", "-g", "50", "-profile:v", "main", "-level:v", "5.1",
            "-preset:v", "superfast", "-tune:v", "zerolatency",
        ],
        "mjpeg" => &["-c:v", "mjpeg", "-pix_fmt:v", "yuvj420p"],
        NONE => &["-vn"],
        _ => return None,
    };
    Some(args)
}

fn audio_preset(name: &str) -> Option<&'static [&'static str]> {
    let args: &'static [&'static str] = match name {
        "aac" => &["-c:a", "aac"],
        "opus" => &["-c:a", "libopus", "-application:a", "lowdelay"],
        "pcmu" => &["-c:a", "pcm_mulaw", "-ar:a", "8000", "-ac:a", "1"],
        "pcma" => &["-c:a", "pcm_alaw", "-ar:a", "8000", "-ac:a", "1"],
        NONE => &["-an"],
        _ => return None,
    };
    Some(args)
}

fn codec_args(mode: &str, flag: &str, preset: fn(&str) -> Option<&'static [&'static str]>) -> Vec<String> {
    match preset(mode) {
        Some(args) => args.iter().map(|a| a.to_string()).collect(),
        None => vec![flag.to_string(), mode.to_string()],
    }
}

fn split_args(args: &str) -> Vec<String> {
    // validated when the config is loaded
    shellwords::split(args).unwrap_or_default()
}

/// Encoder command line that records `source` into `job.output`.
///
/// Scaling, frame rate and bitrate only apply when video is re-encoded.
pub fn build_command(
    encoder: &Encoder,
    source: &str,
    job: &RecordConfig,
    stream: &EffectiveStreamConfig,
) -> CommandSpec {
    let mut args = split_args(&encoder.input_args);
    args.extend(["-i".to_string(), source.to_string()]);

    args.extend(codec_args(&job.video, "-c:v", video_preset));
    args.extend(codec_args(&job.audio, "-c:a", audio_preset));

    if job.video != COPY && job.video != NONE {
        if let Some(bitrate) = &stream.bitrate_limit {
            args.extend(["-b:v".to_string(), bitrate.clone()]);
        }
        let scale = match (stream.width, stream.height) {
            (Some(w), Some(h)) => Some(format!("scale={w}:{h}")),
            (Some(w), None) => Some(format!("scale={w}:-2")),
            (None, Some(h)) => Some(format!("scale=-2:{h}")),
            (None, None) => None,
        };
        if let Some(scale) = scale {
            args.extend(["-vf".to_string(), scale]);
        }
        if let Some(fps) = stream.framerate {
            args.extend(["-r".to_string(), fps.to_string()]);
        }
    }

    args.extend(split_args(&encoder.output_args));
    args.extend([
        "-f".to_string(),
        job.format.clone(),
        "-y".to_string(),
        job.output.to_string_lossy().into_owned(),
    ]);

    CommandSpec {
        program: encoder.program.clone(),
        args,
        stream: stream.stream.clone(),
        output: job.output.clone(),
    }
}
