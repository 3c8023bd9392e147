//! The external encoder: how it is invoked, spawned and probed.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;

mod command;
mod process;

pub use command::build_command;
pub use process::CommandSpawner;

/// A fully built encoder invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Stream being recorded
    pub stream: String,
    /// File the encoder writes
    pub output: PathBuf,
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg.replace('\'', r"'\''"))?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// A running encoder owned by exactly one recording job
#[async_trait]
pub trait EncoderProcess: Send + Sync {
    fn pid(&self) -> Option<u32>;

    /// Non-blocking check whether the process has terminated on its own
    fn has_exited(&mut self) -> bool;

    async fn stop(&mut self) -> anyhow::Result<()>;
}

#[async_trait]
pub trait Spawner: Send + Sync {
    async fn spawn(&self, spec: &CommandSpec) -> anyhow::Result<Box<dyn EncoderProcess>>;
}

/// Liveness of encoders independent of in-memory job state
#[async_trait]
pub trait EncoderProbe: Send + Sync {
    async fn is_running(&self, stream: &str) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_quotes_arguments() {
        let spec = CommandSpec {
            program: "ffmpeg".to_string(),
            args: vec![
                "-i".to_string(),
                "rtsp://h/cam".to_string(),
                "-y".to_string(),
                "/data/my cam.mp4".to_string(),
            ],
            stream: "cam".to_string(),
            output: PathBuf::from("/data/my cam.mp4"),
        };
        assert_eq!(
            spec.to_string(),
            "ffmpeg -i rtsp://h/cam -y '/data/my cam.mp4'"
        );
    }
}
