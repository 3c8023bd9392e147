use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, Command};
use tracing::{debug, warn};

use super::{CommandSpec, EncoderProcess, Spawner};

/// Spawns the encoder as a child process
pub struct CommandSpawner {
    stop_timeout: Duration,
}

impl CommandSpawner {
    pub fn new(stop_timeout: Duration) -> Self {
        Self { stop_timeout }
    }
}

#[async_trait]
impl Spawner for CommandSpawner {
    async fn spawn(&self, spec: &CommandSpec) -> anyhow::Result<Box<dyn EncoderProcess>> {
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawn {}", spec.program))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(spec.stream.clone(), stderr));
        }

        Ok(Box::new(ChildProcess {
            child,
            stop_timeout: self.stop_timeout,
        }))
    }
}

async fn forward_stderr(stream: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("[encoder] {}: {}", stream, line);
    }
}

/// `q` makes the encoder flush and write the container trailer
async fn request_quit(stdin: &mut ChildStdin) -> std::io::Result<()> {
    stdin.write_all(b"q\n").await?;
    stdin.flush().await
}

struct ChildProcess {
    child: Child,
    stop_timeout: Duration,
}

#[async_trait]
impl EncoderProcess for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn has_exited(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(None))
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        if let Ok(Some(_)) = self.child.try_wait() {
            return Ok(());
        }

        // an encoder that closed stdin falls through to the kill below
        if let Some(mut stdin) = self.child.stdin.take() {
            if let Err(e) = request_quit(&mut stdin).await {
                debug!("[encoder] quit request failed: {}", e);
            }
        }

        match tokio::time::timeout(self.stop_timeout, self.child.wait()).await {
            Ok(status) => {
                let status = status.context("wait for encoder")?;
                debug!("[encoder] exited with {}", status);
                Ok(())
            }
            Err(_) => {
                warn!(
                    "[encoder] still running {:?} after quit request, killing",
                    self.stop_timeout
                );
                self.child.kill().await.context("kill encoder")
            }
        }
    }
}
