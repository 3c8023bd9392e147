//! On-disk leases for running encoders.
//!
//! Every active job leaves `<base>/.leases/<id>.json` naming its encoder pid and output
//! file. After a restart the in-memory registry is empty, but the leases still tell which
//! encoders survived. A lease only counts while that pid is alive *and* is writing that
//! output, so a recycled pid never looks like a recording.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::encoder::EncoderProbe;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub id: String,
    pub stream: String,
    pub pid: u32,
    pub output: PathBuf,
    pub started_at: DateTime<Local>,
}

#[derive(Debug, Clone)]
pub struct LeaseStore {
    dir: PathBuf,
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    tmp.set_extension("json.tmp");
    tmp
}

impl LeaseStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", storage::sanitize_component(id)))
    }

    pub async fn write(&self, lease: &Lease) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("create {}", self.dir.display()))?;
        let path = self.path(&lease.id);
        let tmp_path = tmp_path_for(&path);
        let json = serde_json::to_vec_pretty(lease)?;
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .with_context(|| format!("rename {}", tmp_path.display()))?;
        debug!("[lease] wrote {} pid {}", lease.id, lease.pid);
        Ok(())
    }

    pub async fn remove(&self, id: &str) {
        let path = self.path(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!("[lease] removed {}", id),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("[lease] failed to remove {}: {}", path.display(), e),
        }
    }

    /// All readable leases. Blocking.
    pub fn read_all(&self) -> Vec<Lease> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return vec![];
        };
        entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|path| {
                let lease = fs::read(&path)
                    .ok()
                    .and_then(|bytes| serde_json::from_slice::<Lease>(&bytes).ok());
                if lease.is_none() {
                    warn!("[lease] ignoring unreadable lease {}", path.display());
                }
                lease
            })
            .collect()
    }

    /// Output files of encoders that are still running. Blocking.
    pub fn live_outputs(&self) -> HashSet<PathBuf> {
        self.read_all()
            .into_iter()
            .filter(is_alive)
            .map(|lease| lease.output)
            .collect()
    }
}

/// Whether the lease's pid is an encoder writing the lease's output file
#[cfg(target_os = "linux")]
pub fn is_alive(lease: &Lease) -> bool {
    let Ok(cmdline) = fs::read(format!("/proc/{}/cmdline", lease.pid)) else {
        return false;
    };
    let output = lease.output.to_string_lossy();
    cmdline
        .split(|b| *b == 0)
        .any(|arg| arg == output.as_bytes())
}

#[cfg(not(target_os = "linux"))]
pub fn is_alive(_lease: &Lease) -> bool {
    false
}

/// [`EncoderProbe`] backed by the lease directory. Stale leases are pruned while probing.
pub struct LeaseProbe {
    store: LeaseStore,
}

impl LeaseProbe {
    pub fn new(store: LeaseStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EncoderProbe for LeaseProbe {
    async fn is_running(&self, stream: &str) -> bool {
        let store = self.store.clone();
        let leases = match tokio::task::spawn_blocking(move || store.read_all()).await {
            Ok(leases) => leases,
            Err(e) => {
                warn!("[lease] probe failed: {}", e);
                return false;
            }
        };

        let mut running = false;
        for lease in leases.into_iter().filter(|l| l.stream == stream) {
            if is_alive(&lease) {
                debug!("[lease] {} still recording as pid {}", lease.id, lease.pid);
                running = true;
            } else {
                debug!("[lease] {} is stale", lease.id);
                self.store.remove(&lease.id).await;
            }
        }
        running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lease(id: &str, stream: &str, pid: u32, output: &str) -> Lease {
        Lease {
            id: id.to_string(),
            stream: stream.to_string(),
            pid,
            output: PathBuf::from(output),
            started_at: Local::now(),
        }
    }

    #[tokio::test]
    async fn test_write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = LeaseStore::new(dir.path().join(".leases"));
        let a = lease("auto_cam_1", "cam", 42, "/rec/cam.mp4");
        store.write(&a).await.unwrap();
        store.write(&lease("b", "other", 43, "/rec/o.mp4")).await.unwrap();

        let mut all = store.read_all();
        all.sort_by(|x, y| x.id.cmp(&y.id));
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], a);

        store.remove("auto_cam_1").await;
        store.remove("auto_cam_1").await;
        assert_eq!(store.read_all().len(), 1);
    }

    #[tokio::test]
    async fn test_probe_prunes_dead_leases() {
        let dir = tempfile::tempdir().unwrap();
        let store = LeaseStore::new(dir.path().to_path_buf());
        // pid 0 never has a /proc entry
        store.write(&lease("dead", "cam", 0, "/rec/cam.mp4")).await.unwrap();

        let probe = LeaseProbe::new(store.clone());
        assert!(!probe.is_running("cam").await);
        assert!(store.read_all().is_empty());
        assert!(store.live_outputs().is_empty());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_probe_requires_matching_output() {
        let dir = tempfile::tempdir().unwrap();
        let store = LeaseStore::new(dir.path().to_path_buf());
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();

        // the live pid is `sleep 30`, so only a lease naming `30` matches
        store.write(&lease("match", "cam", pid, "30")).await.unwrap();
        store.write(&lease("recycled", "lobby", pid, "/rec/lobby.mp4")).await.unwrap();

        let probe = LeaseProbe::new(store.clone());
        assert!(probe.is_running("cam").await);
        assert!(!probe.is_running("lobby").await);
        assert_eq!(store.live_outputs(), HashSet::from([PathBuf::from("30")]));

        child.kill().await.unwrap();
    }
}
