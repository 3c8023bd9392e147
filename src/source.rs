use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::{Config, SourceConfig};

/// A stream the gateway currently knows about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceHandle {
    pub stream: String,
    /// Upstream URL the gateway pulls from, when known
    pub url: Option<String>,
}

/// The gateway's stream registry
#[async_trait]
pub trait SourceRegistry: Send + Sync {
    async fn lookup(&self, stream: &str) -> Option<SourceHandle>;

    async fn stream_names(&self) -> Vec<String>;
}

/// In-memory registry, seeded from `[[sources]]`
#[derive(Clone, Default)]
pub struct SourceTable {
    streams: Arc<RwLock<BTreeMap<String, SourceHandle>>>,
}

impl SourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(sources: &[SourceConfig]) -> Self {
        let streams = sources
            .iter()
            .map(|s| {
                (
                    s.stream_id.clone(),
                    SourceHandle {
                        stream: s.stream_id.clone(),
                        url: Some(s.url.clone()),
                    },
                )
            })
            .collect();
        Self {
            streams: Arc::new(RwLock::new(streams)),
        }
    }

    pub async fn insert(&self, stream: &str, url: Option<String>) {
        let mut streams = self.streams.write().await;
        streams.insert(
            stream.to_string(),
            SourceHandle {
                stream: stream.to_string(),
                url,
            },
        );
        info!("[source] added {}", stream);
    }

    pub async fn remove(&self, stream: &str) -> bool {
        let removed = self.streams.write().await.remove(stream).is_some();
        if removed {
            info!("[source] removed {}", stream);
        }
        removed
    }
}

#[async_trait]
impl SourceRegistry for SourceTable {
    async fn lookup(&self, stream: &str) -> Option<SourceHandle> {
        self.streams.read().await.get(stream).cloned()
    }

    async fn stream_names(&self) -> Vec<String> {
        self.streams.read().await.keys().cloned().collect()
    }
}

/// Where the encoder reads a stream from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingSource {
    /// Straight from the camera, bypassing the gateway
    Direct(String),
    /// The gateway's own re-exposed copy of the stream
    Internal(String),
}

impl RecordingSource {
    pub fn url(&self) -> &str {
        match self {
            RecordingSource::Direct(url) | RecordingSource::Internal(url) => url,
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, RecordingSource::Internal(_))
    }
}

/// Per-stream source, then the global direct template, then the gateway.
pub fn resolve_source(cfg: &Config, stream: &str) -> RecordingSource {
    match cfg.recording.direct_source(stream) {
        Some(url) => RecordingSource::Direct(url),
        None => RecordingSource::Internal(cfg.gateway.internal_source.replace("{stream}", stream)),
    }
}
