use std::{io, path::PathBuf};

use crate::scheduler::cron::CronError;

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("recording {0} already exists")]
    AlreadyActive(String),
    #[error("stream {stream} is already being recorded by {id}")]
    StreamBusy { stream: String, id: String },
    #[error("recording {0} not found")]
    NotFound(String),
    #[error("failed to create encoder process for {id}: {reason}")]
    ProcessCreationFailed { id: String, reason: String },
    #[error("no source available for stream {0}")]
    SourceUnavailable(String),
    #[error("invalid schedule: {0}")]
    InvalidSchedule(#[from] CronError),
    #[error("filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to stop encoder for {id}: {reason}")]
    StopFailed { id: String, reason: String },
    #[error(transparent)]
    Internal(anyhow::Error),
}

impl RecordError {
    pub fn already_active<T>(t: T) -> Self
    where
        T: ToString,
    {
        RecordError::AlreadyActive(t.to_string())
    }

    pub fn not_found<T>(t: T) -> Self
    where
        T: ToString,
    {
        RecordError::NotFound(t.to_string())
    }

    pub fn stream_busy<S, T>(stream: S, id: T) -> Self
    where
        S: ToString,
        T: ToString,
    {
        RecordError::StreamBusy {
            stream: stream.to_string(),
            id: id.to_string(),
        }
    }

    pub fn source_unavailable<T>(t: T) -> Self
    where
        T: ToString,
    {
        RecordError::SourceUnavailable(t.to_string())
    }

    pub fn process_creation_failed<T, R>(id: T, reason: R) -> Self
    where
        T: ToString,
        R: ToString,
    {
        RecordError::ProcessCreationFailed {
            id: id.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn filesystem(path: impl Into<PathBuf>, source: io::Error) -> Self {
        RecordError::Filesystem {
            path: path.into(),
            source,
        }
    }
}

impl From<anyhow::Error> for RecordError {
    fn from(err: anyhow::Error) -> Self {
        RecordError::Internal(err)
    }
}
