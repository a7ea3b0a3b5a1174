use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PressmillError {
    #[error("not initialized: run 'pressmill init'")]
    NotInitialized,

    #[error("invalid config: {0}")]
    Config(String),

    #[error("product portfolio is empty")]
    EmptyPortfolio,

    #[error("lock held by run {run_id} (pid {pid}) since {acquired_at}")]
    Locked {
        run_id: String,
        pid: u32,
        acquired_at: DateTime<Utc>,
    },

    #[error("lock for run {0} was reclaimed by another run before commit")]
    LockLost(String),

    #[error("state store is open in another process")]
    StoreBusy,

    #[error("state store error: {0}")]
    Store(String),

    #[error("post not found: {0}")]
    PostNotFound(String),

    #[error("invalid slug '{0}': must be lowercase alphanumeric with hyphens")]
    InvalidSlug(String),

    #[error("unknown status '{0}'; valid: published, failed, withdrawn")]
    InvalidStatus(String),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PressmillError>;

/// Failure of the text-generation step.
///
/// `Transient` failures are retried by the generator adapter; once retries
/// are exhausted they surface as `Permanent`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("transient generation failure: {0}")]
    Transient(String),

    #[error("permanent generation failure: {0}")]
    Permanent(String),
}

impl GenerationError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GenerationError::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            GenerationError::Transient(m) | GenerationError::Permanent(m) => m,
        }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to remove {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read template {path}: {source}")]
    Template {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to copy asset {path}: {source}")]
    Asset {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
