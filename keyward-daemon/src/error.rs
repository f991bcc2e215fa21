use std::path::PathBuf;

use thiserror::Error;

/// Error surface for daemon startup, the watcher, and the worker.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("reconciliation error: {0}")]
    Reconcile(#[from] keyward_sync::ReconcileError),

    #[error("invalid management URI {uri}: {message}")]
    InvalidUri { uri: String, message: String },

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("{task} task join failure: {message}")]
    Join { task: &'static str, message: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
