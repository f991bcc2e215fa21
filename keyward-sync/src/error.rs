//! Error types for keyward-sync.

use std::path::PathBuf;

use thiserror::Error;

use keyward_core::{AccountId, ConfigError};

use crate::client::ClientError;

/// Failure applying a single account; aborts the rest of the pass but is
/// retried on the next notification.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// A request failed with 401 and the identity check with the desired
    /// admin password failed as well.
    #[error("authentication failed for {username} after {cause}: {source}")]
    Authentication {
        username: String,
        cause: ClientError,
        #[source]
        source: ClientError,
    },

    /// The configured admin credentials no longer authenticate.
    #[error("failed to authenticate with current admin credentials as {username}: {source}")]
    AdminCredentials {
        username: String,
        #[source]
        source: ClientError,
    },

    /// Any other remote failure.
    #[error("remote call failed: {0}")]
    Remote(#[from] ClientError),

    /// The account was created but the default permission grant failed.
    #[error("failed to grant default permissions to {username}: {source}")]
    Permissions {
        username: String,
        #[source]
        source: ClientError,
    },
}

/// Fatal reconciliation failures. Everything else is reported per account
/// inside the pass report.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to load credential state: {0}")]
    Config(#[from] ConfigError),

    /// Last-applied state lost its admin entry.
    #[error("last-applied state has no entry for account {0}")]
    MissingState(AccountId),
}

/// Local admin record could not be read or written. Logged, never fatal.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse admin file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Convenience constructor for [`PersistenceError::Io`].
pub(crate) fn persist_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> PersistenceError {
    PersistenceError::Io {
        path: path.into(),
        source,
    }
}
