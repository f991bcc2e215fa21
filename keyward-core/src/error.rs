//! Error types for keyward-core.

use std::path::PathBuf;

use thiserror::Error;

/// Malformed or incomplete on-disk credentials.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The watch directory itself could not be listed.
    #[error("failed to read credential directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No fragment for the admin account exists at all.
    #[error("no admin credentials found in {path}")]
    MissingAdmin { path: PathBuf },

    /// The admin account is missing its username or password fragment.
    #[error("incomplete admin credentials in {path}: missing username or password")]
    IncompleteAdmin { path: PathBuf },
}
