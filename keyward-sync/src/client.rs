//! Remote account client capability.
//!
//! The engine talks to the account registry only through [`AccountClient`].
//! Credentials used to authenticate requests live on the client instance and
//! are read before every call, so two instances can hold different
//! credentials at the same time.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hashing scheme for accounts that do not exist yet.
pub const DEFAULT_HASHING_ALGORITHM: &str = "rabbit_password_hashing_sha256";

/// Resource scope (virtual host) new accounts are granted access to.
pub const DEFAULT_SCOPE: &str = "/";

/// HTTP verb of a failed request, kept for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Put => write!(f, "PUT"),
        }
    }
}

/// Failures reported by an [`AccountClient`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// The remote service rejected the configured credentials (401).
    #[error("{method} {path}: API responded with 401 Unauthorized")]
    Unauthorized { method: Method, path: String },

    /// The requested object does not exist (404).
    #[error("{method} {path}: object not found")]
    NotFound { method: Method, path: String },

    /// Any other non-success status.
    #[error("{method} {path}: API responded with status {status}: {body}")]
    Status {
        method: Method,
        path: String,
        status: u16,
        body: String,
    },

    /// The request never produced a response.
    #[error("{method} {path}: transport error: {message}")]
    Transport {
        method: Method,
        path: String,
        message: String,
    },
}

impl ClientError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ClientError::Unauthorized { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound { .. })
    }
}

/// Account as reported by the remote service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AccountInfo {
    pub name: String,
    #[serde(default)]
    pub hashing_algorithm: String,
    #[serde(default)]
    pub tags: Tags,
}

/// Account tags; older servers report a comma-separated string, newer
/// ones a list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "TagsRepr")]
pub struct Tags(pub Vec<String>);

#[derive(Deserialize)]
#[serde(untagged)]
enum TagsRepr {
    List(Vec<String>),
    Joined(String),
}

impl From<TagsRepr> for Tags {
    fn from(repr: TagsRepr) -> Self {
        match repr {
            TagsRepr::List(tags) => Tags(tags),
            TagsRepr::Joined(joined) => Tags(
                joined
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_owned)
                    .collect(),
            ),
        }
    }
}

/// Body of an account upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountSettings {
    #[serde(skip_serializing)]
    pub name: String,
    #[serde(serialize_with = "join_tags")]
    pub tags: Vec<String>,
    pub password: String,
    pub hashing_algorithm: String,
}

// Every server version accepts the comma-joined form on writes.
fn join_tags<S: serde::Serializer>(tags: &[String], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&tags.join(","))
}

/// Permission set granted on a scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Permissions {
    pub configure: String,
    pub write: String,
    pub read: String,
}

impl Permissions {
    /// Configure, write and read everything in the scope.
    pub fn unrestricted() -> Self {
        Self {
            configure: ".*".to_owned(),
            write: ".*".to_owned(),
            read: ".*".to_owned(),
        }
    }
}

/// Identity the remote service authenticated a request as.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WhoAmI {
    pub name: String,
    #[serde(default)]
    pub tags: Tags,
}

/// Narrow capability over the remote account registry.
pub trait AccountClient: Send {
    fn fetch_account(&self, username: &str) -> Result<AccountInfo, ClientError>;

    fn upsert_account(&self, username: &str, settings: &AccountSettings)
        -> Result<(), ClientError>;

    fn grant_permissions(
        &self,
        scope: &str,
        username: &str,
        permissions: &Permissions,
    ) -> Result<(), ClientError>;

    /// Validate the currently configured credentials.
    fn who_am_i(&self) -> Result<WhoAmI, ClientError>;

    fn username(&self) -> &str;

    fn set_username(&mut self, username: &str);

    fn set_password(&mut self, password: &str);
}

/// Path of an account resource, used in diagnostics.
pub fn account_path(username: &str) -> String {
    format!("/api/users/{username}")
}
