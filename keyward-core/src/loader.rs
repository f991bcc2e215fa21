//! Credential store loader.
//!
//! # Directory layout
//!
//! ```text
//! <watch_dir>/
//!   user_admin_username     admin
//!   user_admin_password     s3cret
//!   user_admin_tag          administrator     (optional)
//!   user_<id>_username
//!   user_<id>_password
//!   user_<id>_tag
//! ```
//!
//! Every file holds a single field. Contents are trimmed; an empty tag file
//! clears the tag. The map is rebuilt from scratch on every call.

use std::path::Path;

use crate::error::ConfigError;
use crate::types::{AccountId, CredentialMap};

/// File name prefix shared by all credential fragments.
pub const USER_FILE_PREFIX: &str = "user_";

/// Which field of an account a fragment file carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Username,
    Password,
    Tag,
}

impl Field {
    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "username" => Some(Field::Username),
            "password" => Some(Field::Password),
            "tag" => Some(Field::Tag),
            _ => None,
        }
    }
}

/// Split `user_<id>_<field>` into its account id and field.
///
/// Returns `None` for names that do not follow the grammar.
pub fn parse_file_name(name: &str) -> Option<(AccountId, Field)> {
    let remainder = name.strip_prefix(USER_FILE_PREFIX)?;
    let (id, suffix) = remainder.split_once('_')?;
    if id.is_empty() {
        return None;
    }
    let field = Field::from_suffix(suffix)?;
    Some((AccountId::from(id), field))
}

/// Whether a changed path is a credential fragment worth a reconciliation pass.
pub fn is_credential_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with(USER_FILE_PREFIX))
        .unwrap_or(false)
}

/// Keep the entries that could be read; log and drop the rest.
fn readable_entries<T>(dir: &Path, entries: impl IntoIterator<Item = std::io::Result<T>>) -> Vec<T> {
    entries
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::error!("failed to read entry in {}: {err}", dir.display());
                None
            }
        })
        .collect()
}

/// Scan `dir` and assemble one credential record per account id.
///
/// Unreadable fragments and unrecognized names are logged and skipped.
/// Incomplete records are returned as-is, except for the admin account:
/// its absence or incompleteness fails the whole load.
pub fn load(dir: &Path) -> Result<CredentialMap, ConfigError> {
    let entries = std::fs::read_dir(dir).map_err(|source| ConfigError::ReadDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut entries = readable_entries(dir, entries);
    entries.sort_by_key(|e| e.file_name());

    let mut credentials = CredentialMap::new();
    for entry in entries {
        let fname = entry.file_name();
        let name = fname.to_string_lossy();
        if !name.starts_with(USER_FILE_PREFIX) {
            continue;
        }
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let Some((id, field)) = parse_file_name(&name) else {
            tracing::debug!("ignoring file with unexpected name format: {name}");
            continue;
        };

        // Follows symlinks, which is how mounted secret volumes expose files.
        let contents = match std::fs::read_to_string(entry.path()) {
            Ok(contents) => contents,
            Err(err) => {
                tracing::error!("failed to read credential file {}: {err}", entry.path().display());
                continue;
            }
        };
        let value = contents.trim();

        let record = credentials.entry(id).or_default();
        match field {
            Field::Username => record.username = value.to_owned(),
            Field::Password => record.password = value.to_owned(),
            Field::Tag => {
                record.tag = if value.is_empty() {
                    None
                } else {
                    Some(value.to_owned())
                }
            }
        }
    }

    if !credentials.contains_key(&AccountId::admin()) {
        return Err(ConfigError::MissingAdmin {
            path: dir.to_path_buf(),
        });
    }

    for (id, record) in &credentials {
        if record.is_complete() {
            tracing::trace!("loaded credentials for account {id} (username {})", record.username);
            continue;
        }
        if id.is_admin() {
            return Err(ConfigError::IncompleteAdmin {
                path: dir.to_path_buf(),
            });
        }
        tracing::debug!(
            "incomplete credentials for account {id}: has_username={} has_password={}",
            !record.username.is_empty(),
            !record.password.is_empty(),
        );
    }

    Ok(credentials)
}

/// Account ids whose records lack a username or password.
pub fn incomplete(credentials: &CredentialMap) -> Vec<AccountId> {
    credentials
        .iter()
        .filter(|(_, record)| !record.is_complete())
        .map(|(id, _)| id.clone())
        .collect()
}
