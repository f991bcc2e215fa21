//! Local admin record: the `rabbitmqadmin` INI file mirrored from the
//! last-applied admin credentials.
//!
//! Loads are loose (a missing file is an empty document) and writes merge
//! into whatever else the file holds, then land via `<path>.keyward.tmp`
//! + rename.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use ini::{EscapePolicy, Ini, ParseOption};

use keyward_core::AccountCredential;

use crate::error::{persist_io_err, PersistenceError};

/// Section holding the managed keys.
pub const ADMIN_FILE_SECTION: &str = "default";
const USERNAME_KEY: &str = "username";
const PASSWORD_KEY: &str = "password";

/// Outcome of [`AdminFile::sync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminFileSync {
    /// The file differed (or was missing) and has been rewritten.
    Written,
    /// The file already held the expected credentials.
    UpToDate,
}

/// Handle on the admin record file.
#[derive(Debug, Clone)]
pub struct AdminFile {
    path: PathBuf,
}

impl AdminFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file already holds `expected`'s username and password.
    pub fn check(&self, expected: &AccountCredential) -> Result<bool, PersistenceError> {
        let doc = self.load_loose()?;
        let Some(section) = doc.section(Some(ADMIN_FILE_SECTION)) else {
            return Ok(false);
        };
        let username = section.get(USERNAME_KEY).map(str::trim).unwrap_or_default();
        let password = section.get(PASSWORD_KEY).map(str::trim).unwrap_or_default();
        Ok(username == expected.username && password == expected.password)
    }

    /// Set the managed keys to `expected`, keeping everything else.
    pub fn write(&self, expected: &AccountCredential) -> Result<(), PersistenceError> {
        let mut doc = self.load_loose()?;
        doc.with_section(Some(ADMIN_FILE_SECTION))
            .set(USERNAME_KEY, expected.username.as_str())
            .set(PASSWORD_KEY, expected.password.as_str());

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| persist_io_err(parent, e))?;
            }
        }

        let tmp = PathBuf::from(format!("{}.keyward.tmp", self.path.display()));
        doc.write_to_file_policy(&tmp, EscapePolicy::Nothing)
            .map_err(|e| persist_io_err(&tmp, e))?;
        if let Err(e) = copy_permissions(&self.path, &tmp) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(persist_io_err(&self.path, e));
        }
        Ok(())
    }

    /// Write only when [`check`](Self::check) reports drift.
    pub fn sync(&self, expected: &AccountCredential) -> Result<AdminFileSync, PersistenceError> {
        if self.check(expected)? {
            return Ok(AdminFileSync::UpToDate);
        }
        self.write(expected)?;
        Ok(AdminFileSync::Written)
    }

    // Values are raw on both sides, like the configparser that reads the file.
    fn load_loose(&self) -> Result<Ini, PersistenceError> {
        let raw = ParseOption {
            enabled_quote: false,
            enabled_escape: false,
            ..ParseOption::default()
        };
        match Ini::load_from_file_opt(&self.path, raw) {
            Ok(doc) => Ok(doc),
            Err(ini::Error::Io(err)) if err.kind() == ErrorKind::NotFound => Ok(Ini::new()),
            Err(ini::Error::Io(err)) => Err(persist_io_err(&self.path, err)),
            Err(ini::Error::Parse(err)) => Err(PersistenceError::Parse {
                path: self.path.clone(),
                message: err.to_string(),
            }),
        }
    }
}

/// Give `tmp` the mode of the file it replaces, or `0600` for a new file.
#[cfg(unix)]
fn copy_permissions(target: &Path, tmp: &Path) -> Result<(), PersistenceError> {
    use std::os::unix::fs::PermissionsExt;

    let permissions = match std::fs::metadata(target) {
        Ok(meta) => meta.permissions(),
        Err(err) if err.kind() == ErrorKind::NotFound => std::fs::Permissions::from_mode(0o600),
        Err(err) => return Err(persist_io_err(target, err)),
    };
    std::fs::set_permissions(tmp, permissions).map_err(|e| persist_io_err(tmp, e))
}

#[cfg(not(unix))]
fn copy_permissions(_target: &Path, _tmp: &Path) -> Result<(), PersistenceError> {
    Ok(())
}
