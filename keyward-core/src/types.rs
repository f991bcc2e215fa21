//! Domain types for account credentials.
//!
//! A credential record is assembled from up to three fragment files that
//! share an account id. The same type describes both what is on disk now
//! (desired state) and what was last pushed to the remote service.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Account id of the distinguished admin account.
pub const ADMIN_ACCOUNT_ID: &str = "admin";

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Stable key of an account, taken from the fragment file names
/// (`user_<id>_<field>`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn admin() -> Self {
        Self(ADMIN_ACCOUNT_ID.to_owned())
    }

    pub fn is_admin(&self) -> bool {
        self.0 == ADMIN_ACCOUNT_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for AccountId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Credential record
// ---------------------------------------------------------------------------

/// Plain-text credentials of one account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AccountCredential {
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl AccountCredential {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        tag: Option<&str>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            tag: tag.map(str::to_owned),
        }
    }

    /// Both username and password are present.
    pub fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }

    /// Whether this record needs no remote write given the last-applied one.
    ///
    /// Only password and tag take part; a changed username alone does not
    /// make an account dirty. An incomplete last-applied record never
    /// matches.
    pub fn matches_applied(&self, applied: &AccountCredential) -> bool {
        applied.is_complete() && self.password == applied.password && self.tag == applied.tag
    }
}

/// Credentials keyed by account id, iterated in id order.
pub type CredentialMap = BTreeMap<AccountId, AccountCredential>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
