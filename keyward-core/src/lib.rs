//! Keyward core library: credential types, the on-disk credential store
//! loader, and configuration errors.
//!
//! - [`types`]: account ids and credential records
//! - [`error`]: [`ConfigError`]
//! - [`loader`]: assemble per-account records from a fragment directory

pub mod error;
pub mod loader;
pub mod types;

pub use error::ConfigError;
pub use types::{AccountCredential, AccountId, CredentialMap, ADMIN_ACCOUNT_ID};
