//! # keyward-sync
//!
//! Reconciliation of on-disk credentials against a remote account registry.
//!
//! Build an [`Engine`] from the watch directory and call
//! [`Engine::reconcile`] once per change notification. Remote calls go
//! through the [`AccountClient`] capability; the admin account is also
//! mirrored into a local INI file through [`AdminFile`].

pub mod admin_file;
pub mod client;
pub mod engine;
pub mod error;

pub use admin_file::{AdminFile, AdminFileSync};
pub use client::{AccountClient, AccountInfo, AccountSettings, ClientError, Permissions, WhoAmI};
pub use engine::{AccountOutcome, Engine, EngineConfig, PassReport};
pub use error::{ApplyError, PersistenceError, ReconcileError};
