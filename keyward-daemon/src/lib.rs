//! Keyward daemon: directory watcher, single reconciliation worker, and the
//! HTTP adapter for the remote account registry.

pub mod config;
mod error;
pub mod http_client;
mod runtime;

pub use config::{DaemonConfig, LogFormat};
pub use error::DaemonError;
pub use http_client::HttpAccountClient;
pub use runtime::{init_tracing, run, start_blocking, Completion};
