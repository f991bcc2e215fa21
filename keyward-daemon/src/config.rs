use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use keyward_sync::EngineConfig;

pub const DEFAULT_WATCH_DIR: &str = "/etc/rabbitmq/secrets";
pub const DEFAULT_ADMIN_FILE: &str = "/var/lib/rabbitmq/.rabbitmqadmin.conf";
pub const DEFAULT_MANAGEMENT_URI: &str = "http://127.0.0.1:15672";
pub const DEFAULT_CA_FILE: &str = "/etc/rabbitmq-tls/ca.crt";

/// Everything the daemon needs to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    /// Directory of `user_<id>_{username,password,tag}` files.
    pub watch_dir: PathBuf,
    /// INI file read by the `rabbitmqadmin` CLI.
    pub admin_file: PathBuf,
    pub management_uri: String,
    /// Trust anchor for `https` management URIs.
    pub ca_file: PathBuf,
}

impl DaemonConfig {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            watch_dir: self.watch_dir.clone(),
            admin_file: self.admin_file.clone(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            watch_dir: PathBuf::from(DEFAULT_WATCH_DIR),
            admin_file: PathBuf::from(DEFAULT_ADMIN_FILE),
            management_uri: DEFAULT_MANAGEMENT_URI.to_owned(),
            ca_file: PathBuf::from(DEFAULT_CA_FILE),
        }
    }
}

/// Log line encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}'; expected: text, json")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}
