//! `keyward watch`: the long-running reconciler.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;

use keyward_daemon::config::{
    DEFAULT_ADMIN_FILE, DEFAULT_CA_FILE, DEFAULT_MANAGEMENT_URI, DEFAULT_WATCH_DIR,
};
use keyward_daemon::{start_blocking, Completion, DaemonConfig, LogFormat};

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Directory holding `user_<id>_{username,password,tag}` files.
    #[arg(long, default_value = DEFAULT_WATCH_DIR)]
    pub watch_dir: PathBuf,

    /// rabbitmqadmin configuration file kept in step with the admin account.
    #[arg(long, default_value = DEFAULT_ADMIN_FILE)]
    pub admin_file: PathBuf,

    /// Base URI of the management API.
    #[arg(long, default_value = DEFAULT_MANAGEMENT_URI)]
    pub management_uri: String,

    /// CA bundle used to verify an https management URI.
    #[arg(long, default_value = DEFAULT_CA_FILE)]
    pub ca_file: PathBuf,

    /// Log output: text or json.
    #[arg(long, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl WatchArgs {
    pub fn run(self) -> Result<()> {
        let config = DaemonConfig {
            watch_dir: self.watch_dir,
            admin_file: self.admin_file,
            management_uri: self.management_uri,
            ca_file: self.ca_file,
        };

        match start_blocking(config, self.log_format).context("reconciler failed to start")? {
            Completion::Fatal(message) => bail!("reconciler stopped: {message}"),
            Completion::StreamClosed | Completion::Shutdown => Ok(()),
        }
    }
}
