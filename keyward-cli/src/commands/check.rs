//! `keyward check`: offline view of the credential directory.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use keyward_core::{loader, AccountId, CredentialMap};
use keyward_daemon::config::{DEFAULT_ADMIN_FILE, DEFAULT_WATCH_DIR};
use keyward_sync::AdminFile;

#[derive(Args, Debug)]
pub struct CheckArgs {
    #[arg(long, default_value = DEFAULT_WATCH_DIR)]
    pub watch_dir: PathBuf,

    #[arg(long, default_value = DEFAULT_ADMIN_FILE)]
    pub admin_file: PathBuf,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl CheckArgs {
    pub fn run(self) -> Result<()> {
        let credentials = loader::load(&self.watch_dir).with_context(|| {
            format!(
                "credential directory {} is not usable",
                self.watch_dir.display()
            )
        })?;

        let admin_file = AdminFile::new(&self.admin_file);
        let admin_in_sync = match credentials.get(&AccountId::admin()) {
            Some(admin) => admin_file
                .check(admin)
                .with_context(|| format!("failed to read {}", self.admin_file.display()))?,
            None => false,
        };

        let report = CheckReport {
            watch_dir: self.watch_dir.display().to_string(),
            admin_file: AdminFileJson {
                path: self.admin_file.display().to_string(),
                in_sync: admin_in_sync,
            },
            accounts: account_rows(&credentials),
            incomplete: loader::incomplete(&credentials)
                .iter()
                .map(ToString::to_string)
                .collect(),
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize check JSON")?
            );
            return Ok(());
        }

        print_table(report);
        Ok(())
    }
}

#[derive(Serialize)]
struct CheckReport {
    watch_dir: String,
    admin_file: AdminFileJson,
    accounts: Vec<AccountJson>,
    incomplete: Vec<String>,
}

#[derive(Serialize)]
struct AdminFileJson {
    path: String,
    in_sync: bool,
}

#[derive(Serialize)]
struct AccountJson {
    id: String,
    username: String,
    tag: Option<String>,
    has_password: bool,
    complete: bool,
}

#[derive(Tabled)]
struct AccountTableRow {
    #[tabled(rename = "account")]
    id: String,
    #[tabled(rename = "username")]
    username: String,
    #[tabled(rename = "tag")]
    tag: String,
    #[tabled(rename = "password")]
    password: String,
    #[tabled(rename = "status")]
    status: String,
}

fn account_rows(credentials: &CredentialMap) -> Vec<AccountJson> {
    credentials
        .iter()
        .map(|(id, credential)| AccountJson {
            id: id.to_string(),
            username: credential.username.clone(),
            tag: credential.tag.clone(),
            has_password: !credential.password.is_empty(),
            complete: credential.is_complete(),
        })
        .collect()
}

fn print_table(report: CheckReport) {
    println!(
        "Keyward v{} | {} | {} accounts | {} incomplete",
        env!("CARGO_PKG_VERSION"),
        report.watch_dir,
        report.accounts.len(),
        report.incomplete.len(),
    );

    let rows: Vec<AccountTableRow> = report
        .accounts
        .into_iter()
        .map(|account| AccountTableRow {
            id: account.id,
            username: if account.username.is_empty() {
                "-".to_owned()
            } else {
                account.username
            },
            tag: account.tag.unwrap_or_else(|| "-".to_owned()),
            password: if account.has_password { "set" } else { "missing" }.to_owned(),
            status: if account.complete {
                "complete".green().to_string()
            } else {
                "incomplete".yellow().to_string()
            },
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    let admin_status = if report.admin_file.in_sync {
        "in sync".green()
    } else {
        "out of date".red()
    };
    println!("admin file {}: {admin_status}", report.admin_file.path);
}
