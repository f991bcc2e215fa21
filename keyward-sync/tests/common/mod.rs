//! In-memory remote account registry shared by the engine tests.
//!
//! Requests authenticate against the simulated account table, so a client
//! holding a stale password gets a real `Unauthorized`.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use keyward_sync::client::{account_path, Method};
use keyward_sync::{
    AccountClient, AccountInfo, AccountSettings, ClientError, Engine, EngineConfig, Permissions,
    WhoAmI,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Fetch { username: String },
    Upsert { username: String, settings: AccountSettings },
    Grant { scope: String, username: String },
    WhoAmI,
}

/// One recorded request with the credentials it was sent with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub client: &'static str,
    pub auth_user: String,
    pub auth_password: String,
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAccount {
    pub password: String,
    pub hashing_algorithm: String,
    pub tags: Vec<String>,
}

/// Which request fires a scheduled out-of-band rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Fetch,
    Upsert,
}

/// Password change applied just before the next request of `trigger` kind
/// is authenticated, as if another replica won the race.
#[derive(Debug, Clone)]
pub struct Rotation {
    pub trigger: Trigger,
    pub account: String,
    pub password: String,
}

#[derive(Debug, Default)]
pub struct RemoteState {
    pub accounts: BTreeMap<String, RemoteAccount>,
    pub calls: Vec<Call>,
    pub failing_upserts: HashSet<String>,
    pub grants: Vec<(String, String, Permissions)>,
    pub pending_rotation: Option<Rotation>,
}

impl RemoteState {
    fn fire_rotation(&mut self, trigger: Trigger) {
        let due = matches!(&self.pending_rotation, Some(r) if r.trigger == trigger);
        if !due {
            return;
        }
        if let Some(rotation) = self.pending_rotation.take() {
            if let Some(account) = self.accounts.get_mut(&rotation.account) {
                account.password = rotation.password;
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct Remote(Arc<Mutex<RemoteState>>);

impl Remote {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard remote: `admin` and `default`, both on `pwd1`.
    pub fn standard() -> Self {
        let remote = Self::new();
        remote.add_account("admin", "pwd1", "adminalgo", &["administrator"]);
        remote.add_account("default", "pwd1", "myalgo", &["mytag"]);
        remote
    }

    pub fn state(&self) -> MutexGuard<'_, RemoteState> {
        self.0.lock().expect("remote state lock")
    }

    pub fn add_account(&self, name: &str, password: &str, hashing: &str, tags: &[&str]) {
        self.state().accounts.insert(
            name.to_owned(),
            RemoteAccount {
                password: password.to_owned(),
                hashing_algorithm: hashing.to_owned(),
                tags: tags.iter().map(|t| t.to_string()).collect(),
            },
        );
    }

    /// Rotate a password out-of-band, as another replica would.
    pub fn rotate(&self, name: &str, password: &str) {
        if let Some(account) = self.state().accounts.get_mut(name) {
            account.password = password.to_owned();
        }
    }

    /// Rotate `name` to `password` right before the next `trigger` request.
    pub fn rotate_on_next(&self, trigger: Trigger, name: &str, password: &str) {
        self.state().pending_rotation = Some(Rotation {
            trigger,
            account: name.to_owned(),
            password: password.to_owned(),
        });
    }

    pub fn password_of(&self, name: &str) -> Option<String> {
        self.state().accounts.get(name).map(|a| a.password.clone())
    }

    pub fn fail_upserts_for(&self, name: &str) {
        self.state().failing_upserts.insert(name.to_owned());
    }

    pub fn heal_upserts(&self) {
        self.state().failing_upserts.clear();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn upserts(&self) -> Vec<AccountSettings> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c.request {
                Request::Upsert { settings, .. } => Some(settings),
                _ => None,
            })
            .collect()
    }

    pub fn calls_by(&self, client: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.client == client).collect()
    }

    pub fn client(&self, label: &'static str) -> FakeClient {
        FakeClient {
            label,
            remote: self.clone(),
            username: String::new(),
            password: String::new(),
        }
    }
}

pub struct FakeClient {
    label: &'static str,
    remote: Remote,
    username: String,
    password: String,
}

impl FakeClient {
    fn record(&self, request: Request) -> MutexGuard<'_, RemoteState> {
        let mut state = self.remote.state();
        state.calls.push(Call {
            client: self.label,
            auth_user: self.username.clone(),
            auth_password: self.password.clone(),
            request,
        });
        state
    }

    fn authenticate(&self, state: &RemoteState, method: Method, path: &str) -> Result<(), ClientError> {
        match state.accounts.get(&self.username) {
            Some(account) if account.password == self.password => Ok(()),
            _ => Err(ClientError::Unauthorized {
                method,
                path: path.to_owned(),
            }),
        }
    }
}

impl AccountClient for FakeClient {
    fn fetch_account(&self, username: &str) -> Result<AccountInfo, ClientError> {
        let path = account_path(username);
        let mut state = self.record(Request::Fetch {
            username: username.to_owned(),
        });
        state.fire_rotation(Trigger::Fetch);
        self.authenticate(&state, Method::Get, &path)?;
        let account = state
            .accounts
            .get(username)
            .ok_or(ClientError::NotFound {
                method: Method::Get,
                path,
            })?;
        Ok(AccountInfo {
            name: username.to_owned(),
            hashing_algorithm: account.hashing_algorithm.clone(),
            tags: keyward_sync::client::Tags(account.tags.clone()),
        })
    }

    fn upsert_account(&self, username: &str, settings: &AccountSettings) -> Result<(), ClientError> {
        let path = account_path(username);
        let mut state = self.record(Request::Upsert {
            username: username.to_owned(),
            settings: settings.clone(),
        });
        state.fire_rotation(Trigger::Upsert);
        self.authenticate(&state, Method::Put, &path)?;
        if state.failing_upserts.contains(username) {
            return Err(ClientError::Status {
                method: Method::Put,
                path,
                status: 500,
                body: "internal error".to_owned(),
            });
        }
        state.accounts.insert(
            username.to_owned(),
            RemoteAccount {
                password: settings.password.clone(),
                hashing_algorithm: settings.hashing_algorithm.clone(),
                tags: settings.tags.clone(),
            },
        );
        Ok(())
    }

    fn grant_permissions(
        &self,
        scope: &str,
        username: &str,
        permissions: &Permissions,
    ) -> Result<(), ClientError> {
        let path = format!("/api/permissions/{scope}/{username}");
        let mut state = self.record(Request::Grant {
            scope: scope.to_owned(),
            username: username.to_owned(),
        });
        self.authenticate(&state, Method::Put, &path)?;
        state
            .grants
            .push((scope.to_owned(), username.to_owned(), permissions.clone()));
        Ok(())
    }

    fn who_am_i(&self) -> Result<WhoAmI, ClientError> {
        let state = self.record(Request::WhoAmI);
        self.authenticate(&state, Method::Get, "/api/whoami")?;
        Ok(WhoAmI {
            name: self.username.clone(),
            ..WhoAmI::default()
        })
    }

    fn username(&self) -> &str {
        &self.username
    }

    fn set_username(&mut self, username: &str) {
        self.username = username.to_owned();
    }

    fn set_password(&mut self, password: &str) {
        self.password = password.to_owned();
    }
}

// ---------------------------------------------------------------------------
// Fixture helpers
// ---------------------------------------------------------------------------

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn write(dir: &Path, name: &str, value: &str) {
    std::fs::write(dir.join(name), value).expect("write credential fragment");
}

/// `admin`/`pwd1`/`administrator` and `default`/`pwd1`/`mytag`.
pub fn seed_standard_dir(dir: &Path) {
    write(dir, "user_admin_username", "admin");
    write(dir, "user_admin_password", "pwd1");
    write(dir, "user_admin_tag", "administrator");
    write(dir, "user_default_username", "default");
    write(dir, "user_default_password", "pwd1");
    write(dir, "user_default_tag", "mytag");
}

pub fn config(watch_dir: &Path, admin_file: &Path) -> EngineConfig {
    EngineConfig {
        watch_dir: watch_dir.to_path_buf(),
        admin_file: admin_file.to_path_buf(),
    }
}

pub fn engine(remote: &Remote, watch_dir: &Path, admin_file: &Path) -> Engine {
    Engine::from_directory(
        config(watch_dir, admin_file),
        Box::new(remote.client("acting")),
        Box::new(remote.client("probe")),
    )
    .expect("seed engine")
}
