//! Reconciliation engine.
//!
//! One pass: reload the credential directory, compare every account with
//! the last-applied state, and push the dirty ones to the remote service.
//!
//! ```text
//! LOADING -> DIFFING -> per dirty account:
//!     AUTHENTICATING -> APPLYING -> STATE_COMMIT -> [ADMIN_FILE_SYNC]
//! -> IDLE
//! ```
//!
//! The admin account is visited first so a rotated admin password is in
//! effect for the remaining accounts of the same pass. The first failing
//! account ends the pass; accounts committed before it stay committed.
//!
//! ## Authentication fallback
//!
//! Several replicas observe the same file change but only one of them
//! performs the write. The others run into `401 Unauthorized` because the
//! admin password has already been rotated under them. On a 401 the acting
//! client switches to the *desired* admin password and validates it with an
//! identity check; success means the remote side already holds the new
//! credentials.

use std::path::PathBuf;

use keyward_core::{loader, AccountCredential, AccountId, ConfigError, CredentialMap};

use crate::admin_file::{AdminFile, AdminFileSync};
use crate::client::{
    AccountClient, AccountInfo, AccountSettings, ClientError, Permissions,
    DEFAULT_HASHING_ALGORITHM, DEFAULT_SCOPE,
};
use crate::error::{ApplyError, ReconcileError};

// ---------------------------------------------------------------------------
// Pass report
// ---------------------------------------------------------------------------

/// What happened to one account during a pass.
#[derive(Debug)]
pub enum AccountOutcome {
    /// Upserted on the remote service.
    Applied { id: AccountId, created: bool },
    /// The remote service already held the desired credentials.
    Confirmed { id: AccountId },
    /// Desired credentials match the last-applied ones.
    Unchanged { id: AccountId },
    /// Username or password fragment missing; left for a later pass.
    Incomplete { id: AccountId },
    /// Applying failed; always the last outcome of its pass.
    Failed { id: AccountId, error: ApplyError },
}

impl AccountOutcome {
    pub fn id(&self) -> &AccountId {
        match self {
            AccountOutcome::Applied { id, .. }
            | AccountOutcome::Confirmed { id }
            | AccountOutcome::Unchanged { id }
            | AccountOutcome::Incomplete { id }
            | AccountOutcome::Failed { id, .. } => id,
        }
    }
}

/// Outcomes of one pass, in visiting order.
#[derive(Debug, Default)]
pub struct PassReport {
    pub outcomes: Vec<AccountOutcome>,
}

impl PassReport {
    /// Accounts committed to last-applied state in this pass.
    pub fn committed(&self) -> Vec<&AccountId> {
        self.outcomes
            .iter()
            .filter(|o| {
                matches!(
                    o,
                    AccountOutcome::Applied { .. } | AccountOutcome::Confirmed { .. }
                )
            })
            .map(AccountOutcome::id)
            .collect()
    }

    pub fn unchanged(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, AccountOutcome::Unchanged { .. }))
            .count()
    }

    pub fn failure(&self) -> Option<(&AccountId, &ApplyError)> {
        self.outcomes.iter().find_map(|o| match o {
            AccountOutcome::Failed { id, error } => Some((id, error)),
            _ => None,
        })
    }
}

/// How an account apply ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    Upserted { created: bool },
    AlreadyCurrent,
}

/// Result of looking the account up before the upsert.
enum Existing {
    Found(AccountInfo),
    Missing,
    /// Neither admin password authenticated; write optimistically.
    Unknown,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Paths the engine reads and writes.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub watch_dir: PathBuf,
    pub admin_file: PathBuf,
}

/// Owns last-applied state and both client instances. Driven by a single
/// worker; never shared.
pub struct Engine {
    watch_dir: PathBuf,
    admin_file: AdminFile,
    /// Issues every account-management call; its password is switched
    /// during the fallback protocol.
    acting: Box<dyn AccountClient>,
    /// Only used for the post-sync identity check.
    probe: Box<dyn AccountClient>,
    applied: CredentialMap,
}

impl Engine {
    /// Build an engine whose last-applied state is `seed`.
    pub fn new(
        config: EngineConfig,
        acting: Box<dyn AccountClient>,
        probe: Box<dyn AccountClient>,
        seed: CredentialMap,
    ) -> Result<Self, ReconcileError> {
        let mut engine = Self {
            watch_dir: config.watch_dir,
            admin_file: AdminFile::new(config.admin_file),
            acting,
            probe,
            applied: seed,
        };
        engine.use_applied_admin()?;
        Ok(engine)
    }

    /// Seed last-applied state from a full scan of the watch directory.
    pub fn from_directory(
        config: EngineConfig,
        acting: Box<dyn AccountClient>,
        probe: Box<dyn AccountClient>,
    ) -> Result<Self, ReconcileError> {
        let seed = loader::load(&config.watch_dir)?;
        tracing::info!(
            "seeded credential state with {} account(s) from {}",
            seed.len(),
            config.watch_dir.display()
        );
        Self::new(config, acting, probe, seed)
    }

    pub fn applied(&self) -> &CredentialMap {
        &self.applied
    }

    /// Run one reconciliation pass.
    ///
    /// Returns `Err` only when the credential directory cannot be loaded;
    /// per-account failures are part of the report.
    pub fn reconcile(&mut self) -> Result<PassReport, ReconcileError> {
        self.use_applied_admin()?;

        let desired = loader::load(&self.watch_dir)?;
        let admin_id = AccountId::admin();
        let Some(desired_admin) = desired.get(&admin_id) else {
            return Err(ConfigError::MissingAdmin {
                path: self.watch_dir.clone(),
            }
            .into());
        };
        let new_admin_password = desired_admin.password.clone();

        let order = std::iter::once(&admin_id).chain(desired.keys().filter(|id| !id.is_admin()));

        let mut report = PassReport::default();
        for id in order {
            let Some(creds) = desired.get(id) else {
                continue;
            };

            if let Some(applied) = self.applied.get(id) {
                if creds.matches_applied(applied) {
                    tracing::trace!("credentials unchanged for account {id}, skipping");
                    report.outcomes.push(AccountOutcome::Unchanged { id: id.clone() });
                    continue;
                }
            }

            if !creds.is_complete() {
                tracing::debug!("credentials for account {id} are incomplete, skipping");
                report.outcomes.push(AccountOutcome::Incomplete { id: id.clone() });
                continue;
            }

            match self.apply(id, creds, &new_admin_password) {
                Ok(applied) => {
                    self.commit(id, creds)?;
                    report.outcomes.push(match applied {
                        Applied::Upserted { created } => AccountOutcome::Applied {
                            id: id.clone(),
                            created,
                        },
                        Applied::AlreadyCurrent => AccountOutcome::Confirmed { id: id.clone() },
                    });
                }
                Err(error) => {
                    tracing::error!(
                        "failed to update credentials for account {id} (user {}): {error}",
                        creds.username
                    );
                    report.outcomes.push(AccountOutcome::Failed {
                        id: id.clone(),
                        error,
                    });
                    break;
                }
            }
        }

        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Apply
    // -----------------------------------------------------------------------

    fn apply(
        &mut self,
        id: &AccountId,
        desired: &AccountCredential,
        new_admin_password: &str,
    ) -> Result<Applied, ApplyError> {
        if id.is_admin() {
            if let Some(applied) = self.verify_admin(desired, new_admin_password)? {
                return Ok(applied);
            }
        }
        self.upsert(desired, new_admin_password)
    }

    /// Confirm the configured admin credentials still authenticate before an
    /// admin change is applied.
    ///
    /// `Some(AlreadyCurrent)` means the old password was rejected and the
    /// new one accepted: another writer got there first.
    fn verify_admin(
        &mut self,
        desired: &AccountCredential,
        new_admin_password: &str,
    ) -> Result<Option<Applied>, ApplyError> {
        let me = match self.acting.who_am_i() {
            Ok(me) => me,
            Err(err) if err.is_unauthorized() => {
                self.fall_back(err, new_admin_password)?;
                tracing::info!(
                    "admin credentials already rotated on the remote service, skipping update"
                );
                return Ok(Some(Applied::AlreadyCurrent));
            }
            Err(source) => {
                return Err(ApplyError::AdminCredentials {
                    username: self.acting.username().to_owned(),
                    source,
                })
            }
        };

        if me.name != desired.username {
            tracing::info!("admin username changed from {} to {}", me.name, desired.username);
            self.acting
                .who_am_i()
                .map_err(|source| ApplyError::AdminCredentials {
                    username: self.acting.username().to_owned(),
                    source,
                })?;
        }
        Ok(None)
    }

    fn upsert(
        &mut self,
        desired: &AccountCredential,
        new_admin_password: &str,
    ) -> Result<Applied, ApplyError> {
        let username = desired.username.as_str();

        let existing = match self.acting.fetch_account(username) {
            Ok(info) => Existing::Found(info),
            Err(err) if err.is_not_found() => {
                tracing::debug!("{err}; creating account");
                Existing::Missing
            }
            Err(err) if err.is_unauthorized() => match self.fall_back(err, new_admin_password) {
                Ok(()) => match self.acting.fetch_account(username) {
                    Ok(info) => Existing::Found(info),
                    Err(err) if err.is_not_found() => Existing::Missing,
                    Err(err) => return Err(err.into()),
                },
                Err(err) => {
                    tracing::warn!("{err}; attempting update anyway");
                    Existing::Unknown
                }
            },
            Err(err) => return Err(err.into()),
        };

        let (hashing_algorithm, created) = match existing {
            Existing::Found(info) if !info.hashing_algorithm.is_empty() => {
                (info.hashing_algorithm, false)
            }
            Existing::Found(_) | Existing::Unknown => (DEFAULT_HASHING_ALGORITHM.to_owned(), false),
            Existing::Missing => (DEFAULT_HASHING_ALGORITHM.to_owned(), true),
        };

        let settings = AccountSettings {
            name: username.to_owned(),
            tags: desired.tag.iter().cloned().collect(),
            password: desired.password.clone(),
            hashing_algorithm,
        };
        match self.acting.upsert_account(username, &settings) {
            Ok(()) => tracing::info!("updated credentials on remote service for user {username}"),
            Err(err) if err.is_unauthorized() => {
                self.fall_back(err, new_admin_password)?;
                tracing::info!(
                    "new admin password already accepted, skipping update for user {username}"
                );
                return Ok(Applied::AlreadyCurrent);
            }
            Err(err) => return Err(err.into()),
        }

        if created {
            self.acting
                .grant_permissions(DEFAULT_SCOPE, username, &Permissions::unrestricted())
                .map_err(|source| ApplyError::Permissions {
                    username: username.to_owned(),
                    source,
                })?;
            tracing::info!("granted default permissions to user {username}");
        }

        Ok(Applied::Upserted { created })
    }

    /// Switch the acting client to the desired admin password and check
    /// that it authenticates.
    fn fall_back(&mut self, cause: ClientError, new_admin_password: &str) -> Result<(), ApplyError> {
        tracing::info!("{cause}; authenticating with new admin password");
        self.acting.set_password(new_admin_password);
        match self.acting.who_am_i() {
            Ok(_) => {
                tracing::debug!(
                    "identity check with new admin password succeeded for {}",
                    self.acting.username()
                );
                Ok(())
            }
            Err(source) => Err(ApplyError::Authentication {
                username: self.acting.username().to_owned(),
                cause,
                source,
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Commit
    // -----------------------------------------------------------------------

    fn commit(&mut self, id: &AccountId, creds: &AccountCredential) -> Result<(), ReconcileError> {
        self.applied.insert(id.clone(), creds.clone());
        self.use_applied_admin()?;

        if id.is_admin() {
            self.sync_admin_file(creds);
            self.probe_admin(creds);
        }
        Ok(())
    }

    fn sync_admin_file(&self, admin: &AccountCredential) {
        match self.admin_file.sync(admin) {
            Ok(AdminFileSync::Written) => tracing::info!(
                "updated admin credentials file {}",
                self.admin_file.path().display()
            ),
            Ok(AdminFileSync::UpToDate) => tracing::debug!(
                "admin credentials file {} already up-to-date",
                self.admin_file.path().display()
            ),
            Err(err) => tracing::error!("failed to sync admin credentials file: {err}"),
        }
    }

    /// Observability only: a failure is logged and nothing else.
    fn probe_admin(&mut self, admin: &AccountCredential) {
        self.probe.set_username(&admin.username);
        self.probe.set_password(&admin.password);
        match self.probe.who_am_i() {
            Ok(_) => tracing::debug!("re-authentication as {} succeeded", admin.username),
            Err(err) => tracing::error!(
                "re-authentication as {} after admin update failed: {err}",
                admin.username
            ),
        }
    }

    /// Point the acting client at the last-applied admin credentials.
    fn use_applied_admin(&mut self) -> Result<(), ReconcileError> {
        let admin = self
            .applied
            .get(&AccountId::admin())
            .ok_or_else(|| ReconcileError::MissingState(AccountId::admin()))?;
        self.acting.set_username(&admin.username);
        self.acting.set_password(&admin.password);
        Ok(())
    }
}
