//! Staff account credential updates (admin and branch cashiers).
//!
//! Every accepted update is recorded as a local override so the new login
//! works on this device even when the backend push fails. Passwords are
//! only stored as bcrypt hashes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::backend::{CredentialTarget, CredentialUpdate, OrderBackend};
use crate::checkout::is_valid_email;
use crate::error::{PosError, PosResult};
use crate::storage::{self, SharedStore, KEY_CREDENTIAL_OVERRIDES};

pub const MIN_PASSWORD_LEN: usize = 8;

#[cfg(not(test))]
const HASH_COST: u32 = bcrypt::DEFAULT_COST;
#[cfg(test)]
const HASH_COST: u32 = 4;

impl CredentialTarget {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(CredentialTarget::Admin),
            "cashier_fairview" => Some(CredentialTarget::CashierFairview),
            "cashier_sjdm" => Some(CredentialTarget::CashierSjdm),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialOverride {
    pub target: CredentialTarget,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password_hash: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialOutcome {
    Synced,
    /// Saved on this device only; the backend push failed.
    LocalOnly { error: String },
}

pub struct CredentialManager {
    store: SharedStore,
    backend: Arc<dyn OrderBackend>,
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl CredentialManager {
    pub fn new(store: SharedStore, backend: Arc<dyn OrderBackend>) -> Self {
        Self { store, backend }
    }

    pub fn overrides(&self) -> Vec<CredentialOverride> {
        storage::read_json_array(self.store.as_ref(), KEY_CREDENTIAL_OVERRIDES)
    }

    pub fn override_for(&self, target: CredentialTarget) -> Option<CredentialOverride> {
        self.overrides().into_iter().find(|o| o.target == target)
    }

    /// Change the login email and/or password of one staff account.
    pub async fn update_credentials(
        &self,
        target: CredentialTarget,
        email: Option<&str>,
        password: Option<&str>,
    ) -> PosResult<CredentialOutcome> {
        let email = non_blank(email);
        let password = password.filter(|p| !p.is_empty()).map(str::to_string);

        if email.is_none() && password.is_none() {
            return Err(PosError::MissingField("email or password"));
        }
        if let Some(email) = &email {
            if !is_valid_email(email) {
                return Err(PosError::invalid("email", "not a valid email address"));
            }
        }
        let password_hash = match &password {
            Some(password) if password.chars().count() < MIN_PASSWORD_LEN => {
                return Err(PosError::invalid(
                    "password",
                    format!("must be at least {MIN_PASSWORD_LEN} characters"),
                ));
            }
            Some(password) => Some(
                bcrypt::hash(password, HASH_COST)
                    .map_err(|e| PosError::Storage(format!("password hash: {e}")))?,
            ),
            None => None,
        };

        let update = CredentialUpdate {
            target,
            email: email.clone(),
            password,
        };
        let outcome = match self.backend.update_credentials(&update).await {
            Ok(()) => CredentialOutcome::Synced,
            Err(e) => {
                warn!(
                    target_account = target.as_str(),
                    error = %e,
                    "Credential push failed, saved locally"
                );
                CredentialOutcome::LocalOnly {
                    error: e.to_string(),
                }
            }
        };

        let mut overrides = self.overrides();
        match overrides.iter_mut().find(|o| o.target == target) {
            Some(existing) => {
                if email.is_some() {
                    existing.email = email;
                }
                if password_hash.is_some() {
                    existing.password_hash = password_hash;
                }
                existing.updated_at = Utc::now();
            }
            None => overrides.push(CredentialOverride {
                target,
                email,
                password_hash,
                updated_at: Utc::now(),
            }),
        }
        storage::write_json(self.store.as_ref(), KEY_CREDENTIAL_OVERRIDES, &overrides)?;

        info!(target_account = target.as_str(), ?outcome, "Credentials updated");
        Ok(outcome)
    }

    /// Check a login against the local override for `target`.
    ///
    /// `None` when no override exists. Otherwise only the fields the
    /// override sets are checked.
    pub fn verify_override(
        &self,
        target: CredentialTarget,
        email: &str,
        password: &str,
    ) -> Option<bool> {
        let record = self.override_for(target)?;
        let email_ok = record
            .email
            .as_deref()
            .map_or(true, |stored| stored.eq_ignore_ascii_case(email.trim()));
        let password_ok = record.password_hash.as_deref().map_or(true, |hash| {
            bcrypt::verify(password, hash).unwrap_or_else(|e| {
                warn!(
                    target_account = target.as_str(),
                    error = %e,
                    "Stored password hash is unreadable"
                );
                false
            })
        });
        Some(email_ok && password_ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{memory_store, MemoryBackend};

    fn manager() -> (CredentialManager, Arc<MemoryBackend>) {
        let backend = MemoryBackend::new();
        (CredentialManager::new(memory_store(), backend.clone()), backend)
    }

    #[tokio::test]
    async fn update_validation() {
        let (mgr, backend) = manager();
        assert!(matches!(
            mgr.update_credentials(CredentialTarget::Admin, Some(" "), None).await,
            Err(PosError::MissingField(_))
        ));
        assert!(matches!(
            mgr.update_credentials(CredentialTarget::Admin, Some("admin@"), None).await,
            Err(PosError::InvalidField { field: "email", .. })
        ));
        assert!(matches!(
            mgr.update_credentials(CredentialTarget::Admin, None, Some("short")).await,
            Err(PosError::InvalidField { field: "password", .. })
        ));
        assert!(backend.credential_updates.lock().unwrap().is_empty());
        assert!(mgr.overrides().is_empty());
    }

    #[tokio::test]
    async fn password_is_hashed_and_verifiable() {
        let (mgr, backend) = manager();
        let outcome = mgr
            .update_credentials(
                CredentialTarget::CashierSjdm,
                Some("sjdm@jessie.ph"),
                Some("calamansi-79"),
            )
            .await
            .unwrap();
        assert_eq!(outcome, CredentialOutcome::Synced);

        let record = mgr.override_for(CredentialTarget::CashierSjdm).unwrap();
        let hash = record.password_hash.unwrap();
        assert_ne!(hash, "calamansi-79");

        assert_eq!(
            mgr.verify_override(CredentialTarget::CashierSjdm, "SJDM@jessie.ph", "calamansi-79"),
            Some(true)
        );
        assert_eq!(
            mgr.verify_override(CredentialTarget::CashierSjdm, "sjdm@jessie.ph", "wrong-pass"),
            Some(false)
        );
        assert_eq!(
            mgr.verify_override(CredentialTarget::Admin, "a@b.c", "whatever1"),
            None
        );
        assert_eq!(
            backend.credential_updates.lock().unwrap()[0].target,
            CredentialTarget::CashierSjdm
        );
    }

    #[tokio::test]
    async fn push_failure_keeps_local_override_and_merges_fields() {
        let (mgr, backend) = manager();
        mgr.update_credentials(CredentialTarget::CashierFairview, None, Some("fairview-01"))
            .await
            .unwrap();
        backend.set_offline(true);
        let outcome = mgr
            .update_credentials(CredentialTarget::CashierFairview, Some("fv@jessie.ph"), None)
            .await
            .unwrap();
        assert!(matches!(outcome, CredentialOutcome::LocalOnly { .. }));

        let overrides = mgr.overrides();
        assert_eq!(overrides.len(), 1);
        assert_eq!(overrides[0].email.as_deref(), Some("fv@jessie.ph"));
        assert!(overrides[0].password_hash.is_some());
        assert_eq!(
            mgr.verify_override(CredentialTarget::CashierFairview, "fv@jessie.ph", "fairview-01"),
            Some(true)
        );
    }

    #[test]
    fn target_parse() {
        assert_eq!(
            CredentialTarget::parse("Cashier_Fairview"),
            Some(CredentialTarget::CashierFairview)
        );
        assert_eq!(CredentialTarget::parse("owner"), None);
    }
}
