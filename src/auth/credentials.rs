// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Accounts and the credential store interface consumed by the engine.
//!
//! The engine only reads accounts and updates login bookkeeping. Creating
//! accounts and changing passwords happens outside the engine, through the
//! concrete store's provisioning methods.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use super::password::StoredPassword;
use crate::storage::StoreResult;

/// Administrative account status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Locked,
    Disabled,
}

/// Account record owned by the credential store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Normalized unique identifier
    pub identifier: String,
    /// Salted password hash
    pub password: StoredPassword,
    /// Administrative status
    pub status: AccountStatus,
    /// When the account was created
    pub created_at: DateTime<Utc>,
    /// Last successful login
    #[serde(default)]
    pub last_login_at: Option<DateTime<Utc>>,
    /// Consecutive failed logins since the last success or lockout
    #[serde(default)]
    pub failed_attempts: u32,
    /// Temporary lockout set by the failed-attempt policy
    #[serde(default)]
    pub locked_until: Option<DateTime<Utc>>,
}

impl Account {
    pub fn new(identifier: &str, password: StoredPassword, created_at: DateTime<Utc>) -> Self {
        Self {
            identifier: normalize_identifier(identifier),
            password,
            status: AccountStatus::Active,
            created_at,
            last_login_at: None,
            failed_attempts: 0,
            locked_until: None,
        }
    }

    /// Effective status at `now`, folding in a temporary lockout.
    pub fn status_at(&self, now: DateTime<Utc>) -> AccountStatus {
        match self.status {
            AccountStatus::Active if self.locked_until.is_some_and(|until| now < until) => {
                AccountStatus::Locked
            }
            status => status,
        }
    }
}

/// Failed-attempt lockout policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    /// Consecutive failures that lock the account. `0` disables lockout.
    pub max_failed_attempts: u32,
    /// How long a lockout lasts
    pub lockout_duration: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            lockout_duration: Duration::minutes(15),
        }
    }
}

impl LockoutPolicy {
    pub fn should_lock(&self, failed_attempts: u32) -> bool {
        self.max_failed_attempts > 0 && failed_attempts >= self.max_failed_attempts
    }
}

/// Result of recording a failed login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailedLogin {
    pub failed_attempts: u32,
    /// Set when this failure triggered a lockout
    pub locked_until: Option<DateTime<Utc>>,
}

/// Read interface to persisted credentials.
///
/// Implementations must be safe for concurrent use and linearizable per key.
pub trait CredentialStore: Send + Sync {
    /// Look up an account by its normalized identifier.
    fn find_by_identifier(&self, identifier: &str) -> StoreResult<Option<Account>>;

    /// Record a successful login and clear failure bookkeeping.
    fn touch_last_login(&self, identifier: &str, at: DateTime<Utc>) -> StoreResult<()>;

    /// Count a failed login, locking the account when the policy says so.
    fn record_failed_login(
        &self,
        identifier: &str,
        at: DateTime<Utc>,
        policy: &LockoutPolicy,
    ) -> StoreResult<FailedLogin>;

    /// Replace the stored password if it still equals `current`.
    ///
    /// Returns false when the record changed in the meantime.
    fn upgrade_password(
        &self,
        identifier: &str,
        current: &StoredPassword,
        replacement: StoredPassword,
    ) -> StoreResult<bool>;
}

/// Canonical form of an account identifier: NFKC, trimmed, lowercase.
pub fn normalize_identifier(identifier: &str) -> String {
    identifier.trim().nfkc().collect::<String>().to_lowercase()
}
