// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Account persistence on [`AuthDatabase`].

use chrono::{DateTime, Utc};
use redb::{ReadableDatabase, ReadableTable};

use super::database::{AuthDatabase, StoreError, StoreResult, ACCOUNTS};
use crate::auth::{
    normalize_identifier, Account, AccountStatus, CredentialStore, FailedLogin, LockoutPolicy,
    StoredPassword,
};

impl AuthDatabase {
    /// Provision a new account. Fails if the identifier is taken.
    pub fn insert_account(&self, account: &Account) -> StoreResult<()> {
        let json = serde_json::to_vec(account)?;

        let write_txn = self.db().begin_write()?;
        {
            let mut table = write_txn.open_table(ACCOUNTS)?;
            if table.get(account.identifier.as_str())?.is_some() {
                return Err(StoreError::AlreadyExists(format!(
                    "Account {}",
                    account.identifier
                )));
            }
            table.insert(account.identifier.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Change the administrative status of an account.
    ///
    /// Setting `Active` also clears any failed-attempt lockout.
    pub fn set_status(&self, identifier: &str, status: AccountStatus) -> StoreResult<()> {
        self.update_account(identifier, |account| {
            account.status = status;
            if status == AccountStatus::Active {
                account.failed_attempts = 0;
                account.locked_until = None;
            }
        })
        .map(|_| ())
    }

    /// Read-modify-write of one account inside a single write transaction.
    fn update_account<F>(&self, identifier: &str, mutate: F) -> StoreResult<Account>
    where
        F: FnOnce(&mut Account),
    {
        let key = normalize_identifier(identifier);

        let write_txn = self.db().begin_write()?;
        let account = {
            let mut table = write_txn.open_table(ACCOUNTS)?;

            let existing_bytes = {
                let existing = table
                    .get(key.as_str())?
                    .ok_or_else(|| StoreError::NotFound(format!("Account {key}")))?;
                existing.value().to_vec()
            };

            let mut account: Account = serde_json::from_slice(&existing_bytes)?;
            mutate(&mut account);

            let json = serde_json::to_vec(&account)?;
            table.insert(key.as_str(), json.as_slice())?;
            account
        };
        write_txn.commit()?;
        Ok(account)
    }
}

impl CredentialStore for AuthDatabase {
    fn find_by_identifier(&self, identifier: &str) -> StoreResult<Option<Account>> {
        let key = normalize_identifier(identifier);
        let read_txn = self.db().begin_read()?;
        let table = read_txn.open_table(ACCOUNTS)?;
        match table.get(key.as_str())? {
            Some(value) => {
                let account: Account = serde_json::from_slice(value.value())?;
                Ok(Some(account))
            }
            None => Ok(None),
        }
    }

    fn touch_last_login(&self, identifier: &str, at: DateTime<Utc>) -> StoreResult<()> {
        self.update_account(identifier, |account| {
            account.last_login_at = Some(at);
            account.failed_attempts = 0;
            account.locked_until = None;
        })
        .map(|_| ())
    }

    fn record_failed_login(
        &self,
        identifier: &str,
        at: DateTime<Utc>,
        policy: &LockoutPolicy,
    ) -> StoreResult<FailedLogin> {
        let mut locked_until = None;
        let account = self.update_account(identifier, |account| {
            // A lapsed lockout starts a fresh count
            if account.locked_until.is_some_and(|until| at >= until) {
                account.locked_until = None;
                account.failed_attempts = 0;
            }
            account.failed_attempts = account.failed_attempts.saturating_add(1);
            if policy.should_lock(account.failed_attempts) {
                let until = at + policy.lockout_duration;
                account.locked_until = Some(until);
                account.failed_attempts = 0;
                locked_until = Some(until);
            }
        })?;

        Ok(FailedLogin {
            failed_attempts: account.failed_attempts,
            locked_until,
        })
    }

    fn upgrade_password(
        &self,
        identifier: &str,
        current: &StoredPassword,
        replacement: StoredPassword,
    ) -> StoreResult<bool> {
        let mut replaced = false;
        self.update_account(identifier, |account| {
            if account.password == *current {
                account.password = replacement;
                replaced = true;
            }
        })?;
        Ok(replaced)
    }
}
