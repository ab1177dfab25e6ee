// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication engine: login, refresh, logout and access-token checks.
//!
//! The engine depends only on the [`CredentialStore`] and [`SessionStore`]
//! interfaces. It holds no lock of its own; every check-then-act sequence
//! that needs atomicity is pushed down into the store.
//!
//! ## Failure reporting
//!
//! Callers only ever learn "authenticated" or "not authenticated". The
//! specific reason is logged with the account or session it concerns,
//! never with the password or token.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::credentials::{Account, AccountStatus, CredentialStore, LockoutPolicy};
use super::password::{HashingPool, StoredPassword};
use super::session::{RevokeReason, Session, SessionManager, SessionPolicy, SessionStore};
use super::tokens::TokenIssuer;
use super::{AuthError, AuthenticatedAccount};
use crate::storage::StoreError;

/// Tokens handed to a client after login or refresh.
#[derive(Clone)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token expiry
    pub expires_at: DateTime<Utc>,
    pub session_id: String,
}

impl fmt::Debug for IssuedTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedTokens")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("session_id", &self.session_id)
            .finish()
    }
}

/// Policies the engine enforces.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnginePolicy {
    pub lockout: LockoutPolicy,
    pub sessions: SessionPolicy,
}

pub struct AuthEngine {
    credentials: Arc<dyn CredentialStore>,
    sessions: SessionManager,
    issuer: Arc<TokenIssuer>,
    hashing: HashingPool,
    lockout: LockoutPolicy,
    clock: Arc<dyn Clock>,
}

impl AuthEngine {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        session_store: Arc<dyn SessionStore>,
        issuer: TokenIssuer,
        hashing: HashingPool,
        policy: EnginePolicy,
    ) -> Self {
        let issuer = Arc::new(issuer);
        Self {
            credentials,
            sessions: SessionManager::new(session_store, Arc::clone(&issuer), policy.sessions),
            issuer,
            hashing,
            lockout: policy.lockout,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Authenticate with identifier and password and open a session.
    pub async fn login(&self, identifier: &str, password: &str) -> Result<IssuedTokens, AuthError> {
        let now = self.clock.now();

        let Some(account) = self.credentials.find_by_identifier(identifier)? else {
            // Same hashing work as a real account so timing does not reveal existence
            self.hashing.verify_dummy(password).await?;
            debug!("Login failed: unknown identifier");
            return Err(AuthError::InvalidCredentials);
        };

        match account.status_at(now) {
            AccountStatus::Active => {}
            AccountStatus::Locked => {
                info!(account_id = %account.identifier, "Login rejected: account locked");
                return Err(AuthError::AccountLocked);
            }
            AccountStatus::Disabled => {
                info!(account_id = %account.identifier, "Login rejected: account disabled");
                return Err(AuthError::AccountDisabled);
            }
        }

        if !self.hashing.verify(password, account.password.clone()).await? {
            self.record_failure(&account.identifier, now)?;
            return Err(AuthError::InvalidCredentials);
        }

        self.credentials.touch_last_login(&account.identifier, now)?;
        if account.password.params != self.hashing.params() {
            self.upgrade_password(&account, password).await;
        }
        let issued = self.sessions.create(&account.identifier, now)?;
        let access = self
            .issuer
            .issue_access_token(&account.identifier, &issued.session.session_id, now)?;

        info!(
            account_id = %account.identifier,
            session_id = %issued.session.session_id,
            "Login succeeded"
        );

        Ok(IssuedTokens {
            access_token: access.token,
            refresh_token: issued.refresh_token,
            expires_at: access.expires_at,
            session_id: issued.session.session_id,
        })
    }

    /// Rehash with the configured cost so the unknown-account path keeps
    /// costing the same as this account's. Failure only delays the upgrade.
    async fn upgrade_password(&self, account: &Account, password: &str) {
        let replacement = match self.hashing.hash(password).await {
            Ok(replacement) => replacement,
            Err(e) => {
                warn!(account_id = %account.identifier, error = %e, "Password rehash failed");
                return;
            }
        };
        let params = replacement.params;
        match self
            .credentials
            .upgrade_password(&account.identifier, &account.password, replacement)
        {
            Ok(true) => info!(
                account_id = %account.identifier,
                memory_kib = params.memory_kib,
                iterations = params.iterations,
                "Password rehashed with current cost"
            ),
            Ok(false) => debug!(account_id = %account.identifier, "Password changed concurrently"),
            Err(e) => warn!(
                account_id = %account.identifier,
                error = %e,
                "Storing rehashed password failed"
            ),
        }
    }

    fn record_failure(&self, account_id: &str, now: DateTime<Utc>) -> Result<(), AuthError> {
        match self
            .credentials
            .record_failed_login(account_id, now, &self.lockout)
        {
            Ok(outcome) => {
                if let Some(until) = outcome.locked_until {
                    warn!(
                        account_id,
                        locked_until = %until,
                        "Account locked after repeated login failures"
                    );
                } else {
                    info!(
                        account_id,
                        failed_attempts = outcome.failed_attempts,
                        "Login failed: wrong password"
                    );
                }
                Ok(())
            }
            // Account deleted between lookup and now
            Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Exchange a refresh token for a new token pair.
    ///
    /// Every authentication failure is reported as [`AuthError::TokenInvalid`].
    pub async fn refresh(&self, refresh_token: &str) -> Result<IssuedTokens, AuthError> {
        let now = self.clock.now();
        let presented_hash = self.issuer.hash_refresh_token(refresh_token);

        match self.rotate(&presented_hash, now) {
            Err(err) if err.is_authentication_failure() => {
                debug!(error_code = err.error_code(), "Refresh rejected");
                Err(AuthError::TokenInvalid)
            }
            other => other,
        }
    }

    fn rotate(&self, presented_hash: &str, now: DateTime<Utc>) -> Result<IssuedTokens, AuthError> {
        let session_id = self.sessions.resolve_refresh(presented_hash)?;
        let session = self.sessions.get(&session_id)?.ok_or(AuthError::TokenInvalid)?;

        let account_active = self
            .credentials
            .find_by_identifier(&session.account_id)?
            .is_some_and(|account| account.status == AccountStatus::Active);
        if !account_active {
            self.sessions
                .revoke(&session_id, RevokeReason::Administrative, now)?;
            info!(
                session_id = %session_id,
                account_id = %session.account_id,
                "Refresh rejected: account no longer active"
            );
            return Err(AuthError::AccountDisabled);
        }

        let rotated = self.sessions.rotate(&session_id, presented_hash, now)?;
        let access = self
            .issuer
            .issue_access_token(&rotated.session.account_id, &session_id, now)?;

        debug!(
            session_id = %session_id,
            rotation_counter = rotated.session.rotation_counter,
            "Refresh token rotated"
        );

        Ok(IssuedTokens {
            access_token: access.token,
            refresh_token: rotated.refresh_token,
            expires_at: access.expires_at,
            session_id,
        })
    }

    /// End a session. Idempotent; only store failures are errors.
    pub fn logout(&self, session_id: &str) -> Result<(), AuthError> {
        self.sessions
            .revoke(session_id, RevokeReason::Logout, self.clock.now())
    }

    /// Signature, issuer and expiry check without touching the store.
    pub fn verify_access_token(
        &self,
        access_token: &str,
    ) -> Result<AuthenticatedAccount, AuthError> {
        self.issuer
            .verify_access_token(access_token, self.clock.now())
    }

    /// Full check for protected requests: valid token and a live session.
    pub fn authenticate(&self, access_token: &str) -> Result<AuthenticatedAccount, AuthError> {
        let now = self.clock.now();
        let account = self.issuer.verify_access_token(access_token, now)?;
        if !self.sessions.is_live(&account.session_id, now)? {
            debug!(session_id = %account.session_id, "Access token rejected: session not live");
            return Err(AuthError::TokenInvalid);
        }
        Ok(account)
    }

    /// End every session of an account.
    pub fn logout_all(&self, account_id: &str) -> Result<usize, AuthError> {
        self.sessions
            .revoke_all(account_id, RevokeReason::Logout, self.clock.now())
    }

    /// Live sessions of an account, newest first.
    pub fn list_sessions(&self, account_id: &str) -> Result<Vec<Session>, AuthError> {
        self.sessions.list_live(account_id, self.clock.now())
    }

    /// Revoke one of the caller's own sessions.
    ///
    /// Returns false when the session does not exist or belongs to someone else.
    pub fn revoke_session(&self, account_id: &str, session_id: &str) -> Result<bool, AuthError> {
        match self.sessions.get(session_id)? {
            Some(session) if session.account_id == account_id => {
                self.sessions
                    .revoke(session_id, RevokeReason::Logout, self.clock.now())?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Hash a password with the configured parameters, for provisioning.
    pub async fn hash_password(&self, plaintext: &str) -> Result<StoredPassword, AuthError> {
        self.hashing.hash(plaintext).await
    }

    /// Current time according to the engine's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{HashParams, PasswordHasher, SessionState};
    use crate::storage::AuthDatabase;
    use crate::test_support::{engine_with, TestEngine, ALICE, ALICE_PASSWORD};
    use chrono::Duration;
    use std::time::Instant;

    fn engine() -> TestEngine {
        engine_with(EnginePolicy::default())
    }

    #[tokio::test]
    async fn login_then_authenticate_round_trip() {
        let t = engine();
        let tokens = t.engine.login(ALICE, ALICE_PASSWORD).await.unwrap();

        let account = t.engine.authenticate(&tokens.access_token).unwrap();
        assert_eq!(account.account_id, ALICE);
        assert_eq!(account.session_id, tokens.session_id);
        assert_eq!(tokens.expires_at, t.clock.now() + Duration::minutes(15));

        let stored = t.db.find_by_identifier(ALICE).unwrap().unwrap();
        assert_eq!(stored.last_login_at, Some(t.clock.now()));
    }

    #[tokio::test]
    async fn login_normalizes_identifier() {
        let t = engine();
        let tokens = t.engine.login("  ALICE ", ALICE_PASSWORD).await.unwrap();
        let account = t.engine.authenticate(&tokens.access_token).unwrap();
        assert_eq!(account.account_id, ALICE);
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_account_look_the_same() {
        let t = engine();
        assert!(matches!(
            t.engine.login(ALICE, "wrong").await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            t.engine.login("nobody", ALICE_PASSWORD).await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn repeated_failures_lock_the_account() {
        let t = engine_with(EnginePolicy {
            lockout: LockoutPolicy {
                max_failed_attempts: 3,
                lockout_duration: Duration::minutes(10),
            },
            ..EnginePolicy::default()
        });

        for _ in 0..3 {
            assert!(matches!(
                t.engine.login(ALICE, "wrong").await,
                Err(AuthError::InvalidCredentials)
            ));
        }
        // Correct password does not help while locked
        assert!(matches!(
            t.engine.login(ALICE, ALICE_PASSWORD).await,
            Err(AuthError::AccountLocked)
        ));

        t.clock.advance(Duration::minutes(10));
        t.engine.login(ALICE, ALICE_PASSWORD).await.unwrap();
    }

    #[tokio::test]
    async fn disabled_account_cannot_login_or_refresh() {
        let t = engine();
        let tokens = t.engine.login(ALICE, ALICE_PASSWORD).await.unwrap();

        t.db.set_status(ALICE, AccountStatus::Disabled).unwrap();
        assert!(matches!(
            t.engine.login(ALICE, ALICE_PASSWORD).await,
            Err(AuthError::AccountDisabled)
        ));
        assert!(matches!(
            t.engine.refresh(&tokens.refresh_token).await,
            Err(AuthError::TokenInvalid)
        ));
        // The session is gone even after re-enabling
        t.db.set_status(ALICE, AccountStatus::Active).unwrap();
        assert!(matches!(
            t.engine.authenticate(&tokens.access_token),
            Err(AuthError::TokenInvalid)
        ));
    }

    #[tokio::test]
    async fn corrupt_stored_password_is_an_internal_fault() {
        let t = engine();
        let password = t.engine.hash_password("pw").await.unwrap();
        let mut account = Account::new("mallory", password, t.clock.now());
        account.password.salt = "!!!".to_string();
        t.db.insert_account(&account).unwrap();

        let err = t.engine.login("mallory", "pw").await.unwrap_err();
        assert!(matches!(err, AuthError::CorruptCredential(_)));
        assert!(!err.is_authentication_failure());
    }

    #[tokio::test]
    async fn alice_replay_revokes_the_whole_session() {
        let t = engine();
        let first = t.engine.login(ALICE, ALICE_PASSWORD).await.unwrap();

        let second = t.engine.refresh(&first.refresh_token).await.unwrap();
        assert_eq!(second.session_id, first.session_id);
        assert_ne!(second.refresh_token, first.refresh_token);
        t.engine.authenticate(&second.access_token).unwrap();

        // R1 is stale now: presenting it again is a replay
        assert!(matches!(
            t.engine.refresh(&first.refresh_token).await,
            Err(AuthError::TokenInvalid)
        ));
        assert!(matches!(
            t.engine.authenticate(&second.access_token),
            Err(AuthError::TokenInvalid)
        ));
        assert!(matches!(
            t.engine.refresh(&second.refresh_token).await,
            Err(AuthError::TokenInvalid)
        ));

        let session = t.engine.sessions().get(&first.session_id).unwrap().unwrap();
        assert_eq!(session.revoke_reason, Some(RevokeReason::ReplayDetected));
        assert_eq!(session.state(t.clock.now()), SessionState::Revoked);
    }

    #[tokio::test]
    async fn unknown_refresh_token_is_invalid() {
        let t = engine();
        assert!(matches!(
            t.engine.refresh("definitely-not-issued").await,
            Err(AuthError::TokenInvalid)
        ));
    }

    #[tokio::test]
    async fn refresh_after_session_expiry_is_invalid() {
        let t = engine();
        let tokens = t.engine.login(ALICE, ALICE_PASSWORD).await.unwrap();
        t.clock.advance(SessionPolicy::default().refresh_ttl);
        assert!(matches!(
            t.engine.refresh(&tokens.refresh_token).await,
            Err(AuthError::TokenInvalid)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_refresh_has_exactly_one_winner() {
        let t = engine();
        let tokens = t.engine.login(ALICE, ALICE_PASSWORD).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = Arc::clone(&t.engine);
            let refresh_token = tokens.refresh_token.clone();
            handles.push(tokio::spawn(async move { engine.refresh(&refresh_token).await }));
        }

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(err) => assert!(matches!(err, AuthError::TokenInvalid)),
            }
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn logout_is_idempotent_and_kills_access() {
        let t = engine();
        let tokens = t.engine.login(ALICE, ALICE_PASSWORD).await.unwrap();

        t.engine.logout(&tokens.session_id).unwrap();
        t.engine.logout(&tokens.session_id).unwrap();
        t.engine.logout("no-such-session").unwrap();

        assert!(matches!(
            t.engine.authenticate(&tokens.access_token),
            Err(AuthError::TokenInvalid)
        ));
        // Signature is still fine; only liveness fails
        assert!(t.engine.verify_access_token(&tokens.access_token).is_ok());
        assert!(matches!(
            t.engine.refresh(&tokens.refresh_token).await,
            Err(AuthError::TokenInvalid)
        ));
    }

    #[tokio::test]
    async fn access_token_expiry_boundary() {
        let t = engine();
        let tokens = t.engine.login(ALICE, ALICE_PASSWORD).await.unwrap();

        t.clock.advance(Duration::minutes(15) - Duration::seconds(1));
        t.engine.authenticate(&tokens.access_token).unwrap();

        t.clock.advance(Duration::seconds(1));
        assert!(matches!(
            t.engine.authenticate(&tokens.access_token),
            Err(AuthError::TokenExpired)
        ));
    }

    #[tokio::test]
    async fn session_management_is_owner_scoped() {
        let t = engine();
        let first = t.engine.login(ALICE, ALICE_PASSWORD).await.unwrap();
        t.clock.advance(Duration::seconds(1));
        let second = t.engine.login(ALICE, ALICE_PASSWORD).await.unwrap();

        let listed: Vec<String> = t
            .engine
            .list_sessions(ALICE)
            .unwrap()
            .into_iter()
            .map(|s| s.session_id)
            .collect();
        assert_eq!(listed, vec![second.session_id.clone(), first.session_id.clone()]);

        assert!(!t.engine.revoke_session("bob", &first.session_id).unwrap());
        assert!(t.engine.authenticate(&first.access_token).is_ok());

        assert!(t.engine.revoke_session(ALICE, &first.session_id).unwrap());
        assert!(t.engine.authenticate(&first.access_token).is_err());

        assert_eq!(t.engine.logout_all(ALICE).unwrap(), 1);
        assert!(t.engine.authenticate(&second.access_token).is_err());
        assert!(t.engine.list_sessions(ALICE).unwrap().is_empty());
    }

    fn median(mut samples: Vec<u128>) -> u128 {
        samples.sort_unstable();
        samples[samples.len() / 2]
    }

    #[tokio::test]
    async fn failed_login_timing_does_not_reveal_account_existence() {
        // Lockout off so every wrong-password attempt does the full hash
        let t = engine_with(EnginePolicy {
            lockout: LockoutPolicy {
                max_failed_attempts: 0,
                ..LockoutPolicy::default()
            },
            ..EnginePolicy::default()
        });

        // Warm up both paths
        let _ = t.engine.login(ALICE, "wrong").await;
        let _ = t.engine.login("nobody", "wrong").await;

        let mut known = Vec::new();
        let mut unknown = Vec::new();
        for _ in 0..15 {
            let start = Instant::now();
            let _ = t.engine.login(ALICE, "wrong").await;
            known.push(start.elapsed().as_micros());

            let start = Instant::now();
            let _ = t.engine.login("nobody", "wrong").await;
            unknown.push(start.elapsed().as_micros());
        }

        let (known, unknown) = (median(known), median(unknown));
        let (fast, slow) = (known.min(unknown), known.max(unknown));
        assert!(
            slow <= fast * 2,
            "median wrong-password {known}us vs unknown-account {unknown}us"
        );
    }

    #[tokio::test]
    async fn engine_works_over_a_file_backed_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let db = Arc::new(AuthDatabase::open(&dir.path().join("auth.redb")).unwrap());
        let t = crate::test_support::engine_over(db, EnginePolicy::default());

        let tokens = t.engine.login(ALICE, ALICE_PASSWORD).await.unwrap();
        let rotated = t.engine.refresh(&tokens.refresh_token).await.unwrap();
        t.engine.authenticate(&rotated.access_token).unwrap();
    }

    #[tokio::test]
    async fn login_rehashes_passwords_stored_with_an_old_cost() {
        let t = engine();
        let weaker = PasswordHasher::new(HashParams {
            memory_kib: 512,
            iterations: 1,
            parallelism: 1,
        })
        .unwrap();
        let old = weaker.hash("pw").unwrap();
        t.db.insert_account(&Account::new("bob", old.clone(), t.clock.now()))
            .unwrap();

        t.engine.login("bob", "pw").await.unwrap();

        let stored = t.db.find_by_identifier("bob").unwrap().unwrap();
        assert_ne!(stored.password, old);
        assert_eq!(stored.password.params, crate::test_support::test_hash_params());
        t.engine.login("bob", "pw").await.unwrap();

        // Accounts already at the configured cost keep their record
        let alice = t.db.find_by_identifier(ALICE).unwrap().unwrap();
        t.engine.login(ALICE, ALICE_PASSWORD).await.unwrap();
        let after = t.db.find_by_identifier(ALICE).unwrap().unwrap();
        assert_eq!(alice.password, after.password);
    }
}
