// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session lifecycle: creation, refresh-token rotation, replay detection,
//! revocation and expiry.
//!
//! ## State Machine
//!
//! ```text
//! Active ──rotate──▶ Active (rotation_counter + 1)
//!   │
//!   ├──logout / replay / admin──▶ Revoked   (terminal)
//!   └──TTL passed────────────────▶ Expired   (terminal)
//! ```
//!
//! ## Rotation
//!
//! Rotation is a compare-and-replace in the store, keyed by the hash the
//! caller presented. Two concurrent rotations of the same hash cannot both
//! win. The loser presents a hash that is no longer current but was issued
//! to this session, which is exactly what a replayed stolen token looks
//! like, so the session is revoked.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::tokens::TokenIssuer;
use super::AuthError;
use crate::storage::{StoreError, StoreResult};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevokeReason {
    Logout,
    ReplayDetected,
    Expired,
    Administrative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Revoked,
    Expired,
}

/// Server-side session record. One per successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub account_id: String,
    /// Hash of the only refresh token currently accepted
    pub refresh_hash: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revoke_reason: Option<RevokeReason>,
    pub rotation_counter: u64,
    #[serde(default)]
    pub last_rotated_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn state(&self, now: DateTime<Utc>) -> SessionState {
        match (self.revoked, self.revoke_reason) {
            (true, Some(RevokeReason::Expired)) => SessionState::Expired,
            (true, _) => SessionState::Revoked,
            (false, _) if now >= self.expires_at => SessionState::Expired,
            (false, _) => SessionState::Active,
        }
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.state(now) == SessionState::Active
    }

    /// Mark the session ended. Returns false if it already was.
    pub fn end(&mut self, reason: RevokeReason, at: DateTime<Utc>) -> bool {
        if self.revoked {
            return false;
        }
        self.revoked = true;
        self.revoked_at = Some(at);
        self.revoke_reason = Some(reason);
        true
    }

    /// Install a new refresh hash and slide the expiry window.
    pub fn apply_rotation(
        &mut self,
        refresh_hash: String,
        now: DateTime<Utc>,
        policy: &SessionPolicy,
    ) {
        self.refresh_hash = refresh_hash;
        self.rotation_counter += 1;
        self.last_rotated_at = Some(now);
        self.expires_at = policy.expiry_for(self.issued_at, now);
    }
}

/// Session lifetime settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    /// Lifetime of each refresh token
    pub refresh_ttl: Duration,
    /// Absolute cap measured from login
    pub max_lifetime: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            refresh_ttl: Duration::days(14),
            max_lifetime: Duration::days(30),
        }
    }
}

impl SessionPolicy {
    pub fn expiry_for(&self, issued_at: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
        (now + self.refresh_ttl).min(issued_at + self.max_lifetime)
    }
}

/// What the store found when asked to rotate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotateOutcome {
    /// Hash matched and was replaced
    Rotated(Session),
    /// Hash was issued to this session earlier but is no longer current.
    /// The store has already revoked the session as `ReplayDetected`.
    Stale,
    /// Session already ended
    Revoked,
    /// Session passed its expiry; it has been marked expired
    Expired,
    /// No such session, or the hash never belonged to it
    NotFound,
}

/// Counts from one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions newly flagged as expired
    pub expired: usize,
    /// Ended sessions deleted after the retention window
    pub purged: usize,
}

/// Persistence interface for sessions.
///
/// `compare_and_rotate` must be a single isolated operation: read, compare
/// and replace happen atomically with respect to every other writer. A
/// replayed hash is revoked inside that same operation.
pub trait SessionStore: Send + Sync {
    fn insert_session(&self, session: &Session) -> StoreResult<()>;

    fn get_session(&self, session_id: &str) -> StoreResult<Option<Session>>;

    /// Session that was ever issued `refresh_hash`.
    fn find_by_refresh_hash(&self, refresh_hash: &str) -> StoreResult<Option<String>>;

    fn compare_and_rotate(
        &self,
        session_id: &str,
        expected_hash: &str,
        new_hash: &str,
        policy: &SessionPolicy,
        now: DateTime<Utc>,
    ) -> StoreResult<RotateOutcome>;

    /// End a session. Returns false if it was already ended or missing.
    fn revoke_session(
        &self,
        session_id: &str,
        reason: RevokeReason,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    fn sessions_for_account(&self, account_id: &str) -> StoreResult<Vec<Session>>;

    /// Flag expired sessions and delete those ended before `now - retention`.
    fn sweep_sessions(&self, now: DateTime<Utc>, retention: Duration) -> StoreResult<SweepReport>;
}

/// Session errors. Internal only; the engine collapses them for callers.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,
    #[error("session expired")]
    Expired,
    #[error("session revoked")]
    Revoked,
    #[error("refresh token replay detected")]
    ReplayDetected,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Issuer(#[from] AuthError),
}

impl From<SessionError> for AuthError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound | SessionError::Revoked => AuthError::TokenInvalid,
            SessionError::Expired => AuthError::TokenExpired,
            SessionError::ReplayDetected => AuthError::TokenReplayed,
            SessionError::Store(e) => e.into(),
            SessionError::Issuer(e) => e,
        }
    }
}

/// A session together with the refresh token plaintext for the client.
#[derive(Debug)]
pub struct IssuedSession {
    pub session: Session,
    pub refresh_token: String,
}

/// Drives session state transitions over a [`SessionStore`].
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    issuer: Arc<TokenIssuer>,
    policy: SessionPolicy,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        issuer: Arc<TokenIssuer>,
        policy: SessionPolicy,
    ) -> Self {
        Self {
            store,
            issuer,
            policy,
        }
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    /// Start a session for `account_id` with a fresh refresh token.
    pub fn create(&self, account_id: &str, now: DateTime<Utc>) -> Result<IssuedSession, AuthError> {
        let refresh = self.issuer.issue_refresh_token()?;
        let session = Session {
            session_id: uuid::Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            refresh_hash: refresh.hash,
            issued_at: now,
            expires_at: self.policy.expiry_for(now, now),
            revoked: false,
            revoked_at: None,
            revoke_reason: None,
            rotation_counter: 0,
            last_rotated_at: None,
        };
        self.store.insert_session(&session)?;

        info!(session_id = %session.session_id, account_id, "Session created");
        Ok(IssuedSession {
            session,
            refresh_token: refresh.plaintext,
        })
    }

    /// Map a presented refresh hash to the session it was issued to.
    pub fn resolve_refresh(&self, refresh_hash: &str) -> Result<String, SessionError> {
        self.store
            .find_by_refresh_hash(refresh_hash)?
            .ok_or(SessionError::NotFound)
    }

    /// Rotate the refresh token of `session_id`.
    ///
    /// Succeeds at most once per stored hash. Presenting a hash that was
    /// already rotated away revokes the session.
    pub fn rotate(
        &self,
        session_id: &str,
        presented_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedSession, SessionError> {
        let replacement = self.issuer.issue_refresh_token()?;
        let outcome = self.store.compare_and_rotate(
            session_id,
            presented_hash,
            &replacement.hash,
            &self.policy,
            now,
        )?;

        match outcome {
            RotateOutcome::Rotated(session) => Ok(IssuedSession {
                session,
                refresh_token: replacement.plaintext,
            }),
            RotateOutcome::Stale => {
                warn!(session_id, "Refresh token replay detected, session revoked");
                Err(SessionError::ReplayDetected)
            }
            RotateOutcome::Revoked => Err(SessionError::Revoked),
            RotateOutcome::Expired => Err(SessionError::Expired),
            RotateOutcome::NotFound => Err(SessionError::NotFound),
        }
    }

    /// End a session. Idempotent.
    pub fn revoke(
        &self,
        session_id: &str,
        reason: RevokeReason,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        if self.store.revoke_session(session_id, reason, now)? {
            info!(session_id, reason = ?reason, "Session revoked");
        }
        Ok(())
    }

    /// True iff the session exists, is not revoked and has not expired.
    pub fn is_live(&self, session_id: &str, now: DateTime<Utc>) -> Result<bool, AuthError> {
        Ok(self
            .store
            .get_session(session_id)?
            .is_some_and(|session| session.is_live(now)))
    }

    pub fn get(&self, session_id: &str) -> Result<Option<Session>, AuthError> {
        Ok(self.store.get_session(session_id)?)
    }

    /// Live sessions of an account, newest first.
    pub fn list_live(
        &self,
        account_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, AuthError> {
        let mut sessions: Vec<Session> = self
            .store
            .sessions_for_account(account_id)?
            .into_iter()
            .filter(|session| session.is_live(now))
            .collect();
        sessions.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        Ok(sessions)
    }

    /// End every session of an account. Returns how many were live.
    pub fn revoke_all(
        &self,
        account_id: &str,
        reason: RevokeReason,
        now: DateTime<Utc>,
    ) -> Result<usize, AuthError> {
        let mut revoked = 0;
        for session in self.store.sessions_for_account(account_id)? {
            if self.store.revoke_session(&session.session_id, reason, now)? {
                revoked += 1;
            }
        }
        if revoked > 0 {
            info!(account_id, revoked, reason = ?reason, "Sessions revoked");
        }
        Ok(revoked)
    }

    pub fn sweep(&self, now: DateTime<Utc>, retention: Duration) -> Result<SweepReport, AuthError> {
        Ok(self.store.sweep_sessions(now, retention)?)
    }
}
