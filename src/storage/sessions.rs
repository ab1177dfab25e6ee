// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session persistence on [`AuthDatabase`].
//!
//! Every mutation runs inside one redb write transaction. redb admits a
//! single writer at a time, which is what makes `compare_and_rotate` an
//! at-most-once operation per stored hash. The sweeper works in bounded
//! batches so it never holds the writer for long.

use std::ops::Bound;

use chrono::{DateTime, Duration, Utc};
use redb::{ReadableDatabase, ReadableTable};

use super::database::{
    account_prefix, account_prefix_end, account_session_key, AuthDatabase, StoreResult,
    ACCOUNT_SESSIONS, REFRESH_INDEX, SESSIONS, SESSION_HASHES,
};
use crate::auth::{
    RevokeReason, RotateOutcome, Session, SessionPolicy, SessionState, SessionStore, SweepReport,
};

/// Sessions examined per sweep transaction.
const SWEEP_BATCH: usize = 256;

impl AuthDatabase {
    /// Sweep the sessions after `cursor` in one write transaction.
    ///
    /// Returns the batch counts and the key to resume from, or `None` once
    /// the table is exhausted.
    fn sweep_batch(
        &self,
        cursor: Option<&str>,
        now: DateTime<Utc>,
        purge_before: DateTime<Utc>,
    ) -> StoreResult<(SweepReport, Option<String>)> {
        let mut report = SweepReport::default();

        let write_txn = self.db().begin_write()?;
        let next = {
            let mut sessions = write_txn.open_table(SESSIONS)?;
            let mut by_account = write_txn.open_table(ACCOUNT_SESSIONS)?;
            let mut refresh = write_txn.open_table(REFRESH_INDEX)?;
            let mut hashes = write_txn.open_multimap_table(SESSION_HASHES)?;

            let lower = match cursor {
                Some(key) => Bound::Excluded(key),
                None => Bound::Unbounded,
            };
            let mut batch = Vec::with_capacity(SWEEP_BATCH);
            for entry in sessions.range::<&str>((lower, Bound::Unbounded))?.take(SWEEP_BATCH) {
                let (_, value) = entry?;
                let session: Session = serde_json::from_slice(value.value())?;
                batch.push(session);
            }
            let next = if batch.len() == SWEEP_BATCH {
                batch.last().map(|session| session.session_id.clone())
            } else {
                None
            };

            for mut session in batch {
                let session_id = session.session_id.clone();
                if !session.revoked && now >= session.expires_at {
                    session.end(RevokeReason::Expired, now);
                    let json = serde_json::to_vec(&session)?;
                    sessions.insert(session_id.as_str(), json.as_slice())?;
                    report.expired += 1;
                }

                if session.revoked_at.is_some_and(|at| at <= purge_before) {
                    sessions.remove(session_id.as_str())?;
                    let index_key = account_session_key(&session.account_id, &session_id);
                    by_account.remove(index_key.as_slice())?;

                    let mut issued = Vec::new();
                    for hash in hashes.remove_all(session_id.as_str())? {
                        issued.push(hash?.value().to_string());
                    }
                    for hash in &issued {
                        refresh.remove(hash.as_str())?;
                    }
                    report.purged += 1;
                }
            }
            next
        };
        write_txn.commit()?;
        Ok((report, next))
    }
}

impl SessionStore for AuthDatabase {
    fn insert_session(&self, session: &Session) -> StoreResult<()> {
        let json = serde_json::to_vec(session)?;
        let session_id = session.session_id.as_str();
        let index_key = account_session_key(&session.account_id, session_id);

        let write_txn = self.db().begin_write()?;
        {
            let mut sessions = write_txn.open_table(SESSIONS)?;
            sessions.insert(session_id, json.as_slice())?;

            let mut refresh = write_txn.open_table(REFRESH_INDEX)?;
            refresh.insert(session.refresh_hash.as_str(), session_id)?;

            let mut hashes = write_txn.open_multimap_table(SESSION_HASHES)?;
            hashes.insert(session_id, session.refresh_hash.as_str())?;

            let mut by_account = write_txn.open_table(ACCOUNT_SESSIONS)?;
            by_account.insert(index_key.as_slice(), session_id)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn get_session(&self, session_id: &str) -> StoreResult<Option<Session>> {
        let read_txn = self.db().begin_read()?;
        let table = read_txn.open_table(SESSIONS)?;
        match table.get(session_id)? {
            Some(value) => {
                let session: Session = serde_json::from_slice(value.value())?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    fn find_by_refresh_hash(&self, refresh_hash: &str) -> StoreResult<Option<String>> {
        let read_txn = self.db().begin_read()?;
        let table = read_txn.open_table(REFRESH_INDEX)?;
        Ok(table.get(refresh_hash)?.map(|value| value.value().to_string()))
    }

    fn compare_and_rotate(
        &self,
        session_id: &str,
        expected_hash: &str,
        new_hash: &str,
        policy: &SessionPolicy,
        now: DateTime<Utc>,
    ) -> StoreResult<RotateOutcome> {
        let write_txn = self.db().begin_write()?;
        let outcome = {
            let mut sessions = write_txn.open_table(SESSIONS)?;
            let mut refresh = write_txn.open_table(REFRESH_INDEX)?;

            let existing_bytes = match sessions.get(session_id)? {
                Some(value) => value.value().to_vec(),
                None => return Ok(RotateOutcome::NotFound),
            };
            let mut session: Session = serde_json::from_slice(&existing_bytes)?;

            match session.state(now) {
                SessionState::Revoked => RotateOutcome::Revoked,
                SessionState::Expired => {
                    // Record the transition the first time somebody notices
                    if session.end(RevokeReason::Expired, now) {
                        let json = serde_json::to_vec(&session)?;
                        sessions.insert(session_id, json.as_slice())?;
                    }
                    RotateOutcome::Expired
                }
                SessionState::Active if session.refresh_hash == expected_hash => {
                    session.apply_rotation(new_hash.to_string(), now, policy);
                    let json = serde_json::to_vec(&session)?;
                    sessions.insert(session_id, json.as_slice())?;
                    refresh.insert(new_hash, session_id)?;
                    let mut hashes = write_txn.open_multimap_table(SESSION_HASHES)?;
                    hashes.insert(session_id, new_hash)?;
                    RotateOutcome::Rotated(session)
                }
                SessionState::Active => {
                    let issued_here = refresh
                        .get(expected_hash)?
                        .is_some_and(|owner| owner.value() == session_id);
                    if issued_here {
                        // Replay: revoke in the same transaction that detected it
                        session.end(RevokeReason::ReplayDetected, now);
                        let json = serde_json::to_vec(&session)?;
                        sessions.insert(session_id, json.as_slice())?;
                        RotateOutcome::Stale
                    } else {
                        RotateOutcome::NotFound
                    }
                }
            }
        };
        write_txn.commit()?;
        Ok(outcome)
    }

    fn revoke_session(
        &self,
        session_id: &str,
        reason: RevokeReason,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let write_txn = self.db().begin_write()?;
        let changed = {
            let mut sessions = write_txn.open_table(SESSIONS)?;

            let existing_bytes = match sessions.get(session_id)? {
                Some(value) => value.value().to_vec(),
                None => return Ok(false),
            };
            let mut session: Session = serde_json::from_slice(&existing_bytes)?;

            let changed = session.end(reason, at);
            if changed {
                let json = serde_json::to_vec(&session)?;
                sessions.insert(session_id, json.as_slice())?;
            }
            changed
        };
        write_txn.commit()?;
        Ok(changed)
    }

    fn sessions_for_account(&self, account_id: &str) -> StoreResult<Vec<Session>> {
        let read_txn = self.db().begin_read()?;
        let by_account = read_txn.open_table(ACCOUNT_SESSIONS)?;
        let sessions = read_txn.open_table(SESSIONS)?;

        let start = account_prefix(account_id);
        let end = account_prefix_end(account_id);

        let mut results = Vec::new();
        for entry in by_account.range(start.as_slice()..end.as_slice())? {
            let (_, session_id) = entry?;
            if let Some(value) = sessions.get(session_id.value())? {
                let session: Session = serde_json::from_slice(value.value())?;
                results.push(session);
            }
        }
        Ok(results)
    }

    fn sweep_sessions(
        &self,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> StoreResult<SweepReport> {
        let purge_before = now - retention;
        let mut report = SweepReport::default();
        let mut cursor: Option<String> = None;

        loop {
            let (batch, next) = self.sweep_batch(cursor.as_deref(), now, purge_before)?;
            report.expired += batch.expired;
            report.purged += batch.purged;
            match next {
                Some(key) => cursor = Some(key),
                None => return Ok(report),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn session(id: &str, account: &str, hash: &str) -> Session {
        Session {
            session_id: id.to_string(),
            account_id: account.to_string(),
            refresh_hash: hash.to_string(),
            issued_at: t0(),
            expires_at: t0() + Duration::days(1),
            revoked: false,
            revoked_at: None,
            revoke_reason: None,
            rotation_counter: 0,
            last_rotated_at: None,
        }
    }

    fn policy() -> SessionPolicy {
        SessionPolicy {
            refresh_ttl: Duration::days(1),
            max_lifetime: Duration::days(7),
        }
    }

    #[test]
    fn insert_indexes_hash_and_account() {
        let db = AuthDatabase::in_memory().unwrap();
        db.insert_session(&session("s1", "alice", "h1")).unwrap();

        assert_eq!(db.get_session("s1").unwrap().unwrap().account_id, "alice");
        assert_eq!(db.find_by_refresh_hash("h1").unwrap().as_deref(), Some("s1"));
        assert_eq!(db.sessions_for_account("alice").unwrap().len(), 1);
        assert!(db.sessions_for_account("alic").unwrap().is_empty());
        assert!(db.get_session("nope").unwrap().is_none());
    }

    #[test]
    fn compare_and_rotate_succeeds_once_per_hash() {
        let db = AuthDatabase::in_memory().unwrap();
        db.insert_session(&session("s1", "alice", "h1")).unwrap();

        let rotated = match db.compare_and_rotate("s1", "h1", "h2", &policy(), t0()).unwrap() {
            RotateOutcome::Rotated(session) => session,
            other => panic!("expected rotation, got {other:?}"),
        };
        assert_eq!(rotated.refresh_hash, "h2");
        assert_eq!(rotated.rotation_counter, 1);

        let foreign = db.compare_and_rotate("s1", "zzz", "h4", &policy(), t0()).unwrap();
        assert_eq!(foreign, RotateOutcome::NotFound);

        let second = db.compare_and_rotate("s1", "h1", "h3", &policy(), t0()).unwrap();
        assert_eq!(second, RotateOutcome::Stale);
        assert!(db.find_by_refresh_hash("h3").unwrap().is_none());

        let missing = db.compare_and_rotate("s9", "h1", "h5", &policy(), t0()).unwrap();
        assert_eq!(missing, RotateOutcome::NotFound);
    }

    #[test]
    fn compare_and_rotate_reports_terminal_states() {
        let db = AuthDatabase::in_memory().unwrap();
        db.insert_session(&session("s1", "alice", "h1")).unwrap();
        db.insert_session(&session("s2", "alice", "h2")).unwrap();

        assert!(db.revoke_session("s1", RevokeReason::Logout, t0()).unwrap());
        assert_eq!(
            db.compare_and_rotate("s1", "h1", "x", &policy(), t0()).unwrap(),
            RotateOutcome::Revoked
        );

        let later = t0() + Duration::days(2);
        assert_eq!(
            db.compare_and_rotate("s2", "h2", "y", &policy(), later).unwrap(),
            RotateOutcome::Expired
        );
        let stored = db.get_session("s2").unwrap().unwrap();
        assert_eq!(stored.revoke_reason, Some(RevokeReason::Expired));
        assert_eq!(stored.revoked_at, Some(later));
    }

    #[test]
    fn revoke_reports_only_the_first_transition() {
        let db = AuthDatabase::in_memory().unwrap();
        db.insert_session(&session("s1", "alice", "h1")).unwrap();

        assert!(db.revoke_session("s1", RevokeReason::Logout, t0()).unwrap());
        assert!(!db
            .revoke_session("s1", RevokeReason::Administrative, t0())
            .unwrap());
        assert!(!db.revoke_session("missing", RevokeReason::Logout, t0()).unwrap());

        let stored = db.get_session("s1").unwrap().unwrap();
        assert_eq!(stored.revoke_reason, Some(RevokeReason::Logout));
    }

    #[test]
    fn sweep_flags_expired_then_purges_after_retention() {
        let db = AuthDatabase::in_memory().unwrap();
        db.insert_session(&session("old", "alice", "h-old")).unwrap();
        db.compare_and_rotate("old", "h-old", "h-old-2", &policy(), t0())
            .unwrap();
        let mut fresh = session("fresh", "alice", "h-fresh");
        fresh.expires_at = t0() + Duration::days(30);
        db.insert_session(&fresh).unwrap();

        let after_expiry = t0() + Duration::days(2);
        let report = db.sweep_sessions(after_expiry, Duration::hours(1)).unwrap();
        assert_eq!(report, SweepReport { expired: 1, purged: 0 });
        assert_eq!(
            db.get_session("old").unwrap().unwrap().state(after_expiry),
            SessionState::Expired
        );

        // Running again changes nothing until the retention window passes
        let report = db.sweep_sessions(after_expiry, Duration::hours(1)).unwrap();
        assert_eq!(report, SweepReport::default());

        let report = db
            .sweep_sessions(after_expiry + Duration::hours(1), Duration::hours(1))
            .unwrap();
        assert_eq!(report, SweepReport { expired: 0, purged: 1 });
        assert!(db.get_session("old").unwrap().is_none());
        assert!(db.find_by_refresh_hash("h-old").unwrap().is_none());
        assert!(db.find_by_refresh_hash("h-old-2").unwrap().is_none());

        let remaining = db.sessions_for_account("alice").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].session_id, "fresh");
        assert_eq!(db.find_by_refresh_hash("h-fresh").unwrap().as_deref(), Some("fresh"));
    }

    #[test]
    fn replayed_hash_revokes_in_the_same_write() {
        let db = AuthDatabase::in_memory().unwrap();
        db.insert_session(&session("s1", "alice", "h1")).unwrap();
        db.compare_and_rotate("s1", "h1", "h2", &policy(), t0())
            .unwrap();

        let replay_at = t0() + Duration::minutes(1);
        assert_eq!(
            db.compare_and_rotate("s1", "h1", "h3", &policy(), replay_at)
                .unwrap(),
            RotateOutcome::Stale
        );

        // No separate revoke call: the store already ended the session
        let stored = db.get_session("s1").unwrap().unwrap();
        assert_eq!(stored.revoke_reason, Some(RevokeReason::ReplayDetected));
        assert_eq!(stored.revoked_at, Some(replay_at));

        // The holder of the current hash cannot slip in one more rotation
        assert_eq!(
            db.compare_and_rotate("s1", "h2", "h4", &policy(), replay_at)
                .unwrap(),
            RotateOutcome::Revoked
        );
    }

    #[test]
    fn sweep_covers_sessions_across_batches() {
        let db = AuthDatabase::in_memory().unwrap();
        let total = SWEEP_BATCH * 2 + 3;
        for i in 0..total {
            let id = format!("s{i:04}");
            db.insert_session(&session(&id, "alice", &format!("h{i:04}")))
                .unwrap();
        }
        db.compare_and_rotate("s0000", "h0000", "h0000-b", &policy(), t0())
            .unwrap();

        let after_expiry = t0() + Duration::days(2);
        let report = db.sweep_sessions(after_expiry, Duration::hours(1)).unwrap();
        assert_eq!(report, SweepReport { expired: total, purged: 0 });

        let report = db
            .sweep_sessions(after_expiry + Duration::hours(1), Duration::hours(1))
            .unwrap();
        assert_eq!(report, SweepReport { expired: 0, purged: total });

        assert!(db.sessions_for_account("alice").unwrap().is_empty());
        assert!(db.find_by_refresh_hash("h0000").unwrap().is_none());
        assert!(db.find_by_refresh_hash("h0000-b").unwrap().is_none());
        let last = format!("h{:04}", total - 1);
        assert!(db.find_by_refresh_hash(&last).unwrap().is_none());
    }
}
