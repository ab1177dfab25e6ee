// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared fixtures for unit tests.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};

use crate::auth::clock::ManualClock;
use crate::auth::tokens::MIN_KEY_LEN;
use crate::auth::{
    Account, AuthEngine, EnginePolicy, HashParams, HashingPool, KeyRing, PasswordHasher,
    SigningKey, TokenIssuer,
};
use crate::state::AppState;
use crate::storage::AuthDatabase;

pub const ALICE: &str = "alice";
pub const ALICE_PASSWORD: &str = "correct";

/// Small Argon2 cost so tests stay fast.
pub fn test_hash_params() -> HashParams {
    HashParams {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    }
}

pub struct TestEngine {
    pub engine: Arc<AuthEngine>,
    pub db: Arc<AuthDatabase>,
    pub clock: Arc<ManualClock>,
}

/// Engine over a fresh in-memory database holding one account, `alice`.
pub fn engine_with(policy: EnginePolicy) -> TestEngine {
    let db = Arc::new(AuthDatabase::in_memory().unwrap());
    engine_over(db, policy)
}

pub fn engine_over(db: Arc<AuthDatabase>, policy: EnginePolicy) -> TestEngine {
    let clock = Arc::new(ManualClock::at(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));

    let seed_hasher = PasswordHasher::new(test_hash_params()).unwrap();
    let alice = Account::new(ALICE, seed_hasher.hash(ALICE_PASSWORD).unwrap(), Utc::now());
    db.insert_account(&alice).unwrap();

    let keys = KeyRing::new(SigningKey::new("test", vec![42; MIN_KEY_LEN]).unwrap());
    let issuer = TokenIssuer::new(keys, "relational-auth", Duration::minutes(15), b"test-pepper")
        .unwrap();
    let hashing = HashingPool::new(PasswordHasher::new(test_hash_params()).unwrap(), 4).unwrap();

    let engine = AuthEngine::new(db.clone(), db.clone(), issuer, hashing, policy)
        .with_clock(clock.clone());

    TestEngine {
        engine: Arc::new(engine),
        db,
        clock,
    }
}

/// Application state over a [`TestEngine`].
pub fn test_state() -> (AppState, TestEngine) {
    let t = engine_with(EnginePolicy::default());
    let state = AppState {
        engine: Arc::clone(&t.engine),
        database: Arc::clone(&t.db),
    };
    (state, t)
}
