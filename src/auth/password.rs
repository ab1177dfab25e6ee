// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Password hashing with Argon2id.
//!
//! ## Security
//!
//! - Argon2id, memory-hard, with a random 16-byte salt per password
//! - Cost parameters are stored next to each hash, so raising the configured
//!   cost never breaks existing credentials
//! - Verification recomputes the hash and compares it in constant time
//! - A stored record that cannot be decoded is reported as
//!   [`AuthError::CorruptCredential`], never as a mismatch
//!
//! Hashing is CPU bound and runs on the blocking pool through
//! [`HashingPool`], gated by a semaphore so a burst of logins cannot occupy
//! every blocking thread.

use std::fmt;
use std::sync::Arc;

use argon2::password_hash::Output;
use argon2::{Algorithm, Argon2, Params, Version};
use base64ct::{Base64, Base64UrlUnpadded, Encoding};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use zeroize::Zeroizing;

use super::AuthError;

/// Length of a freshly generated salt.
pub const SALT_LEN: usize = 16;

/// Argon2 output length.
pub const HASH_LEN: usize = 32;

/// Shortest salt Argon2 accepts.
const MIN_SALT_LEN: usize = 8;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Degree of parallelism
    pub parallelism: u32,
}

impl Default for HashParams {
    /// OWASP baseline for Argon2id: 19 MiB, 2 passes, 1 lane.
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl HashParams {
    fn argon2(&self) -> Result<Argon2<'static>, argon2::Error> {
        let params = Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(HASH_LEN),
        )?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// A password as persisted in the credential store.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPassword {
    /// Base64 Argon2id output
    pub hash: String,
    /// Base64 salt
    pub salt: String,
    /// Parameters the hash was produced with
    pub params: HashParams,
}

impl fmt::Debug for StoredPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredPassword")
            .field("hash", &"<redacted>")
            .field("salt", &"<redacted>")
            .field("params", &self.params)
            .finish()
    }
}

fn corrupt(reason: impl Into<String>) -> AuthError {
    AuthError::CorruptCredential(reason.into())
}

/// One-way salted password hasher.
pub struct PasswordHasher {
    params: HashParams,
    rng: SystemRandom,
}

impl PasswordHasher {
    /// Create a hasher, rejecting parameters Argon2 would refuse.
    pub fn new(params: HashParams) -> Result<Self, AuthError> {
        params
            .argon2()
            .map_err(|e| AuthError::Internal(format!("invalid argon2 parameters: {e}")))?;
        Ok(Self {
            params,
            rng: SystemRandom::new(),
        })
    }

    pub fn params(&self) -> HashParams {
        self.params
    }

    /// Hash a plaintext password with a fresh salt.
    pub fn hash(&self, plaintext: &str) -> Result<StoredPassword, AuthError> {
        let mut salt = [0u8; SALT_LEN];
        self.rng
            .fill(&mut salt)
            .map_err(|_| AuthError::Internal("system RNG unavailable".to_string()))?;

        let argon2 = self
            .params
            .argon2()
            .map_err(|e| AuthError::Internal(format!("invalid argon2 parameters: {e}")))?;

        let mut output = Zeroizing::new([0u8; HASH_LEN]);
        argon2
            .hash_password_into(plaintext.as_bytes(), &salt, &mut output[..])
            .map_err(|e| AuthError::Internal(format!("argon2 hashing failed: {e}")))?;

        Ok(StoredPassword {
            hash: Base64::encode_string(&output[..]),
            salt: Base64::encode_string(&salt),
            params: self.params,
        })
    }

    /// Verify a plaintext password against a stored record.
    ///
    /// Runs the full Argon2 computation and a constant-time comparison
    /// regardless of where the first differing byte is.
    pub fn verify(&self, plaintext: &str, stored: &StoredPassword) -> Result<bool, AuthError> {
        let expected = Base64::decode_vec(&stored.hash)
            .map_err(|_| corrupt("password hash is not valid base64"))?;
        if expected.len() != HASH_LEN {
            return Err(corrupt(format!(
                "password hash has length {}, expected {HASH_LEN}",
                expected.len()
            )));
        }

        let salt =
            Base64::decode_vec(&stored.salt).map_err(|_| corrupt("salt is not valid base64"))?;
        if salt.len() < MIN_SALT_LEN {
            return Err(corrupt(format!("salt has length {}", salt.len())));
        }

        let argon2 = stored
            .params
            .argon2()
            .map_err(|e| corrupt(format!("stored argon2 parameters rejected: {e}")))?;

        let mut computed = Zeroizing::new([0u8; HASH_LEN]);
        argon2
            .hash_password_into(plaintext.as_bytes(), &salt, &mut computed[..])
            .map_err(|e| corrupt(format!("argon2 rejected stored record: {e}")))?;

        // `Output` equality is constant time.
        let expected = Output::new(&expected).map_err(|e| corrupt(e.to_string()))?;
        let computed = Output::new(&computed[..]).map_err(|e| corrupt(e.to_string()))?;
        Ok(expected == computed)
    }
}

/// Bounded executor for password hashing.
///
/// The dummy record uses the configured cost while real accounts verify
/// with the cost stored beside their hash. After raising the cost the two
/// paths differ until each account is rehashed, which
/// [`AuthEngine::login`](super::AuthEngine::login) does on the next
/// successful login.
#[derive(Clone)]
pub struct HashingPool {
    hasher: Arc<PasswordHasher>,
    permits: Arc<Semaphore>,
    dummy: Arc<StoredPassword>,
}

impl HashingPool {
    /// Create a pool allowing `concurrency` hashes in flight.
    ///
    /// Also computes the dummy record used when an account does not exist,
    /// with the same parameters as real hashes so both paths cost the same.
    pub fn new(hasher: PasswordHasher, concurrency: usize) -> Result<Self, AuthError> {
        let mut seed = [0u8; 24];
        hasher
            .rng
            .fill(&mut seed)
            .map_err(|_| AuthError::Internal("system RNG unavailable".to_string()))?;
        let dummy_plaintext = Zeroizing::new(Base64UrlUnpadded::encode_string(&seed));
        let dummy = hasher.hash(&dummy_plaintext)?;

        Ok(Self {
            hasher: Arc::new(hasher),
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            dummy: Arc::new(dummy),
        })
    }

    /// Parameters new hashes are produced with.
    pub fn params(&self) -> HashParams {
        self.hasher.params()
    }

    /// Hash a password off the async workers.
    pub async fn hash(&self, plaintext: &str) -> Result<StoredPassword, AuthError> {
        let plaintext = Zeroizing::new(plaintext.to_string());
        self.run(move |hasher| hasher.hash(&plaintext)).await
    }

    /// Verify a password off the async workers.
    pub async fn verify(
        &self,
        plaintext: &str,
        stored: StoredPassword,
    ) -> Result<bool, AuthError> {
        let plaintext = Zeroizing::new(plaintext.to_string());
        self.run(move |hasher| hasher.verify(&plaintext, &stored))
            .await
    }

    /// Burn one verification against the dummy record.
    pub async fn verify_dummy(&self, plaintext: &str) -> Result<(), AuthError> {
        let _ = self.verify(plaintext, (*self.dummy).clone()).await?;
        Ok(())
    }

    async fn run<T, F>(&self, job: F) -> Result<T, AuthError>
    where
        T: Send + 'static,
        F: FnOnce(&PasswordHasher) -> Result<T, AuthError> + Send + 'static,
    {
        // The permit travels with the blocking job: a caller that gives up
        // does not free the slot while Argon2 is still running.
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| AuthError::Internal("hashing pool closed".to_string()))?;
        let hasher = Arc::clone(&self.hasher);
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job(&hasher)
        })
        .await
            .map_err(|e| AuthError::Internal(format!("hashing task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Small cost so tests stay fast.
    fn test_params() -> HashParams {
        HashParams {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }

    fn hasher() -> PasswordHasher {
        PasswordHasher::new(test_params()).unwrap()
    }

    #[test]
    fn hash_then_verify_accepts_correct_password() {
        let hasher = hasher();
        let stored = hasher.hash("correct horse").unwrap();
        assert!(hasher.verify("correct horse", &stored).unwrap());
        assert!(!hasher.verify("correct horsf", &stored).unwrap());
        assert!(!hasher.verify("", &stored).unwrap());
    }

    #[test]
    fn same_password_gets_distinct_salts() {
        let hasher = hasher();
        let a = hasher.hash("pw").unwrap();
        let b = hasher.hash("pw").unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn verify_uses_stored_parameters() {
        let old = hasher().hash("pw").unwrap();
        let stronger = PasswordHasher::new(HashParams {
            memory_kib: 2048,
            iterations: 2,
            parallelism: 1,
        })
        .unwrap();
        assert!(stronger.verify("pw", &old).unwrap());
    }

    #[test]
    fn malformed_records_are_corrupt_not_mismatch() {
        let hasher = hasher();
        let good = hasher.hash("pw").unwrap();

        let mut bad_hash = good.clone();
        bad_hash.hash = "%%%not-base64%%%".to_string();
        assert!(matches!(
            hasher.verify("pw", &bad_hash),
            Err(AuthError::CorruptCredential(_))
        ));

        let mut short_hash = good.clone();
        short_hash.hash = Base64::encode_string(&[1, 2, 3]);
        assert!(matches!(
            hasher.verify("pw", &short_hash),
            Err(AuthError::CorruptCredential(_))
        ));

        let mut short_salt = good.clone();
        short_salt.salt = Base64::encode_string(&[9, 9]);
        assert!(matches!(
            hasher.verify("pw", &short_salt),
            Err(AuthError::CorruptCredential(_))
        ));

        let mut bad_params = good;
        bad_params.params.iterations = 0;
        assert!(matches!(
            hasher.verify("pw", &bad_params),
            Err(AuthError::CorruptCredential(_))
        ));
    }

    #[test]
    fn invalid_configured_params_are_rejected() {
        let result = PasswordHasher::new(HashParams {
            memory_kib: 1,
            iterations: 1,
            parallelism: 1,
        });
        assert!(matches!(result, Err(AuthError::Internal(_))));
    }

    #[test]
    fn debug_output_redacts_hash_material() {
        let stored = hasher().hash("pw").unwrap();
        let rendered = format!("{stored:?}");
        assert!(!rendered.contains(&stored.hash));
        assert!(rendered.contains("redacted"));
    }

    #[tokio::test]
    async fn pool_verifies_off_thread() {
        let pool = HashingPool::new(hasher(), 2).unwrap();
        let stored = pool.hash("secret").await.unwrap();
        assert!(pool.verify("secret", stored.clone()).await.unwrap());
        assert!(!pool.verify("nope", stored).await.unwrap());
        pool.verify_dummy("anything").await.unwrap();
    }

    #[tokio::test]
    async fn abandoned_verify_keeps_its_slot_until_hashing_ends() {
        let pool = HashingPool::new(hasher(), 1).unwrap();
        let (release, gate) = std::sync::mpsc::channel::<()>();

        let abandoned = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            pool.run(move |_| {
                let _ = gate.recv();
                Ok(())
            }),
        )
        .await;
        assert!(abandoned.is_err());

        // The caller is gone but the blocking job still holds the permit
        assert_eq!(pool.permits.available_permits(), 0);

        release.send(()).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while pool.permits.available_permits() == 0 {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("permit returned once the job finished");
    }
}
