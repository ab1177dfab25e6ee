// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Access and refresh token issuance.
//!
//! ## Access tokens
//!
//! HS256 JWTs carrying [`AccessClaims`]. The header `kid` selects the key
//! from the [`KeyRing`]: the current key signs every new token, a previous
//! key keeps verifying until its grace deadline so a rotation does not log
//! everybody out.
//!
//! ## Refresh tokens
//!
//! 32 random bytes, base64url. Only `HMAC-SHA256(pepper, token)` is ever
//! persisted, so a dump of the session table cannot be replayed.

use std::fmt;

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use jsonwebtoken::{
    decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::Sha256;
use zeroize::Zeroizing;

use super::claims::{AccessClaims, AuthenticatedAccount};
use super::AuthError;

type HmacSha256 = Hmac<Sha256>;

/// Minimum HS256 key length.
pub const MIN_KEY_LEN: usize = 32;

/// Random bytes in a refresh token.
const REFRESH_TOKEN_BYTES: usize = 32;

/// Only algorithm accepted on inbound tokens.
const SIGNING_ALGORITHM: Algorithm = Algorithm::HS256;

/// Named HS256 secret.
pub struct SigningKey {
    kid: String,
    secret: Zeroizing<Vec<u8>>,
}

impl SigningKey {
    pub fn new(kid: impl Into<String>, secret: Vec<u8>) -> Result<Self, AuthError> {
        let kid = kid.into();
        if kid.is_empty() {
            return Err(AuthError::Internal("signing key id is empty".to_string()));
        }
        if secret.len() < MIN_KEY_LEN {
            return Err(AuthError::Internal(format!(
                "signing key {kid} is {} bytes, need at least {MIN_KEY_LEN}",
                secret.len()
            )));
        }
        Ok(Self {
            kid,
            secret: Zeroizing::new(secret),
        })
    }

    /// Random key for deployments that did not configure one.
    pub fn generate(kid: impl Into<String>) -> Result<Self, AuthError> {
        let mut secret = vec![0u8; MIN_KEY_LEN];
        SystemRandom::new()
            .fill(&mut secret)
            .map_err(|_| AuthError::Internal("system RNG unavailable".to_string()))?;
        Self::new(kid, secret)
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug)]
struct RetiredKey {
    key: SigningKey,
    verify_until: DateTime<Utc>,
}

/// Immutable set of signing keys, built once at startup.
#[derive(Debug)]
pub struct KeyRing {
    current: SigningKey,
    previous: Option<RetiredKey>,
}

impl KeyRing {
    pub fn new(current: SigningKey) -> Self {
        Self {
            current,
            previous: None,
        }
    }

    /// Keep verifying tokens signed by `key` until `verify_until`.
    pub fn with_previous(mut self, key: SigningKey, verify_until: DateTime<Utc>) -> Self {
        self.previous = Some(RetiredKey { key, verify_until });
        self
    }

    pub fn current(&self) -> &SigningKey {
        &self.current
    }

    fn verification_key(&self, kid: &str, now: DateTime<Utc>) -> Option<&SigningKey> {
        if self.current.kid == kid {
            return Some(&self.current);
        }
        self.previous
            .as_ref()
            .filter(|retired| retired.key.kid == kid && now < retired.verify_until)
            .map(|retired| &retired.key)
    }
}

/// A signed access token and its expiry.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// A freshly minted refresh token. `plaintext` goes to the client once.
pub struct RefreshToken {
    pub plaintext: String,
    pub hash: String,
}

impl fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshToken")
            .field("plaintext", &"<redacted>")
            .field("hash", &self.hash)
            .finish()
    }
}

/// Mints and verifies tokens.
pub struct TokenIssuer {
    keys: KeyRing,
    issuer: String,
    access_ttl: Duration,
    refresh_mac: HmacSha256,
    rng: SystemRandom,
}

impl TokenIssuer {
    pub fn new(
        keys: KeyRing,
        issuer: impl Into<String>,
        access_ttl: Duration,
        refresh_pepper: &[u8],
    ) -> Result<Self, AuthError> {
        if access_ttl <= Duration::zero() {
            return Err(AuthError::Internal("access token TTL must be positive".to_string()));
        }
        let refresh_mac = HmacSha256::new_from_slice(refresh_pepper)
            .map_err(|e| AuthError::Internal(format!("invalid refresh pepper: {e}")))?;
        Ok(Self {
            keys,
            issuer: issuer.into(),
            access_ttl,
            refresh_mac,
            rng: SystemRandom::new(),
        })
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    /// Sign an access token for `account_id` bound to `session_id`.
    pub fn issue_access_token(
        &self,
        account_id: &str,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<AccessToken, AuthError> {
        let expires_at = now + self.access_ttl;
        let claims = AccessClaims {
            sub: account_id.to_string(),
            sid: session_id.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            iss: self.issuer.clone(),
            jti: uuid::Uuid::new_v4().to_string(),
        };

        let key = self.keys.current();
        let mut header = Header::new(SIGNING_ALGORITHM);
        header.kid = Some(key.kid.clone());

        let token = encode(&header, &claims, &EncodingKey::from_secret(&key.secret))
            .map_err(|e| AuthError::Internal(format!("failed to sign access token: {e}")))?;

        Ok(AccessToken { token, expires_at })
    }

    /// Generate a refresh token and its storable hash.
    pub fn issue_refresh_token(&self) -> Result<RefreshToken, AuthError> {
        let mut bytes = Zeroizing::new([0u8; REFRESH_TOKEN_BYTES]);
        self.rng
            .fill(&mut bytes[..])
            .map_err(|_| AuthError::Internal("system RNG unavailable".to_string()))?;
        let plaintext = Base64UrlUnpadded::encode_string(&bytes[..]);
        let hash = self.hash_refresh_token(&plaintext);
        Ok(RefreshToken { plaintext, hash })
    }

    /// Keyed hash under which a refresh token is stored and looked up.
    pub fn hash_refresh_token(&self, plaintext: &str) -> String {
        let mut mac = self.refresh_mac.clone();
        mac.update(plaintext.as_bytes());
        Base64UrlUnpadded::encode_string(&mac.finalize().into_bytes())
    }

    /// Verify signature, issuer and expiry of an access token.
    ///
    /// Pure computation; session liveness is checked by the caller.
    /// A token is expired from the second named in `exp` onwards.
    pub fn verify_access_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<AuthenticatedAccount, AuthError> {
        let header = decode_header(token).map_err(|_| AuthError::TokenInvalid)?;
        if header.alg != SIGNING_ALGORITHM {
            return Err(AuthError::TokenInvalid);
        }
        let kid = header.kid.ok_or(AuthError::TokenInvalid)?;
        let key = self
            .keys
            .verification_key(&kid, now)
            .ok_or(AuthError::TokenInvalid)?;

        let mut validation = Validation::new(SIGNING_ALGORITHM);
        // Expiry is checked below against the injected clock.
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        let token_data =
            decode::<AccessClaims>(token, &DecodingKey::from_secret(&key.secret), &validation)
                .map_err(|_| AuthError::TokenInvalid)?;

        if now.timestamp() >= token_data.claims.exp {
            return Err(AuthError::TokenExpired);
        }

        Ok(token_data.claims.into())
    }
}
