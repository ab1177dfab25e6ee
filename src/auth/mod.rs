// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Password login, short-lived access tokens and rotating refresh tokens.
//!
//! ## Auth Flow
//!
//! 1. Client sends identifier and password to `POST /login`
//! 2. Server verifies the Argon2id hash, opens a session and returns:
//!    - an HS256 access token (`sub` = account, `sid` = session)
//!    - an opaque refresh token, stored only as an HMAC
//! 3. Client sends `Authorization: Bearer <access token>` on every request
//! 4. Before expiry the client trades its refresh token at `POST /refresh`;
//!    the old refresh token stops working at that moment
//!
//! ## Security
//!
//! - Unknown accounts cost the same hashing work as wrong passwords
//! - Every authentication failure produces the same 401 body
//! - A rotated refresh token presented again revokes its whole session
//! - Access tokens are only accepted while their session is live

pub mod claims;
pub mod clock;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod middleware;
pub mod password;
pub mod session;
pub mod tokens;

pub use claims::{AccessClaims, AuthenticatedAccount};
pub use clock::{Clock, SystemClock};
pub use credentials::{
    normalize_identifier, Account, AccountStatus, CredentialStore, FailedLogin, LockoutPolicy,
};
pub use engine::{AuthEngine, EnginePolicy, IssuedTokens};
pub use error::AuthError;
pub use extractor::Auth;
pub use password::{HashParams, HashingPool, PasswordHasher, StoredPassword};
pub use session::{
    RevokeReason, RotateOutcome, Session, SessionManager, SessionPolicy, SessionState,
    SessionStore, SweepReport,
};
pub use tokens::{KeyRing, SigningKey, TokenIssuer};
