// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Access token claims and authenticated account representation.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Claims carried by an access token.
///
/// The token is self-contained: signature, issuer and expiry are enough to
/// verify it. `sid` links it to the session used for liveness checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (normalized account identifier)
    pub sub: String,

    /// Session ID
    pub sid: String,

    /// Issued at timestamp
    pub iat: i64,

    /// Expiration timestamp
    pub exp: i64,

    /// Issuer
    pub iss: String,

    /// Unique token ID
    pub jti: String,
}

/// Authenticated account information extracted from an access token.
///
/// This is the identity injected into request extensions for protected
/// handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AuthenticatedAccount {
    /// Normalized account identifier
    pub account_id: String,

    /// Session the access token belongs to
    pub session_id: String,

    /// Token expiration (Unix timestamp)
    pub expires_at: i64,
}

impl From<AccessClaims> for AuthenticatedAccount {
    fn from(claims: AccessClaims) -> Self {
        Self {
            account_id: claims.sub,
            session_id: claims.sid,
            expires_at: claims.exp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_claims_keeps_subject_session_and_expiry() {
        let claims = AccessClaims {
            sub: "alice".to_string(),
            sid: "sess_abc".to_string(),
            iat: 1_700_000_000,
            exp: 1_700_000_900,
            iss: "relational-auth".to_string(),
            jti: "jti-1".to_string(),
        };

        let account = AuthenticatedAccount::from(claims);
        assert_eq!(account.account_id, "alice");
        assert_eq!(account.session_id, "sess_abc");
        assert_eq!(account.expires_at, 1_700_000_900);
    }
}
