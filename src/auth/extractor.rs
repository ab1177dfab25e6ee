// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractor for authenticated accounts.
//!
//! Use the `Auth` extractor in handlers to require authentication:
//!
//! ```rust,ignore
//! async fn my_handler(Auth(account): Auth) -> impl IntoResponse {
//!     // account is AuthenticatedAccount
//! }
//! ```

use axum::{extract::FromRequestParts, http::request::Parts};

use super::middleware::bearer_token;
use super::{AuthError, AuthenticatedAccount};
use crate::state::AppState;

/// Extractor for authenticated accounts.
///
/// Reuses the identity set by [`require_auth`](super::middleware::require_auth)
/// when the route sits behind it, and authenticates the bearer token itself
/// otherwise.
pub struct Auth(pub AuthenticatedAccount);

impl FromRequestParts<AppState> for Auth {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        // First check if middleware already set the account
        if let Some(account) = parts.extensions.get::<AuthenticatedAccount>().cloned() {
            return Ok(Auth(account));
        }

        let token = bearer_token(&parts.headers).ok_or(AuthError::TokenInvalid)?;
        let account = state.engine.authenticate(token)?;

        Ok(Auth(account))
    }
}
