// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relational Auth - Credential and Session Service
//!
//! Password login, short-lived access tokens and rotating refresh tokens
//! with replay detection, backed by a single redb file.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Password hashing, tokens, sessions and the auth engine
//! - `config` - Environment configuration
//! - `storage` - Transactional account and session storage (redb)
//! - `sweeper` - Background expiry of stale sessions

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod server;
pub mod state;
pub mod storage;
pub mod sweeper;

#[cfg(test)]
mod test_support;
