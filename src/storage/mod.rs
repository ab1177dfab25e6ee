// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Accounts and sessions live in a single embedded redb database under
//! `DATA_DIR`. The database file is the only persistent state of the
//! service.
//!
//! ## Layout
//!
//! ```text
//! $DATA_DIR/
//!   auth.redb     # accounts, sessions, refresh index, per-account index
//! ```
//!
//! ## Important Notes
//!
//! - Only refresh-token hashes are stored, never the tokens themselves
//! - Password hashes carry their own Argon2 parameters
//! - Every read-check-write sequence is a single write transaction

mod accounts;
mod database;
mod sessions;

pub use database::{AuthDatabase, StoreError, StoreResult};

/// Database file name inside the data directory.
pub const DATABASE_FILE: &str = "auth.redb";
