// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded credential and session database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `accounts`: normalized identifier → serialized [`Account`](crate::auth::Account)
//! - `sessions`: session_id → serialized [`Session`](crate::auth::Session)
//! - `refresh_index`: refresh-token hash → session_id (current and rotated hashes)
//! - `session_hashes`: session_id → every refresh hash it was issued (multimap)
//! - `account_sessions`: composite key (len|account|session_id) → session_id
//!
//! redb serializes write transactions, so every read-check-write sequence
//! performed inside one write transaction is atomic with respect to all other
//! writers of the same database.

use std::path::Path;

use redb::backends::InMemoryBackend;
use redb::{Database, MultimapTableDefinition, ReadableDatabase, TableDefinition};

// =============================================================================
// Table Definitions
// =============================================================================

/// Primary account table: identifier → JSON bytes.
pub(super) const ACCOUNTS: TableDefinition<&str, &[u8]> = TableDefinition::new("accounts");

/// Primary session table: session_id → JSON bytes.
pub(super) const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

/// Every refresh hash ever issued to a retained session, mapped to its owner.
pub(super) const REFRESH_INDEX: TableDefinition<&str, &str> =
    TableDefinition::new("refresh_index");

/// Reverse of `refresh_index`, so purging a session never scans all hashes.
pub(super) const SESSION_HASHES: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("session_hashes");

/// Index: composite key → session_id, for per-account range scans.
pub(super) const ACCOUNT_SESSIONS: TableDefinition<&[u8], &str> =
    TableDefinition::new("account_sessions");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// Index Key Helpers
// =============================================================================

/// Build a composite key for the account_sessions table.
///
/// Format: `account_len_be_u16 | account | session_id`
///
/// The length prefix keeps one account's keys from ever prefixing another's,
/// whatever characters the identifier contains.
pub(super) fn account_session_key(account_id: &str, session_id: &str) -> Vec<u8> {
    let mut key = account_prefix(account_id);
    key.extend_from_slice(session_id.as_bytes());
    key
}

/// Build a prefix key for range scanning all sessions of an account.
pub(super) fn account_prefix(account_id: &str) -> Vec<u8> {
    let account = account_id.as_bytes();
    let len = u16::try_from(account.len()).unwrap_or(u16::MAX);
    let mut prefix = Vec::with_capacity(2 + account.len() + 36);
    prefix.extend_from_slice(&len.to_be_bytes());
    prefix.extend_from_slice(account);
    prefix
}

/// Build the upper bound for a range scan (prefix with 0xFF bytes appended).
///
/// Session ids are ASCII UUIDs, so any byte above 0x7F sorts after them.
pub(super) fn account_prefix_end(account_id: &str) -> Vec<u8> {
    let mut end = account_prefix(account_id);
    end.extend_from_slice(&[0xFF; 8]);
    end
}

// =============================================================================
// AuthDatabase
// =============================================================================

/// Embedded ACID store holding accounts and sessions.
pub struct AuthDatabase {
    db: Database,
}

impl AuthDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;
        Self::with_tables(db)
    }

    /// Create a database that lives only in memory (tests, ephemeral runs).
    pub fn in_memory() -> StoreResult<Self> {
        let db = Database::builder().create_with_backend(InMemoryBackend::new())?;
        Self::with_tables(db)
    }

    fn with_tables(db: Database) -> StoreResult<Self> {
        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ACCOUNTS)?;
            let _ = write_txn.open_table(SESSIONS)?;
            let _ = write_txn.open_table(REFRESH_INDEX)?;
            let _ = write_txn.open_table(ACCOUNT_SESSIONS)?;
            let _ = write_txn.open_multimap_table(SESSION_HASHES)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    pub(super) fn db(&self) -> &Database {
        &self.db
    }

    /// Cheap readiness probe: opens a read transaction on the session table.
    pub fn ping(&self) -> StoreResult<()> {
        let read_txn = self.db.begin_read()?;
        let _ = read_txn.open_table(SESSIONS)?;
        Ok(())
    }
}
