// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::auth::AuthEngine;
use crate::storage::AuthDatabase;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AuthEngine>,
    /// Kept for readiness probes
    pub database: Arc<AuthDatabase>,
}

impl AppState {
    pub fn new(engine: AuthEngine, database: Arc<AuthDatabase>) -> Self {
        Self {
            engine: Arc::new(engine),
            database,
        }
    }
}
