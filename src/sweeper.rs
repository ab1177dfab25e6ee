// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Session Sweeper
//!
//! Background task that keeps the session table small. Sessions are
//! already rejected the moment they expire; the sweeper only makes the
//! state explicit and reclaims space.
//!
//! ## Strategy
//!
//! Every `interval` (default 5 min) the sweeper:
//! 1. Flags sessions past `expires_at` as expired.
//! 2. Deletes ended sessions, with their refresh-hash index entries, once
//!    they have been ended for longer than the retention window.
//!
//! Both steps are idempotent, so a missed or repeated sweep is harmless.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken` for graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{AuthEngine, SweepReport};

/// Default interval between sweeps.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Background session sweeper.
pub struct SessionSweeper {
    engine: Arc<AuthEngine>,
    interval: Duration,
    retention: chrono::Duration,
}

impl SessionSweeper {
    pub fn new(engine: Arc<AuthEngine>, retention: chrono::Duration) -> Self {
        Self {
            engine,
            interval: DEFAULT_SWEEP_INTERVAL,
            retention,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run the sweep loop until the cancellation token is triggered.
    ///
    /// Should be spawned as a background task:
    /// ```rust,ignore
    /// tokio::spawn(sweeper.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            retention_secs = self.retention.num_seconds(),
            "Session sweeper starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("Session sweeper shutting down");
                return;
            }

            self.sweep_step().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Session sweeper shutting down");
                    return;
                }
            }
        }
    }

    /// Execute one sweep on the blocking pool.
    async fn sweep_step(&self) -> Option<SweepReport> {
        let engine = Arc::clone(&self.engine);
        let retention = self.retention;
        let result = tokio::task::spawn_blocking(move || {
            let now = engine.now();
            engine.sessions().sweep(now, retention)
        })
        .await;

        match result {
            Ok(Ok(report)) => {
                if report.expired > 0 || report.purged > 0 {
                    info!(
                        expired = report.expired,
                        purged = report.purged,
                        "Session sweeper: swept sessions"
                    );
                } else {
                    debug!("Session sweeper: nothing to do");
                }
                Some(report)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Session sweeper: sweep failed");
                None
            }
            Err(e) => {
                warn!(error = %e, "Session sweeper: sweep task panicked");
                None
            }
        }
    }
}
