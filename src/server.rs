// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Process startup: logging, state wiring, seeding and the HTTP listener.

use std::sync::Arc;
use std::time::Duration;

use axum_server::tls_rustls::RustlsConfig;
use chrono::{DateTime, Utc};
use ring::rand::{SecureRandom, SystemRandom};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use zeroize::Zeroizing;

use crate::api::router;
use crate::auth::{
    Account, AuthEngine, AuthError, HashingPool, KeyRing, PasswordHasher, SigningKey, TokenIssuer,
};
use crate::config::{Config, ConfigError, LogFormat, SeedAccount};
use crate::state::AppState;
use crate::storage::{AuthDatabase, StoreError};
use crate::sweeper::SessionSweeper;

/// How long in-flight requests get to finish after Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

const PEPPER_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("auth setup error: {0}")]
    Auth(#[from] AuthError),

    #[error("TLS setup error: {0}")]
    Tls(std::io::Error),

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` controls filtering, defaulting to `info,tower_http=debug`.
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(fmt::layer()).init(),
    }
}

fn key_ring(config: &Config, now: DateTime<Utc>) -> Result<KeyRing, AuthError> {
    let current = match &config.signing_key {
        Some(key) => SigningKey::new(key.kid.clone(), key.secret.to_vec())?,
        None => {
            warn!(
                "AUTH_SIGNING_KEY not set: using an ephemeral signing key, \
                 access tokens will not survive a restart"
            );
            SigningKey::generate(config.signing_key_id.clone())?
        }
    };
    let mut keys = KeyRing::new(current);

    if let Some(previous) = &config.previous_signing_key {
        let verify_until = match config.previous_key_verify_until {
            Some(deadline) => deadline,
            None => {
                warn!(
                    "AUTH_PREVIOUS_KEY_VERIFY_UNTIL not set: the previous key's window restarts \
                     with the process, remove the key once it has elapsed"
                );
                now + config.previous_key_grace
            }
        };
        info!(kid = %previous.kid, %verify_until, "Previous signing key accepted for verification");
        keys = keys.with_previous(
            SigningKey::new(previous.kid.clone(), previous.secret.to_vec())?,
            verify_until,
        );
    }
    Ok(keys)
}

fn refresh_pepper(config: &Config) -> Result<Zeroizing<Vec<u8>>, AuthError> {
    if let Some(pepper) = &config.refresh_pepper {
        return Ok(pepper.clone());
    }
    warn!(
        "AUTH_REFRESH_PEPPER not set: using an ephemeral pepper, \
         refresh tokens will not survive a restart"
    );
    let mut pepper = Zeroizing::new(vec![0u8; PEPPER_LEN]);
    SystemRandom::new()
        .fill(&mut pepper[..])
        .map_err(|_| AuthError::Internal("system RNG unavailable".to_string()))?;
    Ok(pepper)
}

/// Wire the engine over `database` according to `config`.
pub fn build_state(config: &Config, database: Arc<AuthDatabase>) -> Result<AppState, AuthError> {
    let keys = key_ring(config, Utc::now())?;
    let pepper = refresh_pepper(config)?;
    let issuer = TokenIssuer::new(keys, config.issuer.clone(), config.access_ttl, &pepper)?;
    let hashing = HashingPool::new(
        PasswordHasher::new(config.hash_params)?,
        config.hashing_concurrency,
    )?;

    let engine = AuthEngine::new(
        database.clone(),
        database.clone(),
        issuer,
        hashing,
        config.engine_policy(),
    );
    Ok(AppState::new(engine, database))
}

/// Create the seed account unless it already exists.
pub async fn seed_account(state: &AppState, seed: &SeedAccount) -> Result<(), ServerError> {
    let password = state.engine.hash_password(&seed.password).await?;
    let account = Account::new(&seed.identifier, password, Utc::now());

    match state.database.insert_account(&account) {
        Ok(()) => {
            info!(account_id = %account.identifier, "Seed account created");
            Ok(())
        }
        Err(StoreError::AlreadyExists(_)) => {
            info!(account_id = %account.identifier, "Seed account already present");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Open storage, start the sweeper and serve until Ctrl-C.
pub async fn serve(config: Config) -> Result<(), ServerError> {
    let addr = config.bind_addr()?;
    let database_path = config.database_path();
    let database = Arc::new(AuthDatabase::open(&database_path)?);
    info!(path = %database_path.display(), "Database opened");

    let state = build_state(&config, database)?;
    if let Some(seed) = &config.seed_account {
        seed_account(&state, seed).await?;
    }

    let shutdown = CancellationToken::new();
    let sweeper = SessionSweeper::new(state.engine.clone(), config.session_retention)
        .with_interval(config.sweep_interval);
    let sweeper_task = tokio::spawn(sweeper.run(shutdown.clone()));

    let app = router(state);
    let handle = axum_server::Handle::new();

    let signal_handle = handle.clone();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        info!("Shutdown signal received, draining connections");
        signal_shutdown.cancel();
        signal_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
    });

    match &config.tls {
        Some(tls) => {
            let tls_config = RustlsConfig::from_pem_file(&tls.cert, &tls.key)
                .await
                .map_err(ServerError::Tls)?;
            info!("Relational Auth listening on https://{addr} (docs at /docs)");
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            warn!(
                "TLS_CERT_PATH not set: serving plain HTTP, \
                 terminate TLS in front of this service"
            );
            info!("Relational Auth listening on http://{addr} (docs at /docs)");
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
    }

    shutdown.cancel();
    if let Err(e) = sweeper_task.await {
        warn!(error = %e, "Session sweeper task ended abnormally");
    }
    info!("Server stopped");
    Ok(())
}
