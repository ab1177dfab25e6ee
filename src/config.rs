// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! All configuration comes from environment variables, read once at
//! startup by [`Config::from_env`].
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `DATA_DIR` | Directory holding the database file | `/data` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//! | `TLS_CERT_PATH` | PEM certificate chain; enables HTTPS with `TLS_KEY_PATH` | unset |
//! | `TLS_KEY_PATH` | PEM private key | unset |
//! | `AUTH_ISSUER` | `iss` claim of access tokens | `relational-auth` |
//! | `AUTH_SIGNING_KEY` | Base64 HS256 secret, at least 32 bytes | random per process |
//! | `AUTH_SIGNING_KEY_ID` | `kid` of the signing key | `primary` |
//! | `AUTH_PREVIOUS_SIGNING_KEY` | Base64 secret of the retired key | unset |
//! | `AUTH_PREVIOUS_SIGNING_KEY_ID` | `kid` of the retired key | required with the key |
//! | `AUTH_PREVIOUS_KEY_VERIFY_UNTIL` | RFC 3339 instant the retired key stops verifying | unset |
//! | `AUTH_PREVIOUS_KEY_GRACE_SECS` | Window from startup when no instant is set | `3600` |
//! | `AUTH_REFRESH_PEPPER` | Secret mixed into stored refresh-token hashes | random per process |
//! | `AUTH_ACCESS_TTL_SECS` | Access token lifetime | `900` |
//! | `AUTH_REFRESH_TTL_SECS` | Refresh token lifetime | `1209600` |
//! | `AUTH_SESSION_MAX_LIFETIME_SECS` | Absolute session cap | `2592000` |
//! | `AUTH_LOCKOUT_THRESHOLD` | Failed logins before lockout, `0` disables | `5` |
//! | `AUTH_LOCKOUT_DURATION_SECS` | Lockout length | `900` |
//! | `AUTH_ARGON2_MEMORY_KIB` | Argon2id memory cost | `19456` |
//! | `AUTH_ARGON2_ITERATIONS` | Argon2id passes | `2` |
//! | `AUTH_ARGON2_PARALLELISM` | Argon2id lanes | `1` |
//! | `AUTH_HASHING_CONCURRENCY` | Password hashes in flight | CPU count |
//! | `AUTH_SWEEP_INTERVAL_SECS` | Session sweeper period | `300` |
//! | `AUTH_SESSION_RETENTION_SECS` | Keep ended sessions this long | `604800` |
//! | `SEED_ACCOUNT_IDENTIFIER` | Account created at startup if missing | unset |
//! | `SEED_ACCOUNT_PASSWORD` | Password of the seed account | unset |

use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use base64ct::{Base64, Encoding};
use chrono::{DateTime, Duration, Utc};
use zeroize::Zeroizing;

use crate::auth::tokens::MIN_KEY_LEN;
use crate::auth::{EnginePolicy, HashParams, LockoutPolicy, SessionPolicy};
use crate::storage::DATABASE_FILE;

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";
pub const TLS_CERT_PATH_ENV: &str = "TLS_CERT_PATH";
pub const TLS_KEY_PATH_ENV: &str = "TLS_KEY_PATH";
pub const AUTH_ISSUER_ENV: &str = "AUTH_ISSUER";
pub const AUTH_SIGNING_KEY_ENV: &str = "AUTH_SIGNING_KEY";
pub const AUTH_SIGNING_KEY_ID_ENV: &str = "AUTH_SIGNING_KEY_ID";
pub const AUTH_PREVIOUS_SIGNING_KEY_ENV: &str = "AUTH_PREVIOUS_SIGNING_KEY";
pub const AUTH_PREVIOUS_SIGNING_KEY_ID_ENV: &str = "AUTH_PREVIOUS_SIGNING_KEY_ID";
pub const AUTH_PREVIOUS_KEY_VERIFY_UNTIL_ENV: &str = "AUTH_PREVIOUS_KEY_VERIFY_UNTIL";
pub const AUTH_PREVIOUS_KEY_GRACE_SECS_ENV: &str = "AUTH_PREVIOUS_KEY_GRACE_SECS";
pub const AUTH_REFRESH_PEPPER_ENV: &str = "AUTH_REFRESH_PEPPER";
pub const AUTH_ACCESS_TTL_SECS_ENV: &str = "AUTH_ACCESS_TTL_SECS";
pub const AUTH_REFRESH_TTL_SECS_ENV: &str = "AUTH_REFRESH_TTL_SECS";
pub const AUTH_SESSION_MAX_LIFETIME_SECS_ENV: &str = "AUTH_SESSION_MAX_LIFETIME_SECS";
pub const AUTH_LOCKOUT_THRESHOLD_ENV: &str = "AUTH_LOCKOUT_THRESHOLD";
pub const AUTH_LOCKOUT_DURATION_SECS_ENV: &str = "AUTH_LOCKOUT_DURATION_SECS";
pub const AUTH_ARGON2_MEMORY_KIB_ENV: &str = "AUTH_ARGON2_MEMORY_KIB";
pub const AUTH_ARGON2_ITERATIONS_ENV: &str = "AUTH_ARGON2_ITERATIONS";
pub const AUTH_ARGON2_PARALLELISM_ENV: &str = "AUTH_ARGON2_PARALLELISM";
pub const AUTH_HASHING_CONCURRENCY_ENV: &str = "AUTH_HASHING_CONCURRENCY";
pub const AUTH_SWEEP_INTERVAL_SECS_ENV: &str = "AUTH_SWEEP_INTERVAL_SECS";
pub const AUTH_SESSION_RETENTION_SECS_ENV: &str = "AUTH_SESSION_RETENTION_SECS";
pub const SEED_ACCOUNT_IDENTIFIER_ENV: &str = "SEED_ACCOUNT_IDENTIFIER";
pub const SEED_ACCOUNT_PASSWORD_ENV: &str = "SEED_ACCOUNT_PASSWORD";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("{0} and {1} must be set together")]
    Incomplete(&'static str, &'static str),
}

fn invalid(var: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        reason: reason.into(),
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Certificate and key for HTTPS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// A configured HS256 secret.
pub struct KeyMaterial {
    pub kid: String,
    pub secret: Zeroizing<Vec<u8>>,
}

/// Account provisioned at startup.
pub struct SeedAccount {
    pub identifier: String,
    pub password: Zeroizing<String>,
}

/// Process configuration.
pub struct Config {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub log_format: LogFormat,
    pub tls: Option<TlsPaths>,
    pub issuer: String,
    /// `None` means generate an ephemeral key
    pub signing_key: Option<KeyMaterial>,
    /// Kid used for the generated key when none is configured
    pub signing_key_id: String,
    pub previous_signing_key: Option<KeyMaterial>,
    /// Fixed end of the previous key's verification window
    pub previous_key_verify_until: Option<DateTime<Utc>>,
    /// Window counted from startup; every restart extends it
    pub previous_key_grace: Duration,
    /// `None` means generate an ephemeral pepper
    pub refresh_pepper: Option<Zeroizing<Vec<u8>>>,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub session_max_lifetime: Duration,
    pub lockout_threshold: u32,
    pub lockout_duration: Duration,
    pub hash_params: HashParams,
    pub hashing_concurrency: usize,
    pub sweep_interval: std::time::Duration,
    pub session_retention: Duration,
    pub seed_account: Option<SeedAccount>,
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read configuration through an arbitrary lookup function.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|value| !value.trim().is_empty());

        let tls = match (get(TLS_CERT_PATH_ENV), get(TLS_KEY_PATH_ENV)) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: cert.into(),
                key: key.into(),
            }),
            (None, None) => None,
            _ => return Err(ConfigError::Incomplete(TLS_CERT_PATH_ENV, TLS_KEY_PATH_ENV)),
        };

        let signing_key_id =
            get(AUTH_SIGNING_KEY_ID_ENV).unwrap_or_else(|| "primary".to_string());
        let signing_key = get(AUTH_SIGNING_KEY_ENV)
            .map(|encoded| decode_key(AUTH_SIGNING_KEY_ENV, &encoded))
            .transpose()?
            .map(|secret| KeyMaterial {
                kid: signing_key_id.clone(),
                secret,
            });

        let previous_signing_key = match (
            get(AUTH_PREVIOUS_SIGNING_KEY_ENV),
            get(AUTH_PREVIOUS_SIGNING_KEY_ID_ENV),
        ) {
            (Some(encoded), Some(kid)) => {
                if kid == signing_key_id {
                    return Err(invalid(
                        AUTH_PREVIOUS_SIGNING_KEY_ID_ENV,
                        "must differ from the current key id",
                    ));
                }
                Some(KeyMaterial {
                    kid,
                    secret: decode_key(AUTH_PREVIOUS_SIGNING_KEY_ENV, &encoded)?,
                })
            }
            (None, None) => None,
            _ => {
                return Err(ConfigError::Incomplete(
                    AUTH_PREVIOUS_SIGNING_KEY_ENV,
                    AUTH_PREVIOUS_SIGNING_KEY_ID_ENV,
                ))
            }
        };

        let previous_key_verify_until = get(AUTH_PREVIOUS_KEY_VERIFY_UNTIL_ENV)
            .map(|raw| {
                raw.trim().parse::<DateTime<Utc>>().map_err(|e| {
                    invalid(
                        AUTH_PREVIOUS_KEY_VERIFY_UNTIL_ENV,
                        format!("not an RFC 3339 timestamp: {e}"),
                    )
                })
            })
            .transpose()?;
        if previous_key_verify_until.is_some() && previous_signing_key.is_none() {
            return Err(invalid(
                AUTH_PREVIOUS_KEY_VERIFY_UNTIL_ENV,
                "set without AUTH_PREVIOUS_SIGNING_KEY",
            ));
        }

        let seed_account = match (
            get(SEED_ACCOUNT_IDENTIFIER_ENV),
            get(SEED_ACCOUNT_PASSWORD_ENV),
        ) {
            (Some(identifier), Some(password)) => Some(SeedAccount {
                identifier,
                password: Zeroizing::new(password),
            }),
            (None, None) => None,
            _ => {
                return Err(ConfigError::Incomplete(
                    SEED_ACCOUNT_IDENTIFIER_ENV,
                    SEED_ACCOUNT_PASSWORD_ENV,
                ))
            }
        };

        let default_concurrency = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        let default_hash = HashParams::default();

        let config = Self {
            host: get(HOST_ENV).unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse(&get, PORT_ENV, 8080)?,
            data_dir: get(DATA_DIR_ENV).unwrap_or_else(|| "/data".to_string()).into(),
            log_format: parse(&get, LOG_FORMAT_ENV, LogFormat::Pretty)?,
            tls,
            issuer: get(AUTH_ISSUER_ENV).unwrap_or_else(|| "relational-auth".to_string()),
            signing_key,
            signing_key_id,
            previous_signing_key,
            previous_key_verify_until,
            previous_key_grace: seconds(&get, AUTH_PREVIOUS_KEY_GRACE_SECS_ENV, 3_600)?,
            refresh_pepper: get(AUTH_REFRESH_PEPPER_ENV)
                .map(|pepper| Zeroizing::new(pepper.into_bytes())),
            access_ttl: positive_seconds(&get, AUTH_ACCESS_TTL_SECS_ENV, 900)?,
            refresh_ttl: positive_seconds(&get, AUTH_REFRESH_TTL_SECS_ENV, 1_209_600)?,
            session_max_lifetime: positive_seconds(
                &get,
                AUTH_SESSION_MAX_LIFETIME_SECS_ENV,
                2_592_000,
            )?,
            lockout_threshold: parse(&get, AUTH_LOCKOUT_THRESHOLD_ENV, 5)?,
            lockout_duration: seconds(&get, AUTH_LOCKOUT_DURATION_SECS_ENV, 900)?,
            hash_params: HashParams {
                memory_kib: parse(&get, AUTH_ARGON2_MEMORY_KIB_ENV, default_hash.memory_kib)?,
                iterations: parse(&get, AUTH_ARGON2_ITERATIONS_ENV, default_hash.iterations)?,
                parallelism: parse(&get, AUTH_ARGON2_PARALLELISM_ENV, default_hash.parallelism)?,
            },
            hashing_concurrency: parse(&get, AUTH_HASHING_CONCURRENCY_ENV, default_concurrency)?
                .max(1),
            sweep_interval: std::time::Duration::from_secs(
                parse::<u64, _>(&get, AUTH_SWEEP_INTERVAL_SECS_ENV, 300)?.max(1),
            ),
            session_retention: seconds(&get, AUTH_SESSION_RETENTION_SECS_ENV, 604_800)?,
            seed_account,
        };

        Ok(config)
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| invalid(HOST_ENV, format!("not a bind address: {e}")))
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    pub fn engine_policy(&self) -> EnginePolicy {
        EnginePolicy {
            lockout: LockoutPolicy {
                max_failed_attempts: self.lockout_threshold,
                lockout_duration: self.lockout_duration,
            },
            sessions: SessionPolicy {
                refresh_ttl: self.refresh_ttl,
                max_lifetime: self.session_max_lifetime,
            },
        }
    }
}

fn parse<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| invalid(var, format!("cannot parse '{raw}': {e}"))),
        None => Ok(default),
    }
}

fn seconds<G>(get: &G, var: &'static str, default: u32) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    Ok(Duration::seconds(parse::<u32, _>(get, var, default)?.into()))
}

fn positive_seconds<G>(get: &G, var: &'static str, default: u32) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let value = seconds(get, var, default)?;
    if value <= Duration::zero() {
        return Err(invalid(var, "must be greater than zero"));
    }
    Ok(value)
}

fn decode_key(var: &'static str, encoded: &str) -> Result<Zeroizing<Vec<u8>>, ConfigError> {
    let secret = Zeroizing::new(
        Base64::decode_vec(encoded.trim()).map_err(|_| invalid(var, "not valid base64"))?,
    );
    if secret.len() < MIN_KEY_LEN {
        return Err(invalid(
            var,
            format!("decodes to {} bytes, need at least {MIN_KEY_LEN}", secret.len()),
        ));
    }
    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|var| map.get(var).cloned())
    }

    fn key_b64(fill: u8) -> String {
        Base64::encode_string(&[fill; MIN_KEY_LEN])
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[]).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.bind_addr().unwrap().to_string(), "0.0.0.0:8080");
        assert_eq!(config.database_path(), PathBuf::from("/data/auth.redb"));
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.tls.is_none());
        assert!(config.signing_key.is_none());
        assert!(config.refresh_pepper.is_none());
        assert_eq!(config.access_ttl, Duration::minutes(15));
        assert_eq!(config.hash_params, HashParams::default());
        assert_eq!(config.engine_policy().lockout.max_failed_attempts, 5);
        assert!(config.hashing_concurrency >= 1);
        assert_eq!(config.sweep_interval, std::time::Duration::from_secs(300));
        assert!(config.previous_key_verify_until.is_none());
    }

    #[test]
    fn sweep_interval_is_at_least_one_second() {
        let config = config(&[(AUTH_SWEEP_INTERVAL_SECS_ENV, "45")]).unwrap();
        assert_eq!(config.sweep_interval, std::time::Duration::from_secs(45));

        let config = self::config(&[(AUTH_SWEEP_INTERVAL_SECS_ENV, "0")]).unwrap();
        assert_eq!(config.sweep_interval, std::time::Duration::from_secs(1));
    }

    #[test]
    fn parses_overrides() {
        let key = key_b64(1);
        let config = config(&[
            (PORT_ENV, "9000"),
            (LOG_FORMAT_ENV, "JSON"),
            (AUTH_SIGNING_KEY_ENV, key.as_str()),
            (AUTH_SIGNING_KEY_ID_ENV, "2026-10"),
            (AUTH_ACCESS_TTL_SECS_ENV, "60"),
            (AUTH_LOCKOUT_THRESHOLD_ENV, "0"),
            (AUTH_ARGON2_MEMORY_KIB_ENV, "65536"),
            (SEED_ACCOUNT_IDENTIFIER_ENV, "alice"),
            (SEED_ACCOUNT_PASSWORD_ENV, "correct"),
        ])
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.log_format, LogFormat::Json);
        let signing = config.signing_key.as_ref().unwrap();
        assert_eq!(signing.kid, "2026-10");
        assert_eq!(signing.secret.len(), MIN_KEY_LEN);
        assert_eq!(config.access_ttl, Duration::seconds(60));
        assert_eq!(config.engine_policy().lockout.max_failed_attempts, 0);
        assert_eq!(config.hash_params.memory_kib, 65_536);
        assert_eq!(config.seed_account.as_ref().unwrap().identifier, "alice");
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            config(&[(PORT_ENV, "eighty")]),
            Err(ConfigError::Invalid { var: PORT_ENV, .. })
        ));
        assert!(matches!(
            config(&[(AUTH_ACCESS_TTL_SECS_ENV, "0")]),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            config(&[(AUTH_SIGNING_KEY_ENV, "c2hvcnQ=")]),
            Err(ConfigError::Invalid { var: AUTH_SIGNING_KEY_ENV, .. })
        ));
        assert!(matches!(
            config(&[(LOG_FORMAT_ENV, "xml")]),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn paired_variables_must_come_together() {
        assert!(matches!(
            config(&[(TLS_CERT_PATH_ENV, "/tls/cert.pem")]),
            Err(ConfigError::Incomplete(TLS_CERT_PATH_ENV, TLS_KEY_PATH_ENV))
        ));
        assert!(matches!(
            config(&[(SEED_ACCOUNT_PASSWORD_ENV, "pw")]),
            Err(ConfigError::Incomplete(..))
        ));
        let key = key_b64(2);
        assert!(matches!(
            config(&[(AUTH_PREVIOUS_SIGNING_KEY_ENV, key.as_str())]),
            Err(ConfigError::Incomplete(..))
        ));
    }

    #[test]
    fn previous_key_needs_distinct_id() {
        let key = key_b64(2);
        assert!(config(&[
            (AUTH_PREVIOUS_SIGNING_KEY_ENV, key.as_str()),
            (AUTH_PREVIOUS_SIGNING_KEY_ID_ENV, "primary"),
        ])
        .is_err());

        let config = config(&[
            (AUTH_PREVIOUS_SIGNING_KEY_ENV, key.as_str()),
            (AUTH_PREVIOUS_SIGNING_KEY_ID_ENV, "old"),
            (AUTH_PREVIOUS_KEY_GRACE_SECS_ENV, "120"),
        ])
        .unwrap();
        assert_eq!(config.previous_signing_key.as_ref().unwrap().kid, "old");
        assert_eq!(config.previous_key_grace, Duration::seconds(120));
    }

    #[test]
    fn previous_key_deadline_is_an_absolute_instant() {
        let key = key_b64(2);
        let config = config(&[
            (AUTH_PREVIOUS_SIGNING_KEY_ENV, key.as_str()),
            (AUTH_PREVIOUS_SIGNING_KEY_ID_ENV, "old"),
            (AUTH_PREVIOUS_KEY_VERIFY_UNTIL_ENV, "2026-11-01T00:00:00Z"),
        ])
        .unwrap();
        assert_eq!(
            config.previous_key_verify_until.unwrap().to_rfc3339(),
            "2026-11-01T00:00:00+00:00"
        );

        assert!(matches!(
            self::config(&[
                (AUTH_PREVIOUS_SIGNING_KEY_ENV, key.as_str()),
                (AUTH_PREVIOUS_SIGNING_KEY_ID_ENV, "old"),
                (AUTH_PREVIOUS_KEY_VERIFY_UNTIL_ENV, "next tuesday"),
            ]),
            Err(ConfigError::Invalid { var: AUTH_PREVIOUS_KEY_VERIFY_UNTIL_ENV, .. })
        ));
        assert!(matches!(
            self::config(&[(AUTH_PREVIOUS_KEY_VERIFY_UNTIL_ENV, "2026-11-01T00:00:00Z")]),
            Err(ConfigError::Invalid { var: AUTH_PREVIOUS_KEY_VERIFY_UNTIL_ENV, .. })
        ));
    }

    #[test]
    fn blank_values_count_as_unset() {
        let config = config(&[(PORT_ENV, "  "), (AUTH_REFRESH_PEPPER_ENV, "")]).unwrap();
        assert_eq!(config.port, 8080);
        assert!(config.refresh_pepper.is_none());
    }
}
