//! Service configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Optional settings fall back to
//! defaults; the chain endpoint and registry contract are required.

use std::net::SocketAddr;
use std::time::Duration;

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;

use crate::service::WatcherConfig;
use crate::service::watcher::DEFAULT_RESUBSCRIBE_DELAY;

/// Configuration failures. All of them abort startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("missing required setting {0}")]
    Missing(&'static str),

    /// A variable is set but cannot be parsed.
    #[error("invalid value for {key}: {reason}")]
    Invalid {
        /// Variable name.
        key: &'static str,
        /// Parser message.
        reason: String,
    },

    /// The worker private key does not belong to the worker address.
    #[error("worker address {configured} does not match private key address {derived}")]
    WorkerKeyMismatch {
        /// Address from `WORKER_ADDRESS`.
        configured: Address,
        /// Address derived from `WORKER_PRIVATE_KEY`.
        derived: Address,
    },
}

/// Top-level service configuration.
///
/// Loaded once at startup via [`ServiceConfig::from_env`].
#[derive(Clone)]
pub struct ServiceConfig {
    /// Socket address to bind the HTTP server to.
    pub listen_addr: SocketAddr,

    /// PostgreSQL connection string.
    pub database_url: String,

    /// Number of handles in the connection pool.
    pub database_max_connections: usize,

    /// Report requests allowed in flight at once.
    pub max_concurrent_requests: usize,

    /// Upper-cased chain name used in the event ledger.
    pub chain_name: String,

    /// WebSocket RPC endpoint.
    pub chain_rpc_url: String,

    /// Registry contract address.
    pub registration_contract: Address,

    /// Resume height used when the ledger is empty (`0` = chain head).
    pub start_block_height: u64,

    /// Fixed delay between resubscription attempts.
    pub resubscribe_delay: Duration,

    /// Worker account, if configured.
    pub worker_address: Option<Address>,

    /// Worker signing key, if configured.
    pub worker_private_key: Option<String>,

    /// Time allowed for the watcher to stop during shutdown.
    pub shutdown_timeout: Duration,
}

impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("listen_addr", &self.listen_addr)
            .field("database_max_connections", &self.database_max_connections)
            .field("max_concurrent_requests", &self.max_concurrent_requests)
            .field("chain_name", &self.chain_name)
            .field("chain_rpc_url", &self.chain_rpc_url)
            .field("registration_contract", &self.registration_contract)
            .field("start_block_height", &self.start_block_height)
            .field("resubscribe_delay", &self.resubscribe_delay)
            .field("worker_address", &self.worker_address)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish_non_exhaustive()
    }
}

impl ServiceConfig {
    /// Loads configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a required variable is missing or a set
    /// variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`ServiceConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);

        let listen_addr = env.parse("LISTEN_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?;

        let database_url = match env.get("DATABASE_URL") {
            Some(url) => url,
            None => database_url_from_parts(&env)?,
        };

        let chain_name = env
            .get("CHAIN_NAME")
            .unwrap_or_else(|| "ARB".to_string())
            .to_uppercase();

        let chain_rpc_url = env.get("CHAIN_RPC_URL").ok_or(ConfigError::Missing("CHAIN_RPC_URL"))?;
        let registration_contract: Address = env.require("REGISTRATION_CONTRACT")?;

        let worker_address: Option<Address> = env.parse_optional("WORKER_ADDRESS")?;
        let worker_private_key = env.get("WORKER_PRIVATE_KEY");

        Ok(Self {
            listen_addr,
            database_url,
            database_max_connections: env.parse("DATABASE_MAX_CONNECTIONS", 10_usize)?.max(1),
            max_concurrent_requests: env.parse("MAX_CONCURRENT_REQUESTS", 10_usize)?.max(1),
            chain_name,
            chain_rpc_url,
            registration_contract,
            start_block_height: env.parse("START_BLOCK_HEIGHT", 0_u64)?,
            resubscribe_delay: Duration::from_secs(
                env.parse("RESUBSCRIBE_DELAY_SECS", DEFAULT_RESUBSCRIBE_DELAY.as_secs())?,
            ),
            worker_address,
            worker_private_key,
            shutdown_timeout: Duration::from_secs(env.parse("SHUTDOWN_TIMEOUT_SECS", 5_u64)?),
        })
    }

    /// Watcher settings derived from this configuration.
    #[must_use]
    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            chain_name: self.chain_name.clone(),
            registry_contract: self.registration_contract,
            start_block_height: self.start_block_height,
            resubscribe_delay: self.resubscribe_delay,
        }
    }

    /// Checks that the worker private key, when set, derives the worker
    /// address. Returns the worker address in use, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an unparsable key and
    /// [`ConfigError::WorkerKeyMismatch`] if it belongs to another account.
    pub fn verify_worker_identity(&self) -> Result<Option<Address>, ConfigError> {
        let Some(key) = self.worker_private_key.as_deref() else {
            return Ok(self.worker_address);
        };
        let signer: PrivateKeySigner = key
            .trim_start_matches("0x")
            .parse()
            .map_err(|e| ConfigError::Invalid {
                key: "WORKER_PRIVATE_KEY",
                reason: format!("{e}"),
            })?;
        let derived = signer.address();

        match self.worker_address {
            Some(configured) if configured != derived => {
                Err(ConfigError::WorkerKeyMismatch {
                    configured,
                    derived,
                })
            }
            _ => Ok(Some(derived)),
        }
    }
}

/// Borrowed key lookup with typed accessors.
struct Env<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    /// Returns a non-empty value for `key`.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    /// Parses `key` as `T`, returning `default` when unset.
    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        Ok(self.parse_optional(key)?.unwrap_or(default))
    }

    fn parse_optional<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key)
            .map(|raw| {
                raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                    key,
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    fn require<T>(&self, key: &'static str) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        self.parse_optional(key)?.ok_or(ConfigError::Missing(key))
    }
}

fn database_url_from_parts<F: Fn(&str) -> Option<String>>(env: &Env<'_, F>) -> Result<String, ConfigError> {
    let host = env.get("DB_HOST").unwrap_or_else(|| "localhost".to_string());
    let port: u16 = env.parse("DB_PORT", 5432)?;
    let user = env.get("DB_USER").unwrap_or_else(|| "postgres".to_string());
    let password = env.get("DB_PASSWORD").unwrap_or_default();
    let name = env.get("DB_NAME").unwrap_or_else(|| "weather".to_string());
    let ssl_mode = env.get("DB_SSL_MODE").unwrap_or_else(|| "disable".to_string());

    let credentials = if password.is_empty() {
        user
    } else {
        format!("{user}:{password}")
    };
    Ok(format!(
        "postgres://{credentials}@{host}:{port}/{name}?sslmode={ssl_mode}"
    ))
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    const CONTRACT: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    fn load(pairs: &[(&str, &str)]) -> Result<ServiceConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServiceConfig::from_lookup(|key| vars.get(key).cloned())
    }

    fn required() -> Vec<(&'static str, &'static str)> {
        vec![
            ("CHAIN_RPC_URL", "ws://localhost:8546"),
            ("REGISTRATION_CONTRACT", CONTRACT),
        ]
    }

    #[test]
    fn defaults_apply_when_only_required_values_are_set() {
        let Ok(config) = load(&required()) else {
            panic!("required values are present");
        };
        assert_eq!(config.listen_addr.port(), 8080);
        assert_eq!(config.chain_name, "ARB");
        assert_eq!(config.database_max_connections, 10);
        assert_eq!(config.max_concurrent_requests, 10);
        assert_eq!(config.start_block_height, 0);
        assert_eq!(config.resubscribe_delay, Duration::from_secs(10));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
        assert_eq!(
            config.database_url,
            "postgres://postgres@localhost:5432/weather?sslmode=disable"
        );
    }

    #[test]
    fn database_url_is_built_from_parts() {
        let mut vars = required();
        vars.extend([
            ("DB_HOST", "db"),
            ("DB_PORT", "6543"),
            ("DB_USER", "svc"),
            ("DB_PASSWORD", "secret"),
            ("DB_NAME", "reports"),
            ("DB_SSL_MODE", "require"),
        ]);
        let Ok(config) = load(&vars) else {
            panic!("config should load");
        };
        assert_eq!(
            config.database_url,
            "postgres://svc:secret@db:6543/reports?sslmode=require"
        );
    }

    #[test]
    fn chain_name_is_upper_cased() {
        let mut vars = required();
        vars.push(("CHAIN_NAME", "arb"));
        let Ok(config) = load(&vars) else {
            panic!("config should load");
        };
        assert_eq!(config.chain_name, "ARB");
        assert_eq!(config.watcher_config().chain_name, "ARB");
    }

    #[test]
    fn missing_and_invalid_values_are_reported() {
        assert!(matches!(
            load(&[("REGISTRATION_CONTRACT", CONTRACT)]),
            Err(ConfigError::Missing("CHAIN_RPC_URL"))
        ));

        let mut vars = required();
        vars.push(("START_BLOCK_HEIGHT", "soon"));
        assert!(matches!(
            load(&vars),
            Err(ConfigError::Invalid {
                key: "START_BLOCK_HEIGHT",
                ..
            })
        ));
    }

    #[test]
    fn worker_key_must_match_worker_address() {
        let signer = PrivateKeySigner::random();
        let key = alloy::hex::encode(signer.to_bytes());
        let address = signer.address().to_checksum(None);

        let mut vars = required();
        vars.extend([("WORKER_PRIVATE_KEY", key.as_str()), ("WORKER_ADDRESS", address.as_str())]);
        let Ok(config) = load(&vars) else {
            panic!("config should load");
        };
        assert!(matches!(config.verify_worker_identity(), Ok(Some(a)) if a == signer.address()));

        let other = PrivateKeySigner::random().address().to_checksum(None);
        let mut vars = required();
        vars.extend([("WORKER_PRIVATE_KEY", key.as_str()), ("WORKER_ADDRESS", other.as_str())]);
        let Ok(config) = load(&vars) else {
            panic!("config should load");
        };
        assert!(matches!(
            config.verify_worker_identity(),
            Err(ConfigError::WorkerKeyMismatch { .. })
        ));
    }
}
