//! Credential store used by the authentication routes.
//!
//! Only the contract lives here: [`CredentialStore`] plus the environment
//! driven [`StoreConfig`] and the [`Timed`] decorator that bounds every call.
//! [`MemoryStore`] is the in-process implementation for tests and demos.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Persistent mapping from user name to hashed password.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn user_exists(&self, name: &str) -> Result<bool>;

    /// Fails with [`Error::UserExists`] if `name` is taken.
    async fn create_user(&self, name: &str, hashed_password: &[u8]) -> Result<()>;

    /// Fails with [`Error::UserNotFound`] if `name` is unknown.
    async fn get_hashed_password(&self, name: &str) -> Result<Vec<u8>>;
}

// ── Configuration ─────────────────────────────────────────────────────────────

const DEFAULT_USERNAME: &str = "admin";
const DEFAULT_PASSWORD: &str = "admin";
const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: &str = "3306";
const DEFAULT_CONNECTION_TIMEOUT: &str = "10s";
const DEFAULT_OPERATIONS_TIMEOUT: &str = "5s";

/// Where the store lives and how long it may take to answer.
#[derive(Clone)]
pub struct StoreConfig {
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: String,
    /// Bound on establishing the store.
    pub connection_timeout: Duration,
    /// Bound on each individual call.
    pub operations_timeout: Duration,
}

impl StoreConfig {
    /// Reads the `DATABASE_*` variables, falling back to local defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get_env_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_owned());
        let get_duration = |key: &'static str, default: &str| {
            let raw = get_env_or(key, default);
            parse_duration(&raw).ok_or_else(|| Error::Config {
                key,
                reason: format!("invalid duration {raw:?}"),
            })
        };

        Ok(Self {
            username: get_env_or("DATABASE_USERNAME", DEFAULT_USERNAME),
            password: get_env_or("DATABASE_PASSWORD", DEFAULT_PASSWORD),
            host: get_env_or("DATABASE_HOST", DEFAULT_HOST),
            port: get_env_or("DATABASE_PORT", DEFAULT_PORT),
            connection_timeout: get_duration("DATABASE_CONNECTION_TIMEOUT", DEFAULT_CONNECTION_TIMEOUT)?,
            operations_timeout: get_duration("DATABASE_OPERATIONS_TIMEOUT", DEFAULT_OPERATIONS_TIMEOUT)?,
        })
    }

    /// Data source name in the MySQL driver's `user:pass@tcp(host:port)/db` form.
    pub fn dsn(&self) -> String {
        format!("{}:{}@tcp({}:{})/project", self.username, self.password, self.host, self.port)
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("connection_timeout", &self.connection_timeout)
            .field("operations_timeout", &self.operations_timeout)
            .finish()
    }
}

/// Parses durations such as `10s`, `500ms`, `1.5h` or `1m30s`.
///
/// Units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`. A bare `0` is
/// accepted; any other number needs a unit. Negative values are rejected.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    if raw == "0" {
        return Some(Duration::ZERO);
    }
    if raw.is_empty() {
        return None;
    }

    let is_number = |c: char| c.is_ascii_digit() || c == '.';
    let mut nanos = 0.0_f64;
    let mut rest = raw;
    while !rest.is_empty() {
        let split = rest.find(|c| !is_number(c)).unwrap_or(rest.len());
        if split == 0 {
            return None;
        }
        let value: f64 = rest[..split].parse().ok()?;
        rest = &rest[split..];

        let split = rest.find(is_number).unwrap_or(rest.len());
        let scale = match &rest[..split] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return None,
        };
        nanos += value * scale;
        rest = &rest[split..];
    }

    (nanos.is_finite() && nanos < u64::MAX as f64).then(|| Duration::from_nanos(nanos as u64))
}

// ── Timeouts ──────────────────────────────────────────────────────────────────

/// Bounds every call on the wrapped store by the operations timeout.
///
/// A call that overruns fails with [`Error::StoreTimeout`]; the underlying
/// future is dropped.
pub struct Timed<S> {
    inner: S,
    operations_timeout: Duration,
}

impl<S: CredentialStore> Timed<S> {
    pub fn new(inner: S, operations_timeout: Duration) -> Self {
        Self { inner, operations_timeout }
    }

    /// Establishes the store with `connecting`, bounded by the connection
    /// timeout.
    pub async fn connect<F>(config: &StoreConfig, connecting: F) -> Result<Self>
    where
        F: Future<Output = Result<S>>,
    {
        match tokio::time::timeout(config.connection_timeout, connecting).await {
            Ok(inner) => Ok(Self::new(inner?, config.operations_timeout)),
            Err(_) => {
                warn!(host = %config.host, timeout = ?config.connection_timeout, "store unreachable");
                Err(Error::StoreTimeout(config.connection_timeout))
            }
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn bounded<T>(&self, op: &'static str, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.operations_timeout, call).await.unwrap_or_else(|_| {
            warn!(op, timeout = ?self.operations_timeout, "store call timed out");
            Err(Error::StoreTimeout(self.operations_timeout))
        })
    }
}

#[async_trait]
impl<S: CredentialStore> CredentialStore for Timed<S> {
    async fn user_exists(&self, name: &str) -> Result<bool> {
        self.bounded("user_exists", self.inner.user_exists(name)).await
    }

    async fn create_user(&self, name: &str, hashed_password: &[u8]) -> Result<()> {
        self.bounded("create_user", self.inner.create_user(name, hashed_password)).await
    }

    async fn get_hashed_password(&self, name: &str) -> Result<Vec<u8>> {
        self.bounded("get_hashed_password", self.inner.get_hashed_password(name)).await
    }
}

// ── In-memory ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn user_exists(&self, name: &str) -> Result<bool> {
        Ok(self.users.read().await.contains_key(name))
    }

    async fn create_user(&self, name: &str, hashed_password: &[u8]) -> Result<()> {
        let mut users = self.users.write().await;
        if users.contains_key(name) {
            return Err(Error::UserExists(name.to_owned()));
        }
        users.insert(name.to_owned(), hashed_password.to_vec());
        debug!(user = name, "user created");
        Ok(())
    }

    async fn get_hashed_password(&self, name: &str) -> Result<Vec<u8>> {
        self.users
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UserNotFound(name.to_owned()))
    }
}
