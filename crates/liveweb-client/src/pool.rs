//! Bounded, host-keyed connection pool for live-web fetches.
//!
//! The pool hands out [`PooledConnection`] slots. A slot is counted against
//! both the total cap and the cap for its host; when either is saturated,
//! [`ConnectionPool::acquire`] waits for a release, up to the connect
//! timeout. Actual sockets are kept alive and reused by the shared
//! `reqwest::Client`, which the slot carries.
//!
//! Settings can change at any time. A connection acquired before a change
//! keeps the client it was handed; later acquisitions see the new settings.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use liveweb_core::{LiveWebError, PoolConfig, ProxyAddr};
use reqwest::{Client, Proxy, redirect};
use thiserror::Error;
use tokio::sync::Notify;

/// Failure to obtain a connection.
#[derive(Error, Debug)]
pub enum PoolError {
    /// Every slot for the host (or the pool) stayed busy for the whole connect timeout.
    #[error("Timeout waiting for a connection to {host} after {waited_ms} ms")]
    AcquireTimeout { host: String, waited_ms: u64 },

    /// The HTTP client for the current settings could not be built.
    #[error("HTTP client could not be built: {0}")]
    Client(String),
}

impl From<PoolError> for LiveWebError {
    fn from(err: PoolError) -> Self {
        LiveWebError::HttpError(err.to_string())
    }
}

#[derive(Debug)]
struct PoolState {
    config: PoolConfig,
    /// Client for the current settings. `None` after a change; rebuilt lazily.
    client: Option<Client>,
    total: usize,
    per_host: HashMap<String, usize>,
}

impl PoolState {
    /// Take a slot for `host` if both caps allow it.
    fn try_reserve(&mut self, host: &str) -> Result<Option<Client>, PoolError> {
        let in_host = self.per_host.get(host).copied().unwrap_or(0);
        if self.total >= self.config.max_total_connections
            || in_host >= self.config.max_host_connections
        {
            return Ok(None);
        }

        let client = match &self.client {
            Some(client) => client.clone(),
            None => {
                let client = build_client(&self.config)?;
                self.client = Some(client.clone());
                client
            }
        };

        self.total += 1;
        *self.per_host.entry(host.to_string()).or_insert(0) += 1;
        Ok(Some(client))
    }

    fn release(&mut self, host: &str) {
        self.total = self.total.saturating_sub(1);
        if let Some(count) = self.per_host.get_mut(host) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.per_host.remove(host);
            }
        }
    }
}

#[derive(Debug)]
struct PoolShared {
    state: Mutex<PoolState>,
    /// Signalled whenever a slot frees up or the caps change.
    slot_freed: Notify,
}

impl PoolShared {
    /// Acquires the state lock, recovering from poison if necessary.
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned connection pool mutex");
            poisoned.into_inner()
        })
    }

    fn release(&self, host: &str) {
        self.lock().release(host);
        self.slot_freed.notify_waiters();
    }
}

/// Thread-safe pool of live-web connections.
///
/// Cloning is cheap and every clone shares the same slots. Independent pools
/// can coexist.
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig) -> Result<Self, LiveWebError> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState {
                    config,
                    client: None,
                    total: 0,
                    per_host: HashMap::new(),
                }),
                slot_freed: Notify::new(),
            }),
        })
    }

    /// Take a connection slot for `host`, waiting for one to free up if needed.
    ///
    /// Waits at most the connect timeout (forever if it is zero). Waiters are
    /// not served in any particular order.
    pub async fn acquire(&self, host: &str) -> Result<PooledConnection, PoolError> {
        let started = Instant::now();
        loop {
            // Register interest before checking so a release in between is not missed.
            let mut notified = std::pin::pin!(self.shared.slot_freed.notified());
            notified.as_mut().enable();

            let connect_timeout = {
                let mut state = self.shared.lock();
                if let Some(client) = state.try_reserve(host)? {
                    tracing::debug!(host = %host, in_use = state.total, "Acquired connection");
                    return Ok(PooledConnection {
                        shared: Arc::clone(&self.shared),
                        host: host.to_string(),
                        client,
                        released: false,
                    });
                }
                state.config.connect_timeout()
            };

            tracing::debug!(host = %host, "Connection pool saturated, waiting for a free slot");
            match connect_timeout {
                None => notified.await,
                Some(timeout) => {
                    let remaining = timeout.saturating_sub(started.elapsed());
                    if remaining.is_zero()
                        || tokio::time::timeout(remaining, notified).await.is_err()
                    {
                        return Err(PoolError::AcquireTimeout {
                            host: host.to_string(),
                            waited_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                }
            }
        }
    }

    /// Return a connection to the pool.
    pub fn release(&self, connection: PooledConnection) {
        connection.release();
    }

    /// Slots currently held for `host`.
    pub fn in_use(&self, host: &str) -> usize {
        self.shared.lock().per_host.get(host).copied().unwrap_or(0)
    }

    /// Slots currently held across all hosts.
    pub fn total_in_use(&self) -> usize {
        self.shared.lock().total
    }

    /// Snapshot of the current settings.
    pub fn config(&self) -> PoolConfig {
        self.shared.lock().config.clone()
    }

    pub fn set_proxy(&self, proxy: Option<ProxyAddr>) {
        self.update(true, |config| config.proxy = proxy);
    }

    pub fn set_max_total_connections(&self, max: usize) -> Result<(), LiveWebError> {
        if max == 0 {
            return Err(LiveWebError::ConfigError(
                "max_total_connections must be at least 1".into(),
            ));
        }
        self.update(false, |config| config.max_total_connections = max);
        Ok(())
    }

    pub fn set_max_host_connections(&self, max: usize) -> Result<(), LiveWebError> {
        if max == 0 {
            return Err(LiveWebError::ConfigError(
                "max_host_connections must be at least 1".into(),
            ));
        }
        // The client's idle pool is sized per host, so rebuild it too.
        self.update(true, |config| config.max_host_connections = max);
        Ok(())
    }

    pub fn set_connect_timeout_ms(&self, timeout_ms: u64) {
        self.update(true, |config| config.connect_timeout_ms = timeout_ms);
    }

    pub fn set_socket_timeout_ms(&self, timeout_ms: u64) {
        self.update(true, |config| config.socket_timeout_ms = timeout_ms);
    }

    fn update(&self, rebuild_client: bool, apply: impl FnOnce(&mut PoolConfig)) {
        {
            let mut state = self.shared.lock();
            apply(&mut state.config);
            if rebuild_client {
                state.client = None;
            }
            tracing::debug!(config = ?state.config, "Connection pool settings changed");
        }
        // Caps may have grown; let waiters re-check.
        self.shared.slot_freed.notify_waiters();
    }
}

/// A held pool slot. Released exactly once: explicitly via
/// [`release`](Self::release), or on drop.
#[derive(Debug)]
pub struct PooledConnection {
    shared: Arc<PoolShared>,
    host: String,
    client: Client,
    released: bool,
}

impl PooledConnection {
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Client configured with the settings in force when this slot was acquired.
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.shared.release(&self.host);
            tracing::debug!(host = %self.host, "Released connection");
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.release_once();
    }
}

fn build_client(config: &PoolConfig) -> Result<Client, PoolError> {
    let mut builder = Client::builder()
        .user_agent(concat!("liveweb/", env!("CARGO_PKG_VERSION")))
        .redirect(redirect::Policy::none())
        .pool_max_idle_per_host(config.max_host_connections);

    if let Some(timeout) = config.connect_timeout() {
        builder = builder.connect_timeout(timeout);
    }
    if let Some(timeout) = config.socket_timeout() {
        builder = builder.read_timeout(timeout);
    }

    builder = match &config.proxy {
        Some(proxy) => builder.proxy(
            Proxy::all(proxy.to_url())
                .map_err(|e| PoolError::Client(format!("Invalid proxy {proxy}: {e}")))?,
        ),
        None => builder.no_proxy(),
    };

    builder
        .build()
        .map_err(|e| PoolError::Client(e.to_string()))
}
