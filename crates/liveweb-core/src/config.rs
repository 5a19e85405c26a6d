use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::LiveWebError;

/// Forward proxy address in `host:port` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyAddr {
    pub host: String,
    pub port: u16,
}

impl ProxyAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Proxy URL in the form HTTP clients expect.
    pub fn to_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ProxyAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for ProxyAddr {
    type Err = LiveWebError;

    /// Parse `host:port`, e.g. `localhost:3128`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (host, port) = raw.split_once(':').ok_or_else(|| {
            LiveWebError::ConfigError(format!("Invalid proxy '{raw}': expected host:port"))
        })?;
        if host.is_empty() {
            return Err(LiveWebError::ConfigError(format!(
                "Invalid proxy '{raw}': host is empty"
            )));
        }
        let port: u16 = port.parse().map_err(|_| {
            LiveWebError::ConfigError(format!(
                "Invalid proxy '{raw}': port must be an integer between 0 and 65535"
            ))
        })?;
        Ok(Self::new(host, port))
    }
}

/// Settings for the live-web connection pool.
///
/// Timeouts of zero mean "no limit".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_total_connections: usize,
    pub max_host_connections: usize,
    pub connect_timeout_ms: u64,
    pub socket_timeout_ms: u64,
    pub proxy: Option<ProxyAddr>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_total_connections: 20,
            max_host_connections: 2,
            connect_timeout_ms: 0,
            socket_timeout_ms: 0,
            proxy: None,
        }
    }
}

impl PoolConfig {
    /// Read configuration from environment variables.
    ///
    /// - `LIVEWEB_PROXY` (optional, `host:port`)
    /// - `LIVEWEB_MAX_TOTAL_CONNECTIONS` (optional, defaults to 20)
    /// - `LIVEWEB_MAX_HOST_CONNECTIONS` (optional, defaults to 2)
    /// - `LIVEWEB_CONNECT_TIMEOUT_MS` (optional, defaults to 0)
    /// - `LIVEWEB_SOCKET_TIMEOUT_MS` (optional, defaults to 0)
    pub fn from_env() -> Result<Self, LiveWebError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, LiveWebError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let proxy = match lookup("LIVEWEB_PROXY") {
            Some(raw) if !raw.trim().is_empty() => Some(raw.trim().parse()?),
            _ => None,
        };

        Ok(Self {
            max_total_connections: positive(
                &lookup,
                "LIVEWEB_MAX_TOTAL_CONNECTIONS",
                defaults.max_total_connections,
            )?,
            max_host_connections: positive(
                &lookup,
                "LIVEWEB_MAX_HOST_CONNECTIONS",
                defaults.max_host_connections,
            )?,
            connect_timeout_ms: millis(
                &lookup,
                "LIVEWEB_CONNECT_TIMEOUT_MS",
                defaults.connect_timeout_ms,
            )?,
            socket_timeout_ms: millis(
                &lookup,
                "LIVEWEB_SOCKET_TIMEOUT_MS",
                defaults.socket_timeout_ms,
            )?,
            proxy,
        })
    }

    /// Check the connection caps. Timeouts are unsigned and always valid.
    pub fn validate(&self) -> Result<(), LiveWebError> {
        if self.max_total_connections == 0 {
            return Err(LiveWebError::ConfigError(
                "max_total_connections must be at least 1".into(),
            ));
        }
        if self.max_host_connections == 0 {
            return Err(LiveWebError::ConfigError(
                "max_host_connections must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        non_zero_millis(self.connect_timeout_ms)
    }

    pub fn socket_timeout(&self) -> Option<Duration> {
        non_zero_millis(self.socket_timeout_ms)
    }
}

fn non_zero_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn positive<F>(lookup: &F, key: &str, default: usize) -> Result<usize, LiveWebError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => {
            let parsed: usize = raw.trim().parse().map_err(|_| {
                LiveWebError::ConfigError(format!(
                    "Invalid {key} '{raw}': must be a positive integer"
                ))
            })?;
            if parsed == 0 {
                return Err(LiveWebError::ConfigError(format!(
                    "{key} must be at least 1"
                )));
            }
            Ok(parsed)
        }
    }
}

fn millis<F>(lookup: &F, key: &str, default: u64) -> Result<u64, LiveWebError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            LiveWebError::ConfigError(format!(
                "Invalid {key} '{raw}': must be a non-negative integer of milliseconds"
            ))
        }),
    }
}
