use std::error::Error;
use std::io::{self, Read};
use std::sync::Arc;

use flate2::read::GzDecoder;
use liveweb_core::classify::{FetchSignal, TransportFailure, classify};
use liveweb_core::error::LiveWebError;
use liveweb_core::models::{FetchOutcome, FetchRequest};
use liveweb_core::traits::{ContainerDecoder, LiveWebCache};
use liveweb_core::{ArcDecoder, PoolConfig};
use url::Url;

use crate::pool::{ConnectionPool, PoolError, PooledConnection};

/// Default cap on both the compressed body and the decompressed record.
pub const DEFAULT_MAX_RECORD_BYTES: usize = 64 * 1024 * 1024;

/// Fetches live documents from a remote live-web service.
///
/// Each call issues a GET for the target URL through the connection pool
/// (usually routed via a forward proxy that records the exchange), expects
/// a gzip-compressed container record back, and decodes it into a
/// [`Resource`](liveweb_core::Resource). Nothing is cached, and failed fetches are not retried.
pub struct RemoteLiveWebCache<D = ArcDecoder> {
    pool: ConnectionPool,
    decoder: Arc<D>,
    max_record_bytes: usize,
}

impl<D> Clone for RemoteLiveWebCache<D> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            decoder: Arc::clone(&self.decoder),
            max_record_bytes: self.max_record_bytes,
        }
    }
}

impl RemoteLiveWebCache<ArcDecoder> {
    /// Fetcher decoding ARC records, with its own pool.
    pub fn new(config: PoolConfig) -> Result<Self, LiveWebError> {
        Self::with_decoder(config, ArcDecoder::new())
    }

    /// Like [`new`](Self::new), reading settings from `LIVEWEB_*` variables.
    pub fn from_env() -> Result<Self, LiveWebError> {
        Self::new(PoolConfig::from_env()?)
    }
}

impl<D: ContainerDecoder> RemoteLiveWebCache<D> {
    pub fn with_decoder(config: PoolConfig, decoder: D) -> Result<Self, LiveWebError> {
        Ok(Self::with_pool(ConnectionPool::new(config)?, decoder))
    }

    /// Share an existing pool.
    pub fn with_pool(pool: ConnectionPool, decoder: D) -> Self {
        Self {
            pool,
            decoder: Arc::new(decoder),
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
        }
    }

    /// Reject payloads whose compressed body or decompressed record is
    /// larger than `max` bytes.
    pub fn with_max_record_bytes(mut self, max: usize) -> Self {
        self.max_record_bytes = max;
        self
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Fetch the live version of `url`.
    ///
    /// Returns `DocumentNotAvailable` for bad URLs, undecodable records and
    /// records whose inner status is 502; `CacheUnavailable` when the
    /// service refuses the connection, times out or answers with anything
    /// but 200. Other transport faults, corrupt gzip and oversized payloads
    /// are returned as errors. The pool slot is released before this
    /// returns, whatever the result.
    pub async fn fetch(&self, url: &str) -> Result<FetchOutcome, LiveWebError> {
        let Some(target) = parse_live_url(url) else {
            tracing::warn!(url = %url, "Bad URL for live web fetch");
            return Ok(settle(url, FetchSignal::MalformedUrl));
        };
        let host = host_key(&target);

        let connection = match self.pool.acquire(&host).await {
            Ok(connection) => connection,
            Err(e @ PoolError::AcquireTimeout { .. }) => {
                let message = e.to_string();
                return Ok(settle(
                    url,
                    FetchSignal::Transport {
                        failure: TransportFailure::ConnectTimeout,
                        message: &message,
                    },
                ));
            }
            Err(e) => return Err(e.into()),
        };

        let result = self.fetch_on(&connection, target, url).await;
        connection.release();
        result
    }

    async fn fetch_on(
        &self,
        connection: &PooledConnection,
        target: Url,
        url: &str,
    ) -> Result<FetchOutcome, LiveWebError> {
        tracing::debug!(url = %url, host = %connection.host(), "Fetching live resource");

        let mut response = match connection.client().get(target).send().await {
            Ok(response) => response,
            Err(e) => return transport_outcome(url, &e),
        };

        let status = response.status().as_u16();
        if let Some(outcome) = classify(url, &FetchSignal::OuterStatus(status)).into_failure() {
            tracing::debug!(url = %url, status, "Live web service rejected request");
            return Ok(outcome);
        }

        let mut body = Vec::new();
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    if body.len() + chunk.len() > self.max_record_bytes {
                        return Err(LiveWebError::HttpError(format!(
                            "response body exceeds {} bytes : {url}",
                            self.max_record_bytes
                        )));
                    }
                    body.extend_from_slice(&chunk);
                }
                Ok(None) => break,
                Err(e) => return transport_outcome(url, &e),
            }
        }

        let record = self.gunzip(&body)?;
        let resource = match self.decoder.decode(&mut record.as_slice(), url) {
            Ok(resource) => resource,
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Live web record not decodable");
                return Ok(settle(url, FetchSignal::DecodeFailed));
            }
        };

        let inner = FetchSignal::InnerStatus(resource.status_code);
        if let Some(outcome) = classify(url, &inner).into_failure() {
            tracing::debug!(url = %url, status = resource.status_code, "Live document not available");
            return Ok(outcome);
        }
        Ok(FetchOutcome::Resource(resource))
    }

    /// Decompress the whole payload, bounded by `max_record_bytes`.
    fn gunzip(&self, body: &[u8]) -> Result<Vec<u8>, LiveWebError> {
        let limit = self.max_record_bytes as u64;
        let mut record = Vec::new();
        GzDecoder::new(body)
            .take(limit + 1)
            .read_to_end(&mut record)?;
        if record.len() as u64 > limit {
            return Err(LiveWebError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("decompressed record exceeds {limit} bytes"),
            )));
        }
        Ok(record)
    }

    /// Reserved for pool teardown; currently does nothing.
    pub fn shutdown(&self) {
        tracing::info!(
            in_use = self.pool.total_in_use(),
            "Live web cache shutdown requested"
        );
    }

    /// Route subsequent fetches through `host:port`, e.g. `localhost:3128`.
    pub fn set_proxy_host_port(&self, host_port: &str) -> Result<(), LiveWebError> {
        self.pool.set_proxy(Some(host_port.parse()?));
        Ok(())
    }

    pub fn clear_proxy(&self) {
        self.pool.set_proxy(None);
    }

    pub fn set_max_total_connections(&self, max: usize) -> Result<(), LiveWebError> {
        self.pool.set_max_total_connections(max)
    }

    pub fn set_max_host_connections(&self, max: usize) -> Result<(), LiveWebError> {
        self.pool.set_max_host_connections(max)
    }

    pub fn connection_timeout_ms(&self) -> u64 {
        self.pool.config().connect_timeout_ms
    }

    pub fn set_connection_timeout_ms(&self, timeout_ms: u64) {
        self.pool.set_connect_timeout_ms(timeout_ms);
    }

    pub fn socket_timeout_ms(&self) -> u64 {
        self.pool.config().socket_timeout_ms
    }

    pub fn set_socket_timeout_ms(&self, timeout_ms: u64) {
        self.pool.set_socket_timeout_ms(timeout_ms);
    }
}

impl<D: ContainerDecoder> LiveWebCache for RemoteLiveWebCache<D> {
    async fn get_cached_resource(
        &self,
        request: &FetchRequest,
    ) -> Result<FetchOutcome, LiveWebError> {
        // max_cache_ms and use_older have nothing to act on here.
        self.fetch(&request.url).await
    }

    fn shutdown(&self) {
        RemoteLiveWebCache::shutdown(self);
    }
}

/// Parse `url` as a fetchable live-web target: absolute http(s) with a host.
fn parse_live_url(url: &str) -> Option<Url> {
    let parsed = Url::parse(url).ok()?;
    match parsed.scheme() {
        "http" | "https" => {}
        _ => return None,
    }
    match parsed.host_str() {
        Some(host) if !host.is_empty() => Some(parsed),
        _ => None,
    }
}

/// Pool key for a target: `host:port`.
fn host_key(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port_or_known_default() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Outcome for a signal that always fails.
fn settle(url: &str, signal: FetchSignal<'_>) -> FetchOutcome {
    classify(url, &signal)
        .into_failure()
        .unwrap_or_else(|| FetchOutcome::DocumentNotAvailable(url.to_string()))
}

fn transport_outcome(url: &str, error: &reqwest::Error) -> Result<FetchOutcome, LiveWebError> {
    let Some(failure) = transport_failure(error) else {
        return Err(LiveWebError::HttpError(format!("{error} : {url}")));
    };
    let message = root_cause(error);
    tracing::debug!(url = %url, %failure, error = %message, "Live web transport failure");
    Ok(settle(
        url,
        FetchSignal::Transport {
            failure,
            message: &message,
        },
    ))
}

fn transport_failure(error: &reqwest::Error) -> Option<TransportFailure> {
    failure_kind(error.is_connect(), error.is_timeout(), error)
}

/// Only refusals and timeouts are classified. DNS, TLS and other connect
/// errors stay unclassified.
fn failure_kind(
    connect: bool,
    timeout: bool,
    error: &(dyn Error + 'static),
) -> Option<TransportFailure> {
    if has_io_kind(error, io::ErrorKind::ConnectionRefused) {
        return Some(TransportFailure::ConnectFailed);
    }
    let timed_out = timeout || has_io_kind(error, io::ErrorKind::TimedOut);
    match (timed_out, connect) {
        (true, true) => Some(TransportFailure::ConnectTimeout),
        (true, false) => Some(TransportFailure::SocketTimeout),
        (false, _) => None,
    }
}

/// Whether `error` or any of its sources is an `io::Error` of `kind`.
fn has_io_kind(error: &(dyn Error + 'static), kind: io::ErrorKind) -> bool {
    let mut source = Some(error);
    while let Some(err) = source {
        if err
            .downcast_ref::<io::Error>()
            .is_some_and(|io_err| io_err.kind() == kind)
        {
            return true;
        }
        source = err.source();
    }
    false
}

/// Message of the innermost error, e.g. "Connection refused (os error 111)".
fn root_cause(error: &dyn Error) -> String {
    let mut cause = error;
    while let Some(next) = cause.source() {
        cause = next;
    }
    cause.to_string()
}
