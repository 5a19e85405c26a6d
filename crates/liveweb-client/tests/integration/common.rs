use std::io::Write;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use flate2::Compression;
use flate2::write::GzEncoder;
use liveweb_core::testutil::{arc_record, http_response};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// What the mock live-fetch service answers with.
#[derive(Clone)]
pub enum Reply {
    /// Outer 200 with these raw bytes as the body.
    Body(Vec<u8>),
    /// Outer status with an empty body.
    Status(u16),
}

impl Reply {
    /// Outer 200 carrying a gzipped ARC record of the given inner response.
    pub fn record(url: &str, inner_status: u16, headers: &[(&str, &str)], body: &str) -> Self {
        let http = http_response(inner_status, headers, body);
        Reply::Body(gzip(&arc_record(url, &http)))
    }
}

struct ServiceState {
    reply: Reply,
    delay: Duration,
    hits: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    requests: Mutex<Vec<String>>,
}

/// A live-fetch service bound to an ephemeral local port.
pub struct MockLiveService {
    pub addr: SocketAddr,
    state: Arc<ServiceState>,
    _server: JoinHandle<()>,
}

impl MockLiveService {
    pub async fn start(reply: Reply) -> Self {
        Self::start_with_delay(reply, Duration::ZERO).await
    }

    /// Every request waits `delay` before the reply is sent.
    pub async fn start_with_delay(reply: Reply, delay: Duration) -> Self {
        let state = Arc::new(ServiceState {
            reply,
            delay,
            hits: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .fallback(handle)
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            _server: server,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Pool key the fetcher uses for this service.
    pub fn host_key(&self) -> String {
        self.addr.to_string()
    }

    pub fn proxy_host_port(&self) -> String {
        self.addr.to_string()
    }

    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    /// Highest number of requests that were in the handler at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<String> {
        self.state.requests.lock().unwrap().clone()
    }
}

async fn handle(State(state): State<Arc<ServiceState>>, uri: Uri) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    let active = state.active.fetch_add(1, Ordering::SeqCst) + 1;
    state.peak.fetch_max(active, Ordering::SeqCst);
    state.requests.lock().unwrap().push(uri.to_string());

    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }
    state.active.fetch_sub(1, Ordering::SeqCst);

    match &state.reply {
        Reply::Body(bytes) => (StatusCode::OK, bytes.clone()).into_response(),
        Reply::Status(code) => StatusCode::from_u16(*code).unwrap().into_response(),
    }
}

pub fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

/// URL on a local port nothing listens on.
pub fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{port}/page")
}

/// Local server that announces a longer body than it sends, then closes
/// the connection. Returns the URL to fetch.
pub async fn truncated_body_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\npartial")
                .await;
            let _ = socket.shutdown().await;
        }
    });
    format!("http://{addr}/page")
}
