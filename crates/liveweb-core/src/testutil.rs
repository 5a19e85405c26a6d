//! Test utilities: mock decoder and record builders.
//!
//! Mocks record their calls behind `Arc<Mutex<_>>` so tests can assert on
//! what the code under test passed in.

use std::io::Read;
use std::sync::{Arc, Mutex};

use crate::error::DecodeError;
use crate::models::{Resource, ResourceHeaders};
use crate::traits::ContainerDecoder;

// ---------------------------------------------------------------------------
// MockDecoder
// ---------------------------------------------------------------------------

/// Decoder that returns queued results and records what it was given.
#[derive(Clone)]
pub struct MockDecoder {
    /// Each call pops the first element. When empty, returns a default 200 resource.
    results: Arc<Mutex<Vec<Result<Resource, DecodeError>>>>,
    /// `(record_id, decompressed bytes)` per call.
    pub calls: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

impl MockDecoder {
    pub fn new(resource: Resource) -> Self {
        Self::with_results(vec![Ok(resource)])
    }

    pub fn with_error(error: DecodeError) -> Self {
        Self::with_results(vec![Err(error)])
    }

    pub fn with_results(results: Vec<Result<Resource, DecodeError>>) -> Self {
        Self {
            results: Arc::new(Mutex::new(results)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl ContainerDecoder for MockDecoder {
    fn decode(&self, stream: &mut dyn Read, record_id: &str) -> Result<Resource, DecodeError> {
        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes)?;
        self.calls
            .lock()
            .unwrap()
            .push((record_id.to_string(), bytes));

        let mut results = self.results.lock().unwrap();
        if results.is_empty() {
            Ok(html_resource(200, "<html><body>default</body></html>"))
        } else {
            results.remove(0)
        }
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// A resource with a `Content-Type: text/html` header and the given body.
pub fn html_resource(status_code: u16, body: &str) -> Resource {
    let headers: ResourceHeaders = [("Content-Type", "text/html")].into_iter().collect();
    Resource::new(status_code, headers, body.as_bytes().to_vec())
}

/// Raw HTTP response text with the given status, headers and body.
pub fn http_response(status_code: u16, headers: &[(&str, &str)], body: &str) -> String {
    let mut out = format!("HTTP/1.1 {status_code} Live\r\n");
    for (name, value) in headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str("\r\n");
    out.push_str(body);
    out
}

/// An uncompressed ARC v1 record wrapping `http`.
pub fn arc_record(url: &str, http: &str) -> Vec<u8> {
    format!(
        "{url} 127.0.0.1 20240101000000 text/html {}\n{http}",
        http.len()
    )
    .into_bytes()
}
