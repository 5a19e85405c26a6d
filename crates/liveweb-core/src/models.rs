use std::collections::BTreeMap;
use std::io::Cursor;

use chrono::NaiveDateTime;

/// A live-web lookup as expected by replay callers.
///
/// `max_cache_ms` and `use_older` are part of the capability contract but
/// no cache sits behind the remote fetcher, so they are carried and ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    /// Maximum acceptable age of a cached copy, in milliseconds.
    pub max_cache_ms: u64,
    /// Whether a copy older than `max_cache_ms` is acceptable.
    pub use_older: bool,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_cache_ms: 0,
            use_older: false,
        }
    }

    pub fn with_max_cache_ms(mut self, max_cache_ms: u64) -> Self {
        self.max_cache_ms = max_cache_ms;
        self
    }

    pub fn with_use_older(mut self, use_older: bool) -> Self {
        self.use_older = use_older;
        self
    }
}

/// Response headers of a decoded resource.
///
/// Names are matched case-insensitively and are unique; inserting a name
/// that already exists replaces the previous value. The spelling of the
/// most recent insert is kept for display.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
#[serde(transparent)]
pub struct ResourceHeaders {
    // lowercased name -> (original name, value)
    entries: BTreeMap<String, (String, String)>,
}

impl ResourceHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, returning the value it replaced.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let name = name.into();
        self.entries
            .insert(name.to_ascii_lowercase(), (name, value.into()))
            .map(|(_, old)| old)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate as `(name, value)` pairs, ordered by lowercased name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .values()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ResourceHeaders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

/// A live document decoded from a container record.
///
/// Owned outright by whoever receives it; the fetcher keeps nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// The live document's own HTTP status (the inner status).
    pub status_code: u16,
    pub headers: ResourceHeaders,
    pub body: Vec<u8>,
    /// URL recorded in the container header, if the decoder knows it.
    pub record_url: Option<String>,
    /// Remote address recorded in the container header.
    pub remote_ip: Option<String>,
    /// Capture time recorded in the container header.
    pub capture_date: Option<NaiveDateTime>,
    /// Content type recorded in the container header.
    pub mime_type: Option<String>,
}

impl Resource {
    pub fn new(status_code: u16, headers: ResourceHeaders, body: Vec<u8>) -> Self {
        Self {
            status_code,
            headers,
            body,
            record_url: None,
            remote_ip: None,
            capture_date: None,
            mime_type: None,
        }
    }

    /// A readable view over the body bytes.
    pub fn body_reader(&self) -> Cursor<&[u8]> {
        Cursor::new(self.body.as_slice())
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }
}

/// Discriminant of a [`FetchOutcome`], handy for logging and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Resource,
    DocumentNotAvailable,
    CacheUnavailable,
}

impl std::fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutcomeKind::Resource => write!(f, "resource"),
            OutcomeKind::DocumentNotAvailable => write!(f, "document_not_available"),
            OutcomeKind::CacheUnavailable => write!(f, "cache_unavailable"),
        }
    }
}

/// Terminal result of a live-web fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The live document was fetched and decoded.
    Resource(Resource),
    /// The document does not exist or cannot be produced. Do not retry this URL.
    DocumentNotAvailable(String),
    /// The live-fetch service itself is unreachable or refused the request.
    CacheUnavailable(String),
}

impl FetchOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            FetchOutcome::Resource(_) => OutcomeKind::Resource,
            FetchOutcome::DocumentNotAvailable(_) => OutcomeKind::DocumentNotAvailable,
            FetchOutcome::CacheUnavailable(_) => OutcomeKind::CacheUnavailable,
        }
    }

    /// The failure reason, or `None` for a resource.
    pub fn reason(&self) -> Option<&str> {
        match self {
            FetchOutcome::Resource(_) => None,
            FetchOutcome::DocumentNotAvailable(reason) | FetchOutcome::CacheUnavailable(reason) => {
                Some(reason)
            }
        }
    }

    pub fn into_resource(self) -> Option<Resource> {
        match self {
            FetchOutcome::Resource(resource) => Some(resource),
            _ => None,
        }
    }
}
