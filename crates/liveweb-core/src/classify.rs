//! Failure classification for live-web fetches.
//!
//! Every branch a fetch can take is described by a [`FetchSignal`], and
//! [`classify`] maps it onto exactly one verdict. The rule set:
//!
//! | Signal                       | Verdict                 |
//! |------------------------------|-------------------------|
//! | malformed URL                | `DocumentNotAvailable`  |
//! | connect refused / timed out  | `CacheUnavailable`      |
//! | socket (read) timeout        | `CacheUnavailable`      |
//! | outer status != 200          | `CacheUnavailable`      |
//! | outer status == 200          | accept                  |
//! | container decode failed      | `DocumentNotAvailable`  |
//! | inner status == 502          | `DocumentNotAvailable`  |
//! | any other inner status       | accept                  |
//!
//! The outer status belongs to the live-fetch service; a failure there is
//! infrastructure trouble. The inner status belongs to the target page; 502
//! is how the service reports that the page itself could not be fetched.

use crate::models::{FetchOutcome, OutcomeKind};

/// Inner status the live-fetch service uses for "could not retrieve the page".
pub const UPSTREAM_FAILURE_STATUS: u16 = 502;

/// The only outer status that carries a record.
pub const OUTER_OK_STATUS: u16 = 200;

/// Transport failures that classify as the service being unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFailure {
    /// The remote end refused the TCP connection.
    ConnectFailed,
    /// No connection, or no pool slot, became available in time.
    ConnectTimeout,
    /// A read on an established connection stalled past the socket timeout.
    SocketTimeout,
}

impl std::fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportFailure::ConnectFailed => write!(f, "connect failed"),
            TransportFailure::ConnectTimeout => write!(f, "connect timeout"),
            TransportFailure::SocketTimeout => write!(f, "socket timeout"),
        }
    }
}

/// One observation made while fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSignal<'a> {
    MalformedUrl,
    Transport {
        failure: TransportFailure,
        message: &'a str,
    },
    OuterStatus(u16),
    DecodeFailed,
    InnerStatus(u16),
}

/// What to do with a signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Keep going; for an inner status this means "deliver the resource".
    Accept,
    DocumentNotAvailable(String),
    CacheUnavailable(String),
}

impl Verdict {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Verdict::Accept => OutcomeKind::Resource,
            Verdict::DocumentNotAvailable(_) => OutcomeKind::DocumentNotAvailable,
            Verdict::CacheUnavailable(_) => OutcomeKind::CacheUnavailable,
        }
    }

    /// The terminal outcome for a failing verdict, `None` for [`Verdict::Accept`].
    pub fn into_failure(self) -> Option<FetchOutcome> {
        match self {
            Verdict::Accept => None,
            Verdict::DocumentNotAvailable(reason) => {
                Some(FetchOutcome::DocumentNotAvailable(reason))
            }
            Verdict::CacheUnavailable(reason) => Some(FetchOutcome::CacheUnavailable(reason)),
        }
    }
}

/// Map a signal observed while fetching `url` to its verdict.
pub fn classify(url: &str, signal: &FetchSignal<'_>) -> Verdict {
    match *signal {
        FetchSignal::MalformedUrl => {
            Verdict::DocumentNotAvailable(format!("bad url: {url} does not look like a URL"))
        }
        FetchSignal::Transport { message, .. } => {
            Verdict::CacheUnavailable(format!("{message} : {url}"))
        }
        FetchSignal::OuterStatus(OUTER_OK_STATUS) => Verdict::Accept,
        FetchSignal::OuterStatus(_) => Verdict::CacheUnavailable(url.to_string()),
        FetchSignal::DecodeFailed => Verdict::DocumentNotAvailable(url.to_string()),
        FetchSignal::InnerStatus(UPSTREAM_FAILURE_STATUS) => {
            Verdict::DocumentNotAvailable(url.to_string())
        }
        FetchSignal::InnerStatus(_) => Verdict::Accept,
    }
}
