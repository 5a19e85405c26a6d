pub mod arc;
pub mod classify;
pub mod config;
pub mod error;
pub mod models;
pub mod traits;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use arc::ArcDecoder;
pub use classify::{FetchSignal, TransportFailure, Verdict, classify};
pub use config::{PoolConfig, ProxyAddr};
pub use error::{DecodeError, LiveWebError};
pub use models::{FetchOutcome, FetchRequest, OutcomeKind, Resource, ResourceHeaders};
pub use traits::{ContainerDecoder, LiveWebCache};
