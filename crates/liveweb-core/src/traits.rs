use std::future::Future;
use std::io::Read;

use crate::error::{DecodeError, LiveWebError};
use crate::models::{FetchOutcome, FetchRequest, Resource};

/// Turns a decompressed container stream into a [`Resource`].
pub trait ContainerDecoder: Send + Sync {
    /// Decode one record. `record_id` names the record in error messages.
    fn decode(&self, stream: &mut dyn Read, record_id: &str) -> Result<Resource, DecodeError>;
}

/// Source of live-web documents for replay.
pub trait LiveWebCache: Send + Sync {
    /// Fetch the live version of `request.url`.
    ///
    /// Classified failures come back as `Ok(FetchOutcome::..)`; only
    /// unexpected faults are returned as `Err`.
    fn get_cached_resource(
        &self,
        request: &FetchRequest,
    ) -> impl Future<Output = Result<FetchOutcome, LiveWebError>> + Send;

    /// Release resources held by the cache.
    fn shutdown(&self);
}
