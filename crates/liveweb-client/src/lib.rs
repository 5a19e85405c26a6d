pub mod fetcher;
pub mod pool;

pub use fetcher::{DEFAULT_MAX_RECORD_BYTES, RemoteLiveWebCache};
pub use pool::{ConnectionPool, PoolError, PooledConnection};
