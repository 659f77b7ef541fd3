/// Error types for the sync engine
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// A REST call failed in transit. Retryable; a failed send surfaces as
    /// a `Failed` message status, never as a crash.
    #[error("network error: {0}")]
    Network(String),

    /// A response arrived for a context that is no longer current
    /// (conversation switched, session torn down). Silently discarded.
    #[error("stale context: {0}")]
    StaleContext(String),

    /// A push payload is missing required fields. Dropped before it
    /// reaches the engine.
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// An optional endpoint (e.g. mark-as-read) is absent server-side.
    #[error("endpoint unavailable: {0}")]
    EndpointUnavailable(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
