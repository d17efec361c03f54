//! Error types for veracify-telemetry

use thiserror::Error;

/// Main error type for the veracify-telemetry library
#[derive(Error, Debug)]
pub enum Error {
    /// Persistent store error
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport failure or timeout while talking to the sink
    #[error("network error: {0}")]
    Network(String),

    /// Non-2xx response from the sink, with the server-supplied body
    #[error("sink rejected batch ({status}): {body}")]
    RemoteRejection { status: u16, body: String },

    /// A sync cycle was already running and did not finish within the wait
    #[error("a sync cycle is already in progress")]
    ConcurrencyBusy,
}

impl Error {
    /// True for outcomes that are worth retrying on a later cycle.
    ///
    /// Client-side rejections (4xx) will fail the same way next time, but
    /// the batch is still requeued: the records themselves are never
    /// inspected at this layer.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Network(_) => true,
            Error::RemoteRejection { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Result type alias for veracify-telemetry
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::Network("connection reset".to_string()).is_transient());
        assert!(Error::RemoteRejection {
            status: 503,
            body: "overloaded".to_string()
        }
        .is_transient());
        assert!(!Error::RemoteRejection {
            status: 400,
            body: "bad request".to_string()
        }
        .is_transient());
        assert!(!Error::Config("missing url".to_string()).is_transient());
    }
}
