//! Remote analytics sink
//!
//! The sink is a stateless wrapper around one batch insert call. It
//! classifies outcomes but never retries; retry happens at the engine's
//! batch-requeue level, so a failed batch simply survives into the next
//! cycle.

mod http;

pub use http::HttpSink;

use async_trait::async_trait;

use crate::error::Result;

/// One batch insert against the remote sink.
///
/// Implementations classify the outcome into `Ok(())` for any 2xx
/// response, [`crate::Error::RemoteRejection`] for a non-2xx status, and
/// [`crate::Error::Network`] for transport failures and timeouts.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Submit an ordered batch of wire records to one table
    async fn send_batch(&self, table: &str, records: &[serde_json::Value]) -> Result<()>;
}
