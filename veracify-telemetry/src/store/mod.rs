//! Persistent store seam
//!
//! The engine treats durable storage as a plain key/value surface so the
//! host can supply whatever it has: the bundled SQLite store for native
//! builds, or an adapter over the browser extension's storage area.
//! Tests substitute [`MemoryStore`].

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::Result;

/// Store keys consumed and produced by the engine.
pub mod keys {
    /// Pending fact-check analytics events (JSON array)
    pub const PENDING_ANALYTICS: &str = "pendingAnalytics";
    /// Pending user feedback events (JSON array)
    pub const PENDING_FEEDBACK: &str = "pendingFeedback";
    /// Long-lived pseudonymous client identifier (hex string)
    pub const CLIENT_ID: &str = "anonymousClientId";
    /// Timestamp of the last completed sync cycle (RFC 3339 string)
    pub const LAST_SYNC_TIME: &str = "lastSyncTime";
    /// Outcome of the last completed sync cycle (JSON object)
    pub const LAST_SYNC_RESULT: &str = "lastSyncResult";
}

/// Durable key/value storage.
///
/// Implementations must be safe to share across the recorder and the sync
/// engine; each call is individually atomic, and read-modify-write
/// sequences are serialized above this trait by the queue layer.
pub trait Store: Send + Sync {
    /// Read a value, `None` if the key has never been set
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Write a value, replacing any previous one
    fn set(&self, key: &str, value: &serde_json::Value) -> Result<()>;

    /// Delete a key; deleting a missing key is not an error
    fn remove(&self, key: &str) -> Result<()>;
}
