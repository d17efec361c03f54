//! # veracify-telemetry
//!
//! Telemetry batching and synchronization engine for Veracify.
//!
//! This library durably buffers usage and feedback events produced by the
//! fact-check pipeline and delivers them to a remote analytics sink in
//! batches, under consent, concurrency, and partial-failure constraints:
//!
//! - **At-least-once delivery** without duplicate counting: an event
//!   leaves the pending queue only after the sink confirms its batch.
//! - **Consent gated**: no network transmission while the user is opted
//!   out; the flag can flip at any time.
//! - **Batch-atomic failure**: one POST carries up to `batch_size`
//!   events and succeeds or fails as a unit; failed batches survive
//!   verbatim into the next cycle.
//! - **Merge, never overwrite**: events recorded while a cycle's network
//!   round trip is in flight are re-queued behind the cycle's surviving
//!   events.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use veracify_telemetry::{Config, SqliteStore, TelemetryService};
//!
//! # async fn run() -> veracify_telemetry::Result<()> {
//! let config = Config::load()?;
//! let store = Arc::new(SqliteStore::open(&Config::database_path())?);
//! let telemetry = TelemetryService::new(config, store)?;
//!
//! // ... record events as checks complete; delivery happens in the
//! // background, and telemetry health never affects the host feature.
//! let status = telemetry.sync_status();
//! println!("{} events pending", status.pending_count);
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use config::{Config, ConsentGate, LoggingConfig, SinkConfig, TelemetryConfig};
pub use engine::{CycleReport, LastSyncResult, SkipReason, SyncEngine, SyncStatus};
pub use error::{Error, Result};
pub use events::{AnalyticsEvent, FeedbackEvent, FeedbackRating};
pub use service::TelemetryService;
pub use store::{MemoryStore, SqliteStore, Store};

// Public modules
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod identity;
pub mod logging;
pub mod queue;
pub mod recorder;
pub mod scheduler;
pub mod service;
pub mod sink;
pub mod store;
