//! Batch sync engine
//!
//! Orchestrates one sync cycle: snapshot the pending queues, partition
//! into ordered batches, drive the sink one batch at a time, and merge
//! the surviving events back into the live queue.
//!
//! ## Cycle invariants
//!
//! - At most one cycle runs at a time, enforced by an atomically
//!   checked-and-set flag that is released on every exit path.
//! - A batch succeeds or fails as a unit; failed batches are retained
//!   verbatim for the next cycle.
//! - The write-back at the end of a cycle is a merge against the live
//!   queue, so events recorded while a network round trip was in flight
//!   are never lost.
//! - Errors inside a cycle are absorbed into the cycle report and the
//!   engine's error counter; they never propagate to recording callers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{Config, ConsentGate};
use crate::error::{Error, Result};
use crate::events;
use crate::identity::IdentityManager;
use crate::queue::{PendingQueues, QueueKind};
use crate::sink::EventSink;
use crate::store::{keys, Store};

/// Bounded wait used by [`SyncEngine::force_sync_now`]
const FORCE_SYNC_POLL_ATTEMPTS: u32 = 10;
const FORCE_SYNC_POLL_DELAY: Duration = Duration::from_secs(1);

/// Result of one sync cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Events confirmed delivered this cycle
    pub successful: usize,
    /// Events retained for the next cycle
    pub failed: usize,
    /// Why the cycle did no work, if it was skipped
    pub skipped: Option<SkipReason>,
}

impl CycleReport {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Default::default()
        }
    }
}

/// Reason a cycle performed no deliveries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another cycle was already in flight
    AlreadyRunning,
    /// The user has not opted in to sharing analytics
    ConsentDisabled,
    /// No sink is configured
    NotConfigured,
}

/// Outcome of the last completed cycle, mirrored into the store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LastSyncResult {
    /// Events confirmed delivered
    pub successful: usize,
    /// Events retained for retry
    pub failed: usize,
    /// When the cycle finished
    pub timestamp: DateTime<Utc>,
}

/// Engine state visible to the host and the scheduler
#[derive(Debug, Clone)]
pub struct SyncStatus {
    /// True while a cycle is in flight
    pub is_syncing: bool,
    /// When the last cycle finished, if any
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Events currently awaiting delivery across both queues
    pub pending_count: usize,
    /// Consecutive cycles that ended with a failure
    pub error_count: u32,
}

struct SyncState {
    last_sync_time: Option<DateTime<Utc>>,
    error_count: u32,
    last_result: Option<LastSyncResult>,
}

/// Clears the in-flight flag on every exit path, including panics
struct CycleGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> CycleGuard<'a> {
    /// Atomically claim the flag; `None` if a cycle is already running
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
            .then_some(Self { flag })
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// The batch sync orchestrator
pub struct SyncEngine {
    store: Arc<dyn Store>,
    queues: PendingQueues,
    identity: IdentityManager,
    sink: Option<Arc<dyn EventSink>>,
    consent: ConsentGate,
    config: Config,
    is_syncing: AtomicBool,
    state: Mutex<SyncState>,
}

impl SyncEngine {
    /// Create an engine over the given collaborators.
    ///
    /// `sink` is `None` when the host has no sink configured; cycles then
    /// skip with [`SkipReason::NotConfigured`] until it is provided.
    pub fn new(
        store: Arc<dyn Store>,
        queues: PendingQueues,
        identity: IdentityManager,
        sink: Option<Arc<dyn EventSink>>,
        consent: ConsentGate,
        config: Config,
    ) -> Self {
        // Debounce survives restarts via the mirrored timestamp
        let last_sync_time = store
            .get(keys::LAST_SYNC_TIME)
            .ok()
            .flatten()
            .and_then(|v| {
                v.as_str()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.with_timezone(&Utc))
            });

        Self {
            store,
            queues,
            identity,
            sink,
            consent,
            config,
            is_syncing: AtomicBool::new(false),
            state: Mutex::new(SyncState {
                last_sync_time,
                error_count: 0,
                last_result: None,
            }),
        }
    }

    /// True while a cycle is in flight
    pub fn is_syncing(&self) -> bool {
        self.is_syncing.load(Ordering::SeqCst)
    }

    /// The consent gate shared with the host
    pub fn consent(&self) -> &ConsentGate {
        &self.consent
    }

    /// Current engine state
    pub fn status(&self) -> SyncStatus {
        let pending_count = self.queues.total_len().unwrap_or(0);
        let state = self.state.lock().unwrap();
        SyncStatus {
            is_syncing: self.is_syncing(),
            last_sync_time: state.last_sync_time,
            pending_count,
            error_count: state.error_count,
        }
    }

    /// Outcome of the last completed cycle, if any
    pub fn last_result(&self) -> Option<LastSyncResult> {
        self.state.lock().unwrap().last_result.clone()
    }

    /// Run one sync cycle.
    ///
    /// Never returns an error: everything that goes wrong inside the
    /// cycle is absorbed into the report and the engine's error counter.
    /// If another cycle is in flight this is an immediate no-op.
    pub async fn run_cycle(&self) -> CycleReport {
        let Some(_guard) = CycleGuard::acquire(&self.is_syncing) else {
            tracing::debug!("Sync cycle already in flight, skipping");
            return CycleReport::skipped(SkipReason::AlreadyRunning);
        };

        // Consent is re-read on every cycle; the queues are left untouched
        // and no network call is made while the user is opted out.
        if !self.consent.is_enabled() {
            tracing::debug!("Analytics sharing disabled, skipping sync cycle");
            return CycleReport::skipped(SkipReason::ConsentDisabled);
        }

        let Some(sink) = self.sink.clone() else {
            tracing::warn!("No sink configured, cannot deliver pending events");
            self.finish_cycle(0, 0, true);
            return CycleReport::skipped(SkipReason::NotConfigured);
        };

        // Identity degradation never aborts the cycle
        let client_id = self.identity.client_id().to_string();
        let session_id = self.identity.session_id().to_string();

        let mut successful = 0;
        let mut failed = 0;
        let mut had_internal_error = false;

        for kind in QueueKind::all() {
            match self
                .sync_queue(kind, sink.as_ref(), &client_id, &session_id)
                .await
            {
                Ok((delivered, retained)) => {
                    successful += delivered;
                    failed += retained;
                }
                Err(e) => {
                    tracing::warn!(queue = ?kind, error = %e, "Queue sync failed");
                    had_internal_error = true;
                }
            }
        }

        self.finish_cycle(successful, failed, had_internal_error);

        tracing::info!(successful, failed, "Sync cycle complete");
        CycleReport {
            successful,
            failed,
            skipped: None,
        }
    }

    /// Run a cycle now, waiting out any cycle already in flight.
    ///
    /// Polls for up to ten seconds before giving up with
    /// [`Error::ConcurrencyBusy`]. Bypasses the scheduler's debounce but
    /// still respects mutual exclusion.
    pub async fn force_sync_now(&self) -> Result<CycleReport> {
        for attempt in 0..FORCE_SYNC_POLL_ATTEMPTS {
            let report = self.run_cycle().await;
            if report.skipped != Some(SkipReason::AlreadyRunning) {
                return Ok(report);
            }
            tracing::debug!(attempt, "Cycle in flight, waiting before forced sync");
            tokio::time::sleep(FORCE_SYNC_POLL_DELAY).await;
        }
        Err(Error::ConcurrencyBusy)
    }

    /// Deliver one queue: snapshot, batch, submit, merge back.
    ///
    /// Returns `(delivered, retained)` event counts.
    async fn sync_queue(
        &self,
        kind: QueueKind,
        sink: &dyn EventSink,
        client_id: &str,
        session_id: &str,
    ) -> Result<(usize, usize)> {
        let snapshot = self.queues.snapshot(kind)?;
        if snapshot.is_empty() {
            return Ok((0, 0));
        }

        let table = self.table_for(kind);
        let batch_size = self.config.telemetry.batch_size.max(1);

        let mut delivered = 0;
        let mut retained: Vec<serde_json::Value> = Vec::new();

        // Batches are submitted one at a time, in order; a failed batch
        // never aborts the ones after it.
        for batch in snapshot.chunks(batch_size) {
            let records = self.wire_records(kind, batch, client_id, session_id);
            if records.is_empty() {
                // Nothing mappable survived; the entries are dropped
                delivered += batch.len();
                continue;
            }

            match sink.send_batch(table, &records).await {
                Ok(()) => {
                    delivered += batch.len();
                    tracing::debug!(table, count = batch.len(), "Batch delivered");
                }
                Err(e) => {
                    retained.extend_from_slice(batch);
                    tracing::warn!(table, count = batch.len(), error = %e, "Batch failed, retained for next cycle");
                }
            }
        }

        let retained_count = retained.len();
        self.queues
            .replace_after_sync(kind, snapshot.len(), retained)?;

        Ok((delivered, retained_count))
    }

    /// Map a batch of queued events to wire records.
    ///
    /// An entry that no longer deserializes is dropped with a warning
    /// rather than poisoning its batch forever.
    fn wire_records(
        &self,
        kind: QueueKind,
        batch: &[serde_json::Value],
        client_id: &str,
        session_id: &str,
    ) -> Vec<serde_json::Value> {
        let mut records = Vec::with_capacity(batch.len());
        for raw in batch {
            let mapped = match kind {
                QueueKind::Analytics => events::analytics_wire_record(raw, client_id, session_id),
                QueueKind::Feedback => events::feedback_wire_record(raw, client_id, session_id),
            };
            match mapped {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(queue = ?kind, error = %e, "Dropping malformed pending event");
                }
            }
        }
        records
    }

    fn table_for(&self, kind: QueueKind) -> &str {
        match kind {
            QueueKind::Analytics => &self.config.sink.analytics_table,
            QueueKind::Feedback => &self.config.sink.feedback_table,
        }
    }

    /// Update engine state after a cycle and mirror it into the store.
    fn finish_cycle(&self, successful: usize, failed: usize, had_internal_error: bool) {
        let now = Utc::now();
        let result = LastSyncResult {
            successful,
            failed,
            timestamp: now,
        };

        {
            let mut state = self.state.lock().unwrap();
            state.last_sync_time = Some(now);
            if failed > 0 || had_internal_error {
                state.error_count += 1;
            } else if successful > 0 {
                state.error_count = 0;
            }
            state.last_result = Some(result.clone());
        }

        // Mirrors are best-effort; losing them costs debounce accuracy, not events
        if let Err(e) = self.store.set(
            keys::LAST_SYNC_TIME,
            &serde_json::Value::String(now.to_rfc3339()),
        ) {
            tracing::warn!(error = %e, "Failed to persist last sync time");
        }
        match serde_json::to_value(&result) {
            Ok(value) => {
                if let Err(e) = self.store.set(keys::LAST_SYNC_RESULT, &value) {
                    tracing::warn!(error = %e, "Failed to persist last sync result");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to serialize last sync result"),
        }
    }
}
